//! Notification and progress ports (driven/secondary ports)
//!
//! The engine emits exactly one summary [`Notification`] per terminal cycle
//! outcome, and reports per-file [`Progress`] during long operations such
//! as a full re-sync or duplicate cleanup.
//!
//! ## Design Notes
//!
//! - Notifications are fire-and-forget; delivery failures are logged by the
//!   engine and never affect sync.
//! - Progress sinks are synchronous and must not block.

use serde::{Deserialize, Serialize};

// ============================================================================
// Notification
// ============================================================================

/// Priority level for a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    /// Errors and conflicts that need the user
    High,
}

impl Default for NotificationPriority {
    fn default() -> Self {
        NotificationPriority::Normal
    }
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// A summary message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    /// Grouping key: "sync", "conflict", "error", "quota", "offline"
    pub category: String,
}

impl Notification {
    /// Creates a notification with `Normal` priority and no category
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Normal,
            category: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Low-priority summary of a completed cycle
    pub fn sync(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::Low)
            .with_category("sync")
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category("error")
    }

    pub fn conflict(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category("conflict")
    }

    pub fn quota(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category("quota")
    }

    pub fn offline(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body).with_category("offline")
    }
}

/// Port trait for user-facing notifications
#[async_trait::async_trait]
pub trait INotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

// ============================================================================
// Progress
// ============================================================================

/// One progress step of a long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Operation name, e.g. "full_resync" or "duplicate_cleanup"
    pub operation: String,
    /// Steps finished so far
    pub done: usize,
    /// Total steps, when known
    pub total: Option<usize>,
    /// File the step worked on
    pub path: Option<String>,
}

/// Port trait for progress reporting
pub trait IProgressSink: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Progress sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl IProgressSink for NullProgress {
    fn on_progress(&self, _progress: &Progress) {}
}
