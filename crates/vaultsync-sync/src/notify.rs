//! Notification sink that writes to the log
//!
//! Used by the CLI and as the default when the host provides no UI.

use tracing::{info, warn};

use vaultsync_core::ports::{INotificationSink, Notification, NotificationPriority};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl INotificationSink for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.priority {
            NotificationPriority::High => warn!(
                category = %notification.category,
                title = %notification.title,
                "{}",
                notification.body
            ),
            NotificationPriority::Normal | NotificationPriority::Low => info!(
                category = %notification.category,
                title = %notification.title,
                "{}",
                notification.body
            ),
        }
        Ok(())
    }
}
