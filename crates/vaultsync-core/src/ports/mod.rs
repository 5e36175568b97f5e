//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. The sync engine depends on these traits; their
//! implementations live in adapter crates or test fakes.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Cloud file store (change feed, transfers, quota)
//! - [`ILocalStore`] - The vault on local disk
//! - [`ITokenProvider`] - Access tokens for the remote store
//! - [`IStateRepository`] - Device-local record snapshot and activity ledger
//! - [`INotificationSink`] / [`IProgressSink`] - Summaries and progress

pub mod local_store;
pub mod notification;
pub mod remote_store;
pub mod state_repository;
pub mod token_provider;

pub use local_store::{ILocalStore, LocalEntry};
pub use notification::{
    INotificationSink, IProgressSink, Notification, NotificationPriority, NullProgress, Progress,
};
pub use remote_store::{
    ChangesPage, IRemoteStore, RateLimitSnapshot, RemoteError, RemoteFile, RemoteRevision,
    StorageQuota,
};
pub use state_repository::IStateRepository;
pub use token_provider::ITokenProvider;
