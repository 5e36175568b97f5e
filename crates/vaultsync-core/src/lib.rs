//! vaultsync core - domain types, configuration and ports
//!
//! This crate is the hexagonal core shared by every other vaultsync crate:
//! - **Domain types** - `SyncRecord`, `SyncQueueEntry`, `ConflictInfo`,
//!   `MergeResult`, `ActivityLogEntry`, `SyncState`, exclusion verdicts
//! - **Configuration** - typed YAML configuration with validation
//! - **Port definitions** - `IRemoteStore`, `ILocalStore`, `ITokenProvider`,
//!   `IStateRepository`, `INotificationSink`, `IProgressSink`
//!
//! # Architecture
//!
//! The domain module is pure data and rules with no I/O. Ports define the
//! trait interfaces that adapter crates (or test fakes) implement, and the
//! sync engine consumes them as `Arc<dyn Trait>`.

pub mod config;
pub mod domain;
pub mod ports;
