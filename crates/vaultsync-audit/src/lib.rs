//! vaultsync audit - the user-facing activity ledger
//!
//! Provides:
//! - `ActivityLedger`: append-only record of what the engine did to each file
//! - `ReasonCode`: structured codes attached to failure entries
//! - Persistence through `IStateRepository`; storage failures never
//!   interrupt a sync cycle

pub mod ledger;
pub mod reason;

pub use ledger::ActivityLedger;
pub use reason::ReasonCode;
