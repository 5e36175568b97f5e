//! vaultsync conflict - conflict markers, merging and resolution
//!
//! Provides:
//! - [`markers`] - Git-style conflict marker analysis and resolution
//! - [`merge`] - Line-based three-way and two-way merges
//! - [`resolver`] - Strategy table mapping a diverged file to an outcome
//! - [`namer`] - Unique names for conflict and shadow copies
//!
//! Everything here is pure: no I/O, no async. The sync engine reads the
//! inputs, calls into this crate, and applies the outcome.

pub mod error;
pub mod markers;
pub mod merge;
pub mod namer;
pub mod resolver;

pub use error::{ConflictError, MarkerError};
pub use markers::{MarkerAnalysis, ResolvePreference, ResolvedText};
pub use merge::{merge_three_way, merge_two_way};
pub use namer::ConflictNamer;
pub use resolver::{ConflictInput, ConflictResolver, ResolutionOutcome};
