//! # machina-modules
//!
//! Ready-made lifecycle modules for machina machines:
//! - [`StackOverflowModule`]: reentrancy-depth guard that locks the
//!   machine when synchronous transition cycles run away
//! - [`StateCacheModule`]: type-keyed cache of visited states
//! - [`SynchronousModule`]: strict gate and timing auditor for machines
//!   that promise non-suspending transitions
//! - [`SnapshotModule`]: change-detection tokens for cheap "has anything
//!   happened since" polling

pub mod cache;
pub mod snapshot;
pub mod stack;
pub mod sync_audit;

pub use cache::StateCacheModule;
pub use snapshot::{SnapshotModule, SnapshotToken};
pub use stack::{StackOverflowModule, DEFAULT_OVERFLOW_DEPTH};
pub use sync_audit::{SynchronousModule, DEFAULT_BUDGET};
