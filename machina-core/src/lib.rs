//! # machina-core
//!
//! The coordinator half of machina: an embeddable finite-state-machine
//! engine that manages transitions between application states under
//! concurrent, cancellable, asynchronous control.
//!
//! This crate provides:
//! - The [`State`] contract (cancellable async enter/exit, sync commit hooks)
//! - The [`Sequence`] transition choreography seam
//! - The [`Module`] lifecycle observer/gatekeeper contract
//! - The [`StateMachine`] coordinator with its serialized-with-preemption
//!   `change_state` protocol and two-tier cancellation hierarchy

pub mod error;
pub mod machine;
pub mod module;
pub mod sequence;
pub mod state;

pub use error::MachineError;
pub use machine::{StateMachine, WeakStateMachine};
pub use module::{Anchor, Links, Module};
pub use sequence::{DefaultSequence, Sequence};
pub use state::{same_state, AsAny, State, SyncState, Synchronous};

// Re-exported so downstream crates name the exact token type the engine
// links transition scopes to.
pub use tokio_util::sync::CancellationToken;
