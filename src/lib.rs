//! # machina
//!
//! An embeddable async finite-state-machine engine.
//!
//! A [`StateMachine`] coordinates cancellable transitions between
//! [`State`]s: at most one transition is in flight at a time, and a new
//! request preempts the one it finds running. Behavior is extended
//! through [`Module`]s (lifecycle observers and gatekeepers) and the
//! enter/exit choreography is swappable via [`Sequence`].
//!
//! ```no_run
//! use machina::{StateMachine, State, CancellationToken};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Loading;
//!
//! #[async_trait]
//! impl State for Loading {
//!     async fn enter(&self, _token: CancellationToken) {}
//!     async fn exit(&self, _token: CancellationToken) {}
//! }
//!
//! # async fn demo() -> Result<(), machina::MachineError> {
//! let machine = StateMachine::new();
//! machine.run()?;
//! machine.change_state(Arc::new(Loading)).await?;
//! assert!(machine.in_state::<Loading>());
//! # Ok(())
//! # }
//! ```
//!
//! The crates compose as:
//! - [`machina_core`]: the machine, states, sequences, and the module
//!   contract
//! - [`machina_transitions`]: condition-gated transition graphs with
//!   timer-driven and externally-ticked evaluation
//! - [`machina_modules`]: ready-made modules (reentrancy guard, state
//!   cache, synchronous auditor, snapshots)

pub use machina_core::module::{Anchor, Links, Module};
pub use machina_core::sequence::{DefaultSequence, Sequence};
pub use machina_core::state::{same_state, AsAny, State, SyncState, Synchronous};
pub use machina_core::{CancellationToken, MachineError, StateMachine, WeakStateMachine};

pub use machina_transitions::{
    AllCondition, AnyCondition, AutoTransitionsModule, Condition, FnCondition,
    ManualTransitionsModule, Transition, TransitionBundle, TransitionError, TriggerCondition,
    ValueCondition,
};

pub use machina_modules::{
    SnapshotModule, SnapshotToken, StackOverflowModule, StateCacheModule, SynchronousModule,
};

pub use machina_core;
pub use machina_modules;
pub use machina_transitions;
