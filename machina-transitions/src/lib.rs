//! # machina-transitions
//!
//! The transition graph half of machina.
//!
//! This crate provides:
//! - The composable condition algebra (function, value, trigger, AND/OR)
//! - Condition-gated edges with from/to and wildcard applicability
//! - Insertion-ordered bundles with deterministic first-match evaluation
//! - The transitions module family: timer-driven ([`AutoTransitionsModule`])
//!   and externally-ticked ([`ManualTransitionsModule`]) graph evaluation

pub mod auto;
pub mod condition;
pub mod error;
mod graph;
pub mod manual;
mod module;
pub mod transition;

pub use auto::{AutoTransitionsModule, DEFAULT_TICK};
pub use condition::{
    AllCondition, AnyCondition, Condition, FnCondition, TriggerCondition, ValueCondition,
};
pub use error::TransitionError;
pub use manual::ManualTransitionsModule;
pub use transition::{Transition, TransitionBundle};
