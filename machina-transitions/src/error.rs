//! Transition graph error types.

use thiserror::Error;

/// Errors from graph construction and condition composition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("composite condition requires at least one child")]
    EmptyComposite,

    #[error("transitions module is not linked to a machine")]
    NotLinked,

    #[error("transition graph cannot be mutated while the machine is running")]
    MachineRunning,
}
