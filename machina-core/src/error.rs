//! Coordinator error types.

use thiserror::Error;

/// Errors from the state machine coordinator.
///
/// `Denied`, `Cancelled` and `Superseded` are ordinary control-flow
/// outcomes: the machine stays in a well-defined state and the caller may
/// simply try again. The remaining variants report misuse (wrong machine
/// phase, duplicate registration) and never corrupt internal invariants -
/// the offending call is rejected before any mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("machine is already running")]
    AlreadyRunning,

    #[error("machine is not running")]
    NotRunning,

    #[error("module {module} denied {operation}")]
    Denied {
        module: &'static str,
        operation: &'static str,
    },

    #[error("transition cancelled")]
    Cancelled,

    #[error("transition superseded by a newer request")]
    Superseded,

    #[error("{what} cannot be mutated while the machine is running")]
    MutationWhileRunning { what: &'static str },

    #[error("module of type {type_name} already added")]
    ModuleExists { type_name: &'static str },

    #[error("module of type {type_name} refused to link")]
    LinkDenied { type_name: &'static str },
}

impl MachineError {
    /// Returns whether a module gate rejected the operation.
    pub fn is_denied(&self) -> bool {
        matches!(self, MachineError::Denied { .. })
    }

    /// Returns whether the transition ended without committing, either by
    /// direct cancellation or by losing to a newer request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MachineError::Cancelled | MachineError::Superseded)
    }
}
