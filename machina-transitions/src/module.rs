//! Shared plumbing for the transitions module family.

use crate::condition::Condition;
use crate::error::TransitionError;
use crate::graph::TransitionGraph;
use machina_core::error::MachineError;
use machina_core::module::Anchor;
use machina_core::state::State;
use machina_core::StateMachine;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Graph ownership and machine linkage shared by the auto and manual
/// variants. Single-link: the graph tracks one machine's current state.
pub(crate) struct TransitionsCore {
    pub(crate) anchor: Anchor,
    pub(crate) graph: Arc<Mutex<TransitionGraph>>,
}

impl TransitionsCore {
    pub(crate) fn new() -> Self {
        Self {
            anchor: Anchor::new(),
            graph: Arc::new(Mutex::new(TransitionGraph::default())),
        }
    }

    /// The graph is build-time-only once the machine is armed: mutation
    /// requires a linked, idle machine.
    fn allow_mutation(&self) -> Result<(), TransitionError> {
        let machine = self.anchor.machine().ok_or_else(|| {
            tracing::warn!("transition added to an unlinked transitions module");
            TransitionError::NotLinked
        })?;

        if machine.is_running() {
            tracing::warn!("transition graph mutated while the machine is running");
            return Err(TransitionError::MachineRunning);
        }

        Ok(())
    }

    pub(crate) fn add_transition(
        &self,
        from: Arc<dyn State>,
        to: Arc<dyn State>,
        condition: Arc<dyn Condition>,
    ) -> Result<(), TransitionError> {
        self.allow_mutation()?;
        self.graph.lock().add_from_to(from, to, condition);
        Ok(())
    }

    pub(crate) fn add_any_transition(
        &self,
        to: Arc<dyn State>,
        condition: Arc<dyn Condition>,
    ) -> Result<(), TransitionError> {
        self.allow_mutation()?;
        self.graph.lock().add_any_to(to, condition);
        Ok(())
    }

    pub(crate) fn handle_ran(&self, machine: &StateMachine) {
        let current = machine.current_state();
        self.graph.lock().activate(current.as_ref());
    }

    pub(crate) fn handle_changed(&self, state: &Arc<dyn State>) {
        self.graph.lock().activate(Some(state));
    }

    /// Evaluates the active bundle set once, requesting a detached state
    /// change on the first satisfied edge.
    pub(crate) fn try_advance(&self) -> bool {
        let machine = match self.anchor.machine() {
            Some(machine) => machine,
            None => return false,
        };
        advance(&machine, &self.graph).is_some()
    }
}

/// One evaluation pass: wildcard bundle first, then the current state's
/// bundle; fires `change_state` without blocking the caller on completion.
pub(crate) fn advance(
    machine: &StateMachine,
    graph: &Mutex<TransitionGraph>,
) -> Option<JoinHandle<Result<(), MachineError>>> {
    let current = machine.current_state();
    let target = graph.lock().find_target(current.as_ref())?;
    Some(machine.change_state_detached(target))
}
