//! Synchronous-transition auditor.

use machina_core::module::{Links, Module};
use machina_core::state::State;
use machina_core::StateMachine;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wall-clock budget for a single transition.
pub const DEFAULT_BUDGET: Duration = Duration::from_millis(1);

/// Enforces that a machine only hosts fast, non-suspending transitions.
///
/// In strict mode (the default) any target whose
/// [`State::is_synchronous`] marker is `false` is denied outright. The
/// auditor additionally times each transition from pre-change to commit
/// and logs an error when it exceeds the budget - a state that claims to
/// be synchronous but stalls shows up here.
pub struct SynchronousModule {
    links: Links,
    strict: bool,
    budget: Duration,
    started: Mutex<Option<Instant>>,
}

impl SynchronousModule {
    pub fn new() -> Self {
        Self::with_budget(true, DEFAULT_BUDGET)
    }

    pub fn with_budget(strict: bool, budget: Duration) -> Self {
        Self {
            links: Links::new(),
            strict,
            budget,
            started: Mutex::new(None),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl Default for SynchronousModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for SynchronousModule {
    fn links(&self) -> &Links {
        &self.links
    }

    fn allow_change_state(&self, _machine: &StateMachine, target: &Arc<dyn State>) -> bool {
        if self.strict && !target.is_synchronous() {
            tracing::error!(
                state = target.name(),
                "state does not declare itself synchronous"
            );
            return false;
        }

        true
    }

    fn on_state_pre_changed(&self, _machine: &StateMachine, _target: &Arc<dyn State>) {
        *self.started.lock() = Some(Instant::now());
    }

    fn on_state_changed(&self, _machine: &StateMachine, state: &Arc<dyn State>) {
        let Some(started) = self.started.lock().take() else {
            return;
        };

        let elapsed = started.elapsed();
        if elapsed > self.budget {
            tracing::error!(
                state = state.name(),
                elapsed_us = elapsed.as_micros() as u64,
                budget_us = self.budget.as_micros() as u64,
                "transition exceeded the synchronous budget"
            );
        }
    }

    fn on_machine_stopped(&self, _machine: &StateMachine) {
        *self.started.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use machina_core::state::{SyncState, Synchronous};
    use machina_core::{CancellationToken, MachineError};

    struct Blink;

    impl SyncState for Blink {
        fn enter(&self) {}
        fn exit(&self) {}
    }

    struct Slow;

    #[async_trait]
    impl State for Slow {
        async fn enter(&self, _token: CancellationToken) {
            tokio::task::yield_now().await;
        }

        async fn exit(&self, _token: CancellationToken) {}
    }

    #[tokio::test]
    async fn strict_mode_denies_async_states() {
        let machine = StateMachine::new();
        machine
            .add_module(Arc::new(SynchronousModule::new()))
            .unwrap();
        machine.run().unwrap();

        let err = machine.change_state(Arc::new(Slow)).await.unwrap_err();
        assert!(matches!(err, MachineError::Denied { .. }));
        assert!(machine.current_state().is_none());
    }

    #[tokio::test]
    async fn strict_mode_admits_synchronous_states() {
        let machine = StateMachine::new();
        machine
            .add_module(Arc::new(SynchronousModule::new()))
            .unwrap();
        machine.run().unwrap();

        machine
            .change_state(Arc::new(Synchronous(Blink)))
            .await
            .unwrap();
        assert!(machine.in_state::<Synchronous<Blink>>());
    }

    #[tokio::test]
    async fn lenient_mode_only_audits() {
        let machine = StateMachine::new();
        machine
            .add_module(Arc::new(SynchronousModule::with_budget(
                false,
                DEFAULT_BUDGET,
            )))
            .unwrap();
        machine.run().unwrap();

        machine.change_state(Arc::new(Slow)).await.unwrap();
        assert!(machine.in_state::<Slow>());
    }
}
