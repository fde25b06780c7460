//! Externally-driven transition evaluation.

use crate::condition::Condition;
use crate::error::TransitionError;
use crate::module::TransitionsCore;
use machina_core::module::{Links, Module};
use machina_core::state::State;
use machina_core::StateMachine;
use std::any::TypeId;
use std::sync::Arc;

/// Transitions module that evaluates its graph only on an explicit tick,
/// e.g. from a host's per-frame loop.
pub struct ManualTransitionsModule {
    core: TransitionsCore,
}

impl ManualTransitionsModule {
    pub fn new() -> Self {
        Self {
            core: TransitionsCore::new(),
        }
    }

    /// Adds a from/to edge. Build-time only: rejected once the machine
    /// is running.
    pub fn add_transition(
        &self,
        from: Arc<dyn State>,
        to: Arc<dyn State>,
        condition: Arc<dyn Condition>,
    ) -> Result<(), TransitionError> {
        self.core.add_transition(from, to, condition)
    }

    /// Adds a wildcard edge applicable from any state except the target.
    pub fn add_any_transition(
        &self,
        to: Arc<dyn State>,
        condition: Arc<dyn Condition>,
    ) -> Result<(), TransitionError> {
        self.core.add_any_transition(to, condition)
    }

    /// Evaluates the active bundle set once. Returns `false` without
    /// evaluating when the machine is not running or a transition is
    /// already in flight; `true` means a state change was requested
    /// (fire-and-forget, the caller does not block on completion).
    pub fn tick(&self) -> bool {
        let machine = match self.core.anchor.machine() {
            Some(machine) => machine,
            None => return false,
        };
        if !machine.is_running() || machine.in_transition() {
            return false;
        }

        self.core.try_advance()
    }

    /// Evaluates unconditionally, bypassing the running and in-flight
    /// guards. Intended for tests and debugging only: a request fired
    /// while another transition is in flight preempts it.
    pub fn force_tick(&self) -> bool {
        self.core.try_advance()
    }
}

impl Default for ManualTransitionsModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ManualTransitionsModule {
    fn links(&self) -> &Links {
        self.core.anchor.links()
    }

    fn allow_link_to(&self, _machine: &StateMachine) -> bool {
        self.core.anchor.allow_link()
    }

    fn on_linked(&self, machine: &StateMachine) {
        if !self.core.anchor.linked(machine) {
            machine.remove_module_by_id(TypeId::of::<Self>());
        }
    }

    fn on_unlinked(&self, machine: &StateMachine) {
        self.core.anchor.unlinked(machine);
    }

    fn on_machine_ran(&self, machine: &StateMachine) {
        self.core.handle_ran(machine);
    }

    fn on_state_changed(&self, _machine: &StateMachine, state: &Arc<dyn State>) {
        self.core.handle_changed(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::TriggerCondition;
    use async_trait::async_trait;
    use machina_core::CancellationToken;

    struct A;

    #[async_trait]
    impl State for A {
        async fn enter(&self, _token: CancellationToken) {}
        async fn exit(&self, _token: CancellationToken) {}
    }

    struct B;

    #[async_trait]
    impl State for B {
        async fn enter(&self, _token: CancellationToken) {}
        async fn exit(&self, _token: CancellationToken) {}
    }

    struct C;

    #[async_trait]
    impl State for C {
        async fn enter(&self, _token: CancellationToken) {}
        async fn exit(&self, _token: CancellationToken) {}
    }

    #[tokio::test]
    async fn tick_round_trip() {
        let machine = StateMachine::new();
        let module = Arc::new(ManualTransitionsModule::new());
        machine.add_module(module.clone()).unwrap();

        // States {A, B, C}; one wildcard edge to B gated by a trigger.
        let a: Arc<dyn State> = Arc::new(A);
        let b: Arc<dyn State> = Arc::new(B);
        let _c: Arc<dyn State> = Arc::new(C);
        let trigger = Arc::new(TriggerCondition::new());
        module.add_any_transition(b.clone(), trigger.clone()).unwrap();

        machine.run().unwrap();
        machine.change_state(a).await.unwrap();

        // Nothing satisfied yet.
        assert!(!module.tick());
        machine.transition_task().await;
        assert!(machine.in_state::<A>());

        trigger.trigger();
        assert!(module.tick());
        // The detached request may still be queued; wait it out.
        while !machine.in_state::<B>() {
            tokio::task::yield_now().await;
            machine.transition_task().await;
        }

        // Consumed trigger: a second tick is a no-op.
        assert!(!module.tick());
        machine.transition_task().await;
        assert!(machine.in_state::<B>());
    }

    #[tokio::test]
    async fn tick_requires_running_machine() {
        let machine = StateMachine::new();
        let module = Arc::new(ManualTransitionsModule::new());
        machine.add_module(module.clone()).unwrap();

        let b: Arc<dyn State> = Arc::new(B);
        let trigger = Arc::new(TriggerCondition::new());
        module.add_any_transition(b, trigger.clone()).unwrap();

        trigger.trigger();
        assert!(!module.tick());
    }

    #[tokio::test]
    async fn force_tick_bypasses_running_guard() {
        let machine = StateMachine::new();
        let module = Arc::new(ManualTransitionsModule::new());
        machine.add_module(module.clone()).unwrap();

        let b: Arc<dyn State> = Arc::new(B);
        let trigger = Arc::new(TriggerCondition::new());
        module.add_any_transition(b, trigger.clone()).unwrap();

        trigger.trigger();
        assert!(!module.tick());
        // The forced pass still fires the request; the idle machine then
        // rejects it and no state is committed.
        assert!(module.force_tick());
        machine.transition_task().await;
        assert!(machine.current_state().is_none());
    }

    #[tokio::test]
    async fn single_link_module_rejects_second_machine() {
        let first = StateMachine::new();
        let second = StateMachine::new();
        let module = Arc::new(ManualTransitionsModule::new());

        first.add_module(module.clone()).unwrap();
        let err = second.add_module(module.clone()).unwrap_err();
        assert!(matches!(
            err,
            machina_core::MachineError::LinkDenied { .. }
        ));
        assert_eq!(module.links().count(), 1);
    }
}
