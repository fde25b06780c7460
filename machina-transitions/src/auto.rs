//! Timer-driven transition evaluation.

use crate::condition::Condition;
use crate::error::TransitionError;
use crate::module::{advance, TransitionsCore};
use machina_core::module::{Links, Module};
use machina_core::state::State;
use machina_core::StateMachine;
use parking_lot::Mutex;
use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default interval between evaluation passes when no edge fires.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Transitions module that evaluates its graph on a timer loop.
///
/// While the machine runs, the loop waits out any in-flight transition,
/// evaluates the active bundle set, and sleeps one tick when nothing
/// fired. The loop stops at its next await point once the machine stops
/// or the module is unlinked.
///
/// The loop is spawned from the machine's `run` hook, so with this module
/// registered `StateMachine::run` must be called from within a tokio
/// runtime.
pub struct AutoTransitionsModule {
    core: TransitionsCore,
    tick: Duration,
    loop_token: Mutex<Option<CancellationToken>>,
}

impl AutoTransitionsModule {
    pub fn new() -> Self {
        Self::with_tick(DEFAULT_TICK)
    }

    pub fn with_tick(tick: Duration) -> Self {
        Self {
            core: TransitionsCore::new(),
            tick,
            loop_token: Mutex::new(None),
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

    fn stop_loop(&self) {
        if let Some(token) = self.loop_token.lock().take() {
            token.cancel();
        }
    }
}

impl Default for AutoTransitionsModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for AutoTransitionsModule {
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
        self.stop_loop();
        self.core.anchor.unlinked(machine);
    }

    fn on_machine_ran(&self, machine: &StateMachine) {
        self.core.handle_ran(machine);

        let token = CancellationToken::new();
        if let Some(previous) = self.loop_token.lock().replace(token.clone()) {
            previous.cancel();
        }

        let weak = machine.downgrade();
        let graph = self.core.graph.clone();
        let tick = self.tick;

        tokio::spawn(async move {
            loop {
                let machine = match weak.upgrade() {
                    Some(machine) if machine.is_running() => machine,
                    _ => break,
                };

                machine.transition_task().await;
                if token.is_cancelled() {
                    break;
                }

                match advance(&machine, &graph) {
                    Some(pending) => {
                        // Waiting out the requested transition keeps the
                        // loop from stacking duplicate requests for the
                        // same edge.
                        let _ = pending.await;
                    }
                    None => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(tick) => {}
                        }
                    }
                }
            }
        });
    }

    fn on_machine_stopped(&self, _machine: &StateMachine) {
        self.stop_loop();
    }

    fn on_state_changed(&self, _machine: &StateMachine, state: &Arc<dyn State>) {
        self.core.handle_changed(state);
    }
}
