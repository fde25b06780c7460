//! The module contract: pluggable observers and gatekeepers of machine
//! lifecycle events.
//!
//! Modules are consulted in registration order for every gate and
//! notification hook. Boolean gates short-circuit on the first `false`;
//! side effects of modules already polled are not rolled back, so gates
//! must be free of side effects - only notification hooks should mutate.

use crate::machine::{StateMachine, WeakStateMachine};
use crate::state::{AsAny, State};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle observer/gatekeeper. Every method has a safe default, so a
/// module implements only the hooks it cares about plus [`Module::links`].
pub trait Module: AsAny + Send + Sync + 'static {
    /// Link bookkeeping shared with the machine. Multi-link modules embed
    /// a [`Links`]; single-link modules expose it through an [`Anchor`].
    fn links(&self) -> &Links;

    /// Display name for diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn allow_link_to(&self, _machine: &StateMachine) -> bool {
        true
    }

    fn on_linked(&self, _machine: &StateMachine) {}

    fn on_unlinked(&self, _machine: &StateMachine) {}

    fn allow_run(&self, _machine: &StateMachine) -> bool {
        true
    }

    fn on_machine_ran(&self, _machine: &StateMachine) {}

    fn allow_change_state(&self, _machine: &StateMachine, _target: &Arc<dyn State>) -> bool {
        true
    }

    fn on_state_pre_changed(&self, _machine: &StateMachine, _target: &Arc<dyn State>) {}

    fn on_state_changed(&self, _machine: &StateMachine, _state: &Arc<dyn State>) {}

    fn allow_stop(&self, _machine: &StateMachine) -> bool {
        true
    }

    fn on_machine_stopped(&self, _machine: &StateMachine) {}
}

/// Link counter for a module. The machine increments it before
/// `on_linked` fires and decrements it before `on_unlinked`, so hooks
/// observe the post-change count.
#[derive(Debug, Default)]
pub struct Links {
    count: AtomicUsize,
}

impl Links {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_linked(&self) -> bool {
        self.count() > 0
    }

    pub(crate) fn attach(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn detach(&self) -> usize {
        self.count.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

/// Link bookkeeping for single-link modules: a [`Links`] plus a weak
/// backref to the owning machine.
///
/// `allow_link` refuses a second link up front; should a race still
/// double-link, [`Anchor::linked`] reports the violation and the module is
/// expected to self-detach from the offending machine.
#[derive(Default)]
pub struct Anchor {
    links: Links,
    machine: Mutex<Option<WeakStateMachine>>,
}

impl Anchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn allow_link(&self) -> bool {
        !self.links.is_linked()
    }

    /// Records the owning machine. Returns `false` when this link is a
    /// double-link; the caller must then remove itself from `machine`.
    pub fn linked(&self, machine: &StateMachine) -> bool {
        if self.links.count() > 1 {
            tracing::error!("single-link module linked twice");
            return false;
        }

        *self.machine.lock() = Some(machine.downgrade());
        true
    }

    /// Clears the backref when unlinking from the recorded machine.
    pub fn unlinked(&self, machine: &StateMachine) {
        let mut slot = self.machine.lock();
        let is_owner = slot
            .as_ref()
            .and_then(WeakStateMachine::upgrade)
            .is_some_and(|owner| owner.ptr_eq(machine));
        if is_owner {
            *slot = None;
        }
    }

    /// The owning machine, if still alive.
    pub fn machine(&self) -> Option<StateMachine> {
        self.machine.lock().as_ref().and_then(WeakStateMachine::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_count_round_trip() {
        let links = Links::new();
        assert!(!links.is_linked());

        assert_eq!(links.attach(), 1);
        assert_eq!(links.attach(), 2);
        assert!(links.is_linked());

        assert_eq!(links.detach(), 1);
        assert_eq!(links.detach(), 0);
        assert!(!links.is_linked());
    }

    #[test]
    fn anchor_allows_only_first_link() {
        let anchor = Anchor::new();
        assert!(anchor.allow_link());

        anchor.links().attach();
        assert!(!anchor.allow_link());
    }

    #[test]
    fn anchor_records_machine() {
        let machine = StateMachine::new();
        let anchor = Anchor::new();

        anchor.links().attach();
        assert!(anchor.linked(&machine));
        assert!(anchor.machine().is_some_and(|m| m.ptr_eq(&machine)));

        anchor.links().detach();
        anchor.unlinked(&machine);
        assert!(anchor.machine().is_none());
    }

    #[test]
    fn anchor_flags_double_link() {
        let machine = StateMachine::new();
        let anchor = Anchor::new();

        anchor.links().attach();
        anchor.links().attach();
        assert!(!anchor.linked(&machine));
    }
}
