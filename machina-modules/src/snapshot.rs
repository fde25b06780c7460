//! Change-detection snapshots.

use machina_core::module::{Anchor, Links, Module};
use machina_core::state::State;
use machina_core::StateMachine;
use parking_lot::Mutex;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap handle answering "has the machine changed state since this was
/// issued?". Clones observe the same snapshot.
#[derive(Clone, Default)]
pub struct SnapshotToken {
    changed: Arc<AtomicBool>,
}

impl SnapshotToken {
    pub fn has_changes(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    fn mark(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }
}

/// Issues [`SnapshotToken`]s marked dirty by the next committed
/// transition.
///
/// All callers between two transitions share one token; the commit takes
/// it out of the slot and marks it, so the first [`SnapshotModule::token`]
/// call afterwards starts a fresh snapshot. Single-link.
#[derive(Default)]
pub struct SnapshotModule {
    anchor: Anchor,
    token: Mutex<Option<SnapshotToken>>,
}

impl SnapshotModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot token, issuing one if none is outstanding.
    pub fn token(&self) -> SnapshotToken {
        self.token
            .lock()
            .get_or_insert_with(SnapshotToken::default)
            .clone()
    }
}

impl Module for SnapshotModule {
    fn links(&self) -> &Links {
        self.anchor.links()
    }

    fn allow_link_to(&self, _machine: &StateMachine) -> bool {
        self.anchor.allow_link()
    }

    fn on_linked(&self, machine: &StateMachine) {
        if !self.anchor.linked(machine) {
            machine.remove_module_by_id(TypeId::of::<Self>());
        }
    }

    fn on_unlinked(&self, machine: &StateMachine) {
        self.token.lock().take();
        self.anchor.unlinked(machine);
    }

    fn on_state_changed(&self, _machine: &StateMachine, _state: &Arc<dyn State>) {
        if let Some(token) = self.token.lock().take() {
            token.mark();
        }
    }
}
