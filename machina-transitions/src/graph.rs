//! The transition graph: per-source bundles plus one wildcard bundle.

use crate::condition::Condition;
use crate::transition::{Transition, TransitionBundle};
use machina_core::state::State;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity key for a state instance. States have no intrinsic ordering
/// or hash, so the graph keys sources by `Arc` pointer identity.
fn state_key(state: &Arc<dyn State>) -> usize {
    Arc::as_ptr(state) as *const () as usize
}

/// Map from source state to its outgoing bundle, plus the wildcard bundle
/// and the bundle set active for the committed current state.
#[derive(Default)]
pub(crate) struct TransitionGraph {
    any_to: TransitionBundle,
    outgoing: HashMap<usize, TransitionBundle>,
    active: Option<usize>,
}

impl TransitionGraph {
    pub(crate) fn add_from_to(
        &mut self,
        from: Arc<dyn State>,
        to: Arc<dyn State>,
        condition: Arc<dyn Condition>,
    ) {
        let key = state_key(&from);
        self.outgoing
            .entry(key)
            .or_default()
            .add(Transition::from_to(from, to, condition));
    }

    pub(crate) fn add_any_to(&mut self, to: Arc<dyn State>, condition: Arc<dyn Condition>) {
        self.any_to.add(Transition::any_to(to, condition));
    }

    /// Recomputes the active bundle set for `current` and reconditions it,
    /// restoring "not yet satisfied" semantics for the newly active scope.
    pub(crate) fn activate(&mut self, current: Option<&Arc<dyn State>>) {
        self.active = current.map(state_key);

        self.any_to.recondition_all();
        if let Some(bundle) = self.active.and_then(|key| self.outgoing.get(&key)) {
            bundle.recondition_all();
        }
    }

    /// First satisfied outgoing edge for `current`: the wildcard bundle is
    /// always evaluated first, then the bundle keyed by the current state.
    pub(crate) fn find_target(&self, current: Option<&Arc<dyn State>>) -> Option<Arc<dyn State>> {
        if let Some(transition) = self.any_to.find_first(current) {
            return Some(transition.to().clone());
        }

        self.active
            .and_then(|key| self.outgoing.get(&key))
            .and_then(|bundle| bundle.find_first(current))
            .map(|transition| transition.to().clone())
    }
}
