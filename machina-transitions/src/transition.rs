//! Transition edges and bundles.

use crate::condition::Condition;
use machina_core::state::{same_state, State};
use std::sync::Arc;

/// A condition-gated edge to a target state.
///
/// A from/to edge applies only while the current state is the edge's
/// source. A wildcard ("any-to") edge applies from any current state
/// except the target itself, so a satisfied wildcard condition cannot
/// produce a self-loop no-op. Edges are immutable after construction;
/// only their condition's internal latch state ever changes.
pub struct Transition {
    from: Option<Arc<dyn State>>,
    to: Arc<dyn State>,
    condition: Arc<dyn Condition>,
}

impl Transition {
    pub fn from_to(
        from: Arc<dyn State>,
        to: Arc<dyn State>,
        condition: Arc<dyn Condition>,
    ) -> Self {
        Self {
            from: Some(from),
            to,
            condition,
        }
    }

    pub fn any_to(to: Arc<dyn State>, condition: Arc<dyn Condition>) -> Self {
        Self {
            from: None,
            to,
            condition,
        }
    }

    pub fn to(&self) -> &Arc<dyn State> {
        &self.to
    }

    pub fn is_wildcard(&self) -> bool {
        self.from.is_none()
    }

    /// Returns whether this edge applies to `current` and its condition is
    /// satisfied right now.
    pub fn validate(&self, current: Option<&Arc<dyn State>>) -> bool {
        let applicable = match &self.from {
            Some(from) => current.is_some_and(|current| same_state(current, from)),
            None => !current.is_some_and(|current| same_state(current, &self.to)),
        };

        applicable && self.condition.verify()
    }

    pub fn recondition(&self) {
        self.condition.recondition();
    }
}

/// An insertion-ordered collection of transitions sharing an applicability
/// scope (all edges leaving one state, or all wildcard edges).
///
/// Evaluation is deterministic: `find_first` walks insertion order and
/// returns the first satisfied edge. Move semantics make membership a
/// set property for free - one edge object cannot be inserted twice.
#[derive(Default)]
pub struct TransitionBundle {
    transitions: Vec<Transition>,
}

impl TransitionBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// First satisfied transition for `current`, in insertion order.
    pub fn find_first(&self, current: Option<&Arc<dyn State>>) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|transition| transition.validate(current))
    }

    pub fn recondition_all(&self) {
        for transition in &self.transitions {
            transition.recondition();
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{FnCondition, TriggerCondition};
    use async_trait::async_trait;
    use machina_core::CancellationToken;

    struct Stub;

    #[async_trait]
    impl State for Stub {
        async fn enter(&self, _token: CancellationToken) {}
        async fn exit(&self, _token: CancellationToken) {}
    }

    fn stub() -> Arc<dyn State> {
        Arc::new(Stub)
    }

    fn always() -> Arc<dyn Condition> {
        Arc::new(FnCondition::new(|| true))
    }

    #[test]
    fn from_to_requires_matching_source() {
        let a = stub();
        let b = stub();
        let edge = Transition::from_to(a.clone(), b.clone(), always());

        assert!(edge.validate(Some(&a)));
        assert!(!edge.validate(Some(&b)));
        assert!(!edge.validate(None));
    }

    #[test]
    fn wildcard_rejects_self_loop() {
        let a = stub();
        let b = stub();
        let edge = Transition::any_to(b.clone(), always());

        assert!(edge.validate(Some(&a)));
        assert!(!edge.validate(Some(&b)));
        // Applicable before the first transition as well.
        assert!(edge.validate(None));
    }

    #[test]
    fn unsatisfied_condition_blocks_edge() {
        let a = stub();
        let b = stub();
        let trigger = Arc::new(TriggerCondition::new());
        let edge = Transition::from_to(a.clone(), b, trigger.clone());

        assert!(!edge.validate(Some(&a)));
        trigger.trigger();
        assert!(edge.validate(Some(&a)));
    }

    #[test]
    fn find_first_is_insertion_ordered() {
        let a = stub();
        let b = stub();
        let c = stub();

        let mut bundle = TransitionBundle::new();
        bundle.add(Transition::from_to(a.clone(), b.clone(), always()));
        bundle.add(Transition::from_to(a.clone(), c.clone(), always()));
        assert_eq!(bundle.len(), 2);

        let first = bundle.find_first(Some(&a)).unwrap();
        assert!(same_state(first.to(), &b));
    }

    #[test]
    fn recondition_all_resets_every_member() {
        let a = stub();
        let b = stub();
        let first = Arc::new(TriggerCondition::new());
        let second = Arc::new(TriggerCondition::new());
        first.trigger();
        second.trigger();

        let mut bundle = TransitionBundle::new();
        bundle.add(Transition::from_to(a.clone(), b.clone(), first.clone()));
        bundle.add(Transition::any_to(b, second.clone()));

        bundle.recondition_all();
        assert!(!first.verify());
        assert!(!second.verify());
        assert!(bundle.find_first(Some(&a)).is_none());
    }
}
