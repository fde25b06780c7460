//! The condition algebra gating transition edges.
//!
//! `verify` is a pure query - no side effect beyond reading latched state -
//! so composite evaluation order affects performance, never correctness.
//! `recondition` restores "not yet satisfied" semantics after a condition's
//! edge scope becomes active; it is idempotent on stateless variants.

use crate::error::TransitionError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A reconditionable boolean predicate.
pub trait Condition: Send + Sync + 'static {
    fn verify(&self) -> bool;

    fn recondition(&self) {}
}

/// Condition backed by a predicate closure, with an optional recondition
/// hook for resetting external latched state.
pub struct FnCondition {
    verify: Box<dyn Fn() -> bool + Send + Sync>,
    recondition: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FnCondition {
    pub fn new<F>(verify: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            verify: Box::new(verify),
            recondition: None,
        }
    }

    pub fn with_recondition<F, R>(verify: F, recondition: R) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        Self {
            verify: Box::new(verify),
            recondition: Some(Box::new(recondition)),
        }
    }
}

impl Condition for FnCondition {
    fn verify(&self) -> bool {
        (self.verify)()
    }

    fn recondition(&self) {
        if let Some(recondition) = &self.recondition {
            recondition();
        }
    }
}

/// Condition satisfied while a mutable slot equals a fixed target value.
///
/// The slot survives reconditioning; only the trigger specialization
/// resets.
pub struct ValueCondition<T> {
    value: Mutex<T>,
    target: T,
}

impl<T: PartialEq + Send + Sync + 'static> ValueCondition<T> {
    pub fn new(target: T) -> Self
    where
        T: Default,
    {
        Self {
            value: Mutex::new(T::default()),
            target,
        }
    }

    pub fn with_value(target: T, value: T) -> Self {
        Self {
            value: Mutex::new(value),
            target,
        }
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }
}

impl<T: PartialEq + Send + Sync + 'static> Condition for ValueCondition<T> {
    fn verify(&self) -> bool {
        *self.value.lock() == self.target
    }
}

/// Latch-until-consumed boolean condition for one-shot signals.
///
/// `trigger` sets the latch; `verify` reads it; `recondition` (or an
/// explicit `reset`) clears it, so a single trigger satisfies at most one
/// transition.
#[derive(Debug, Default)]
pub struct TriggerCondition {
    latch: AtomicBool,
}

impl TriggerCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.latch.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.latch.store(false, Ordering::SeqCst);
    }
}

impl Condition for TriggerCondition {
    fn verify(&self) -> bool {
        self.latch.load(Ordering::SeqCst)
    }

    fn recondition(&self) {
        self.reset();
    }
}

/// AND-composite: satisfied iff every child verifies. Short-circuits.
pub struct AllCondition {
    children: Vec<Arc<dyn Condition>>,
}

impl AllCondition {
    pub fn new(children: Vec<Arc<dyn Condition>>) -> Result<Self, TransitionError> {
        if children.is_empty() {
            return Err(TransitionError::EmptyComposite);
        }
        Ok(Self { children })
    }
}

impl Condition for AllCondition {
    fn verify(&self) -> bool {
        self.children.iter().all(|child| child.verify())
    }

    fn recondition(&self) {
        for child in &self.children {
            child.recondition();
        }
    }
}

/// OR-composite: satisfied iff any child verifies. Short-circuits.
pub struct AnyCondition {
    children: Vec<Arc<dyn Condition>>,
}

impl AnyCondition {
    pub fn new(children: Vec<Arc<dyn Condition>>) -> Result<Self, TransitionError> {
        if children.is_empty() {
            return Err(TransitionError::EmptyComposite);
        }
        Ok(Self { children })
    }
}

impl Condition for AnyCondition {
    fn verify(&self) -> bool {
        self.children.iter().any(|child| child.verify())
    }

    fn recondition(&self) {
        for child in &self.children {
            child.recondition();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed(value: bool) -> Arc<dyn Condition> {
        Arc::new(FnCondition::new(move || value))
    }

    #[test]
    fn trigger_is_consumed_by_recondition() {
        let trigger = TriggerCondition::new();
        assert!(!trigger.verify());

        trigger.trigger();
        assert!(trigger.verify());
        assert!(trigger.verify(), "verify must not consume the latch");

        trigger.recondition();
        assert!(!trigger.verify());

        // Reconditioning without a new trigger stays unsatisfied.
        trigger.recondition();
        assert!(!trigger.verify());
    }

    #[test]
    fn value_condition_tracks_slot() {
        let condition = ValueCondition::with_value("ready", "idle");
        assert!(!condition.verify());

        condition.set("ready");
        assert!(condition.verify());

        // Plain value conditions do not reset on recondition.
        condition.recondition();
        assert!(condition.verify());
    }

    #[test]
    fn fn_condition_runs_recondition_hook() {
        let latch = Arc::new(AtomicBool::new(true));
        let read = latch.clone();
        let clear = latch.clone();
        let condition = FnCondition::with_recondition(
            move || read.load(Ordering::SeqCst),
            move || clear.store(false, Ordering::SeqCst),
        );

        assert!(condition.verify());
        condition.recondition();
        assert!(!condition.verify());
    }

    #[test]
    fn composite_truth_table() {
        let cases = [
            (vec![true, false], false, true),
            (vec![true, true], true, true),
            (vec![false, false], false, false),
        ];

        for (children, all_expected, any_expected) in cases {
            let children: Vec<_> = children.into_iter().map(fixed).collect();
            let all = AllCondition::new(children.clone()).unwrap();
            let any = AnyCondition::new(children).unwrap();
            assert_eq!(all.verify(), all_expected);
            assert_eq!(any.verify(), any_expected);
        }
    }

    #[test]
    fn empty_composite_is_rejected() {
        assert!(matches!(
            AllCondition::new(Vec::new()),
            Err(TransitionError::EmptyComposite)
        ));
        assert!(matches!(
            AnyCondition::new(Vec::new()),
            Err(TransitionError::EmptyComposite)
        ));
    }

    #[test]
    fn composite_recondition_recurses() {
        let trigger = Arc::new(TriggerCondition::new());
        trigger.trigger();

        let all = AllCondition::new(vec![trigger.clone() as Arc<dyn Condition>]).unwrap();
        assert!(all.verify());

        all.recondition();
        assert!(!trigger.verify());
    }

    proptest! {
        #[test]
        fn composites_agree_with_bool_fold(children in proptest::collection::vec(any::<bool>(), 1..8)) {
            let expected_all = children.iter().all(|v| *v);
            let expected_any = children.iter().any(|v| *v);

            let children: Vec<_> = children.into_iter().map(fixed).collect();
            prop_assert_eq!(AllCondition::new(children.clone()).unwrap().verify(), expected_all);
            prop_assert_eq!(AnyCondition::new(children).unwrap().verify(), expected_any);
        }
    }
}
