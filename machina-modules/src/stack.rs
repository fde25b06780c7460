//! Reentrancy-depth guard.

use machina_core::module::{Anchor, Links, Module};
use machina_core::state::State;
use machina_core::StateMachine;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default number of nested pre-change notifications tolerated before the
/// guard locks.
pub const DEFAULT_OVERFLOW_DEPTH: usize = 50;

const LOCKED_CAPACITY: usize = 8;

/// Detects and breaks unbounded synchronous transition cycles
/// (A -> B -> A -> ... requested from within completion callbacks).
///
/// `depth` counts pre-change notifications since the last committed
/// transition; a commit (or machine stop) resets it. Reaching
/// `overflow_depth` locks the guard: further state changes are denied
/// until [`StackOverflowModule::unlock`] or the machine stops.
pub struct StackOverflowModule {
    anchor: Anchor,
    overflow_depth: usize,
    depth: AtomicUsize,
    max_depth: AtomicUsize,
    locked: AtomicBool,
    locked_tx: broadcast::Sender<()>,
}

impl StackOverflowModule {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_OVERFLOW_DEPTH)
    }

    pub fn with_depth(overflow_depth: usize) -> Self {
        let (locked_tx, _) = broadcast::channel(LOCKED_CAPACITY);
        Self {
            anchor: Anchor::new(),
            overflow_depth,
            depth: AtomicUsize::new(0),
            max_depth: AtomicUsize::new(0),
            locked: AtomicBool::new(false),
            locked_tx,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// High-water mark of the depth counter, for diagnostics.
    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Clears the lock and the depth counter.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        self.depth.store(0, Ordering::SeqCst);
    }

    /// Notified once each time the guard engages.
    pub fn subscribe_locked(&self) -> broadcast::Receiver<()> {
        self.locked_tx.subscribe()
    }

    fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
        tracing::warn!(
            overflow_depth = self.overflow_depth,
            "reentrancy guard locked the machine"
        );
        let _ = self.locked_tx.send(());
    }
}

impl Default for StackOverflowModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for StackOverflowModule {
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
        self.anchor.unlinked(machine);
    }

    fn allow_change_state(&self, _machine: &StateMachine, _target: &Arc<dyn State>) -> bool {
        !self.is_locked()
    }

    fn on_state_pre_changed(&self, _machine: &StateMachine, _target: &Arc<dyn State>) {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_depth.fetch_max(depth, Ordering::SeqCst);

        if depth >= self.overflow_depth {
            self.lock();
        }
    }

    fn on_state_changed(&self, _machine: &StateMachine, _state: &Arc<dyn State>) {
        self.depth.store(0, Ordering::SeqCst);
    }

    fn on_machine_stopped(&self, _machine: &StateMachine) {
        self.depth.store(0, Ordering::SeqCst);
        self.max_depth.store(0, Ordering::SeqCst);
        self.locked.store(false, Ordering::SeqCst);
    }
}
