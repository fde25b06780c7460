//! The state machine coordinator.
//!
//! Guarantees exactly one transition is ever in flight per machine.
//! Overlapping `change_state` calls are serialized with preemption: the
//! newest request cancels the in-flight choreography, waits for its
//! unwind, and only then starts its own. Serialization comes from this
//! cancel-then-await protocol plus an atomic in-flight slot claim - no
//! lock is ever held across an await point.

use crate::error::MachineError;
use crate::module::Module;
use crate::sequence::{DefaultSequence, Sequence};
use crate::state::State;
use parking_lot::Mutex;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

const STATE_CHANGED_CAPACITY: usize = 64;

struct ModuleEntry {
    type_id: TypeId,
    module: Arc<dyn Module>,
}

struct Inner {
    sequence: Box<dyn Sequence>,

    /// Registered modules in registration order, at most one per concrete
    /// type. Mutated only while the machine is idle.
    modules: Mutex<Vec<ModuleEntry>>,

    current: Mutex<Option<Arc<dyn State>>>,
    is_running: AtomicBool,

    /// Running-scope cancellation context; armed by `run`, cancelled by
    /// `stop`. Transition tokens are children of it.
    running_token: Mutex<Option<CancellationToken>>,

    /// Cancellation context of the in-flight transition, tagged with the
    /// request generation that owns it.
    transition_token: Mutex<Option<(u64, CancellationToken)>>,

    /// Completion signal of the in-flight transition; `None` when idle.
    inflight: Mutex<Option<watch::Sender<bool>>>,

    /// Latest-wins arbitration for racing `change_state` calls.
    generation: AtomicU64,

    state_changed: broadcast::Sender<Arc<dyn State>>,
}

/// A cheap-clone handle to a state machine instance.
///
/// Independent machine instances share nothing and may run in parallel.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

/// Non-owning machine handle for module backrefs.
#[derive(Clone)]
pub struct WeakStateMachine {
    inner: Weak<Inner>,
}

impl WeakStateMachine {
    pub fn upgrade(&self) -> Option<StateMachine> {
        self.inner.upgrade().map(|inner| StateMachine { inner })
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Creates a machine with the default exit-then-enter sequence.
    pub fn new() -> Self {
        Self::with_sequence(DefaultSequence)
    }

    /// Creates a machine with a custom transition choreography.
    pub fn with_sequence<Q: Sequence + 'static>(sequence: Q) -> Self {
        let (state_changed, _) = broadcast::channel(STATE_CHANGED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sequence: Box::new(sequence),
                modules: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                is_running: AtomicBool::new(false),
                running_token: Mutex::new(None),
                transition_token: Mutex::new(None),
                inflight: Mutex::new(None),
                generation: AtomicU64::new(0),
                state_changed,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakStateMachine {
        WeakStateMachine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns whether two handles refer to the same machine instance.
    pub fn ptr_eq(&self, other: &StateMachine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// The committed current state; `None` before the first transition.
    pub fn current_state(&self) -> Option<Arc<dyn State>> {
        self.inner.current.lock().clone()
    }

    /// Returns whether the current state is of concrete type `T`.
    pub fn in_state<T: State>(&self) -> bool {
        self.current_state()
            .is_some_and(|state| state.as_any().is::<T>())
    }

    /// Returns whether a transition choreography is currently executing.
    pub fn in_transition(&self) -> bool {
        self.inner.inflight.lock().is_some()
    }

    /// Resolves when no transition is in flight (immediately when idle).
    pub async fn transition_task(&self) {
        let rx = self
            .inner
            .inflight
            .lock()
            .as_ref()
            .map(watch::Sender::subscribe);
        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|done| *done).await;
        }
    }

    /// Stream of committed states, one notification per successful
    /// transition.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<dyn State>> {
        self.inner.state_changed.subscribe()
    }

    fn modules_snapshot(&self) -> Vec<Arc<dyn Module>> {
        self.inner
            .modules
            .lock()
            .iter()
            .map(|entry| entry.module.clone())
            .collect()
    }

    // =========================================================================
    // Run / Stop
    // =========================================================================

    /// Starts accepting transitions. Polls every module's `allow_run` in
    /// registration order; the first denial aborts and the machine stays
    /// idle.
    pub fn run(&self) -> Result<(), MachineError> {
        if self.is_running() {
            tracing::error!("run called on an already running machine");
            return Err(MachineError::AlreadyRunning);
        }

        let modules = self.modules_snapshot();
        for module in &modules {
            if !module.allow_run(self) {
                tracing::warn!(module = module.name(), "module denied machine run");
                return Err(MachineError::Denied {
                    module: module.name(),
                    operation: "run",
                });
            }
        }

        self.inner.is_running.store(true, Ordering::SeqCst);
        *self.inner.running_token.lock() = Some(CancellationToken::new());

        for module in &modules {
            module.on_machine_ran(self);
        }

        Ok(())
    }

    /// Stops the machine. Cancelling the running-scope context cascades to
    /// any in-flight transition, which unwinds without committing.
    pub fn stop(&self) -> Result<(), MachineError> {
        if !self.is_running() {
            tracing::error!("stop called on a machine that is not running");
            return Err(MachineError::NotRunning);
        }

        let modules = self.modules_snapshot();
        for module in &modules {
            if !module.allow_stop(self) {
                tracing::warn!(module = module.name(), "module denied machine stop");
                return Err(MachineError::Denied {
                    module: module.name(),
                    operation: "stop",
                });
            }
        }

        self.inner.is_running.store(false, Ordering::SeqCst);
        if let Some(token) = self.inner.running_token.lock().take() {
            token.cancel();
        }

        for module in &modules {
            module.on_machine_stopped(self);
        }

        Ok(())
    }

    // =========================================================================
    // ChangeState
    // =========================================================================

    /// Transitions to `target`, preempting any in-flight transition.
    pub async fn change_state(&self, target: Arc<dyn State>) -> Result<(), MachineError> {
        self.change_state_inner(target, None).await
    }

    /// Like [`StateMachine::change_state`], with a caller-supplied
    /// cancellation token linked into the transition scope.
    pub async fn change_state_with(
        &self,
        target: Arc<dyn State>,
        token: CancellationToken,
    ) -> Result<(), MachineError> {
        self.change_state_inner(target, Some(token)).await
    }

    /// Fire-and-forget transition request; the call site never blocks on
    /// completion. The returned handle may optionally be awaited.
    pub fn change_state_detached(
        &self,
        target: Arc<dyn State>,
    ) -> tokio::task::JoinHandle<Result<(), MachineError>> {
        let machine = self.clone();
        tokio::spawn(async move { machine.change_state(target).await })
    }

    async fn change_state_inner(
        &self,
        target: Arc<dyn State>,
        caller_token: Option<CancellationToken>,
    ) -> Result<(), MachineError> {
        if !self.is_running() {
            tracing::error!(
                state = target.name(),
                "change_state called while machine is not running"
            );
            return Err(MachineError::NotRunning);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Preempt the in-flight transition and wait for its unwind, then
        // claim the in-flight slot. Only the newest request ever proceeds;
        // older waiters observe a generation bump and bow out, which is
        // the same observable outcome as being cancelled by the newer
        // call. The generation tag on the token slot keeps a stale waiter
        // from cancelling a transition newer than itself.
        let (done_tx, transition_token) = loop {
            let current = self.inner.transition_token.lock().clone();
            if let Some((owner, token)) = current {
                if owner < generation {
                    token.cancel();
                }
            }
            self.transition_task().await;

            if self.inner.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(
                    state = target.name(),
                    "change_state superseded by a newer request"
                );
                return Err(MachineError::Superseded);
            }
            if !self.is_running() {
                return Err(MachineError::NotRunning);
            }

            // Gates are side-effect-free by contract, so re-polling them
            // after losing a claim race is harmless.
            let modules = self.modules_snapshot();
            for module in &modules {
                if !module.allow_change_state(self, &target) {
                    tracing::warn!(
                        module = module.name(),
                        state = target.name(),
                        "module denied state change"
                    );
                    return Err(MachineError::Denied {
                        module: module.name(),
                        operation: "change_state",
                    });
                }
            }

            let running = self.inner.running_token.lock().clone();
            let running = match running {
                Some(token) => token,
                None => return Err(MachineError::NotRunning),
            };

            let mut inflight = self.inner.inflight.lock();
            if inflight.is_some() {
                // Lost the claim race; preempt the winner and retry.
                continue;
            }
            let (tx, _rx) = watch::channel(false);
            *inflight = Some(tx.clone());
            let token = running.child_token();
            *self.inner.transition_token.lock() = Some((generation, token.clone()));
            break (tx, token);
        };

        // Link the caller's token into the transition scope. The forwarder
        // ends when either token fires; the transition token is always
        // cancelled after resolution, so the task cannot outlive the
        // transition by more than that.
        if let Some(caller) = caller_token {
            let child = transition_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => child.cancel(),
                    _ = child.cancelled() => {}
                }
            });
        }

        let from = self.current_state();
        let modules = self.modules_snapshot();
        for module in &modules {
            module.on_state_pre_changed(self, &target);
        }

        self.inner.sequence.pre_processing(from.as_ref(), &target);
        let success = self
            .inner
            .sequence
            .process(from.clone(), target.clone(), transition_token.clone())
            .await;

        let result = if success {
            *self.inner.current.lock() = Some(target.clone());
            self.inner.sequence.post_processing(from.as_ref(), &target);

            for module in &modules {
                module.on_state_changed(self, &target);
            }
            let _ = self.inner.state_changed.send(target.clone());

            Ok(())
        } else {
            tracing::warn!(state = target.name(), "transition ended without commit");
            Err(MachineError::Cancelled)
        };

        // Resolve the in-flight signal in every outcome. Lock order
        // (inflight, then transition_token) matches the claim above.
        {
            let mut inflight = self.inner.inflight.lock();
            if let Some((_, token)) = self.inner.transition_token.lock().take() {
                token.cancel();
            }
            *inflight = None;
        }
        let _ = done_tx.send(true);

        result
    }

    // =========================================================================
    // Module registry
    // =========================================================================

    /// Registers a module. At most one module instance per concrete type;
    /// the registry is build-time-only once the machine runs.
    pub fn add_module<M: Module>(&self, module: Arc<M>) -> Result<(), MachineError> {
        if self.is_running() {
            tracing::error!(
                module = module.name(),
                "module registry mutated while running"
            );
            return Err(MachineError::MutationWhileRunning {
                what: "module registry",
            });
        }

        let type_id = TypeId::of::<M>();
        let type_name = module.name();
        if self
            .inner
            .modules
            .lock()
            .iter()
            .any(|entry| entry.type_id == type_id)
        {
            tracing::warn!(module = type_name, "module of this type already added");
            return Err(MachineError::ModuleExists { type_name });
        }

        let module: Arc<dyn Module> = module;
        if !module.allow_link_to(self) {
            tracing::warn!(module = type_name, "module refused to link");
            return Err(MachineError::LinkDenied { type_name });
        }

        self.inner.modules.lock().push(ModuleEntry {
            type_id,
            module: module.clone(),
        });

        // Hooks run without the registry lock held: `on_linked` may
        // legitimately call back into `remove_module` (self-detach).
        module.links().attach();
        module.on_linked(self);

        Ok(())
    }

    pub fn has_module<M: Module>(&self) -> bool {
        let type_id = TypeId::of::<M>();
        self.inner
            .modules
            .lock()
            .iter()
            .any(|entry| entry.type_id == type_id)
    }

    pub fn get_module<M: Module>(&self) -> Option<Arc<M>> {
        let module = self
            .inner
            .modules
            .lock()
            .iter()
            .find(|entry| entry.type_id == TypeId::of::<M>())
            .map(|entry| entry.module.clone())?;
        module.as_any_arc().downcast::<M>().ok()
    }

    /// Returns the registered module of type `M`, adding a default
    /// instance when absent.
    pub fn get_or_add_module<M: Module + Default>(&self) -> Result<Arc<M>, MachineError> {
        if let Some(module) = self.get_module::<M>() {
            return Ok(module);
        }

        let module = Arc::new(M::default());
        self.add_module(module.clone())?;
        Ok(module)
    }

    pub fn remove_module<M: Module>(&self) -> bool {
        self.remove_module_by_id(TypeId::of::<M>())
    }

    /// Removes a module by concrete type id, firing `on_unlinked` after
    /// the link count drops.
    pub fn remove_module_by_id(&self, type_id: TypeId) -> bool {
        if self.is_running() {
            tracing::error!("module registry mutated while running");
            return false;
        }

        let removed = {
            let mut modules = self.inner.modules.lock();
            modules
                .iter()
                .position(|entry| entry.type_id == type_id)
                .map(|index| modules.remove(index).module)
        };

        match removed {
            Some(module) => {
                module.links().detach();
                module.on_unlinked(self);
                true
            }
            None => false,
        }
    }

    /// Unlinks every module, for tearing a machine down while idle.
    pub fn detach_all_modules(&self) {
        if self.is_running() {
            tracing::error!("module registry mutated while running");
            return;
        }

        let drained: Vec<_> = self.inner.modules.lock().drain(..).collect();
        for entry in drained {
            entry.module.links().detach();
            entry.module.on_unlinked(self);
        }
    }
}
