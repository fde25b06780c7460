//! The state contract.
//!
//! A state is an opaque unit of behavior with a cancellable asynchronous
//! enter/exit lifecycle. States are held as `Arc<dyn State>`; the engine
//! never destroys a state, it only ceases referencing it. Identity is
//! `Arc` pointer identity, type queries go through `Any` downcasting.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Dyn-safe access to [`Any`] for trait objects held behind `Arc`.
///
/// Blanket-implemented for every concrete type; lets the coordinator and
/// the cache module downcast `Arc<dyn State>` / `Arc<dyn Module>` without
/// per-implementor boilerplate.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A unit of behavior the machine transitions between.
#[async_trait]
pub trait State: AsAny + Send + Sync + 'static {
    /// Called once when the machine enters this state. Long-running bodies
    /// must observe `token` at their await points; a cancelled enter is
    /// abandoned without committing the transition.
    async fn enter(&self, token: CancellationToken);

    /// Called once when the machine exits this state.
    async fn exit(&self, token: CancellationToken);

    /// Synchronous commit hook, fired after a successful transition into
    /// this state.
    fn on_entered(&self) {}

    /// Synchronous commit hook, fired after a successful transition out of
    /// this state.
    fn on_exited(&self) {}

    /// Advisory marker consumed by the synchronous-transition auditor:
    /// `true` promises that `enter`/`exit` complete without suspending.
    fn is_synchronous(&self) -> bool {
        false
    }

    /// Display name for diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Returns whether two state references are the same state instance.
pub fn same_state(a: &Arc<dyn State>, b: &Arc<dyn State>) -> bool {
    Arc::ptr_eq(a, b)
}

/// A state whose enter/exit bodies never suspend.
pub trait SyncState: Send + Sync + 'static {
    fn enter(&self);
    fn exit(&self);

    fn on_entered(&self) {}
    fn on_exited(&self) {}
}

/// Adapter lifting a [`SyncState`] into the async [`State`] contract.
///
/// The sync body is skipped entirely when cancellation fired before the
/// call, and the adapter reports `is_synchronous() == true` so the auditor
/// module can whitelist it.
pub struct Synchronous<T: SyncState>(pub T);

#[async_trait]
impl<T: SyncState> State for Synchronous<T> {
    async fn enter(&self, token: CancellationToken) {
        if !token.is_cancelled() {
            self.0.enter();
        }
    }

    async fn exit(&self, token: CancellationToken) {
        if !token.is_cancelled() {
            self.0.exit();
        }
    }

    fn on_entered(&self) {
        self.0.on_entered();
    }

    fn on_exited(&self) {
        self.0.on_exited();
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}
