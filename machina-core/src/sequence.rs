//! Transition choreography.
//!
//! A [`Sequence`] performs the exit/enter body of a transition. The
//! coordinator invokes `pre_processing`, then the cancellable `process`
//! body, and `post_processing` only when `process` reported success. The
//! trait is the seam for alternative choreographies (staged, parallel)
//! without touching the coordinator.

use crate::state::State;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Sequence: Send + Sync {
    /// Synchronous hook, runs before anything else in the transition.
    fn pre_processing(&self, _from: Option<&Arc<dyn State>>, _to: &Arc<dyn State>) {}

    /// The cancellable exit-then-enter body. Returns `false` when
    /// cancellation was observed at any await boundary; the coordinator
    /// then leaves the current state untouched. `from` is `None` for the
    /// first-ever transition, in which case the exit call is skipped.
    async fn process(
        &self,
        from: Option<Arc<dyn State>>,
        to: Arc<dyn State>,
        token: CancellationToken,
    ) -> bool;

    /// Synchronous commit hook, runs only after a successful `process`.
    fn post_processing(&self, _from: Option<&Arc<dyn State>>, _to: &Arc<dyn State>) {}
}

/// The minimal exit-then-enter choreography.
#[derive(Debug, Default)]
pub struct DefaultSequence;

#[async_trait]
impl Sequence for DefaultSequence {
    async fn process(
        &self,
        from: Option<Arc<dyn State>>,
        to: Arc<dyn State>,
        token: CancellationToken,
    ) -> bool {
        if token.is_cancelled() {
            tracing::warn!(state = to.name(), "transition cancelled before the start");
            return false;
        }

        if let Some(from) = from {
            from.exit(token.clone()).await;
            if token.is_cancelled() {
                return false;
            }
        }

        to.enter(token.clone()).await;

        !token.is_cancelled()
    }

    fn post_processing(&self, from: Option<&Arc<dyn State>>, to: &Arc<dyn State>) {
        if let Some(from) = from {
            from.on_exited();
        }
        to.on_entered();
    }
}
