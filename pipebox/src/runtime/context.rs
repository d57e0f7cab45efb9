//! Cancellation and status-reporting context for box operations.

use std::future::Future;

use pipebox_shared::{BoxError, BoxResult, EngineResult};
use tokio_util::sync::CancellationToken;

use crate::images::Emitter;

/// Context threaded through `run`, `run_services` and `fetch`.
///
/// Carries the cancellation token engine calls race against, and the emitter
/// pull progress is republished to.
#[derive(Clone, Debug)]
pub struct RunContext {
    cancel: CancellationToken,
    emitter: Emitter,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, emitter: Emitter) -> Self {
        Self { cancel, emitter }
    }

    /// Context that is never cancelled and whose status events are dropped.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), Emitter::discard())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive an engine call, aborting with [`BoxError::Cancelled`] when the
    /// context is cancelled first.
    pub async fn guard<T, F>(&self, call: F) -> BoxResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BoxError::Cancelled),
            result = call => result.map_err(BoxError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipebox_shared::EngineError;

    #[tokio::test]
    async fn test_guard_passes_through_result() {
        let ctx = RunContext::background();
        let value = ctx.guard(async { Ok::<_, EngineError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = ctx
            .guard(async { Err::<(), _>(EngineError::Transport("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, BoxError::Engine(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_guard_aborts_on_cancel() {
        let ctx = RunContext::background();
        ctx.cancel_token().cancel();
        let err = ctx
            .guard(std::future::pending::<EngineResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, BoxError::Cancelled));
    }
}
