//! Abortable operations and timer abstractions (§5, §9 Design Notes).
//!
//! The manifest core is single-threaded and cooperative: parsers and segment
//! indices are only ever touched from one task at a time, and all I/O is
//! expressed as an *abortable operation* that suspends only at its own await
//! point. This module supplies the two primitives that make that true without
//! tying the core to any particular executor's timer API:
//!
//! - [`Timer`]: `arm_once`/`arm_every`/`stop`, implemented here on top of
//!   `tokio::time::sleep` plus a `tokio_util::sync::CancellationToken` so that
//!   stopping a parser cancels its pending timers synchronously.
//! - [`Op`]: a future paired with an abort handle, so that aborting a parse
//!   also aborts any in-flight fetch or chained xlink resolution.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ManifestError, Result};

/// A rearmable timer. Implementations may use an async sleep, a thread, or a
/// host event loop; the manifest core only depends on this trait.
pub trait Timer: Send {
    /// Arm a one-shot timer that notifies after `duration`, via whatever
    /// wakeup mechanism the implementation uses (a channel, a callback
    /// registered elsewhere, etc).
    fn arm_once(&mut self, duration: Duration);

    /// Arm a recurring timer that fires every `duration` until `stop` is
    /// called.
    fn arm_every(&mut self, duration: Duration);

    /// Cancel any pending firing. Idempotent.
    fn stop(&mut self);
}

/// A `Timer` built on `tokio::time` and a `CancellationToken`, used by the
/// default update loops in [`crate::dash::parser`] and [`crate::hls::parser`].
pub struct TokioTimer {
    token: CancellationToken,
}

impl Default for TokioTimer {
    fn default() -> Self {
        TokioTimer {
            token: CancellationToken::new(),
        }
    }
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child token that is cancelled when this timer is stopped, suitable
    /// for gating a `tokio::select!` branch awaiting the next tick.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Timer for TokioTimer {
    fn arm_once(&mut self, _duration: Duration) {
        // The actual sleep is awaited by the caller via `cancellation()` in a
        // `tokio::select!`; arming here only resets cancellation state so a
        // previously stopped timer can be reused.
        if self.token.is_cancelled() {
            self.token = CancellationToken::new();
        }
    }

    fn arm_every(&mut self, duration: Duration) {
        self.arm_once(duration);
    }

    fn stop(&mut self) {
        self.token.cancel();
    }
}

/// An abortable asynchronous operation: a future paired with an abort action.
/// Aborting is idempotent and guarantees the operation's eventual completion
/// reports [`ManifestError::OperationAborted`].
pub struct Op<T> {
    future: Pin<Box<dyn Future<Output = Result<T>> + Send>>,
    token: CancellationToken,
}

impl<T: Send + 'static> Op<T> {
    pub fn new<F>(token: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Op {
            future: Box::pin(fut),
            token,
        }
    }

    /// Abort this operation. Safe to call more than once.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Await completion, racing the operation's own cancellation token.
    pub async fn run(self) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ManifestError::OperationAborted),
            res = self.future => res,
        }
    }

    /// Chain a new stage onto this operation; the resulting `Op`'s abort
    /// delegates to the same cancellation token, so aborting the chain at any
    /// point aborts every stage.
    pub fn chain<U, F, Fut>(self, next: F) -> Op<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let token = self.token.clone();
        let fut = async move {
            let v = self.run().await?;
            next(v).await
        };
        Op::new(token, fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn op_reports_aborted_when_cancelled_before_poll() {
        let token = CancellationToken::new();
        token.cancel();
        let op: Op<i32> = Op::new(token, async { Ok(42) });
        let res = op.run().await;
        assert!(matches!(res, Err(ManifestError::OperationAborted)));
    }

    #[tokio::test]
    async fn op_runs_to_completion_when_not_aborted() {
        let token = CancellationToken::new();
        let op: Op<i32> = Op::new(token, async { Ok(42) });
        assert_eq!(op.run().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn chain_delegates_abort() {
        let token = CancellationToken::new();
        let op: Op<i32> = Op::new(token.clone(), async { Ok(1) });
        let chained = op.chain(|v| async move { Ok(v + 1) });
        token.cancel();
        let res = chained.run().await;
        assert!(matches!(res, Err(ManifestError::OperationAborted)));
    }
}
