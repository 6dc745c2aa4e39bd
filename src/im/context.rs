// Per-call cancellation and deadline handle passed to every network operation

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{ImError, Result};

/// Cancellation signal plus optional deadline for one caller operation.
///
/// Cloning is cheap; clones share the cancellation token.
#[derive(Debug, Clone)]
pub struct SendContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for SendContext {
    fn default() -> Self {
        Self::background()
    }
}

impl SendContext {
    /// Never cancelled, no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_in(timeout)
    }

    /// Bind to an externally owned token (cancelling it aborts this context).
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Tighten the deadline; an earlier existing deadline is kept.
    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ImError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ImError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the context is cancelled, or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ImError::Cancelled),
            _ = wait_until(deadline) => Err(ImError::DeadlineExceeded),
            res = fut => res,
        }
    }

    /// Sleep that wakes early on cancellation or deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = SendContext::background();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let ctx = SendContext::background();
        ctx.cancel();
        let err = ctx.run(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ImError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let ctx = SendContext::with_timeout(Duration::from_millis(50));
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, ImError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_from_shared_token() {
        let token = CancellationToken::new();
        let ctx = SendContext::with_cancellation(token.clone());
        let handle = tokio::spawn(async move { ctx.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(ImError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_in_keeps_earliest() {
        let short = SendContext::with_timeout(Duration::from_secs(1));
        let first = short.deadline().unwrap();
        let widened = short.deadline_in(Duration::from_secs(60));
        assert_eq!(widened.deadline().unwrap(), first);
    }
}
