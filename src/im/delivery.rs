// Multi-target delivery with per-target retry and linear backoff

use std::future::Future;
use std::time::Duration;

use super::context::SendContext;
use super::error::{ImError, Result};
use super::types::{FailedTarget, Platform, SendReport, Target};
use crate::{ulog_debug, ulog_warn};

/// Attempts per target and the backoff step between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `backoff_step × attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
///
/// `op` receives the 1-based attempt number. No sleep follows the final attempt.
pub async fn retry<F, Fut>(ctx: &SendContext, policy: RetryPolicy, mut op: F) -> Result<()>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        ctx.check()?;
        match op(attempt).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                ulog_debug!("[delivery] Attempt {} failed, retrying: {}", attempt, e);
                ctx.sleep(policy.backoff(attempt)).await?;
                attempt += 1;
            }
        }
    }
}

/// Deliver to every target in order, each with its own retry budget.
///
/// Returns `PartialSend` listing exhausted targets (in target order) when any fail.
pub async fn deliver_all<F, Fut>(
    ctx: &SendContext,
    policy: RetryPolicy,
    platform: Platform,
    targets: &[Target],
    mut op: F,
) -> Result<()>
where
    F: FnMut(Target, u32) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failed = Vec::new();
    for target in targets {
        if let Err(error) = retry(ctx, policy, |attempt| op(target.clone(), attempt)).await {
            ulog_warn!("[{}] Delivery to {} failed: {}", platform, target, error);
            failed.push(FailedTarget {
                target: target.clone(),
                error,
            });
        }
    }

    if failed.is_empty() {
        return Ok(());
    }
    Err(ImError::PartialSend(SendReport {
        success_count: targets.len() - failed.len(),
        total_count: targets.len(),
        failed,
    }))
}
