//! Two retry primitives over a transient-failure classification: a
//! plain backoff loop, and a variant that reopens a stateful capability
//! object's session between attempts rather than simply repeating the
//! call as-is.

use crate::error::{BridgeError, ErrorCategory};
use crate::transient::classify;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Backoff policy: 1.5s base, doubling each attempt, capped at 6 tries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1500),
            max_attempts: 6,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Retry `op` up to `policy.max_attempts` times with no reopen between
/// attempts. For operations whose transient failures are a bounded
/// hiccup in the call itself rather than a dropped session — nothing to
/// reacquire, so there is nothing for a `reopen` closure to do.
///
/// `classify_err` maps the operation's error into a message to run
/// through [`crate::transient::classify`].
pub async fn retry<T, E, OpFn, OpFut>(
    label: &str,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut op: OpFn,
    classify_err: impl Fn(&E) -> String,
) -> Result<T, BridgeError>
where
    OpFn: FnMut() -> OpFut,
    OpFut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = classify_err(&err);
                let category = classify(&message);

                if category != ErrorCategory::Transient || attempt >= policy.max_attempts {
                    return Err(BridgeError::RetriesExhausted {
                        attempts: attempt,
                        message,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "transient failure, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                }
            }
        }
    }
}

/// Retry `op` up to `policy.max_attempts` times. On a transient failure,
/// calls `reopen` before the next attempt so the operation runs against
/// a freshly-opened session rather than a dead one.
///
/// `classify_err` maps the operation's error into a message to run
/// through [`crate::transient::classify`].
pub async fn retry_with_reopen<T, E, OpFn, OpFut, ReopenFn, ReopenFut>(
    label: &str,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    mut op: OpFn,
    mut reopen: ReopenFn,
    classify_err: impl Fn(&E) -> String,
) -> Result<T, BridgeError>
where
    OpFn: FnMut() -> OpFut,
    OpFut: Future<Output = Result<T, E>>,
    ReopenFn: FnMut() -> ReopenFut,
    ReopenFut: Future<Output = Result<(), BridgeError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = classify_err(&err);
                let category = classify(&message);

                if category != ErrorCategory::Transient || attempt >= policy.max_attempts {
                    return Err(BridgeError::RetriesExhausted {
                        attempts: attempt,
                        message,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "transient failure, reopening and retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                }

                reopen().await?;
                info!(operation = label, attempt, "session reopened");
            }
        }
    }
}
