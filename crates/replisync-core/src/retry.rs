//! Per-call timeouts and bounded exponential backoff.
//!
//! Every external call made by the reconciler goes through [`call`]:
//! transient failures are retried with a doubling delay up to a fixed
//! attempt ceiling, everything else is returned to the caller unchanged.
//! Shutdown is honoured before each attempt and during each backoff wait,
//! never in the middle of an attempt.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};

/// Retry and timeout limits for external calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call (and per mutation protocol), including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay)
    }
}

/// Doubling delay, capped at a maximum, reset on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait after the latest failure. Doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay that the next failure would wait.
    pub fn peek(&self) -> Duration {
        self.current
    }
}

/// Whether shutdown has been requested.
pub fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `false` when the wait was cut short by shutdown.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    if is_shutdown(shutdown) {
        return false;
    }
    let mut rx = shutdown.clone();
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        stopped = async { rx.wait_for(|stop| *stop).await.is_ok() } => {
            if stopped {
                false
            } else {
                // Sender gone: nobody can request shutdown any more.
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

/// Run a single attempt of `op` under the policy's call timeout.
pub async fn attempt<T, Fut>(label: &str, timeout: Duration, fut: Fut) -> ControlResult<T>
where
    Fut: Future<Output = ControlResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ControlError::timeout(label, timeout)),
    }
}

/// Call `op` with per-attempt timeout, retrying transient failures.
pub async fn call<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    shutdown: &watch::Receiver<bool>,
    mut op: F,
) -> ControlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlResult<T>>,
{
    let mut backoff = policy.backoff();
    let max_attempts = policy.max_attempts.max(1);

    for n in 1..=max_attempts {
        if is_shutdown(shutdown) {
            return Err(ControlError::Cancelled);
        }

        let err = match attempt(label, policy.call_timeout, op()).await {
            Ok(value) => {
                if n > 1 {
                    debug!(operation = label, attempt = n, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if n == max_attempts {
            warn!(operation = label, attempts = n, error = %err, "retries exhausted");
            return Err(ControlError::RetriesExhausted {
                attempts: n,
                last: Box::new(err),
            });
        }

        let delay = backoff.next_delay();
        debug!(
            operation = label,
            attempt = n,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, backing off"
        );
        if !sleep_or_shutdown(delay, shutdown).await {
            return Err(ControlError::Cancelled);
        }
    }

    unreachable!("retry loop returns on its final attempt")
}
