// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Bounded exponential-backoff retry/timeout supervisor.
//!
//! `with_retry` wraps any fallible async action with a per-attempt timeout,
//! an optional exponential backoff between attempts, and cooperative
//! cancellation via a [`CancellationToken`]. It is used, unparameterized, by
//! the MCP client (per-request timeout), the MCP manager (server spawn), and
//! the continuous execution engine (LLM call retry).

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use tokio_util::sync::CancellationToken as RetryToken;

/// Options controlling a single `with_retry` invocation.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Delay before the second attempt; scaled by `2^(k-1)` when `exponential_backoff` is set.
    pub base_delay: Duration,
    pub exponential_backoff: bool,
    /// Wall-clock budget for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            exponential_backoff: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Error produced by an exhausted or cancelled retry loop.
///
/// `E` is the caller's own error type; it is preserved so callers can match
/// on the underlying failure when retries are exhausted.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("action timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
    #[error("failed after {attempts} attempt(s): {source}")]
    Exhausted { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Timeout { attempts } => *attempts,
            RetryError::Cancelled { attempts } => *attempts,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Outcome of a successful `with_retry` call, including bookkeeping useful
/// for diagnostics (attempts taken, wall-clock elapsed).
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Run `action` with bounded retries.
///
/// `action` is invoked at least once and at most `opts.max_retries + 1`
/// times. Each invocation races against `opts.timeout`; a timed-out attempt
/// is treated like any other retryable failure. `should_retry` decides
/// whether a given error is worth retrying at all (e.g. never retry a
/// validation error); a cancellation firing mid-attempt or mid-backoff
/// always stops the loop immediately regardless of `should_retry`.
pub async fn with_retry<T, E, F, Fut>(
    opts: &RetryOptions,
    token: &CancellationToken,
    should_retry: impl Fn(&E) -> bool,
    mut action: F,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if token.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt - 1 });
        }

        let attempt_result = tokio::select! {
            r = tokio::time::timeout(opts.timeout, action()) => r,
            _ = token.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        };

        match attempt_result {
            Ok(Ok(value)) => {
                return Ok(RetryOutcome { value, attempts: attempt, elapsed: started.elapsed() });
            }
            Ok(Err(err)) => {
                if !should_retry(&err) || attempt > opts.max_retries {
                    return Err(RetryError::Exhausted { attempts: attempt, source: err });
                }
                warn!(attempt, max_retries = opts.max_retries, "retrying after error");
            }
            Err(_elapsed) => {
                if attempt > opts.max_retries {
                    return Err(RetryError::Timeout { attempts: attempt });
                }
                warn!(attempt, timeout = ?opts.timeout, "attempt timed out, retrying");
            }
        }

        let delay = backoff_delay(opts, attempt);
        debug!(?delay, attempt, "waiting before next retry attempt");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }
    }
}

fn backoff_delay(opts: &RetryOptions, attempt: u32) -> Duration {
    if opts.exponential_backoff {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        opts.base_delay.saturating_mul(factor)
    } else {
        opts.base_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_opts() -> RetryOptions {
        RetryOptions {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            exponential_backoff: false,
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let token = CancellationToken::new();
        let result = with_retry(&fast_opts(), &token, |_: &&str| true, || async { Ok::<_, &str>(42) }).await.unwrap();
        assert_eq!(result.value, 42);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_opts(), &token, |_: &&str| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result.value, 2);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let token = CancellationToken::new();
        let err = with_retry(&fast_opts(), &token, |_: &&str| true, || async { Err::<i32, _>("nope") })
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 4); // max_retries(3) + 1 initial
        assert!(matches!(err, RetryError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn never_retries_when_should_retry_is_false() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast_opts(), &token, |_: &&str| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("fatal") }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_first_attempt_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let err = with_retry(&fast_opts(), &token, |_: &&str| true, || async { Ok::<_, &str>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled { attempts: 0 }));
    }

    #[tokio::test]
    async fn timeout_is_retried_then_exhausted() {
        let opts = RetryOptions {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            exponential_backoff: false,
            timeout: Duration::from_millis(10),
        };
        let token = CancellationToken::new();
        let err = with_retry(&opts, &token, |_: &&str| true, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<i32, &str>(1)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Timeout { attempts: 2 }));
    }

    #[test]
    fn backoff_delay_doubles_each_attempt() {
        let opts = RetryOptions { base_delay: Duration::from_millis(100), exponential_backoff: true, ..fast_opts() };
        assert_eq!(backoff_delay(&opts, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&opts, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&opts, 3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_delay_constant_without_exponential() {
        let opts = RetryOptions { base_delay: Duration::from_millis(50), exponential_backoff: false, ..fast_opts() };
        assert_eq!(backoff_delay(&opts, 1), Duration::from_millis(50));
        assert_eq!(backoff_delay(&opts, 5), Duration::from_millis(50));
    }
}
