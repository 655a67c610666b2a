//! Cancellable retry loop used for connection establishment.
//!
//! # Responsibilities
//! - Re-run a fallible async operation with backoff between attempts
//! - Report every failed attempt without ending the sequence
//! - Stop promptly when the cancellation token fires

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ReconnectConfig;
use crate::error::TransportError;
use crate::resilience::backoff::Backoff;

/// How a retry sequence behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `0` retries until cancelled.
    pub max_attempts: u32,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub increment_interval: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            increment_interval: config.increment_interval,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.min_interval, self.max_interval, self.increment_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// One failed attempt inside a retry sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub attempt: u32,
    pub error: String,
    pub next_retry: Duration,
}

/// Run `op` until it succeeds, fails with a non-retryable error, exhausts
/// `policy.max_attempts` or `cancel` fires.
///
/// `on_error` sees every retryable failure before the backoff sleep.
pub async fn retry<T, F, Fut, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_error: E,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    E: FnMut(&RetryEvent),
{
    let mut backoff = policy.backoff();
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = op(attempt) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if policy.max_attempts != 0 && attempt >= policy.max_attempts {
            return Err(TransportError::RetriesExhausted {
                attempts: attempt,
                last: err.to_string(),
            });
        }

        let next_retry = backoff.next_delay();
        on_error(&RetryEvent {
            attempt,
            error: err.to_string(),
            next_retry,
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(next_retry) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            increment_interval: true,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut events = Vec::new();

        let c = calls.clone();
        let value = retry(&quick(0), &CancellationToken::new(), |e| events.push(e.clone()), |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(TransportError::Connection("refused".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].attempt, 1);
        assert!(events.windows(2).all(|w| w[0].next_retry <= w[1].next_retry));
    }

    #[tokio::test]
    async fn bounded_budget_is_exhausted() {
        let err = retry(&quick(3), &CancellationToken::new(), |_| {}, |_| async {
            Err::<(), _>(TransportError::Connection("refused".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry(&quick(0), &CancellationToken::new(), |_| {}, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TransportError::Handshake("404".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TransportError::Handshake(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_unbounded_retry() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = retry(&quick(0), &cancel, |_| {}, |_| async {
            Err::<(), _>(TransportError::Connection("refused".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
    }
}
