//! Bounded retry with linear backoff for control-plane requests

use std::future::Future;
use std::time::Duration;

use sensorctl_core::config::ControlPlaneConfig;

use crate::error::ControlPlaneError;

/// Retry policy for one control-plane request
///
/// Attempt `n` that fails is followed by a wait of `n × backoff_unit`. After
/// `max_attempts` failures the last error is surfaced as
/// [`ControlPlaneError::RetriesExhausted`].
#[derive(Debug, Clone, Copy)]
pub struct RetryableCall {
    max_attempts: u32,
    backoff_unit: Duration,
}

impl RetryableCall {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    pub fn from_config(config: &ControlPlaneConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_unit)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }

    /// Drive `call` until it succeeds or the attempt budget runs out.
    ///
    /// `call` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, ControlPlaneError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ControlPlaneError>>,
    {
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last = Some(e);
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff_after(attempt)).await;
            }
        }

        Err(ControlPlaneError::RetriesExhausted {
            attempts: self.max_attempts,
            last: Box::new(last.unwrap_or(ControlPlaneError::MissingName)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_linear_backoff() {
        let retry = RetryableCall::new(3, Duration::from_secs(1));
        assert_eq!(retry.backoff_after(1), Duration::from_secs(1));
        assert_eq!(retry.backoff_after(2), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryableCall::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_max_attempts_on_failure() {
        let retry = RetryableCall::new(3, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = retry
            .run("fetch", |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ControlPlaneError::Status {
                        status: 502,
                        body: "bad gateway".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        match result {
            Err(ControlPlaneError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ControlPlaneError::Status { status: 502, .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_first_success() {
        let retry = RetryableCall::new(3, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry
            .run("fetch", |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(ControlPlaneError::Decode("truncated".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
