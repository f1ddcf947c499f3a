//! Bounded exponential backoff for chunk transfers

use super::store::StoreError;
use crate::config::UploadConfig;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError {
    pub attempts: u32,
    pub last: StoreError,
}

/// Attempt ceiling, backoff curve and per-attempt deadline
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_delay: config.min_backoff(),
            max_delay: config.max_backoff(),
            jitter: config.jitter,
            attempt_timeout: config.request_timeout(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            builder = builder.with_jitter();
        }
        std::iter::once(Duration::ZERO).chain(builder.build())
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts
    ///
    /// An attempt that exceeds the deadline is dropped and counts as
    /// [`StoreError::Timeout`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempts = 0;
        let mut last = StoreError::Timeout;

        for delay in self.delays() {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            attempts += 1;

            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    return Err(RetryError { attempts, last: e });
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        label,
                        attempts,
                        self.max_attempts,
                        e
                    );
                    last = e;
                }
            }
        }

        Err(RetryError { attempts, last })
    }
}
