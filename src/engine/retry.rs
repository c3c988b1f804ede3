//! Bounded retry with exponential backoff for gateway calls.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PrepError;

/// Retry-with-delay policy: `max_attempts` total tries, backoff doubling
/// from `initial_backoff` between them. Waits with `tokio::time::sleep`
/// (non-blocking); the last error is surfaced once attempts are exhausted.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, PrepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PrepError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "gateway call failed",
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PrepError::Internal("retry ran zero attempts".into())))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
