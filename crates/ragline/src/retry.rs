//! Bounded concurrency and retry for calls to external services.
//!
//! Every external dependency (PII detection, embedding, generation) sits
//! behind a [`ServiceGate`]: a semaphore that caps in-flight calls plus a
//! [`RetryPolicy`] applied to failures for which
//! [`Error::is_retryable`] holds. The permit is held for one attempt
//! only; backoff sleeps happen outside it so a throttled caller does not
//! starve the others.
//!
//! Backoff for attempt `n` (1-based) is `base * 2^(n-1)`, capped at `max`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use ragline_core::{Error, Result};

use crate::config::ServiceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Clone)]
pub struct ServiceGate {
    name: &'static str,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl ServiceGate {
    pub fn new(name: &'static str, max_concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            policy,
        }
    }

    pub fn from_config(name: &'static str, config: &ServiceConfig) -> Self {
        Self::new(name, config.max_concurrency, RetryPolicy::from_config(config))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op` under a permit, retrying retryable failures.
    ///
    /// The last error is returned once retries are exhausted; a
    /// non-retryable error is returned immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::Config(format!("{} concurrency gate closed", self.name))
                })?;
                op().await
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay(attempt);
                    warn!(
                        service = self.name,
                        attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
