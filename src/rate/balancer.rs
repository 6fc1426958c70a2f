use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{OperationMetrics, TokenBucket};
use crate::config::{RateLimitConfig, RetryConfig};
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub acquired: bool,
    pub waited: Duration,
}

/// Shared limiter for backend invocations.
///
/// Each bucket sits behind its own lock; the map lock is only held while a
/// bucket is looked up or created, and waits happen with no lock held.
pub struct RateBalancer {
    config: RateLimitConfig,
    buckets: DashMap<(String, String), Arc<Mutex<TokenBucket>>>,
    metrics: DashMap<String, OperationMetrics>,
}

impl RateBalancer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            metrics: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket(&self, operation: &str, client_id: &str) -> Arc<Mutex<TokenBucket>> {
        let key = (operation.to_string(), client_id.to_string());
        self.buckets
            .entry(key)
            .or_insert_with(|| {
                let limit = self.config.limit_for(operation);
                debug!(
                    operation,
                    client_id,
                    max_calls = limit.max_calls,
                    window_secs = limit.time_window_secs,
                    "Creating rate bucket"
                );
                Arc::new(Mutex::new(TokenBucket::new(&limit, Instant::now())))
            })
            .clone()
    }

    /// Take `tokens` permits. With `wait`, sleeps at most `max_wait_secs` for
    /// the refill and tries exactly once more.
    pub async fn consume(
        &self,
        operation: &str,
        client_id: &str,
        tokens: u32,
        wait: bool,
    ) -> ConsumeOutcome {
        if !self.config.enabled {
            return ConsumeOutcome {
                acquired: true,
                waited: Duration::ZERO,
            };
        }

        let bucket = self.bucket(operation, client_id);
        let needed = match bucket.lock().try_take(tokens, Instant::now()) {
            Ok(()) => {
                return ConsumeOutcome {
                    acquired: true,
                    waited: Duration::ZERO,
                };
            }
            Err(needed) => needed,
        };

        if !wait {
            self.record_wait(operation, Duration::ZERO, false);
            return ConsumeOutcome {
                acquired: false,
                waited: Duration::ZERO,
            };
        }

        let waited = needed.min(self.config.max_wait());
        debug!(
            operation,
            client_id,
            wait_ms = waited.as_millis() as u64,
            "Waiting for rate bucket refill"
        );
        tokio::time::sleep(waited).await;

        let acquired = bucket.lock().try_take(tokens, Instant::now()).is_ok();
        if !acquired {
            warn!(operation, client_id, "Rate bucket still empty after capped wait");
        }
        self.record_wait(operation, waited, acquired);
        ConsumeOutcome { acquired, waited }
    }

    /// Run `op` behind a token, retrying failures with exponential backoff.
    ///
    /// Configuration errors are returned immediately. After `max_retries`
    /// retries the last error is returned; a token that never became
    /// available yields [`DispatchError::RateLimited`].
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        retry: &RetryConfig,
        client_id: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let token = self.consume(operation, client_id, 1, true).await;
            if !token.acquired {
                return Err(DispatchError::RateLimited {
                    operation: operation.to_string(),
                    client_id: client_id.to_string(),
                });
            }

            let started = Instant::now();
            let outcome = op().await;
            self.record_attempt(operation, started.elapsed(), outcome.is_ok());

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_configuration() || attempt >= retry.max_retries => return Err(e),
                Err(e) => e,
            };

            let delay = retry.backoff(attempt);
            attempt += 1;
            warn!(
                operation,
                client_id,
                attempt,
                max_retries = retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Operation failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn record_attempt(&self, operation: &str, duration: Duration, success: bool) {
        self.metrics
            .entry(operation.to_string())
            .or_default()
            .record_attempt(duration, success);
    }

    fn record_wait(&self, operation: &str, waited: Duration, acquired: bool) {
        self.metrics
            .entry(operation.to_string())
            .or_default()
            .record_wait(waited, acquired);
    }

    pub fn metrics(&self, operation: &str) -> Option<OperationMetrics> {
        self.metrics.get(operation).map(|m| m.clone())
    }

    pub fn all_metrics(&self) -> BTreeMap<String, OperationMetrics> {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
