/// Retry policy with exponential backoff and optional jitter
///
/// The wrapped operation must be safe to invoke more than once; idempotency is
/// the caller's responsibility.
use crate::error::ConfigError;
use crate::metrics::RetryMetrics;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub factor: f64,
    /// Add random jitter to backoff (±30%, still capped at `max_delay`)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.factor.is_finite() && self.factor >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "factor",
                reason: format!("expected a finite value >= 1.0, got {}", self.factor),
            });
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::Invalid {
                field: "initial_delay",
                reason: format!(
                    "{:?} exceeds max_delay {:?}",
                    self.initial_delay, self.max_delay
                ),
            });
        }
        Ok(())
    }

    /// Un-jittered delay before retry `attempt` (1-indexed):
    /// `min(max_delay, initial_delay * factor^(attempt - 1))`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        // A factor below 1 (or NaN) would shrink or negate the delay
        let factor = self.factor.max(1.0);
        self.capped(self.initial_delay.as_secs_f64() * factor.powi(exponent))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter {
            let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
            self.capped(base.as_secs_f64() * jitter_factor)
        } else {
            base
        }
    }

    /// `secs` as a duration no longer than `max_delay`; values too large to
    /// represent saturate to `max_delay`.
    fn capped(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Reusable retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// A `factor` below 1.0 backs off at a constant `initial_delay`; use
    /// [`try_new`](Self::try_new) to reject such configs instead.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn try_new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or `max_retries` retries are used up,
    /// returning the error from the final attempt.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but gives up immediately on errors for
    /// which `should_retry` returns false.
    pub async fn execute_if<F, Fut, T, E, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "Operation succeeded after retry");
                    }
                    RetryMetrics::record_attempts("success", attempt + 1);
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        debug!(error = %e, "Error not retryable, giving up");
                        RetryMetrics::record_attempts("not_retryable", attempt + 1);
                        return Err(e);
                    }

                    attempt += 1;

                    if attempt > self.config.max_retries {
                        warn!(
                            max_retries = self.config.max_retries,
                            error = %e,
                            "Max retries reached"
                        );
                        RetryMetrics::record_attempts("exhausted", attempt);
                        return Err(e);
                    }

                    let delay = self.config.backoff(attempt);

                    warn!(
                        "Retry attempt {}/{}, waiting {:?}: {}",
                        attempt, self.config.max_retries, delay, e
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Execute a future with retry logic
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    RetryPolicy::new(config).execute(f).await
}
