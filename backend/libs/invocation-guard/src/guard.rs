/// Admission, circuit breaking and retry for one dependency call
///
/// The limiter runs first so a throttled caller never reaches the breaker.
/// Retries happen inside the breaker: the breaker sees the whole retry
/// sequence as one call bounded by its request timeout.
use crate::error::GuardError;
use rate_limiter::{RateLimitResult, RateLimiter, RateLimiterMetrics};
use resilience::{
    presets, CircuitBreakerRegistry, CircuitMetrics, CircuitState, ExecutionResult,
    InvocationError, RetryConfig, RetryPolicy,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type NoFallback<T> = fn() -> std::future::Ready<Result<T, InvocationError>>;

/// Value returned by a guarded call.
#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    pub from_fallback: bool,
    pub circuit_state: CircuitState,
    pub response_time: Duration,
    /// The admission decision that let this call through
    pub rate_limit: RateLimitResult,
}

/// Everything an admin or health endpoint needs in one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GuardHealth {
    pub breakers: HashMap<String, CircuitMetrics>,
    pub rate_limiter: RateLimiterMetrics,
}

#[derive(Clone)]
pub struct GuardedInvoker {
    limiter: Arc<RateLimiter>,
    registry: CircuitBreakerRegistry,
    /// Per-dependency retry settings; `None` disables retries
    retry_overrides: HashMap<String, Option<RetryConfig>>,
}

impl GuardedInvoker {
    pub fn new(limiter: Arc<RateLimiter>, registry: CircuitBreakerRegistry) -> Self {
        Self {
            limiter,
            registry,
            retry_overrides: HashMap::new(),
        }
    }

    /// Limiter and breaker registry both configured from the environment.
    pub async fn from_env() -> Result<Self, GuardError> {
        let limiter = RateLimiter::from_env().await?;
        Ok(Self::new(limiter, CircuitBreakerRegistry::from_env()))
    }

    /// Replace the preset retry settings for `dependency`.
    pub fn with_retry(
        mut self,
        dependency: impl Into<String>,
        retry: Option<RetryConfig>,
    ) -> Result<Self, GuardError> {
        if let Some(config) = &retry {
            config.validate()?;
        }
        self.retry_overrides.insert(dependency.into(), retry);
        Ok(self)
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    pub async fn invoke<F, Fut, T, E>(
        &self,
        identifier: &str,
        action: &str,
        dependency: &str,
        call: F,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run(identifier, action, None, dependency, call, None::<NoFallback<T>>)
            .await
    }

    /// Charge `weight` units of the action's quota instead of its default weight.
    pub async fn invoke_weighted<F, Fut, T, E>(
        &self,
        identifier: &str,
        action: &str,
        weight: u32,
        dependency: &str,
        call: F,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run(identifier, action, Some(weight), dependency, call, None::<NoFallback<T>>)
            .await
    }

    /// `fallback` answers when the circuit is open or the call fails and opens it.
    pub async fn invoke_with_fallback<F, Fut, T, E, G, GFut, FE>(
        &self,
        identifier: &str,
        action: &str,
        dependency: &str,
        call: F,
        fallback: G,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        self.run(identifier, action, None, dependency, call, Some(fallback))
            .await
    }

    pub async fn invoke_weighted_with_fallback<F, Fut, T, E, G, GFut, FE>(
        &self,
        identifier: &str,
        action: &str,
        weight: u32,
        dependency: &str,
        call: F,
        fallback: G,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        self.run(identifier, action, Some(weight), dependency, call, Some(fallback))
            .await
    }

    pub async fn health(&self) -> GuardHealth {
        GuardHealth {
            breakers: self.registry.get_all_metrics(),
            rate_limiter: self.limiter.get_metrics().await,
        }
    }

    fn retry_for(&self, dependency: &str) -> Option<RetryPolicy> {
        let config = match self.retry_overrides.get(dependency) {
            Some(configured) => configured.clone(),
            None => presets::for_dependency(dependency).retry,
        };
        config.map(RetryPolicy::new)
    }

    async fn run<F, Fut, T, E, G, GFut, FE>(
        &self,
        identifier: &str,
        action: &str,
        weight: Option<u32>,
        dependency: &str,
        mut call: F,
        fallback: Option<G>,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, FE>>,
        FE: fmt::Display,
    {
        let admission = self.limiter.enforce(identifier, action, weight).await?;
        let breaker = self.registry.get_or_create(dependency, None);

        let result: ExecutionResult<T> = match self.retry_for(dependency) {
            Some(policy) => {
                breaker
                    .execute_with_options(|| policy.execute(call), fallback, None)
                    .await
            }
            None => breaker.execute_with_options(|| call(), fallback, None).await,
        };

        debug!(
            dependency,
            action,
            success = result.is_success(),
            from_fallback = result.from_fallback,
            state = %result.circuit_state,
            "Guarded call finished"
        );

        let ExecutionResult {
            outcome,
            from_fallback,
            circuit_state,
            response_time,
        } = result;

        Ok(Guarded {
            value: outcome?,
            from_fallback,
            circuit_state,
            response_time,
            rate_limit: admission,
        })
    }
}
