/// Registry of circuit breakers keyed by dependency name
///
/// Constructed once at service startup and handed to every call site; tests
/// build their own so nothing leaks between them. Breakers are created lazily
/// and at most once per name, even under concurrent first access.
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics};
use crate::config::BreakerOverrides;
use crate::presets;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, CircuitBreaker>>,
    overrides: Arc<BreakerOverrides>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose name-resolved defaults are adjusted by `CIRCUIT_BREAKER_*`
    /// environment variables
    pub fn from_env() -> Self {
        let overrides = BreakerOverrides::from_env();
        if !overrides.is_empty() {
            info!(?overrides, "Circuit breaker overrides loaded from environment");
        }
        Self::with_overrides(overrides)
    }

    pub fn with_overrides(overrides: BreakerOverrides) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            overrides: Arc::new(overrides),
        }
    }

    /// Default configuration for `name`: its preset plus any overrides
    pub fn resolve_config(&self, name: &str) -> CircuitBreakerConfig {
        let config = self
            .overrides
            .apply(presets::for_dependency(name).circuit_breaker);
        if let Err(e) = config.validate() {
            warn!(dependency = name, error = %e, "Overridden config invalid, using preset");
            return presets::for_dependency(name).circuit_breaker;
        }
        config
    }

    /// Return the breaker for `name`, creating it on first use.
    ///
    /// `config` only matters for the call that creates the breaker; later
    /// calls get the existing instance unchanged.
    pub fn get_or_create(&self, name: &str, config: Option<CircuitBreakerConfig>) -> CircuitBreaker {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = match config {
                    Some(config) if config.validate().is_ok() => config,
                    Some(config) => {
                        warn!(dependency = name, ?config, "Rejected invalid config, using defaults");
                        self.resolve_config(name)
                    }
                    None => self.resolve_config(name),
                };
                debug!(dependency = name, "Creating circuit breaker");
                CircuitBreaker::new(name, config)
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.get(name).map(|b| b.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn get_all_metrics(&self) -> HashMap<String, CircuitMetrics> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Reset one breaker; returns false if `name` is unknown
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        info!(count = self.breakers.len(), "All circuit breakers reset");
    }
}
