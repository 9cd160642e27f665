/// Sliding-window rate limiter keyed by `(identifier, action)`
///
/// Decisions come from the shared store when one is configured, otherwise
/// from the process-local windows. A store failure never rejects a request:
/// depending on [`DegradedPolicy`] the request is admitted uncounted or
/// counted locally.
use crate::config::{DegradedPolicy, RateLimitConfig, RateLimitRules, RateLimiterSettings};
use crate::error::{RateLimitError, StoreError};
use crate::metrics::RateLimitMetrics;
use crate::store::{MemoryStore, RedisWindowStore, WindowDecision, WindowRequest, WindowStore, WindowUsage};
use crate::types::{Algorithm, RateLimitResult, RateLimiterMetrics};
use parking_lot::RwLock;
use redis_utils::{RedisPool, RedisSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Wall-clock milliseconds that advance with the tokio clock.
#[derive(Debug, Clone, Copy)]
struct Clock {
    epoch_ms_at_start: u64,
    started: Instant,
}

impl Clock {
    fn new() -> Self {
        let epoch_ms_at_start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            epoch_ms_at_start,
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms_at_start + self.started.elapsed().as_millis() as u64
    }
}

pub struct RateLimiter {
    rules: RwLock<RateLimitRules>,
    store: Option<Arc<dyn WindowStore>>,
    memory: Arc<MemoryStore>,
    key_prefix: String,
    degraded_policy: DegradedPolicy,
    store_connected: AtomicBool,
    clock: Clock,
}

impl RateLimiter {
    /// Limiter over `store`, or over in-memory windows when `store` is `None`.
    pub fn new(
        rules: RateLimitRules,
        settings: &RateLimiterSettings,
        store: Option<Arc<dyn WindowStore>>,
    ) -> Self {
        let store_connected = AtomicBool::new(store.is_some());
        Self {
            rules: RwLock::new(rules),
            store,
            memory: Arc::new(MemoryStore::new()),
            key_prefix: settings.key_prefix.clone(),
            degraded_policy: settings.degraded_policy,
            store_connected,
            clock: Clock::new(),
        }
    }

    pub fn in_memory(rules: RateLimitRules) -> Self {
        Self::new(rules, &RateLimiterSettings::default(), None)
    }

    /// Connect to the configured store. An unreachable store leaves the
    /// limiter on in-memory windows rather than failing startup.
    pub async fn from_settings(
        rules: RateLimitRules,
        settings: RateLimiterSettings,
    ) -> Result<Self, RateLimitError> {
        rules.validate()?;

        let Some(url) = settings.redis_url.clone() else {
            info!("No rate limit store configured, using in-memory windows");
            return Ok(Self::new(rules, &settings, None));
        };

        let redis_settings = RedisSettings {
            url,
            ..RedisSettings::default()
        };
        match RedisPool::connect(&redis_settings).await {
            Ok(pool) => {
                info!(addr = %pool.addr(), prefix = %settings.key_prefix, "Rate limiter using Redis store");
                let store = RedisWindowStore::new(&pool, &settings.key_prefix, settings.store_timeout());
                Ok(Self::new(rules, &settings, Some(Arc::new(store))))
            }
            Err(e) => {
                warn!(error = %e, "Rate limit store unreachable, falling back to in-memory windows");
                Ok(Self::new(rules, &settings, None))
            }
        }
    }

    /// [`from_settings`](Self::from_settings) with idle in-memory windows
    /// swept every `settings.cleanup_interval()` for as long as the limiter lives.
    pub async fn start(
        rules: RateLimitRules,
        settings: RateLimiterSettings,
    ) -> Result<Arc<Self>, RateLimitError> {
        let interval = settings.cleanup_interval();
        let limiter = Arc::new(Self::from_settings(rules, settings).await?);
        limiter.spawn_cleanup_task(interval);
        debug!(interval_secs = interval.as_secs(), "Started rate limit window cleanup");
        Ok(limiter)
    }

    /// Default rules with `RATE_LIMIT_*` settings, cleanup running.
    pub async fn from_env() -> Result<Arc<Self>, RateLimitError> {
        let settings = RateLimiterSettings::from_env()?;
        Self::start(RateLimitRules::default(), settings).await
    }

    /// Admit `weight` units (the action's default weight when `None`) for
    /// `identifier` if they fit in the action's window.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        action: &str,
        weight: Option<u32>,
    ) -> RateLimitResult {
        let config = self.config_for(action);
        let weight = u64::from(weight.unwrap_or(config.default_weight).max(1));
        let key = self.window_key(action, identifier);
        let request = self.request(&config, weight);

        let result = match &self.store {
            Some(store) => match store.check_and_admit(&key, request).await {
                Ok(decision) => {
                    self.mark_store_healthy();
                    decision_result(&request, decision, store.algorithm())
                }
                Err(err) => {
                    self.mark_store_failed("check", &key, &err);
                    match self.degraded_policy {
                        DegradedPolicy::FailOpen => fail_open_result(&request),
                        DegradedPolicy::MemoryFallback => decision_result(
                            &request,
                            self.memory.admit(&key, request),
                            Algorithm::SlidingWindowMemory,
                        ),
                    }
                }
            },
            None => decision_result(
                &request,
                self.memory.admit(&key, request),
                Algorithm::SlidingWindowMemory,
            ),
        };

        RateLimitMetrics::record_decision(action, result.allowed, result.algorithm.as_str());
        if !result.allowed {
            debug!(
                identifier,
                action,
                hit_count = result.hit_count,
                limit = result.limit,
                retry_after_secs = ?result.retry_after_secs,
                "Rate limit exceeded"
            );
        }
        result
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit), but a denial is an error.
    pub async fn enforce(
        &self,
        identifier: &str,
        action: &str,
        weight: Option<u32>,
    ) -> Result<RateLimitResult, RateLimitError> {
        let result = self.check_rate_limit(identifier, action, weight).await;
        if result.allowed {
            return Ok(result);
        }
        Err(RateLimitError::Exceeded {
            action: action.to_string(),
            limit: result.limit,
            retry_after: result.retry_after().unwrap_or(Duration::from_secs(1)),
        })
    }

    /// Current usage for `identifier`, without admitting anything.
    pub async fn get_rate_limit_status(&self, identifier: &str, action: &str) -> RateLimitResult {
        let config = self.config_for(action);
        let key = self.window_key(action, identifier);
        let request = self.request(&config, u64::from(config.default_weight.max(1)));

        let (usage, algorithm) = match &self.store {
            Some(store) => match store.usage(&key, request.now_ms, request.window_ms).await {
                Ok(usage) => {
                    self.mark_store_healthy();
                    (usage, store.algorithm())
                }
                Err(err) => {
                    self.mark_store_failed("status", &key, &err);
                    match self.degraded_policy {
                        DegradedPolicy::FailOpen => return fail_open_result(&request),
                        DegradedPolicy::MemoryFallback => (
                            self.memory.current_usage(&key, request.now_ms, request.window_ms),
                            Algorithm::SlidingWindowMemory,
                        ),
                    }
                }
            },
            None => (
                self.memory.current_usage(&key, request.now_ms, request.window_ms),
                Algorithm::SlidingWindowMemory,
            ),
        };

        usage_result(&request, usage, algorithm)
    }

    /// Clear the window for `identifier`. Local windows are always cleared; a
    /// store failure is reported to the caller.
    pub async fn reset_rate_limit(&self, identifier: &str, action: &str) -> Result<(), RateLimitError> {
        let key = self.window_key(action, identifier);
        self.memory.remove(&key);

        if let Some(store) = &self.store {
            if let Err(err) = store.reset(&key).await {
                self.mark_store_failed("reset", &key, &err);
                return Err(err.into());
            }
            self.mark_store_healthy();
        }

        info!(identifier, action, "Rate limit reset");
        Ok(())
    }

    pub async fn get_metrics(&self) -> RateLimiterMetrics {
        let now_ms = self.clock.now_ms();
        let memory_fallback_size = self.memory.len();
        let local = RateLimiterMetrics {
            total_keys: memory_fallback_size,
            active_windows: self.memory.active_windows(now_ms),
            store_connected: false,
            memory_fallback_size,
        };

        let Some(store) = &self.store else {
            return local;
        };

        match store.key_count().await {
            Ok(keys) => {
                self.mark_store_healthy();
                RateLimiterMetrics {
                    total_keys: keys,
                    // Idle keys expire in the store on their own
                    active_windows: keys,
                    store_connected: true,
                    memory_fallback_size,
                }
            }
            Err(err) => {
                self.mark_store_failed("metrics", &self.key_prefix, &err);
                local
            }
        }
    }

    /// Add or replace the rule for `action`.
    pub fn register_action(
        &self,
        action: impl Into<String>,
        config: RateLimitConfig,
    ) -> Result<(), RateLimitError> {
        config.validate()?;
        let action = action.into();
        info!(action = %action, requests = config.requests, window_ms = config.window_ms, "Registered rate limit rule");
        self.rules.write().insert(action, config);
        Ok(())
    }

    pub fn rules(&self) -> RateLimitRules {
        self.rules.read().clone()
    }

    pub fn is_store_connected(&self) -> bool {
        self.store.is_some() && self.store_connected.load(Ordering::Relaxed)
    }

    /// Drop expired local windows. Returns the number of keys removed.
    pub fn cleanup_expired(&self) -> usize {
        self.memory.cleanup(self.clock.now_ms())
    }

    /// Periodically run [`cleanup_expired`](Self::cleanup_expired) until the
    /// limiter is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    debug!("Rate limiter dropped, stopping window cleanup");
                    break;
                };
                limiter.cleanup_expired();
            }
        })
    }

    fn config_for(&self, action: &str) -> RateLimitConfig {
        self.rules.read().for_action(action).clone()
    }

    fn window_key(&self, action: &str, identifier: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, action, identifier)
    }

    fn request(&self, config: &RateLimitConfig, weight: u64) -> WindowRequest {
        WindowRequest {
            now_ms: self.clock.now_ms(),
            window_ms: config.window_ms,
            limit: u64::from(config.requests),
            weight,
        }
    }

    fn mark_store_healthy(&self) {
        if !self.store_connected.swap(true, Ordering::Relaxed) {
            info!("Rate limit store reachable again");
        }
    }

    fn mark_store_failed(&self, operation: &str, key: &str, err: &StoreError) {
        self.store_connected.store(false, Ordering::Relaxed);
        RateLimitMetrics::record_store_error(operation);
        match self.degraded_policy {
            DegradedPolicy::FailOpen => {
                warn!(operation, key, error = %err, "Rate limit store failed, failing open")
            }
            DegradedPolicy::MemoryFallback => {
                warn!(operation, key, error = %err, "Rate limit store failed, using in-memory window")
            }
        }
    }
}

fn retry_after_secs(wait_ms: u64) -> u64 {
    wait_ms.div_ceil(1000).max(1)
}

fn decision_result(request: &WindowRequest, decision: WindowDecision, algorithm: Algorithm) -> RateLimitResult {
    let retry_after_secs = (!decision.allowed).then(|| {
        let free_at = decision
            .free_at_ms
            .unwrap_or(request.now_ms + request.window_ms);
        retry_after_secs(free_at.saturating_sub(request.now_ms))
    });

    RateLimitResult {
        allowed: decision.allowed,
        limit: request.limit,
        remaining: request.limit.saturating_sub(decision.used + request.weight),
        reset_time_ms: decision
            .oldest_ms
            .map_or(request.now_ms + request.window_ms, |oldest| oldest + request.window_ms),
        retry_after_secs,
        algorithm,
        hit_count: if decision.allowed {
            decision.used + request.weight
        } else {
            decision.used
        },
        window_start_ms: request.cutoff_ms(),
    }
}

fn usage_result(request: &WindowRequest, usage: WindowUsage, algorithm: Algorithm) -> RateLimitResult {
    let allowed = usage.used + request.weight <= request.limit;
    let reset_time_ms = usage
        .oldest_ms
        .map_or(request.now_ms + request.window_ms, |oldest| oldest + request.window_ms);

    RateLimitResult {
        allowed,
        limit: request.limit,
        remaining: request.limit.saturating_sub(usage.used),
        reset_time_ms,
        retry_after_secs: (!allowed)
            .then(|| retry_after_secs(reset_time_ms.saturating_sub(request.now_ms))),
        algorithm,
        hit_count: usage.used,
        window_start_ms: request.cutoff_ms(),
    }
}

fn fail_open_result(request: &WindowRequest) -> RateLimitResult {
    RateLimitResult {
        allowed: true,
        limit: request.limit,
        remaining: request.limit,
        reset_time_ms: request.now_ms + request.window_ms,
        retry_after_secs: None,
        algorithm: Algorithm::FailOpen,
        hit_count: 0,
        window_start_ms: request.cutoff_ms(),
    }
}
