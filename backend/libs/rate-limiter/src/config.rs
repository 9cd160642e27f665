/// Rate limit rules and runtime settings
///
/// Rules are keyed by action name; unknown actions fall back to the default
/// rule. Settings come from `RATE_LIMIT_*` environment variables.
use crate::error::RateLimitError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Limit for one action: at most `requests` weight units per sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_ms: u64,
    /// Weight charged when the caller does not pass one
    #[serde(default = "default_weight")]
    pub default_weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl RateLimitConfig {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            requests,
            window_ms: window.as_millis() as u64,
            default_weight: 1,
        }
    }

    pub fn with_default_weight(mut self, weight: u32) -> Self {
        self.default_weight = weight;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.requests == 0 {
            return Err(RateLimitError::InvalidConfig(
                "requests must be at least 1".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(RateLimitError::InvalidConfig(
                "window_ms must be at least 1".to_string(),
            ));
        }
        if self.default_weight == 0 {
            return Err(RateLimitError::InvalidConfig(
                "default_weight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-action limits plus the default applied to everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRules {
    default: RateLimitConfig,
    actions: HashMap<String, RateLimitConfig>,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self::new(RateLimitConfig::new(60, Duration::from_secs(60)))
            .with_action("api", RateLimitConfig::new(100, Duration::from_secs(60)))
            .with_action("upload", RateLimitConfig::new(10, Duration::from_secs(60)))
            .with_action("analysis", RateLimitConfig::new(20, Duration::from_secs(60)))
            .with_action(
                "transcription",
                RateLimitConfig::new(30, Duration::from_secs(60)),
            )
            .with_action("auth", RateLimitConfig::new(5, Duration::from_secs(15 * 60)))
    }
}

impl RateLimitRules {
    /// Rules with no per-action entries.
    pub fn new(default: RateLimitConfig) -> Self {
        Self {
            default,
            actions: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>, config: RateLimitConfig) -> Self {
        self.actions.insert(action.into(), config);
        self
    }

    pub fn insert(&mut self, action: impl Into<String>, config: RateLimitConfig) {
        self.actions.insert(action.into(), config);
    }

    pub fn for_action(&self, action: &str) -> &RateLimitConfig {
        self.actions.get(action).unwrap_or(&self.default)
    }

    pub fn default_config(&self) -> &RateLimitConfig {
        &self.default
    }

    pub fn actions(&self) -> impl Iterator<Item = (&str, &RateLimitConfig)> {
        self.actions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        self.default.validate()?;
        for (action, config) in &self.actions {
            config
                .validate()
                .map_err(|e| RateLimitError::InvalidConfig(format!("action '{action}': {e}")))?;
        }
        Ok(())
    }
}

/// What admission does when the shared store fails at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    /// Admit the request and report the full limit as remaining
    #[default]
    FailOpen,
    /// Count the request in the local in-memory window instead
    MemoryFallback,
}

/// Limiter settings, read from `RATE_LIMIT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimiterSettings {
    /// Shared store; absent means in-memory only
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default)]
    pub degraded_policy: DegradedPolicy,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

fn default_store_timeout_ms() -> u64 {
    100
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            store_timeout_ms: default_store_timeout_ms(),
            degraded_policy: DegradedPolicy::default(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RateLimiterSettings {
    pub fn from_env() -> Result<Self, RateLimitError> {
        envy::prefixed("RATE_LIMIT_")
            .from_env::<Self>()
            .map_err(|e| RateLimitError::InvalidConfig(e.to_string()))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
