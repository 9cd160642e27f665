/// Environment overrides for circuit breaker presets
///
/// Every variable is optional; unset or unparsable values leave the preset
/// untouched.
///
/// | Variable | Field |
/// |----------|-------|
/// | `CIRCUIT_BREAKER_FAILURE_THRESHOLD` | `failure_threshold` |
/// | `CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS` | `recovery_timeout` |
/// | `CIRCUIT_BREAKER_REQUEST_TIMEOUT_MS` | `request_timeout` |
/// | `CIRCUIT_BREAKER_SUCCESS_THRESHOLD` | `success_threshold` |
/// | `CIRCUIT_BREAKER_MONITORING_WINDOW_MS` | `monitoring_window` |
/// | `CIRCUIT_BREAKER_FALLBACK_ENABLED` | `fallback_enabled` |

use crate::circuit_breaker::CircuitBreakerConfig;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub success_threshold: Option<u32>,
    pub monitoring_window: Option<Duration>,
    pub fallback_enabled: Option<bool>,
}

impl BreakerOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build overrides from an arbitrary key lookup (environment, config map, tests)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparsable circuit breaker override");
                    None
                }
            }
        };

        Self {
            failure_threshold: parse("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v >= 1),
            recovery_timeout: parse("CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS").map(Duration::from_millis),
            request_timeout: parse("CIRCUIT_BREAKER_REQUEST_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .map(Duration::from_millis),
            success_threshold: parse("CIRCUIT_BREAKER_SUCCESS_THRESHOLD")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v >= 1),
            monitoring_window: parse("CIRCUIT_BREAKER_MONITORING_WINDOW_MS")
                .filter(|v| *v > 0)
                .map(Duration::from_millis),
            fallback_enabled: lookup("CIRCUIT_BREAKER_FALLBACK_ENABLED")
                .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Some(true),
                    "0" | "false" | "no" | "off" => Some(false),
                    _ => None,
                }),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, mut config: CircuitBreakerConfig) -> CircuitBreakerConfig {
        if let Some(v) = self.failure_threshold {
            config.failure_threshold = v;
        }
        if let Some(v) = self.recovery_timeout {
            config.recovery_timeout = v;
        }
        if let Some(v) = self.request_timeout {
            config.request_timeout = v;
        }
        if let Some(v) = self.success_threshold {
            config.success_threshold = v;
        }
        if let Some(v) = self.monitoring_window {
            config.monitoring_window = v;
        }
        if let Some(v) = self.fallback_enabled {
            config.fallback_enabled = v;
        }
        config
    }
}
