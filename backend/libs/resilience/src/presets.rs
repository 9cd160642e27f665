/// Preset configurations for the dependency classes the backend calls
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use std::time::Duration;

/// Configuration bundle for a dependency
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: Option<RetryConfig>,
}

/// Coarse grouping of downstream dependencies by cost and latency profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyClass {
    AiInference,
    SpeechTranscription,
    ObjectStorage,
    Cache,
    Generic,
}

impl DependencyClass {
    /// Classify a dependency by its registry name.
    pub fn classify(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if has(&["speech", "transcri", "whisper", "stt"]) {
            DependencyClass::SpeechTranscription
        } else if has(&["openai", "anthropic", "llm", "sentiment", "inference", "ai-", "ai_"]) {
            DependencyClass::AiInference
        } else if has(&["storage", "s3", "blob", "bucket"]) {
            DependencyClass::ObjectStorage
        } else if has(&["redis", "cache"]) {
            DependencyClass::Cache
        } else {
            DependencyClass::Generic
        }
    }

    pub fn config(&self) -> ServiceConfig {
        match self {
            DependencyClass::AiInference => ai_inference_config(),
            DependencyClass::SpeechTranscription => speech_transcription_config(),
            DependencyClass::ObjectStorage => object_storage_config(),
            DependencyClass::Cache => cache_config(),
            DependencyClass::Generic => default_config(),
        }
    }
}

/// Resolve the preset for a dependency name, falling back to [`default_config`]
pub fn for_dependency(name: &str) -> ServiceConfig {
    DependencyClass::classify(name).config()
}

/// Cloud AI scoring / completion APIs
///
/// - Request timeout: 30s
/// - Circuit breaker: 3 failures, 30s cooldown (calls are expensive, fail fast)
/// - Retry: 2 attempts with exponential backoff
pub fn ai_inference_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            success_threshold: 2,
            monitoring_window: Duration::from_secs(60),
            fallback_enabled: true,
            error_rate_threshold: 0.5,
            minimum_requests: 10,
        },
        retry: Some(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: true,
        }),
    }
}

/// Speech-to-text on uploaded recordings
///
/// - Request timeout: 60s (long audio)
/// - Circuit breaker: 3 failures, 60s cooldown
/// - Retry: 1 attempt (transcription is slow and billed per call)
pub fn speech_transcription_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            success_threshold: 2,
            monitoring_window: Duration::from_secs(120),
            fallback_enabled: true,
            error_rate_threshold: 0.5,
            minimum_requests: 5,
        },
        retry: Some(RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: true,
        }),
    }
}

/// Blob/object storage
///
/// - Request timeout: 120s (large uploads)
/// - Circuit breaker: 10 failures, 15s cooldown (more tolerant)
/// - Retry: 3 attempts (idempotent puts)
pub fn object_storage_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(120),
            success_threshold: 2,
            monitoring_window: Duration::from_secs(60),
            fallback_enabled: true,
            error_rate_threshold: 0.6,
            minimum_requests: 20,
        },
        retry: Some(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: true,
        }),
    }
}

/// Redis/Cache operations
///
/// - Request timeout: 2s (cache should be fast)
/// - Circuit breaker: 5 failures, 10s cooldown
/// - Retry: 2 attempts (idempotent reads)
pub fn cache_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(2),
            success_threshold: 2,
            monitoring_window: Duration::from_secs(30),
            fallback_enabled: true,
            error_rate_threshold: 0.5,
            minimum_requests: 20,
        },
        retry: Some(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: true,
        }),
    }
}

/// Anything not matched by name
pub fn default_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig::default(),
        retry: Some(RetryConfig::default()),
    }
}
