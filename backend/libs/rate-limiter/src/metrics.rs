/// Prometheus metrics for admission decisions
#[cfg(feature = "metrics")]
use prometheus::{register_int_counter_vec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static RATE_LIMIT_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Admission decisions by action, result and algorithm",
        &["action", "result", "algorithm"]
    )
    .expect("Failed to register rate limit decisions metric")
});

#[cfg(feature = "metrics")]
static RATE_LIMIT_STORE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_store_errors_total",
        "Shared store failures by operation",
        &["operation"]
    )
    .expect("Failed to register rate limit store errors metric")
});

#[cfg(feature = "metrics")]
pub struct RateLimitMetrics;

#[cfg(feature = "metrics")]
impl RateLimitMetrics {
    pub fn record_decision(action: &str, allowed: bool, algorithm: &str) {
        let result = if allowed { "allowed" } else { "denied" };
        RATE_LIMIT_DECISIONS
            .with_label_values(&[action, result, algorithm])
            .inc();
    }

    pub fn record_store_error(operation: &str) {
        RATE_LIMIT_STORE_ERRORS
            .with_label_values(&[operation])
            .inc();
    }
}

#[cfg(not(feature = "metrics"))]
pub struct RateLimitMetrics;

#[cfg(not(feature = "metrics"))]
impl RateLimitMetrics {
    pub fn record_decision(_action: &str, _allowed: bool, _algorithm: &str) {}
    pub fn record_store_error(_operation: &str) {}
}
