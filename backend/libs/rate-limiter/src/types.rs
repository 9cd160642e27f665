use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Which path produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Shared sliding window in the store
    SlidingWindow,
    /// Process-local sliding window
    SlidingWindowMemory,
    /// Store unavailable; request admitted without counting
    FailOpen,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::SlidingWindowMemory => "sliding_window_memory",
            Algorithm::FailOpen => "fail_open",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission check or status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the oldest counted entry leaves the window
    pub reset_time_ms: u64,
    /// Whole seconds to wait before retrying; set only when denied
    pub retry_after_secs: Option<u64>,
    pub algorithm: Algorithm,
    /// Units counted in the window (including this request when admitted)
    pub hit_count: u64,
    pub window_start_ms: u64,
}

impl RateLimitResult {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }

    /// Standard `X-RateLimit-*` response headers for this decision.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", (self.reset_time_ms / 1000).to_string()),
        ];
        if let Some(secs) = self.retry_after_secs {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }
}

/// Limiter health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterMetrics {
    /// Window keys held by the active store
    pub total_keys: usize,
    /// Keys with at least one entry still inside its window
    pub active_windows: usize,
    pub store_connected: bool,
    /// Keys held by the in-memory store
    pub memory_fallback_size: usize,
}
