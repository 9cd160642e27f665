/// Sliding-window storage backends
///
/// A store owns the per-key windows. Evicting expired entries, counting and
/// admitting must happen as one indivisible step per key, so two concurrent
/// checks against the same key can never both take the last unit.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisWindowStore;

use crate::error::StoreError;
use crate::types::Algorithm;
use async_trait::async_trait;

/// One admission attempt against a key's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    pub now_ms: u64,
    pub window_ms: u64,
    pub limit: u64,
    pub weight: u64,
}

impl WindowRequest {
    /// Entries at or before this instant have left the window.
    pub fn cutoff_ms(&self) -> u64 {
        self.now_ms.saturating_sub(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Units in the window before this request
    pub used: u64,
    /// Timestamp of the oldest entry still counted, after admission
    pub oldest_ms: Option<u64>,
    /// When denied: the instant enough units expire for this weight to fit.
    /// `None` if the weight can never fit.
    pub free_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowUsage {
    pub used: u64,
    pub oldest_ms: Option<u64>,
}

#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Evict expired entries, then admit `weight` units if they fit under the limit.
    async fn check_and_admit(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowDecision, StoreError>;

    /// Units currently in the window, without admitting anything.
    async fn usage(&self, key: &str, now_ms: u64, window_ms: u64)
        -> Result<WindowUsage, StoreError>;

    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Number of window keys this store holds.
    async fn key_count(&self) -> Result<usize, StoreError>;

    /// Tag reported on decisions made by this store.
    fn algorithm(&self) -> Algorithm;
}
