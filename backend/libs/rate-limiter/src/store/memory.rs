use super::{WindowDecision, WindowRequest, WindowStore, WindowUsage};
use crate::error::StoreError;
use crate::types::Algorithm;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    timestamp_ms: u64,
    weight: u64,
}

/// Entries are appended in clock order, so expiry always pops from the front.
#[derive(Debug)]
struct KeyWindow {
    window_ms: u64,
    entries: VecDeque<WindowEntry>,
    used: u64,
}

impl KeyWindow {
    fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: VecDeque::new(),
            used: 0,
        }
    }

    fn evict(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(front) = self.entries.front() {
            if front.timestamp_ms > cutoff {
                break;
            }
            self.used -= front.weight;
            self.entries.pop_front();
        }
    }

    /// Expiry instant of the entry whose removal frees `needed` units.
    fn free_at(&self, needed: u64) -> Option<u64> {
        let mut freed = 0;
        for entry in &self.entries {
            freed += entry.weight;
            if freed >= needed {
                return Some(entry.timestamp_ms + self.window_ms);
            }
        }
        None
    }

    fn oldest(&self) -> Option<u64> {
        self.entries.front().map(|e| e.timestamp_ms)
    }

    fn is_live(&self, now_ms: u64) -> bool {
        self.entries
            .back()
            .is_some_and(|e| e.timestamp_ms > now_ms.saturating_sub(self.window_ms))
    }
}

/// Process-local sliding windows.
///
/// Each key's window is mutated while its map shard is write-locked, which
/// makes check-and-admit atomic per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, KeyWindow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, key: &str, request: WindowRequest) -> WindowDecision {
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| KeyWindow::new(request.window_ms));
        window.window_ms = request.window_ms;
        window.evict(request.now_ms);

        let used = window.used;
        let allowed = used + request.weight <= request.limit;
        if allowed {
            window.entries.push_back(WindowEntry {
                timestamp_ms: request.now_ms,
                weight: request.weight,
            });
            window.used += request.weight;
        }

        let free_at_ms = if allowed {
            None
        } else {
            window.free_at(used + request.weight - request.limit)
        };

        WindowDecision {
            allowed,
            used,
            oldest_ms: window.oldest(),
            free_at_ms,
        }
    }

    pub fn current_usage(&self, key: &str, now_ms: u64, window_ms: u64) -> WindowUsage {
        match self.windows.get_mut(key) {
            Some(mut window) => {
                window.window_ms = window_ms;
                window.evict(now_ms);
                WindowUsage {
                    used: window.used,
                    oldest_ms: window.oldest(),
                }
            }
            None => WindowUsage::default(),
        }
    }

    pub fn remove(&self, key: &str) {
        self.windows.remove(key);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn active_windows(&self, now_ms: u64) -> usize {
        self.windows
            .iter()
            .filter(|window| window.is_live(now_ms))
            .count()
    }

    /// Drop expired entries and forget keys left empty. Returns the number of
    /// keys removed.
    pub fn cleanup(&self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.evict(now_ms);
            !window.entries.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Cleaned up idle rate limit windows");
        }
        removed
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn check_and_admit(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowDecision, StoreError> {
        Ok(self.admit(key, request))
    }

    async fn usage(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowUsage, StoreError> {
        Ok(self.current_usage(key, now_ms, window_ms))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.remove(key);
        Ok(())
    }

    async fn key_count(&self) -> Result<usize, StoreError> {
        Ok(self.len())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowMemory
    }
}
