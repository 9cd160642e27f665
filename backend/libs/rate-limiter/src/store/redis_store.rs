use super::{WindowDecision, WindowRequest, WindowStore, WindowUsage};
use crate::error::StoreError;
use crate::types::Algorithm;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use redis_utils::{run_with_timeout, RedisPool};
use std::time::Duration;
use uuid::Uuid;

/// Evict, count and conditionally admit in one server-side step.
///
/// Each weight unit is its own sorted-set member scored by its timestamp.
/// Returns `{allowed, used_before, oldest_after, free_at}`; -1 means none.
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local weight = tonumber(ARGV[4])
local nonce = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local used = redis.call('ZCARD', key)

local allowed = 0
if used + weight <= limit then
    for i = 1, weight do
        redis.call('ZADD', key, ARGV[1], nonce .. ':' .. i)
    end
    redis.call('PEXPIRE', key, window)
    allowed = 1
end

local oldest = -1
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if first[2] then
    oldest = tonumber(first[2])
end

local free_at = -1
if allowed == 0 and weight <= limit then
    local idx = used + weight - limit - 1
    local entry = redis.call('ZRANGE', key, idx, idx, 'WITHSCORES')
    if entry[2] then
        free_at = tonumber(entry[2]) + window
    end
end

return {allowed, used, oldest, free_at}
"#;

/// Read-only count of live entries. Returns `{used, oldest}`.
const USAGE_SCRIPT: &str = r#"
local key = KEYS[1]
local min = '(' .. (tonumber(ARGV[1]) - tonumber(ARGV[2]))

local used = redis.call('ZCOUNT', key, min, '+inf')
local oldest = -1
local first = redis.call('ZRANGEBYSCORE', key, min, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
if first[2] then
    oldest = tonumber(first[2])
end

return {used, oldest}
"#;

const SCAN_BATCH: usize = 500;

/// Sliding windows shared by every process pointed at the same Redis.
#[derive(Clone)]
pub struct RedisWindowStore {
    conn: ConnectionManager,
    key_prefix: String,
    command_timeout: Duration,
    admit_script: Script,
    usage_script: Script,
}

impl RedisWindowStore {
    pub fn new(pool: &RedisPool, key_prefix: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            conn: pool.manager(),
            key_prefix: key_prefix.into(),
            command_timeout,
            admit_script: Script::new(ADMIT_SCRIPT),
            usage_script: Script::new(USAGE_SCRIPT),
        }
    }
}

fn optional_ms(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn check_and_admit(
        &self,
        key: &str,
        request: WindowRequest,
    ) -> Result<WindowDecision, StoreError> {
        let mut conn = self.conn.clone();
        let nonce = Uuid::new_v4().simple().to_string();
        let mut invocation = self.admit_script.key(key);
        invocation
            .arg(request.now_ms)
            .arg(request.window_ms)
            .arg(request.limit)
            .arg(request.weight)
            .arg(nonce);

        let reply: Vec<i64> = run_with_timeout(
            self.command_timeout,
            invocation.invoke_async(&mut conn),
        )
        .await?;

        match reply.as_slice() {
            [allowed, used, oldest, free_at] => Ok(WindowDecision {
                allowed: *allowed == 1,
                used: (*used).max(0) as u64,
                oldest_ms: optional_ms(*oldest),
                free_at_ms: optional_ms(*free_at),
            }),
            other => Err(StoreError::UnexpectedReply(format!(
                "admit script returned {} values",
                other.len()
            ))),
        }
    }

    async fn usage(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowUsage, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.usage_script.key(key);
        invocation.arg(now_ms).arg(window_ms);

        let reply: Vec<i64> = run_with_timeout(
            self.command_timeout,
            invocation.invoke_async(&mut conn),
        )
        .await?;

        match reply.as_slice() {
            [used, oldest] => Ok(WindowUsage {
                used: (*used).max(0) as u64,
                oldest_ms: optional_ms(*oldest),
            }),
            other => Err(StoreError::UnexpectedReply(format!(
                "usage script returned {} values",
                other.len()
            ))),
        }
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = run_with_timeout(
            self.command_timeout,
            redis::cmd("DEL").arg(key).query_async(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn key_count(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut count = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = run_with_timeout(
                self.command_timeout,
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn),
            )
            .await?;
            count += keys.len();
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(count)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}
