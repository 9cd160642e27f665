use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ConnectionInfo, IntoConnectionInfo, RedisError};
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Connection settings read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisSettings {
    pub url: String,
    pub connect_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

impl RedisSettings {
    /// `REDIS_URL` and `REDIS_CONNECT_TIMEOUT_MS`, with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            connect_timeout: std::env::var("REDIS_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
        }
    }
}

/// Handle to a Redis server backed by an auto-reconnecting connection manager.
///
/// Cloning is cheap; every clone shares the same multiplexed connection.
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
    addr_label: String,
}

impl RedisPool {
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let info: ConnectionInfo = settings
            .url
            .as_str()
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let addr_label = info.addr.to_string();

        let client = Client::open(info).context("failed to construct Redis client")?;
        let manager = timeout(settings.connect_timeout, ConnectionManager::new(client))
            .await
            .with_context(|| {
                format!(
                    "timed out after {:?} connecting to Redis at {}",
                    settings.connect_timeout, addr_label
                )
            })?
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection established at {}", addr_label);

        Ok(Self {
            manager,
            addr_label,
        })
    }

    /// A handle for issuing commands.
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub fn addr(&self) -> &str {
        &self.addr_label
    }

    /// Round-trip a PING within `deadline`.
    pub async fn ping(&self, deadline: Duration) -> Result<(), RedisError> {
        let mut conn = self.manager();
        let reply: String = run_with_timeout(deadline, redis::cmd("PING").query_async(&mut conn)).await?;
        if reply != "PONG" {
            warn!(reply = %reply, "Unexpected PING reply from Redis");
        }
        Ok(())
    }
}

/// Bound a Redis command by `deadline`; a timeout surfaces as an I/O error so
/// callers handle it like any other connection failure.
pub async fn run_with_timeout<F, T>(deadline: Duration, command: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match timeout(deadline, command).await {
        Ok(result) => result,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))),
    }
}
