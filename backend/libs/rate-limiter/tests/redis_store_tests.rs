/// Shared-window tests against a live Redis (REDIS_URL)
use rate_limiter::{
    Algorithm, RateLimitConfig, RateLimitRules, RateLimiter, RateLimiterSettings,
    RedisWindowStore,
};
use redis_utils::{RedisPool, RedisSettings};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn redis_limiter(prefix: &str, requests: u32) -> RateLimiter {
    let pool = RedisPool::connect(&RedisSettings::from_env())
        .await
        .expect("redis reachable");
    let settings = RateLimiterSettings {
        key_prefix: format!("{prefix}-{}", Uuid::new_v4().simple()),
        store_timeout_ms: 500,
        ..Default::default()
    };
    let store = RedisWindowStore::new(&pool, &settings.key_prefix, settings.store_timeout());
    RateLimiter::new(
        RateLimitRules::new(RateLimitConfig::new(requests, Duration::from_secs(60))),
        &settings,
        Some(Arc::new(store)),
    )
}

#[tokio::test]
#[ignore = "Requires Redis"]
async fn test_redis_admits_limit_then_denies() {
    let limiter = redis_limiter("rl-test", 3).await;

    for _ in 0..3 {
        let result = limiter.check_rate_limit("u", "api", None).await;
        assert!(result.allowed);
        assert_eq!(result.algorithm, Algorithm::SlidingWindow);
    }
    let denied = limiter.check_rate_limit("u", "api", None).await;
    assert!(!denied.allowed);
    assert!(denied.retry_after_secs.unwrap() >= 59);

    let status = limiter.get_rate_limit_status("u", "api").await;
    assert_eq!(status.hit_count, 3);

    limiter.reset_rate_limit("u", "api").await.unwrap();
    assert!(limiter.check_rate_limit("u", "api", None).await.allowed);

    let metrics = limiter.get_metrics().await;
    assert!(metrics.store_connected);
    assert_eq!(metrics.total_keys, 1);
}

#[tokio::test]
#[ignore = "Requires Redis"]
async fn test_redis_weighted_admission() {
    let limiter = redis_limiter("rl-weight", 10).await;

    assert!(limiter.check_rate_limit("u", "upload", Some(5)).await.allowed);
    assert!(limiter.check_rate_limit("u", "upload", Some(5)).await.allowed);
    let denied = limiter.check_rate_limit("u", "upload", Some(5)).await;
    assert!(!denied.allowed);
    assert_eq!(denied.hit_count, 10);
    assert_eq!(denied.remaining, 0);
    // Five members must expire before five more fit; all were admitted just now
    let retry_after = denied.retry_after_secs.unwrap();
    assert!((59..=60).contains(&retry_after), "retry_after {retry_after}");

    // A weight larger than the whole limit never fits: full window
    let oversized = limiter.check_rate_limit("v", "upload", Some(11)).await;
    assert!(!oversized.allowed);
    assert_eq!(oversized.retry_after_secs, Some(60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires Redis"]
async fn test_redis_concurrent_admission_is_atomic() {
    let limiter = Arc::new(redis_limiter("rl-race", 20).await);

    let handles: Vec<_> = (0..60)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_rate_limit("hot", "api", None).await })
        })
        .collect();

    let admitted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().allowed)
        .count();
    assert_eq!(admitted, 20);
}
