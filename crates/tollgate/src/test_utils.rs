//! Shared test utilities.

use crate::config::Config;
use crate::error::Error;
use crate::stores::MockKeyValueStore;

/// Creates a test configuration with default tunables.
pub fn test_config() -> Config {
    Config {
        redis_url: "redis://127.0.0.1:6379".to_string(),
        store_timeout_ms: 500,
        env: "test".to_string(),
        rate_limit_window_ms: 60_000,
        rate_limit_block_duration_ms: 300_000,
        rate_limit_default_retry_after_ms: 60_000,
        rate_limit_fingerprint_threshold: 10,
        rate_limit_ip_threshold: 5,
        rate_limit_city_threshold: 100,
        rate_limit_country_threshold: 1_000,
        rate_limit_whitelisted_countries: vec![],
        rate_limit_whitelisted_ips: vec![],
        lock_ttl_ms: 300_000,
        idempotency_in_flight_ttl_ms: 60_000,
        idempotency_cache_ttl_ms: 86_400_000,
        idempotency_max_body_size_bytes: 1024 * 1024,
        throttle_free_attempts: 3,
        throttle_max_delay_secs: 900,
        throttle_failure_ttl_secs: 86_400,
        throttle_known_good_ttl_secs: 2_592_000,
    }
}

fn down() -> Error {
    Error::ServiceUnavailable("connection refused".into())
}

/// A store mock on which every operation fails as if Redis were unreachable.
pub fn unavailable_store() -> MockKeyValueStore {
    let mut store = MockKeyValueStore::new();
    store.expect_ping().returning(|| Err(down()));
    store.expect_set_if_absent().returning(|_, _, _| Err(down()));
    store.expect_get().returning(|_| Err(down()));
    store.expect_set().returning(|_, _, _| Err(down()));
    store.expect_delete().returning(|_| Err(down()));
    store.expect_increment().returning(|_, _, _| Err(down()));
    store.expect_ttl_remaining().returning(|_| Err(down()));
    store.expect_compare_and_delete().returning(|_, _| Err(down()));
    store
}
