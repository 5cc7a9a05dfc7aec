use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stores::{
    IdempotencyConfig, RateLimitConfig, SignInThrottleConfig, Thresholds, ThrottlePolicy,
};

/// Environment variable prefix, e.g. `TOLLGATE_REDIS_URL`.
pub const ENV_PREFIX: &str = "TOLLGATE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis_url: String,
    /// Upper bound for one store round trip, connection checkout included.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Set to "production" for JSON logging, anything else for human-readable.
    #[serde(default)]
    pub env: String,

    #[serde(default = "default_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default = "default_block_duration_ms")]
    pub rate_limit_block_duration_ms: u64,
    /// Retry hint used when a block marker's TTL cannot be read.
    #[serde(default = "default_retry_after_ms")]
    pub rate_limit_default_retry_after_ms: u64,
    /// A threshold of 0 disables that dimension.
    #[serde(default = "default_fingerprint_threshold")]
    pub rate_limit_fingerprint_threshold: u64,
    #[serde(default = "default_ip_threshold")]
    pub rate_limit_ip_threshold: u64,
    #[serde(default = "default_city_threshold")]
    pub rate_limit_city_threshold: u64,
    #[serde(default = "default_country_threshold")]
    pub rate_limit_country_threshold: u64,
    /// Comma separated country codes that are never rate limited by country.
    #[serde(default)]
    pub rate_limit_whitelisted_countries: Vec<String>,
    /// Comma separated IPs that are never rate limited by IP.
    #[serde(default)]
    pub rate_limit_whitelisted_ips: Vec<String>,

    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    #[serde(default = "default_in_flight_ttl_ms")]
    pub idempotency_in_flight_ttl_ms: u64,
    #[serde(default = "default_cache_ttl_ms")]
    pub idempotency_cache_ttl_ms: u64,
    #[serde(default = "default_max_body_size_bytes")]
    pub idempotency_max_body_size_bytes: usize,

    #[serde(default = "default_free_attempts")]
    pub throttle_free_attempts: u32,
    #[serde(default = "default_max_delay_secs")]
    pub throttle_max_delay_secs: u64,
    /// How long a failure streak survives without new failures.
    #[serde(default = "default_failure_ttl_secs")]
    pub throttle_failure_ttl_secs: u64,
    #[serde(default = "default_known_good_ttl_secs")]
    pub throttle_known_good_ttl_secs: u64,
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_block_duration_ms() -> u64 {
    5 * 60_000
}

fn default_retry_after_ms() -> u64 {
    60_000
}

fn default_fingerprint_threshold() -> u64 {
    120
}

fn default_ip_threshold() -> u64 {
    300
}

fn default_city_threshold() -> u64 {
    5_000
}

fn default_country_threshold() -> u64 {
    20_000
}

fn default_lock_ttl_ms() -> u64 {
    5 * 60_000
}

fn default_in_flight_ttl_ms() -> u64 {
    60_000
}

fn default_cache_ttl_ms() -> u64 {
    24 * 60 * 60_000
}

/// Matches the 1MB request body limit used by the services.
fn default_max_body_size_bytes() -> usize {
    1024 * 1024
}

fn default_free_attempts() -> u32 {
    3
}

fn default_max_delay_secs() -> u64 {
    900
}

fn default_failure_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_known_good_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

impl Config {
    /// Load configuration from `TOLLGATE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from `(name, value)` pairs, names carrying the
    /// `TOLLGATE_` prefix. Other names are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Every TTL, window and timeout must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("STORE_TIMEOUT_MS", self.store_timeout_ms),
            ("RATE_LIMIT_WINDOW_MS", self.rate_limit_window_ms),
            ("RATE_LIMIT_BLOCK_DURATION_MS", self.rate_limit_block_duration_ms),
            ("RATE_LIMIT_DEFAULT_RETRY_AFTER_MS", self.rate_limit_default_retry_after_ms),
            ("LOCK_TTL_MS", self.lock_ttl_ms),
            ("IDEMPOTENCY_IN_FLIGHT_TTL_MS", self.idempotency_in_flight_ttl_ms),
            ("IDEMPOTENCY_CACHE_TTL_MS", self.idempotency_cache_ttl_ms),
            ("THROTTLE_FAILURE_TTL_SECS", self.throttle_failure_ttl_secs),
            ("THROTTLE_KNOWN_GOOD_TTL_SECS", self.throttle_known_good_ttl_secs),
        ];

        match durations.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(Error::InvalidArgument(format!(
                "{ENV_PREFIX}{name} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        let mut config = RateLimitConfig {
            window: Duration::from_millis(self.rate_limit_window_ms),
            block_duration: Duration::from_millis(self.rate_limit_block_duration_ms),
            default_retry_after: Duration::from_millis(self.rate_limit_default_retry_after_ms),
            thresholds: Thresholds {
                fingerprint: self.rate_limit_fingerprint_threshold,
                ip: self.rate_limit_ip_threshold,
                city: self.rate_limit_city_threshold,
                country: self.rate_limit_country_threshold,
            },
            ..RateLimitConfig::default()
        };
        config.whitelist.countries = self.rate_limit_whitelisted_countries.clone();
        config.whitelist.ips = self.rate_limit_whitelisted_ips.clone();
        config
    }

    pub fn idempotency(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            in_flight_ttl: Duration::from_millis(self.idempotency_in_flight_ttl_ms),
            cache_ttl: Duration::from_millis(self.idempotency_cache_ttl_ms),
            max_body_size_bytes: self.idempotency_max_body_size_bytes,
        }
    }

    pub fn sign_in_throttle(&self) -> SignInThrottleConfig {
        SignInThrottleConfig {
            policy: ThrottlePolicy {
                free_attempts: self.throttle_free_attempts,
                max_delay: Duration::from_secs(self.throttle_max_delay_secs),
            },
            failure_ttl: Duration::from_secs(self.throttle_failure_ttl_secs),
            known_good_ttl: Duration::from_secs(self.throttle_known_good_ttl_secs),
        }
    }
}
