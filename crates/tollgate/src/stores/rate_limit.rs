//! Multi-dimension fixed-window rate limiting.
//!
//! Each request is counted against up to four dimensions in priority order.
//! Counters live in per-window keys that expire with their window. When a
//! counter crosses its threshold a separate block marker is written, and the
//! marker (not the counter) decides blocking until it expires. This keeps a
//! dimension blocked for the full block duration across window boundaries.
//!
//! A dimension that is already blocked is not counted again, so a sustained
//! attack costs one read per request instead of growing the counter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::KeyValueStore;
use crate::error::Result;

/// A request attribute rate limits are applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Fingerprint,
    Ip,
    City,
    Country,
}

impl Dimension {
    /// Evaluation order: the most specific attribute is checked first.
    pub const PRIORITY: [Dimension; 4] = [
        Dimension::Fingerprint,
        Dimension::Ip,
        Dimension::City,
        Dimension::Country,
    ];

    /// Lower-case name used inside store keys.
    pub fn key_name(self) -> &'static str {
        match self {
            Dimension::Fingerprint => "fingerprint",
            Dimension::Ip => "ip",
            Dimension::City => "city",
            Dimension::Country => "country",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Fingerprint => "Fingerprint",
            Dimension::Ip => "Ip",
            Dimension::City => "City",
            Dimension::Country => "Country",
        };
        f.write_str(name)
    }
}

/// Request attributes supplied by the upstream enrichment layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub fingerprint: Option<String>,
    pub ip: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl RequestContext {
    pub fn value(&self, dimension: Dimension) -> Option<&str> {
        let value = match dimension {
            Dimension::Fingerprint => &self.fingerprint,
            Dimension::Ip => &self.ip,
            Dimension::City => &self.city,
            Dimension::Country => &self.country,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }
}

/// Maximum requests per window for each dimension. 0 disables a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub fingerprint: u64,
    pub ip: u64,
    pub city: u64,
    pub country: u64,
}

impl Thresholds {
    pub fn get(&self, dimension: Dimension) -> Option<u64> {
        let threshold = match dimension {
            Dimension::Fingerprint => self.fingerprint,
            Dimension::Ip => self.ip,
            Dimension::City => self.city,
            Dimension::Country => self.country,
        };
        (threshold > 0).then_some(threshold)
    }
}

/// Dimension values that are never rate limited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whitelist {
    pub fingerprints: Vec<String>,
    pub ips: Vec<String>,
    pub cities: Vec<String>,
    pub countries: Vec<String>,
}

impl Whitelist {
    pub fn contains(&self, dimension: Dimension, value: &str) -> bool {
        let values = match dimension {
            Dimension::Fingerprint => &self.fingerprints,
            Dimension::Ip => &self.ips,
            Dimension::City => &self.cities,
            Dimension::Country => &self.countries,
        };
        values.iter().any(|v| v.trim().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub block_duration: Duration,
    /// Used when a block marker exists but its TTL cannot be read.
    pub default_retry_after: Duration,
    pub thresholds: Thresholds,
    pub whitelist: Whitelist,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(5 * 60),
            default_retry_after: Duration::from_secs(60),
            thresholds: Thresholds {
                fingerprint: 120,
                ip: 300,
                city: 5_000,
                country: 20_000,
            },
            whitelist: Whitelist::default(),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub is_blocked: bool,
    pub blocked_dimension: Option<Dimension>,
    pub retry_after_ms: u64,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self {
            is_blocked: false,
            blocked_dimension: None,
            retry_after_ms: 0,
        }
    }

    fn blocked(dimension: Dimension, retry_after: Duration) -> Self {
        Self {
            is_blocked: true,
            blocked_dimension: Some(dimension),
            retry_after_ms: duration_ms(retry_after),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Redis-backed rate limiter.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn counter_key(dimension: Dimension, value: &str, window_id: i64) -> String {
        format!("ratelimit:{}:{}:{}", dimension.key_name(), value, window_id)
    }

    fn block_key(dimension: Dimension, value: &str) -> String {
        format!("blocked:{}:{}", dimension.key_name(), value)
    }

    /// `floor(now / window)`, in milliseconds since the epoch.
    fn window_id(&self, now: DateTime<Utc>) -> i64 {
        let window_ms = i64::try_from(self.config.window.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        now.timestamp_millis().div_euclid(window_ms)
    }

    /// Count the request and decide whether it is blocked.
    pub async fn check(&self, context: &RequestContext) -> Result<RateLimitDecision> {
        self.check_at(context, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let window_id = self.window_id(now);

        for dimension in Dimension::PRIORITY {
            let Some(value) = context.value(dimension) else {
                continue;
            };
            let Some(threshold) = self.config.thresholds.get(dimension) else {
                continue;
            };
            if self.config.whitelist.contains(dimension, value) {
                continue;
            }

            if let Some(decision) = self
                .check_dimension(dimension, value, threshold, window_id, now)
                .await?
            {
                return Ok(decision);
            }
        }

        Ok(RateLimitDecision::allowed())
    }

    async fn check_dimension(
        &self,
        dimension: Dimension,
        value: &str,
        threshold: u64,
        window_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitDecision>> {
        let block_key = Self::block_key(dimension, value);

        if self.store.get(&block_key).await?.is_some() {
            let retry_after = self
                .store
                .ttl_remaining(&block_key)
                .await?
                .unwrap_or(self.config.default_retry_after);

            tracing::debug!(%dimension, value, "request rejected by block marker");
            return Ok(Some(RateLimitDecision::blocked(dimension, retry_after)));
        }

        let counter_key = Self::counter_key(dimension, value, window_id);
        let count = self
            .store
            .increment(&counter_key, 1, Some(self.config.window))
            .await?;

        if u64::try_from(count).unwrap_or(0) <= threshold {
            return Ok(None);
        }

        self.store
            .set(
                &block_key,
                &now.timestamp_millis().to_string(),
                Some(self.config.block_duration),
            )
            .await?;

        tracing::warn!(
            %dimension,
            value,
            count,
            threshold,
            block_ms = duration_ms(self.config.block_duration),
            "rate limit exceeded, dimension blocked"
        );

        Ok(Some(RateLimitDecision::blocked(
            dimension,
            self.config.block_duration,
        )))
    }
}
