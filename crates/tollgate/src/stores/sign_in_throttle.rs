//! Progressive brute-force throttling for sign-in attempts.
//!
//! State is kept per (identifier, identity) pair, both hashed so raw
//! credentials and IPs never reach the store:
//!
//! ```text
//! auth:sign-in-throttle:{identifier}:{identity}:failures    → failure count
//! auth:sign-in-throttle:{identifier}:{identity}:locked      → delay seconds (TTL = delay)
//! auth:sign-in-throttle:{identifier}:{identity}:known-good  → "1" (long TTL)
//! ```
//!
//! Flow on a failed attempt: increment failures, compute the delay from the
//! new count, lock for that delay if it is non-zero. On success: clear the
//! streak and optionally remember the pair as known-good, which bypasses
//! throttling entirely.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::KeyValueStore;
use crate::error::{Error, Result};

/// Delay applied to each failure after the free attempts, in seconds.
const ESCALATION_SECS: [u64; 6] = [5, 15, 30, 60, 300, 900];

/// Maps a failure count to a lockout delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Failures that carry no delay.
    pub free_attempts: u32,
    /// Cap for any computed delay. Applied lockouts round up to whole seconds.
    pub max_delay: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            free_attempts: 3,
            max_delay: Duration::from_secs(900),
        }
    }
}

impl ThrottlePolicy {
    pub fn delay_for(&self, failures: i64) -> Duration {
        let free = i64::from(self.free_attempts);
        if failures <= free {
            return Duration::ZERO;
        }

        let step = usize::try_from(failures - free - 1)
            .unwrap_or(usize::MAX)
            .min(ESCALATION_SECS.len() - 1);

        Duration::from_secs(ESCALATION_SECS[step]).min(self.max_delay)
    }
}

/// Delay for the given failure count under the default policy.
///
/// | failures | delay |
/// |---|---|
/// | ≤ 3 | 0 |
/// | 4 | 5 s |
/// | 5 | 15 s |
/// | 6 | 30 s |
/// | 7 | 60 s |
/// | 8 | 300 s |
/// | ≥ 9 | 900 s |
pub fn compute_sign_in_delay(failures: i64) -> Duration {
    ThrottlePolicy::default().delay_for(failures)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInThrottleConfig {
    pub policy: ThrottlePolicy,
    /// Lifetime of a failure streak, set on its first failure.
    pub failure_ttl: Duration,
    pub known_good_ttl: Duration,
}

impl Default for SignInThrottleConfig {
    fn default() -> Self {
        Self {
            policy: ThrottlePolicy::default(),
            failure_ttl: Duration::from_secs(24 * 60 * 60),
            known_good_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Hashed (what is signed into, who is attempting it) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleSubject {
    pub identifier_hash: String,
    pub identity_hash: String,
}

impl ThrottleSubject {
    pub fn new(identifier_hash: impl Into<String>, identity_hash: impl Into<String>) -> Self {
        Self {
            identifier_hash: identifier_hash.into(),
            identity_hash: identity_hash.into(),
        }
    }

    /// Hash raw values (e.g. an email and a client IP) into a subject.
    pub fn from_raw(identifier: &str, identity: &str) -> Self {
        Self::new(sha256_hex(identifier), sha256_hex(identity))
    }

    fn key(&self, suffix: &str) -> String {
        format!(
            "auth:sign-in-throttle:{}:{}:{}",
            self.identifier_hash, self.identity_hash, suffix
        )
    }

    fn failures_key(&self) -> String {
        self.key("failures")
    }

    fn locked_key(&self) -> String {
        self.key("locked")
    }

    fn known_good_key(&self) -> String {
        self.key("known-good")
    }
}

fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleStatus {
    Allowed,
    Locked { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Pair is known-good; nothing was counted.
    Bypassed,
    Recorded { failures: i64, delay: Duration },
}

pub struct SignInThrottle {
    store: Arc<dyn KeyValueStore>,
    config: SignInThrottleConfig,
}

impl SignInThrottle {
    pub fn new(store: Arc<dyn KeyValueStore>, config: SignInThrottleConfig) -> Self {
        Self { store, config }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.config.policy
    }

    pub async fn is_known_good(&self, subject: &ThrottleSubject) -> Result<bool> {
        Ok(self.store.get(&subject.known_good_key()).await?.is_some())
    }

    /// Count a failure. The streak's TTL starts at its first failure.
    pub async fn increment_failures(&self, subject: &ThrottleSubject) -> Result<i64> {
        self.store
            .increment(&subject.failures_key(), 1, Some(self.config.failure_ttl))
            .await
    }

    /// Current streak length, 0 when there is none.
    pub async fn failure_count(&self, subject: &ThrottleSubject) -> Result<i64> {
        match self.store.get(&subject.failures_key()).await? {
            Some(count) => count.parse().map_err(|_| {
                Error::Internal(format!(
                    "failure count for {} is not an integer",
                    subject.identifier_hash
                ))
            }),
            None => Ok(0),
        }
    }

    /// Seconds left on the lockout, rounded up. 0 when not locked.
    pub async fn get_locked_ttl_seconds(&self, subject: &ThrottleSubject) -> Result<i64> {
        let remaining = self.store.ttl_remaining(&subject.locked_key()).await?;

        Ok(remaining.map_or(0, |ttl| {
            i64::try_from(ttl.as_millis().div_ceil(1000)).unwrap_or(i64::MAX)
        }))
    }

    pub async fn set_locked(&self, subject: &ThrottleSubject, delay_secs: u64) -> Result<()> {
        if delay_secs == 0 {
            return Ok(());
        }

        self.store
            .set(
                &subject.locked_key(),
                &delay_secs.to_string(),
                Some(Duration::from_secs(delay_secs)),
            )
            .await
    }

    pub async fn clear_failure_state(&self, subject: &ThrottleSubject) -> Result<()> {
        self.store.delete(&subject.failures_key()).await?;
        self.store.delete(&subject.locked_key()).await?;
        Ok(())
    }

    pub async fn mark_known_good(&self, subject: &ThrottleSubject) -> Result<()> {
        self.store
            .set(&subject.known_good_key(), "1", Some(self.config.known_good_ttl))
            .await
    }

    /// Should this attempt be allowed to verify credentials at all?
    pub async fn check(&self, subject: &ThrottleSubject) -> Result<ThrottleStatus> {
        if self.is_known_good(subject).await? {
            return Ok(ThrottleStatus::Allowed);
        }

        match self.get_locked_ttl_seconds(subject).await? {
            secs if secs > 0 => Ok(ThrottleStatus::Locked {
                retry_after_secs: secs.unsigned_abs(),
            }),
            _ => Ok(ThrottleStatus::Allowed),
        }
    }

    pub async fn record_failure(&self, subject: &ThrottleSubject) -> Result<FailureOutcome> {
        if self.is_known_good(subject).await? {
            return Ok(FailureOutcome::Bypassed);
        }

        let failures = self.increment_failures(subject).await?;
        let delay = self.config.policy.delay_for(failures);

        if !delay.is_zero() {
            // Lockouts are stored in whole seconds; round up so a sub-second
            // delay still locks.
            let delay_secs = u64::try_from(delay.as_millis().div_ceil(1000)).unwrap_or(u64::MAX);
            self.set_locked(subject, delay_secs).await?;
            tracing::warn!(
                identifier = %subject.identifier_hash,
                failures,
                delay_secs,
                "sign-in locked after repeated failures"
            );
        }

        Ok(FailureOutcome::Recorded { failures, delay })
    }

    pub async fn record_success(&self, subject: &ThrottleSubject, remember: bool) -> Result<()> {
        self.clear_failure_state(subject).await?;
        if remember {
            self.mark_known_good(subject).await?;
        }
        Ok(())
    }
}
