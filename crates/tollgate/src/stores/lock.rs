//! Distributed mutual exclusion over a named resource.
//!
//! A lock is a single key holding the owner's opaque token, written with
//! set-if-absent and a mandatory TTL. Release is an atomic compare-and-delete
//! so an owner whose TTL lapsed can never delete a lock someone else now holds.
//!
//! There is no renewal. If the protected work outlives the TTL, exclusivity
//! is silently lost; size TTLs generously and keep the work idempotent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// Outcome of an acquire attempt. A held lock is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockAcquisition {
    pub acquired: bool,
}

/// Outcome of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRelease {
    pub released: bool,
}

/// Key for the lock guarding `resource`.
pub fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Try once to take the lock at `key` for `owner_token`. Never waits.
    pub async fn acquire(
        &self,
        key: &str,
        owner_token: &str,
        ttl: Duration,
    ) -> Result<LockAcquisition> {
        if ttl.is_zero() {
            return Err(Error::InvalidArgument("lock ttl must be greater than zero".into()));
        }
        if owner_token.is_empty() {
            return Err(Error::InvalidArgument("lock owner token must not be empty".into()));
        }

        let acquired = self.store.set_if_absent(key, owner_token, ttl).await?;

        tracing::debug!(
            key,
            acquired,
            ttl_ms = ttl.as_millis() as u64,
            "lock acquire"
        );

        Ok(LockAcquisition { acquired })
    }

    /// Release the lock at `key` if, and only if, `owner_token` still holds it.
    pub async fn release(&self, key: &str, owner_token: &str) -> Result<LockRelease> {
        let released = self.store.compare_and_delete(key, owner_token).await?;

        if !released {
            tracing::warn!(key, "lock release skipped: not held by this owner");
        }

        Ok(LockRelease { released })
    }

    /// Run `work` while holding the lock on `resource`.
    ///
    /// Returns `Ok(None)` without running `work` when another owner holds the
    /// lock. The lock is released after `work` completes, whatever it returns.
    /// A failed release is logged and left to TTL expiry.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        resource: &str,
        ttl: Duration,
        work: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = lock_key(resource);
        let owner = Uuid::new_v4().to_string();

        if !self.acquire(&key, &owner, ttl).await?.acquired {
            tracing::info!(resource, "skipping: lock held by another instance");
            return Ok(None);
        }

        let output = work().await;

        if let Err(err) = self.release(&key, &owner).await {
            tracing::warn!(resource, error = %err, "lock release failed, will expire via TTL");
        }

        Ok(Some(output))
    }
}
