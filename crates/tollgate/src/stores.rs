//! Coordination primitives over an ephemeral key-value store (Redis).
//!
//! Every record lives in the store with a TTL; nothing is cached in process.
//! All primitives are built from the operations of [`KeyValueStore`].
//!
//! ## Primitives
//!
//! - **lock** - Mutual exclusion for maintenance jobs (set-if-absent + compare-and-delete)
//! - **rate_limit** - Fixed-window counters and block markers per request dimension
//! - **idempotency** - Acquire / in-flight / cached state machine for side effects
//! - **sign_in_throttle** - Failure counters, lockouts and known-good bypass
//!
//! ## Redis Key Patterns
//!
//! ```text
//! lock:{resource}                                   → owner token
//! ratelimit:{dimension}:{value}:{window_id}         → request count (TTL = window)
//! blocked:{dimension}:{value}                       → block timestamp (TTL = block duration)
//! idempotency:{key}                                 → in-flight sentinel or cached response JSON
//! auth:sign-in-throttle:{identifier}:{identity}:*   → failures / locked / known-good
//! ```
//!
//! ## Usage in Handlers
//!
//! ```ignore
//! let coordination = Coordination::connect(&config)?;
//!
//! let subject = ThrottleSubject::from_raw(&email, &client_ip);
//! let status = coordination.sign_in_throttle.check(&subject).await?;
//! if let ThrottleStatus::Locked { retry_after_secs } = status {
//!     return Ok(too_many_attempts(retry_after_secs));
//! }
//! ```

mod idempotency;
mod kv;
mod lock;
mod memory;
mod rate_limit;
mod sign_in_throttle;

pub use idempotency::{
    CachedResponse, Completion, IdempotencyCheck, IdempotencyConfig, IdempotencyCoordinator,
    IdempotencyTicket, MAX_KEY_LEN,
};
pub use kv::{KeyValueStore, RedisStore};
pub use lock::{DistributedLock, LockAcquisition, LockRelease, lock_key};
pub use memory::MemoryStore;
pub use rate_limit::{
    Dimension, RateLimitConfig, RateLimitDecision, RateLimiter, RequestContext, Thresholds,
    Whitelist,
};
pub use sign_in_throttle::{
    FailureOutcome, SignInThrottle, SignInThrottleConfig, ThrottlePolicy, ThrottleStatus,
    ThrottleSubject, compute_sign_in_delay,
};

#[cfg(test)]
pub use kv::MockKeyValueStore;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

/// All coordination primitives, sharing one store handle.
#[derive(Clone)]
pub struct Coordination {
    pub store: Arc<dyn KeyValueStore>,
    pub lock: Arc<DistributedLock>,
    pub rate_limiter: Arc<RateLimiter>,
    pub idempotency: Arc<IdempotencyCoordinator>,
    pub sign_in_throttle: Arc<SignInThrottle>,
}

impl Coordination {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self {
            lock: Arc::new(DistributedLock::new(store.clone())),
            rate_limiter: Arc::new(RateLimiter::new(store.clone(), config.rate_limit())),
            idempotency: Arc::new(IdempotencyCoordinator::new(
                store.clone(),
                config.idempotency(),
            )),
            sign_in_throttle: Arc::new(SignInThrottle::new(
                store.clone(),
                config.sign_in_throttle(),
            )),
            store,
        }
    }

    /// Build on a Redis store at `config.redis_url`. Does not connect yet.
    pub fn connect(config: &Config) -> Result<Self> {
        let store = RedisStore::open(&config.redis_url, config.store_timeout())?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Verify the store is reachable.
    pub async fn health_check(&self) -> Result<()> {
        self.store.ping().await
    }
}
