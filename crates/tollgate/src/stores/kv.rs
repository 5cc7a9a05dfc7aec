//! Key-value store adapter for Redis.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::error::{Error, Result};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Increments KEYS[1] by ARGV[1] and applies a PEXPIRE of ARGV[2] ms only
/// when the key carries no expiry yet, i.e. on the increment that created it.
const INCREMENT_WITH_TTL_SCRIPT: &str = r#"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return count
"#;

/// The seven operations every coordination primitive is built from.
///
/// Implementations must make `set_if_absent`, `increment` and
/// `compare_and_delete` atomic per key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Health check - verify store connectivity.
    async fn ping(&self) -> Result<()>;

    /// Write `value` with `ttl` only if `key` does not exist. Returns true if written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditionally write `value`, replacing any previous TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete `key` (returns true if it existed).
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add `amount` to the integer at `key` and return the new value.
    /// `ttl` is applied only when the increment creates the key.
    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Remaining lifetime of `key`; `None` if it is missing or never expires.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>>;

    /// Delete `key` only if it currently holds `expected`. Returns true if deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;
}

/// Redis implementation of KeyValueStore.
///
/// Each call checks out a multiplexed connection and drops it when the call
/// returns. The whole round trip is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    timeout: Duration,
    compare_and_delete: redis::Script,
    increment_with_ttl: redis::Script,
}

impl RedisStore {
    pub fn new(client: redis::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
            increment_with_ttl: redis::Script::new(INCREMENT_WITH_TTL_SCRIPT),
        }
    }

    pub fn open(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::InvalidArgument(format!("invalid redis url: {e}")))?;
        Ok(Self::new(client, timeout))
    }

    async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let round_trip = async {
            let conn = self.client.get_multiplexed_async_connection().await?;
            op(conn).await
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::ServiceUnavailable(format!(
                "store round trip exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Err(Error::InvalidArgument(
            "ttl must be at least one millisecond".into(),
        ));
    }
    Ok(ms)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let pong: String = self
            .with_connection(|mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(Error::Internal(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let ttl_ms = ttl_millis(ttl)?;

        let reply: Option<String> = self
            .with_connection(|mut conn| async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let ttl_ms = ttl.map(ttl_millis).transpose()?;

        self.with_connection(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ms) = ttl_ms {
                cmd.arg("PX").arg(ms);
            }
            cmd.query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let deleted: i64 = self
            .with_connection(|mut conn| async move {
                redis::cmd("DEL").arg(key).query_async(&mut conn).await
            })
            .await?;

        Ok(deleted > 0)
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        match ttl {
            Some(ttl) => {
                let ttl_ms = ttl_millis(ttl)?;
                let script = &self.increment_with_ttl;
                self.with_connection(|mut conn| async move {
                    script
                        .key(key)
                        .arg(amount)
                        .arg(ttl_ms)
                        .invoke_async(&mut conn)
                        .await
                })
                .await
            }
            None => {
                self.with_connection(|mut conn| async move {
                    redis::cmd("INCRBY")
                        .arg(key)
                        .arg(amount)
                        .query_async(&mut conn)
                        .await
                })
                .await
            }
        }
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        // PTTL: -2 missing, -1 no expiry.
        let pttl: i64 = self
            .with_connection(|mut conn| async move {
                redis::cmd("PTTL").arg(key).query_async(&mut conn).await
            })
            .await?;

        Ok(u64::try_from(pttl)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let script = &self.compare_and_delete;
        let deleted: i64 = self
            .with_connection(|mut conn| async move {
                script.key(key).arg(expected).invoke_async(&mut conn).await
            })
            .await?;

        Ok(deleted > 0)
    }
}
