//! Idempotency coordination for exactly-once side effects.
//!
//! The first caller for a key writes an in-flight sentinel with set-if-absent
//! and becomes the only one allowed to execute. Later callers see either the
//! sentinel (in flight) or the finished response (replay it).
//!
//! This is bounded by TTLs, not durable: if the winner crashes before
//! `complete`, the sentinel expires after the in-flight TTL and a later
//! caller may execute again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// Longest accepted idempotency key, in bytes.
pub const MAX_KEY_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub in_flight_ttl: Duration,
    pub cache_ttl: Duration,
    pub max_body_size_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            in_flight_ttl: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            max_body_size_bytes: 1024 * 1024,
        }
    }
}

/// A finished response, replayed verbatim to duplicate requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// What is stored under `idempotency:{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum Record {
    InFlight { token: String, started_at: i64 },
    Completed(CachedResponse),
}

/// Proof of having won the acquire race for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyTicket {
    key: String,
    sentinel: String,
}

impl IdempotencyTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// Caller is first: execute, then `complete` (or `release` on failure).
    Acquired(IdempotencyTicket),
    /// Another caller is executing. Do not execute; retry later.
    InFlight,
    /// A finished response exists. Replay it; do not execute.
    Cached(CachedResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Stored,
    /// Body exceeded the size limit; nothing was cached.
    Rejected { size: usize, limit: usize },
}

pub struct IdempotencyCoordinator {
    store: Arc<dyn KeyValueStore>,
    config: IdempotencyConfig,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    fn store_key(key: &str) -> String {
        format!("idempotency:{}", key)
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("idempotency key must not be empty".into()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidArgument(format!(
                "idempotency key exceeds {MAX_KEY_LEN} bytes"
            )));
        }
        Ok(())
    }

    pub async fn check(&self, key: &str) -> Result<IdempotencyCheck> {
        Self::validate_key(key)?;
        let store_key = Self::store_key(key);

        let sentinel = serde_json::to_string(&Record::InFlight {
            token: Uuid::new_v4().to_string(),
            started_at: Utc::now().timestamp_millis(),
        })?;

        if self
            .store
            .set_if_absent(&store_key, &sentinel, self.config.in_flight_ttl)
            .await?
        {
            tracing::debug!(key, "idempotency key acquired");
            return Ok(IdempotencyCheck::Acquired(IdempotencyTicket {
                key: key.to_string(),
                sentinel,
            }));
        }

        // Expired between the two calls: report in flight and let the caller retry.
        let Some(json) = self.store.get(&store_key).await? else {
            return Ok(IdempotencyCheck::InFlight);
        };

        match serde_json::from_str::<Record>(&json)? {
            Record::Completed(response) => {
                tracing::debug!(key, status = response.status_code, "replaying cached response");
                Ok(IdempotencyCheck::Cached(response))
            }
            Record::InFlight { .. } => Ok(IdempotencyCheck::InFlight),
        }
    }

    /// Store the winner's response for replay.
    pub async fn complete(&self, key: &str, response: CachedResponse) -> Result<Completion> {
        Self::validate_key(key)?;

        let size = response.body.len();
        let limit = self.config.max_body_size_bytes;
        if size > limit {
            tracing::warn!(key, size, limit, "response too large to cache for idempotent replay");
            return Ok(Completion::Rejected { size, limit });
        }

        let json = serde_json::to_string(&Record::Completed(response))?;
        self.store
            .set(&Self::store_key(key), &json, Some(self.config.cache_ttl))
            .await?;

        Ok(Completion::Stored)
    }

    /// Give up the in-flight claim so the operation can be retried at once.
    /// Returns false if the sentinel already expired or was replaced.
    pub async fn release(&self, ticket: &IdempotencyTicket) -> Result<bool> {
        let released = self
            .store
            .compare_and_delete(&Self::store_key(&ticket.key), &ticket.sentinel)
            .await?;

        tracing::debug!(key = %ticket.key, released, "idempotency claim released");
        Ok(released)
    }

    /// Read the current record without claiming it. For operators.
    pub async fn inspect(&self, key: &str) -> Result<Option<IdempotencyCheck>> {
        Self::validate_key(key)?;

        match self.store.get(&Self::store_key(key)).await? {
            None => Ok(None),
            Some(json) => match serde_json::from_str::<Record>(&json)? {
                Record::Completed(response) => Ok(Some(IdempotencyCheck::Cached(response))),
                Record::InFlight { .. } => Ok(Some(IdempotencyCheck::InFlight)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryStore, MockKeyValueStore};
    use tokio::task::JoinSet;

    fn coordinator() -> IdempotencyCoordinator {
        IdempotencyCoordinator::new(Arc::new(MemoryStore::new()), IdempotencyConfig::default())
    }

    fn created() -> CachedResponse {
        CachedResponse {
            status_code: 201,
            body: r#"{"id":"msg_1"}"#.to_string(),
            content_type: Some("application/json".to_string()),
        }
    }

    #[tokio::test]
    async fn single_winner_then_in_flight_then_cached() {
        let coordinator = coordinator();

        assert!(matches!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Acquired(_)
        ));
        assert_eq!(coordinator.check("K").await.unwrap(), IdempotencyCheck::InFlight);

        assert_eq!(
            coordinator.complete("K", created()).await.unwrap(),
            Completion::Stored
        );

        assert_eq!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Cached(created())
        );
        assert_eq!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Cached(created())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_winner_allows_reacquire_after_in_flight_ttl() {
        let coordinator = coordinator();
        assert!(matches!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Acquired(_)
        ));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Acquired(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_response_expires_after_cache_ttl() {
        let coordinator = coordinator();
        coordinator.check("K").await.unwrap();
        coordinator.complete("K", created()).await.unwrap();

        tokio::time::advance(Duration::from_secs(24 * 60 * 60 + 1)).await;

        assert_eq!(coordinator.inspect("K").await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_and_not_cached() {
        let config = IdempotencyConfig {
            max_body_size_bytes: 4,
            ..Default::default()
        };
        let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()), config);
        coordinator.check("K").await.unwrap();

        let completion = coordinator.complete("K", created()).await.unwrap();
        assert_eq!(
            completion,
            Completion::Rejected {
                size: created().body.len(),
                limit: 4
            }
        );
        assert_eq!(coordinator.check("K").await.unwrap(), IdempotencyCheck::InFlight);
    }

    #[tokio::test]
    async fn release_lets_next_caller_acquire() {
        let coordinator = coordinator();
        let IdempotencyCheck::Acquired(ticket) = coordinator.check("K").await.unwrap() else {
            panic!("expected acquire");
        };

        assert!(coordinator.release(&ticket).await.unwrap());
        assert!(matches!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn stale_ticket_cannot_release_completed_response() {
        let coordinator = coordinator();
        let IdempotencyCheck::Acquired(ticket) = coordinator.check("K").await.unwrap() else {
            panic!("expected acquire");
        };
        coordinator.complete("K", created()).await.unwrap();

        assert!(!coordinator.release(&ticket).await.unwrap());
        assert_eq!(
            coordinator.check("K").await.unwrap(),
            IdempotencyCheck::Cached(created())
        );
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let coordinator = coordinator();

        assert!(matches!(
            coordinator.check("").await,
            Err(Error::InvalidArgument(_))
        ));
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            coordinator.check(&long).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_record_is_a_serialization_error() {
        let mut store = MockKeyValueStore::new();
        store.expect_set_if_absent().returning(|_, _, _| Ok(false));
        store
            .expect_get()
            .returning(|_| Ok(Some("not-json".to_string())));
        let coordinator =
            IdempotencyCoordinator::new(Arc::new(store), IdempotencyConfig::default());

        let err = coordinator.check("K").await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!err.is_service_unavailable());
    }

    #[tokio::test]
    async fn vanished_sentinel_reports_in_flight() {
        let mut store = MockKeyValueStore::new();
        store.expect_set_if_absent().returning(|_, _, _| Ok(false));
        store.expect_get().returning(|_| Ok(None));
        let coordinator =
            IdempotencyCoordinator::new(Arc::new(store), IdempotencyConfig::default());

        assert_eq!(coordinator.check("K").await.unwrap(), IdempotencyCheck::InFlight);
    }

    #[tokio::test]
    async fn store_outage_is_service_unavailable() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_if_absent()
            .returning(|_, _, _| Err(Error::ServiceUnavailable("down".into())));
        let coordinator =
            IdempotencyCoordinator::new(Arc::new(store), IdempotencyConfig::default());

        assert!(coordinator.check("K").await.unwrap_err().is_service_unavailable());
    }

    #[test]
    fn records_use_a_state_tag() {
        let json = serde_json::to_string(&Record::Completed(created())).unwrap();
        assert!(json.contains(r#""state":"completed""#));
        assert!(json.contains(r#""status_code":201"#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_have_exactly_one_winner() {
        let coordinator = Arc::new(coordinator());
        let mut tasks = JoinSet::new();

        for _ in 0..64 {
            let coordinator = coordinator.clone();
            tasks.spawn(async move { coordinator.check("K").await.unwrap() });
        }

        let (mut acquired, mut in_flight) = (0, 0);
        while let Some(outcome) = tasks.join_next().await {
            match outcome.unwrap() {
                IdempotencyCheck::Acquired(_) => acquired += 1,
                IdempotencyCheck::InFlight => in_flight += 1,
                IdempotencyCheck::Cached(_) => panic!("nothing was completed"),
            }
        }
        assert_eq!(acquired, 1);
        assert_eq!(in_flight, 63);
    }
}
