//! In-process key-value store.
//!
//! Single-node deployments and tests use this instead of Redis. One mutex
//! guards the whole map, which gives every operation the same per-key
//! atomicity Redis provides. Expiry uses tokio's clock so tests can pause
//! and advance time.
//!
//! Expired entries are dropped when their key is next read, and by a full
//! sweep every [`SWEEP_INTERVAL`] writes. Keys that are never touched again
//! (rate-limit counters of past windows) are reclaimed by the sweep.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// Writes between two sweeps of expired entries.
const SWEEP_INTERVAL: usize = 256;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    writes_since_sweep: usize,
}

impl Entries {
    /// Drop `key` if it has expired, then return the live entry, if any.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.map.get(key).is_some_and(|e| !e.is_live(now)) {
            self.map.remove(key);
        }
        self.map.get_mut(key)
    }

    fn insert(&mut self, key: &str, entry: Entry, now: Instant) {
        self.map.insert(key.to_string(), entry);

        self.writes_since_sweep += 1;
        if self.writes_since_sweep >= SWEEP_INTERVAL {
            self.writes_since_sweep = 0;
            self.map.retain(|_, e| e.is_live(now));
        }
    }
}

/// Same rule as the Redis adapter: PX needs at least one millisecond.
fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl.as_millis() == 0 {
        return Err(Error::InvalidArgument(
            "ttl must be at least one millisecond".into(),
        ));
    }
    Ok(())
}

/// In-memory implementation of KeyValueStore.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held in memory, expired or not.
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.entries.lock().map.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        check_ttl(ttl)?;

        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.live(key, now).is_some() {
            return Ok(false);
        }

        let entry = Entry {
            value: value.to_string(),
            expires_at: Some(now + ttl),
        };
        entries.insert(key, entry, now);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        Ok(entries.live(key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        ttl.map(check_ttl).transpose()?;

        let now = Instant::now();
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        };
        self.entries.lock().insert(key, entry, now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        let existed = entries.live(key, Instant::now()).is_some();
        entries.map.remove(key);
        Ok(existed)
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        ttl.map(check_ttl).transpose()?;

        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.live(key, now) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    Error::Internal(format!("value at {key} is not an integer"))
                })?;
                let next = current
                    .checked_add(amount)
                    .ok_or_else(|| Error::Internal(format!("increment overflow at {key}")))?;
                entry.value = next.to_string();
                if entry.expires_at.is_none() {
                    entry.expires_at = ttl.map(|ttl| now + ttl);
                }
                Ok(next)
            }
            None => {
                let entry = Entry {
                    value: amount.to_string(),
                    expires_at: ttl.map(|ttl| now + ttl),
                };
                entries.insert(key, entry, now);
                Ok(amount)
            }
        }
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(entries
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
            .filter(|remaining| !remaining.is_zero()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        match entries.live(key, Instant::now()) {
            Some(entry) if entry.value == expected => {
                entries.map.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
