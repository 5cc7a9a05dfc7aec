//! Test context for CLI command tests.
//!
//! Commands run against an in-memory store so no Redis server is needed.

use std::sync::Arc;

use tollgate::config::ENV_PREFIX;
use tollgate::stores::MemoryStore;
use tollgate::{Config, Coordination};

/// Config from `vars` (names without the `TOLLGATE_` prefix) on top of the
/// defaults.
pub fn config(vars: &[(&str, &str)]) -> Config {
    let env = std::iter::once(("REDIS_URL", "redis://127.0.0.1:6379"))
        .chain(vars.iter().copied())
        .map(|(name, value)| (format!("{ENV_PREFIX}{name}"), value.to_string()));

    Config::from_vars(env).expect("test config")
}

/// Coordination over a fresh in-memory store.
pub fn memory_coordination(vars: &[(&str, &str)]) -> Coordination {
    Coordination::new(Arc::new(MemoryStore::new()), &config(vars))
}
