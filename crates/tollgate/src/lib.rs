//! Distributed coordination primitives shared by the platform's services.
//!
//! A lock for maintenance jobs, a multi-dimension rate limiter, an
//! idempotency coordinator and a sign-in throttle, all built on one Redis
//! store with per-key TTLs and atomic conditional writes. The store is the
//! only source of truth; every operation is a short round trip and returns
//! [`Error::ServiceUnavailable`] rather than guessing when the store cannot
//! be reached.

pub mod config;
pub mod error;
pub mod middleware;
pub mod stores;
#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{Error, Result};
pub use stores::Coordination;
