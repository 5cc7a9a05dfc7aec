//! axum middleware adapters for the coordination primitives.
//!
//! Both layers are built with `axum::middleware::from_fn_with_state`:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/messages", post(create_message))
//!     .layer(from_fn_with_state(coordination.idempotency.clone(), enforce_idempotency))
//!     .layer(from_fn_with_state(coordination.rate_limiter.clone(), enforce_rate_limit));
//! ```
//!
//! The rate limiter reads a [`RequestContext`](crate::stores::RequestContext)
//! extension inserted by an upstream enrichment layer.

pub mod idempotency;
pub mod rate_limit;

pub use idempotency::{IDEMPOTENCY_KEY_HEADER, REPLAYED_HEADER, enforce_idempotency};
pub use rate_limit::enforce_rate_limit;
