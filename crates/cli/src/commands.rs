pub mod health;
pub mod idempotency;
pub mod lock;
pub mod rate_limit;
pub mod throttle;
