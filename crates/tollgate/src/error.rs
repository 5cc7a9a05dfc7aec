use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type alias for coordination operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a coordination primitive.
///
/// Business outcomes (blocked, lock held, request in flight) are never
/// errors; they are carried in the `Ok` payload of each operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The store could not be reached or did not answer in time.
    /// The outcome of the operation is unknown.
    #[error("store unavailable: {0}")]
    ServiceUnavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store answered with an unexpected error (wrong type, script failure).
    #[error("internal store error: {0}")]
    Internal(String),

    /// The caller passed an argument the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Environment configuration could not be read.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),
}

impl Error {
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Error::ServiceUnavailable(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error()
        {
            Error::ServiceUnavailable(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::ServiceUnavailable(reason) => {
                tracing::warn!(%reason, "coordination store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable").into_response()
            }
            Error::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            err => {
                tracing::error!("internal error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
