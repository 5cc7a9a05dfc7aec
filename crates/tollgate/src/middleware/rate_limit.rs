//! Rate limiting middleware.
//!
//! Blocked requests get 429 with a `Retry-After` header (seconds, rounded up).
//! A store outage yields 503; requests are never let through on an unknown
//! decision.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::stores::{RateLimitDecision, RateLimiter, RequestContext};

pub async fn enforce_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();

    match limiter.check(&context).await {
        Ok(decision) if decision.is_blocked => too_many_requests(&decision),
        Ok(_) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

fn too_many_requests(decision: &RateLimitDecision) -> Response {
    let retry_after_secs = decision.retry_after_ms.div_ceil(1000).max(1);
    let body = serde_json::json!({
        "error": "Too many requests. Try again later.",
        "retry_after_ms": decision.retry_after_ms,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::stores::{KeyValueStore, MemoryStore, MockKeyValueStore, RateLimitConfig, Thresholds};
    use axum::{Router, body::Body, middleware::from_fn_with_state, routing::get};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(Arc::new(limiter), enforce_rate_limit))
    }

    fn request_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/")
            .extension(RequestContext {
                ip: Some(ip.to_string()),
                ..Default::default()
            })
            .body(Body::empty())
            .unwrap()
    }

    fn limiter(store: Arc<dyn KeyValueStore>) -> RateLimiter {
        RateLimiter::new(
            store,
            RateLimitConfig {
                block_duration: Duration::from_millis(1_500),
                thresholds: Thresholds {
                    fingerprint: 0,
                    ip: 2,
                    city: 0,
                    country: 0,
                },
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn blocked_request_gets_429_with_retry_after() {
        let app = app(limiter(Arc::new(MemoryStore::new())));

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[tokio::test]
    async fn missing_context_passes_through() {
        let app = app(limiter(Arc::new(MockKeyValueStore::new())));

        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn store_outage_returns_503() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(Error::ServiceUnavailable("down".into())));
        let app = app(limiter(Arc::new(store)));

        let response = app.oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
