//! Idempotency middleware keyed on the `Idempotency-Key` header.
//!
//! - no header: the request passes through untouched
//! - first request for a key: the handler runs and its response is cached
//! - duplicate while the first is running: 409
//! - duplicate after completion: the cached response is replayed and
//!   marked with `Idempotent-Replayed: true`
//!
//! Server errors release the claim so the client can retry. Successful
//! responses that cannot be cached (too large, not UTF-8) keep the claim
//! until the in-flight TTL expires, so duplicates are not executed early.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::stores::{
    CachedResponse, Completion, IdempotencyCheck, IdempotencyCoordinator, IdempotencyTicket,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

pub async fn enforce_idempotency(
    State(coordinator): State<Arc<IdempotencyCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|v| v.to_str().map(str::to_owned));

    let key = match header_value {
        None => return next.run(request).await,
        Some(Ok(key)) => key,
        Some(Err(_)) => {
            return (StatusCode::BAD_REQUEST, "Invalid Idempotency-Key header").into_response();
        }
    };

    match coordinator.check(&key).await {
        Ok(IdempotencyCheck::Acquired(ticket)) => {
            let response = next.run(request).await;
            record(&coordinator, &ticket, response).await
        }
        Ok(IdempotencyCheck::InFlight) => {
            let body = serde_json::json!({
                "error": "A request with this idempotency key is still in progress",
            });
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        Ok(IdempotencyCheck::Cached(cached)) => replay(cached),
        Err(err) => err.into_response(),
    }
}

async fn record(
    coordinator: &IdempotencyCoordinator,
    ticket: &IdempotencyTicket,
    response: Response,
) -> Response {
    if response.status().is_server_error() {
        release(coordinator, ticket).await;
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(key = ticket.key(), error = %err, "failed to buffer response body");
            release(coordinator, ticket).await;
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            let cached = CachedResponse {
                status_code: parts.status.as_u16(),
                body: text.to_string(),
                content_type: parts
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned),
            };

            match coordinator.complete(ticket.key(), cached).await {
                Ok(Completion::Stored) | Ok(Completion::Rejected { .. }) => {}
                Err(err) => {
                    tracing::warn!(
                        key = ticket.key(),
                        error = %err,
                        "failed to cache idempotent response"
                    );
                }
            }
        }
        Err(_) => {
            tracing::debug!(key = ticket.key(), "binary response not cached for replay");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

async fn release(coordinator: &IdempotencyCoordinator, ticket: &IdempotencyTicket) {
    if let Err(err) = coordinator.release(ticket).await {
        tracing::warn!(key = ticket.key(), error = %err, "failed to release idempotency claim");
    }
}

fn replay(cached: CachedResponse) -> Response {
    let status =
        StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, cached.body).into_response();

    let headers = response.headers_mut();
    match cached
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        Some(content_type) => headers.insert(header::CONTENT_TYPE, content_type),
        None => headers.remove(header::CONTENT_TYPE),
    };
    headers.insert(REPLAYED_HEADER, HeaderValue::from_static("true"));

    response
}
