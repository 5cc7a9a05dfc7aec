//! Inspect idempotency records.
//!
//! `show` reads without side effects. `check` claims the key exactly as a
//! request carrying that `Idempotency-Key` would, which blocks real requests
//! with the same key until the in-flight TTL passes.

use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};
use tollgate::Coordination;
use tollgate::stores::{CachedResponse, IdempotencyCheck};

use crate::ui;

#[derive(Tabled)]
struct ResponseRow {
    #[tabled(rename = "Status")]
    status: u16,
    #[tabled(rename = "Content-Type")]
    content_type: String,
    #[tabled(rename = "Body")]
    body: String,
}

const BODY_PREVIEW_CHARS: usize = 60;

impl From<&CachedResponse> for ResponseRow {
    fn from(response: &CachedResponse) -> Self {
        let mut body: String = response.body.chars().take(BODY_PREVIEW_CHARS).collect();
        if response.body.chars().count() > BODY_PREVIEW_CHARS {
            body.push('…');
        }

        Self {
            status: response.status_code,
            content_type: response.content_type.clone().unwrap_or_else(|| "-".to_string()),
            body,
        }
    }
}

fn print_cached(response: &CachedResponse) {
    let table = Table::new([ResponseRow::from(response)])
        .with(Style::rounded())
        .to_string();
    println!("{table}");
}

pub async fn check(coordination: &Coordination, key: &str) -> Result<IdempotencyCheck> {
    let config = coordination.idempotency.config();
    let outcome = coordination.idempotency.check(key).await?;

    match &outcome {
        IdempotencyCheck::Acquired(_) => ui::success(&format!(
            "Claimed {} for {}",
            ui::bold(key),
            ui::duration(config.in_flight_ttl)
        )),
        IdempotencyCheck::InFlight => ui::denied(&format!("{} is in flight", ui::bold(key))),
        IdempotencyCheck::Cached(response) => {
            ui::info(&format!("{} has a cached response", ui::bold(key)));
            print_cached(response);
        }
    }

    Ok(outcome)
}

pub async fn show(
    coordination: &Coordination,
    key: &str,
    json: bool,
) -> Result<Option<IdempotencyCheck>> {
    let record = coordination.idempotency.inspect(key).await?;

    match &record {
        None => println!("No record for {}", ui::bold(key)),
        Some(IdempotencyCheck::Cached(response)) if json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
        Some(IdempotencyCheck::Cached(response)) => print_cached(response),
        Some(_) => println!("{} is in flight", ui::bold(key)),
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::memory_coordination;

    #[tokio::test]
    async fn show_does_not_claim_the_key() {
        let coordination = memory_coordination(&[]);

        assert!(show(&coordination, "order-42", false).await.unwrap().is_none());
        assert!(matches!(
            check(&coordination, "order-42").await.unwrap(),
            IdempotencyCheck::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn claimed_key_shows_in_flight() {
        let coordination = memory_coordination(&[]);
        check(&coordination, "order-42").await.unwrap();

        assert_eq!(check(&coordination, "order-42").await.unwrap(), IdempotencyCheck::InFlight);
        assert_eq!(
            show(&coordination, "order-42", false).await.unwrap(),
            Some(IdempotencyCheck::InFlight)
        );
    }

    #[tokio::test]
    async fn completed_key_shows_cached_response() {
        let coordination = memory_coordination(&[]);
        check(&coordination, "order-42").await.unwrap();
        let response = CachedResponse {
            status_code: 201,
            body: "x".repeat(200),
            content_type: Some("text/plain".to_string()),
        };
        coordination.idempotency.complete("order-42", response.clone()).await.unwrap();

        assert_eq!(
            show(&coordination, "order-42", true).await.unwrap(),
            Some(IdempotencyCheck::Cached(response))
        );
    }

    #[test]
    fn long_bodies_are_truncated_in_tables() {
        let row = ResponseRow::from(&CachedResponse {
            status_code: 200,
            body: "é".repeat(100),
            content_type: None,
        });

        assert_eq!(row.body.chars().count(), BODY_PREVIEW_CHARS + 1);
        assert_eq!(row.content_type, "-");
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let coordination = memory_coordination(&[]);
        assert!(show(&coordination, "", false).await.is_err());
    }
}
