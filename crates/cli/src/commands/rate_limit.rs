//! Push one request through the rate limiter and show what it decided.
//!
//! This counts like a real request does, so repeated runs walk a dimension
//! up to its threshold. Handy for confirming a threshold or whitelist change
//! took effect, or for seeing how long a block has left.

use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};
use tollgate::Coordination;
use tollgate::stores::{Dimension, RateLimitDecision, RequestContext};

use crate::ui;

#[derive(Tabled)]
struct DimensionRow {
    #[tabled(rename = "Dimension")]
    dimension: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
}

pub async fn check(
    coordination: &Coordination,
    context: &RequestContext,
    json: bool,
) -> Result<RateLimitDecision> {
    let limiter = &coordination.rate_limiter;
    let decision = ui::spin("Checking...", limiter.check(context)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(decision);
    }

    let thresholds = &limiter.config().thresholds;
    let rows: Vec<DimensionRow> = Dimension::PRIORITY
        .iter()
        .filter_map(|&dimension| {
            context.value(dimension).map(|value| DimensionRow {
                dimension: dimension.to_string(),
                value: value.to_string(),
                threshold: thresholds
                    .get(dimension)
                    .map_or_else(|| "off".to_string(), |n| n.to_string()),
            })
        })
        .collect();

    if rows.is_empty() {
        ui::info("No request attributes given; nothing is counted.");
    } else {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    match decision.blocked_dimension {
        Some(dimension) if decision.is_blocked => ui::denied(&format!(
            "Blocked by {}, retry after {}",
            ui::bold(&dimension.to_string()),
            ui::duration(std::time::Duration::from_millis(decision.retry_after_ms))
        )),
        _ => ui::success("Allowed"),
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::memory_coordination;

    fn from_ip(ip: &str) -> RequestContext {
        RequestContext {
            ip: Some(ip.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn requests_over_threshold_are_blocked() {
        let coordination = memory_coordination(&[("RATE_LIMIT_IP_THRESHOLD", "2")]);

        for _ in 0..2 {
            let decision = check(&coordination, &from_ip("10.0.0.1"), true).await.unwrap();
            assert!(!decision.is_blocked);
        }

        let decision = check(&coordination, &from_ip("10.0.0.1"), false).await.unwrap();
        assert!(decision.is_blocked);
        assert_eq!(decision.blocked_dimension, Some(Dimension::Ip));
    }

    #[tokio::test]
    async fn whitelisted_country_is_never_blocked() {
        let coordination = memory_coordination(&[
            ("RATE_LIMIT_COUNTRY_THRESHOLD", "1"),
            ("RATE_LIMIT_WHITELISTED_COUNTRIES", "DE,FR"),
        ]);
        let context = RequestContext {
            country: Some("de".to_string()),
            ..Default::default()
        };

        for _ in 0..3 {
            assert!(!check(&coordination, &context, true).await.unwrap().is_blocked);
        }
    }

    #[tokio::test]
    async fn empty_context_is_allowed() {
        let coordination = memory_coordination(&[]);

        let decision = check(&coordination, &RequestContext::default(), false).await.unwrap();
        assert_eq!(decision, RateLimitDecision::allowed());
    }
}
