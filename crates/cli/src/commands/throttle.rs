//! Inspect and drive sign-in throttling for one (identifier, identity) pair.
//!
//! Arguments are the raw values (an email, a client IP); they are hashed the
//! same way the sign-in flow hashes them, so the state shown is the state a
//! real attempt would see.

use std::time::Duration;

use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};
use tollgate::Coordination;
use tollgate::stores::{FailureOutcome, ThrottlePolicy, ThrottleStatus, ThrottleSubject};

use crate::ui;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Failures")]
    failures: i64,
    #[tabled(rename = "Locked for")]
    locked_for: String,
    #[tabled(rename = "Known good")]
    known_good: bool,
}

pub async fn status(coordination: &Coordination, identifier: &str, identity: &str) -> Result<()> {
    let throttle = &coordination.sign_in_throttle;
    let subject = ThrottleSubject::from_raw(identifier, identity);

    let row = StatusRow {
        failures: throttle.failure_count(&subject).await?,
        locked_for: format!("{}s", throttle.get_locked_ttl_seconds(&subject).await?),
        known_good: throttle.is_known_good(&subject).await?,
    };
    println!("{}", Table::new([row]).with(Style::rounded()));

    match throttle.check(&subject).await? {
        ThrottleStatus::Allowed => ui::success("Sign-in attempts allowed"),
        ThrottleStatus::Locked { retry_after_secs } => {
            ui::denied(&format!("Locked, retry after {retry_after_secs}s"))
        }
    }

    Ok(())
}

pub async fn fail(
    coordination: &Coordination,
    identifier: &str,
    identity: &str,
) -> Result<FailureOutcome> {
    let subject = ThrottleSubject::from_raw(identifier, identity);
    let outcome = coordination.sign_in_throttle.record_failure(&subject).await?;

    match outcome {
        FailureOutcome::Bypassed => ui::info("Pair is known good; failure not counted"),
        FailureOutcome::Recorded { failures, delay } if delay.is_zero() => {
            ui::success(&format!("Recorded failure {failures}, no lockout"))
        }
        FailureOutcome::Recorded { failures, delay } => ui::denied(&format!(
            "Recorded failure {failures}, locked for {}",
            ui::duration(delay)
        )),
    }

    Ok(outcome)
}

pub async fn succeed(
    coordination: &Coordination,
    identifier: &str,
    identity: &str,
    remember: bool,
) -> Result<()> {
    let subject = ThrottleSubject::from_raw(identifier, identity);
    coordination.sign_in_throttle.record_success(&subject, remember).await?;

    if remember {
        ui::success("Failure state cleared; pair remembered as known good");
    } else {
        ui::success("Failure state cleared");
    }
    Ok(())
}

/// Print the lockout `policy` applies after `failures` failures.
pub fn delay(policy: &ThrottlePolicy, failures: i64) -> Duration {
    let delay = policy.delay_for(failures);
    println!("{}", ui::duration(delay));
    delay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{config, memory_coordination};

    const EMAIL: &str = "alice@example.com";
    const IP: &str = "203.0.113.7";

    #[tokio::test]
    async fn fourth_failure_locks_for_five_seconds() {
        let coordination = memory_coordination(&[]);

        for expected in 1..=3 {
            let outcome = fail(&coordination, EMAIL, IP).await.unwrap();
            assert_eq!(
                outcome,
                FailureOutcome::Recorded {
                    failures: expected,
                    delay: Duration::ZERO
                }
            );
        }

        let outcome = fail(&coordination, EMAIL, IP).await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Recorded {
                failures: 4,
                delay: Duration::from_secs(5)
            }
        );

        status(&coordination, EMAIL, IP).await.unwrap();
        let subject = ThrottleSubject::from_raw(EMAIL, IP);
        assert_eq!(
            coordination.sign_in_throttle.check(&subject).await.unwrap(),
            ThrottleStatus::Locked { retry_after_secs: 5 }
        );
    }

    #[tokio::test]
    async fn remembered_success_bypasses_later_failures() {
        let coordination = memory_coordination(&[]);
        fail(&coordination, EMAIL, IP).await.unwrap();

        succeed(&coordination, EMAIL, IP, true).await.unwrap();

        assert_eq!(fail(&coordination, EMAIL, IP).await.unwrap(), FailureOutcome::Bypassed);
    }

    #[tokio::test]
    async fn pairs_are_tracked_separately() {
        let coordination = memory_coordination(&[]);
        for _ in 0..4 {
            fail(&coordination, EMAIL, IP).await.unwrap();
        }

        let other = ThrottleSubject::from_raw(EMAIL, "198.51.100.1");
        assert_eq!(
            coordination.sign_in_throttle.check(&other).await.unwrap(),
            ThrottleStatus::Allowed
        );
    }

    #[test]
    fn delay_follows_configured_policy() {
        let policy = config(&[
            ("THROTTLE_FREE_ATTEMPTS", "1"),
            ("THROTTLE_MAX_DELAY_SECS", "10"),
        ])
        .sign_in_throttle()
        .policy;

        assert_eq!(delay(&policy, 1), Duration::ZERO);
        assert_eq!(delay(&policy, 2), Duration::from_secs(5));
        assert_eq!(delay(&policy, 3), Duration::from_secs(10));
        assert_eq!(delay(&policy, 20), Duration::from_secs(10));
        assert_eq!(delay(&ThrottlePolicy::default(), 4), Duration::from_secs(5));
    }
}
