//! Take or give back a distributed lock by hand.
//!
//! Useful when a maintenance job crashed while holding a lock and an operator
//! wants to run it manually, or to keep a job from starting during an
//! incident. Release needs the owner token printed by `acquire`, so a lock
//! someone else holds cannot be removed from here.

use std::time::Duration;

use anyhow::Result;
use tollgate::Coordination;
use tollgate::stores::lock_key;
use uuid::Uuid;

use crate::ui;

/// Returns the owner token when the lock was taken.
pub async fn acquire(
    coordination: &Coordination,
    resource: &str,
    owner: Option<String>,
    ttl: Duration,
) -> Result<Option<String>> {
    let owner = owner.unwrap_or_else(|| Uuid::new_v4().to_string());
    let key = lock_key(resource);

    let acquisition = coordination.lock.acquire(&key, &owner, ttl).await?;
    if !acquisition.acquired {
        ui::denied(&format!("{} is held by another owner", ui::bold(&key)));
        return Ok(None);
    }

    ui::success(&format!(
        "Acquired {} for {}",
        ui::bold(&key),
        ui::duration(ttl)
    ));
    println!("{owner}");
    Ok(Some(owner))
}

pub async fn release(coordination: &Coordination, resource: &str, owner: &str) -> Result<bool> {
    let key = lock_key(resource);

    let release = coordination.lock.release(&key, owner).await?;
    if release.released {
        ui::success(&format!("Released {}", ui::bold(&key)));
    } else {
        ui::denied(&format!("{} is not held by {}", ui::bold(&key), owner));
    }
    Ok(release.released)
}
