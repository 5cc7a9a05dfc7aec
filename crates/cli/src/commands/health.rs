//! Check that the coordination store answers.

use anyhow::Result;
use tollgate::Coordination;

use crate::ui;

pub async fn run(coordination: &Coordination) -> Result<()> {
    ui::spin("Pinging store...", coordination.health_check()).await?;
    ui::success("Store reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::memory_coordination;

    #[tokio::test]
    async fn memory_store_is_healthy() {
        run(&memory_coordination(&[])).await.unwrap();
    }
}
