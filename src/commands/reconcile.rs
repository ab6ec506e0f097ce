use anyhow::{Context, Result};

use imagescan::config::Config;
use imagescan::scheduler::ReconcileOutcome;
use imagescan::service::Service;

/// Reconcile every owner once, print a summary and exit
pub async fn reconcile(config: Config) -> Result<()> {
    let service = Service::build(config)
        .await
        .context("Failed to build service")?;

    let results = service.driver().reconcile_all().await;
    let mut failed = 0;

    println!("Reconciliation results:");
    for (owner, result) in &results {
        match result {
            Ok(ReconcileOutcome::Unchanged) => println!("  {owner}: unchanged"),
            Ok(ReconcileOutcome::Applied(stats)) => println!(
                "  {owner}: {} desired, {} inserted, {} updated, {} unchanged, {} deleted, {} skipped",
                stats.desired,
                stats.inserted,
                stats.updated,
                stats.unchanged,
                stats.deleted,
                stats.skipped
            ),
            Err(e) => {
                failed += 1;
                println!("  {owner}: FAILED ({e})");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} owners failed to reconcile", results.len());
    }
    Ok(())
}
