use anyhow::{Context, Result};

use imagescan::config::Config;
use imagescan::scheduler::TickOutcome;
use imagescan::service::Service;

/// Reconcile, run one execution wave, wait for it to drain and exit
pub async fn tick(config: Config) -> Result<()> {
    let service = Service::build(config)
        .await
        .context("Failed to build service")?;
    service
        .init_scanner()
        .await
        .context("Failed to initialize scanner environment")?;

    // Handlers are only registered by a successful reconciliation
    service.driver().reconcile_all().await;

    let executor = service.start_executor();
    match executor.tick() {
        TickOutcome::Loading(loader) => {
            let enqueued = loader.await.context("Loader task panicked")?;
            println!("Enqueued {enqueued} due tasks");
        }
        TickOutcome::Busy { queued } => println!("Queue busy with {queued} tasks"),
    }

    executor.wait_idle().await;
    let stats = executor.stats();
    executor.shutdown().await;

    println!(
        "Wave finished: {} succeeded, {} failed, {} panicked",
        stats.succeeded, stats.failed, stats.panicked
    );
    if stats.persist_failures > 0 {
        println!("  {} scan times could not be recorded", stats.persist_failures);
    }
    Ok(())
}
