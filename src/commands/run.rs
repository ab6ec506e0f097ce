use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use imagescan::config::Config;
use imagescan::health;
use imagescan::metrics;
use imagescan::service::Service;

/// Run the full service until Ctrl-C
///
/// Startup failures (ledger, platforms, scanner init, cron expressions) are
/// fatal. Jobs still running at shutdown are not cancelled.
pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to register metrics, continuing without them");
    }

    let service = Service::build(config)
        .await
        .context("Failed to build service")?;
    service
        .init_scanner()
        .await
        .context("Failed to initialize scanner environment")?;

    let executor = Arc::new(service.start_executor());
    let trigger = service
        .trigger(Arc::clone(&executor))
        .context("Failed to build periodic trigger")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let trigger_handle = tokio::spawn(trigger.run(shutdown_rx.clone()));

    let health_handle = if service.config().server.enabled {
        let server_config = service.config().server.clone();
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            health::serve(&server_config, async move {
                let _ = rx.wait_for(|stop| *stop).await;
            })
            .await
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    trigger_handle.await.context("Trigger task panicked")?;

    if let Some(handle) = health_handle {
        match handle.await.context("Health server task panicked")? {
            Ok(()) => {}
            Err(e) => tracing::error!(error = %e, "Health server failed"),
        }
    }

    let stats = executor.stats();
    tracing::info!(
        enqueued = stats.enqueued,
        succeeded = stats.succeeded,
        failed = stats.failed,
        panicked = stats.panicked,
        in_flight = executor.in_flight(),
        "imagescan stopped"
    );
    Ok(())
}
