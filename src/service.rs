//! Service wiring
//!
//! Builds the ledger, the platform of every configured owner, the reconciliation
//! driver, the job runner and the periodic trigger from one [`Config`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::create_platform;
use crate::registry::{RegistryTagLister, TagLister};
use crate::scanner::{JobRunner, ScannerEnv, TrivyJobRunner};
use crate::scheduler::{
    action_fn, ExecutionScheduler, HandlerRegistry, OwnerSource, PeriodicTrigger,
    ReconciliationDriver, ScheduledAction, TickOutcome,
};
use crate::storage::{open_ledger, SharedTaskLedger};
use crate::task::ConfigReconciler;

pub struct Service {
    config: Config,
    ledger: SharedTaskLedger,
    handlers: HandlerRegistry,
    driver: Arc<ReconciliationDriver>,
    runner: Arc<dyn JobRunner>,
    scanner_env: Arc<ScannerEnv>,
}

impl Service {
    /// Open the ledger and create every owner's platform
    pub async fn build(config: Config) -> Result<Self> {
        let ledger = open_ledger(&config.database).await?;
        let tag_lister: Arc<dyn TagLister> = Arc::new(RegistryTagLister::new(&config.registry)?);

        let timeout = Duration::from_secs(config.registry.request_timeout_secs);
        let owners = config
            .communities
            .iter()
            .map(|community| {
                create_platform(community, timeout)
                    .map(|platform| OwnerSource::new(&community.name, platform))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let runner: Arc<dyn JobRunner> = Arc::new(TrivyJobRunner::new(&config.scanner));

        tracing::info!(
            owners = owners.len(),
            backend = ?config.database.backend,
            "Service built"
        );

        Ok(Self::from_parts(config, ledger, owners, tag_lister, runner))
    }

    /// Assemble a service from already constructed collaborators
    pub fn from_parts(
        config: Config,
        ledger: SharedTaskLedger,
        owners: Vec<OwnerSource>,
        tag_lister: Arc<dyn TagLister>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let handlers = HandlerRegistry::new();
        let driver = Arc::new(ReconciliationDriver::new(
            owners,
            ConfigReconciler::new(tag_lister),
            Arc::clone(&ledger),
            handlers.clone(),
        ));
        let scanner_env = Arc::new(ScannerEnv::new(&config.scanner));

        Self {
            config,
            ledger,
            handlers,
            driver,
            runner,
            scanner_env,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &SharedTaskLedger {
        &self.ledger
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn driver(&self) -> &Arc<ReconciliationDriver> {
        &self.driver
    }

    pub fn scanner_env(&self) -> &Arc<ScannerEnv> {
        &self.scanner_env
    }

    /// Start the worker pool
    pub fn start_executor(&self) -> ExecutionScheduler {
        ExecutionScheduler::start(
            &self.config.execution,
            Arc::clone(&self.ledger),
            self.handlers.clone(),
            Arc::clone(&self.runner),
        )
    }

    /// Build the periodic trigger with the configured cron expressions
    ///
    /// Reconcile-all also runs once when the trigger starts.
    pub fn trigger(&self, executor: Arc<ExecutionScheduler>) -> Result<PeriodicTrigger> {
        let schedule = &self.config.schedule;

        let driver = Arc::clone(&self.driver);
        let reconcile = action_fn(move || {
            let driver = Arc::clone(&driver);
            async move {
                let results = driver.reconcile_all().await;
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                if failed > 0 && failed == results.len() {
                    anyhow::bail!("reconciliation failed for all {} owners", failed);
                }
                anyhow::Ok(())
            }
        });

        let execute = action_fn(move || {
            let executor = Arc::clone(&executor);
            async move {
                if let TickOutcome::Loading(loader) = executor.tick() {
                    loader.await?;
                }
                anyhow::Ok(())
            }
        });

        let env = Arc::clone(&self.scanner_env);
        let update_db = action_fn(move || {
            let env = Arc::clone(&env);
            async move {
                env.update_db().await?;
                anyhow::Ok(())
            }
        });

        let mut trigger = PeriodicTrigger::new()
            .with_action(
                ScheduledAction::new("reconcile", &schedule.reconcile, reconcile)?
                    .run_on_start(true),
            )
            .with_action(ScheduledAction::new("execute", &schedule.execute, execute)?)
            .with_action(ScheduledAction::new("update_db", &schedule.update_db, update_db)?);

        if schedule.cleanup_enabled {
            let env = Arc::clone(&self.scanner_env);
            let cleanup = action_fn(move || {
                let env = Arc::clone(&env);
                async move {
                    env.cleanup_images().await?;
                    anyhow::Ok(())
                }
            });
            trigger =
                trigger.with_action(ScheduledAction::new("cleanup", &schedule.cleanup, cleanup)?);
        }

        Ok(trigger)
    }

    /// Prepare the scanner toolchain when configured to do so
    pub async fn init_scanner(&self) -> Result<()> {
        if !self.config.scanner.init_on_startup {
            return Ok(());
        }

        let installed = self.scanner_env.init().await.map_err(Error::from)?;
        tracing::info!(installed, "Scanner environment ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseBackend;
    use crate::storage::InMemoryTaskLedger;
    use crate::task::Registry;
    use async_trait::async_trait;

    struct NoTags;

    #[async_trait]
    impl TagLister for NoTags {
        async fn list_tags(
            &self,
            _registry: Registry,
            _namespace: &str,
            _image: &str,
        ) -> std::result::Result<Vec<String>, crate::registry::RegistryError> {
            Ok(Vec::new())
        }
    }

    fn test_service(config: Config) -> Service {
        let ledger: SharedTaskLedger = Arc::new(InMemoryTaskLedger::new());
        let runner: Arc<dyn JobRunner> = Arc::new(TrivyJobRunner::new(&config.scanner));
        Service::from_parts(config, ledger, Vec::new(), Arc::new(NoTags), runner)
    }

    #[tokio::test]
    async fn test_build_with_memory_backend() {
        let mut config = Config::default();
        config.database.backend = DatabaseBackend::Memory;

        let service = Service::build(config).await.unwrap();
        assert!(service.driver().owners().is_empty());
        assert!(service.handlers().is_empty().await);
    }

    #[tokio::test]
    async fn test_trigger_actions() {
        let service = test_service(Config::default());
        let executor = Arc::new(service.start_executor());

        let trigger = service.trigger(Arc::clone(&executor)).unwrap();
        let names: Vec<&str> = trigger.actions().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["reconcile", "execute", "update_db"]);

        let mut config = Config::default();
        config.schedule.cleanup_enabled = true;
        let service = test_service(config);
        let trigger = service.trigger(executor).unwrap();
        assert_eq!(trigger.actions().len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_cron_fails_trigger() {
        let mut config = Config::default();
        config.schedule.execute = "whenever".to_string();
        let service = test_service(config);
        let executor = Arc::new(service.start_executor());

        let err = service.trigger(executor).unwrap_err();
        assert!(matches!(err, Error::Scheduler(_)));
    }
}
