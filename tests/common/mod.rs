//! Common test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use imagescan::config::PlatformKind;
use imagescan::platform::{local, OwnerHandle, PlatformError, Snapshot, SourcePlatform};
use imagescan::registry::{RegistryError, TagLister};
use imagescan::scanner::{JobRunner, ScanError, ScanSummary};
use imagescan::storage::InMemoryTaskLedger;
use imagescan::task::{Output, Registry, ScanConfig, Task, TaskIdentity};

pub const OWNER: &str = "openeuler";

// ============================================================================
// Tag lister
// ============================================================================

/// Tag lister answering from a fixed table keyed by `namespace/image`
#[derive(Default)]
pub struct StaticTagLister {
    tags: HashMap<String, Vec<String>>,
}

impl StaticTagLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, namespace: &str, image: &str, tags: &[&str]) -> Self {
        self.tags.insert(
            format!("{namespace}/{image}"),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl TagLister for StaticTagLister {
    async fn list_tags(
        &self,
        registry: Registry,
        namespace: &str,
        image: &str,
    ) -> Result<Vec<String>, RegistryError> {
        if registry == Registry::Oepkgs {
            return Err(RegistryError::Unsupported(registry));
        }
        Ok(self
            .tags
            .get(&format!("{namespace}/{image}"))
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Platform
// ============================================================================

/// In-memory platform whose scan config can be swapped between cycles
#[derive(Default)]
pub struct MockPlatform {
    yaml: Mutex<Option<String>>,
    fetches: AtomicUsize,
    published: Mutex<Vec<(String, String)>>,
}

impl MockPlatform {
    pub fn with_config(yaml: &str) -> Arc<Self> {
        let platform = Arc::new(Self::default());
        platform.set_config(yaml);
        platform
    }

    /// A platform whose fetch always fails
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_config(&self, yaml: &str) {
        *self.yaml.lock().unwrap() = Some(yaml.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// `(path, content)` of every published report
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourcePlatform for MockPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Local
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, PlatformError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let yaml = self.yaml.lock().unwrap().clone();
        let Some(yaml) = yaml else {
            return Err(PlatformError::UnexpectedResponse {
                platform: PlatformKind::Local,
                reason: "unreachable".to_string(),
            });
        };

        Ok(Snapshot {
            config: ScanConfig::from_yaml(&yaml)?,
            fingerprint: local::fingerprint(yaml.as_bytes()),
        })
    }

    async fn publish(
        &self,
        output: &Output,
        content: &str,
        report_path: &str,
    ) -> Result<(), PlatformError> {
        self.published
            .lock()
            .unwrap()
            .push((output.file_path(report_path), content.to_string()));
        Ok(())
    }
}

// ============================================================================
// Job runner
// ============================================================================

/// Runner that records every call and can be told to fail, panic or block
#[derive(Default)]
pub struct RecordingRunner {
    runs: Mutex<HashMap<TaskIdentity, usize>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    fail_images: Vec<String>,
    panic_images: Vec<String>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, image: &str) -> Self {
        self.fail_images.push(image.to_string());
        self
    }

    pub fn panicking_on(mut self, image: &str) -> Self {
        self.panic_images.push(image.to_string());
        self
    }

    /// Every run waits for one permit of `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn runs(&self) -> HashMap<TaskIdentity, usize> {
        self.runs.lock().unwrap().clone()
    }

    pub fn total_runs(&self) -> usize {
        self.runs.lock().unwrap().values().sum()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn run(&self, task: &Task, handle: &OwnerHandle) -> Result<ScanSummary, ScanError> {
        *self
            .runs
            .lock()
            .unwrap()
            .entry(task.identity.clone())
            .or_default() += 1;

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        } else {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);

        let image = task.identity.image.as_str();
        if self.panic_images.iter().any(|i| i == image) {
            panic!("scanner crashed on {image}");
        }
        if self.fail_images.iter().any(|i| i == image) {
            return Err(ScanError::NoArchitectures);
        }

        handle
            .publish(&format!("# report for {}", task.identity), &task.report_path())
            .await?;

        Ok(ScanSummary {
            arches: task.arch.len(),
            ..Default::default()
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn create_test_ledger() -> Arc<InMemoryTaskLedger> {
    Arc::new(InMemoryTaskLedger::new())
}

/// A never-scanned task of `OWNER` on Docker Hub
pub fn create_test_task(image: &str, tag: &str) -> Task {
    Task::new(
        TaskIdentity::new(OWNER, Registry::Docker, "library", image, tag),
        vec!["linux/amd64".to_string()],
        3600,
    )
}

pub fn test_output() -> Output {
    Output {
        repo: "scan-reports".to_string(),
        path: "reports".to_string(),
    }
}
