//! Owner handlers shared between reconciliation and execution

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::platform::OwnerHandle;

/// Owners that completed a reconciliation, keyed by owner name
///
/// Cloning shares the same map.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HashMap<String, OwnerHandle>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler of `handle.owner`
    pub async fn register(&self, handle: OwnerHandle) {
        let mut map = self.inner.lock().await;
        map.insert(handle.owner.clone(), handle);
    }

    pub async fn get(&self, owner: &str) -> Option<OwnerHandle> {
        self.inner.lock().await.get(owner).cloned()
    }

    /// Copy of every handler, sorted by owner
    pub async fn all(&self) -> Vec<OwnerHandle> {
        let map = self.inner.lock().await;
        let mut handles: Vec<OwnerHandle> = map.values().cloned().collect();
        handles.sort_by(|a, b| a.owner.cmp(&b.owner));
        handles
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
