//! Expansion of a scan config snapshot into the desired task set
//!
//! Repo-level declarations are expanded first, then image-level declarations
//! are applied on top. Both write into one map keyed by [`TaskIdentity`], so a
//! pinned tag overrides the bulk entry for the same image.
//!
//! Declaration problems never fail the whole snapshot: the offending
//! declaration (or single tag) is logged and skipped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::entity::{Registry, Task, TaskIdentity, UnsupportedRegistry};
use super::interval::{parse_interval, IntervalError};
use super::scan_config::{GlobalDefaults, ImageDecl, RepoDecl, ScanConfig, TagDecl};
use crate::registry::TagLister;

/// Desired tasks for one owner, keyed by identity
pub type DesiredTasks = HashMap<TaskIdentity, Task>;

/// A single declaration could not be turned into tasks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("malformed tag spec {0:?}, expected registry/namespace/image:tag")]
    MalformedTagSpec(String),

    #[error("no usable interval: {0}")]
    Interval(#[from] IntervalError),

    #[error(transparent)]
    Registry(#[from] UnsupportedRegistry),
}

/// Split `registry/namespace/image:tag` into its parts
pub fn parse_tag_spec(spec: &str) -> Result<(Registry, &str, &str, &str), DeclarationError> {
    let malformed = || DeclarationError::MalformedTagSpec(spec.to_string());

    let parts: Vec<&str> = spec.split('/').collect();
    let &[registry, namespace, image_and_tag] = parts.as_slice() else {
        return Err(malformed());
    };

    let image_parts: Vec<&str> = image_and_tag.split(':').collect();
    let &[image, tag] = image_parts.as_slice() else {
        return Err(malformed());
    };

    let registry: Registry = registry.parse()?;
    Ok((registry, namespace, image, tag))
}

/// Turns snapshots into desired task sets
///
/// Keeps the last-seen global defaults per owner so that declarations without
/// their own arch or interval can fall back to them.
pub struct ConfigReconciler {
    tag_lister: Arc<dyn TagLister>,
    defaults: RwLock<HashMap<String, GlobalDefaults>>,
}

impl ConfigReconciler {
    pub fn new(tag_lister: Arc<dyn TagLister>) -> Self {
        Self {
            tag_lister,
            defaults: RwLock::new(HashMap::new()),
        }
    }

    /// Remember an owner's global defaults, replacing any previous entry
    pub fn record_defaults(&self, owner: &str, defaults: &GlobalDefaults) {
        let mut map = self.defaults.write().unwrap_or_else(|e| e.into_inner());
        map.insert(owner.to_string(), defaults.clone());
    }

    pub fn defaults_for(&self, owner: &str) -> Option<GlobalDefaults> {
        let map = self.defaults.read().unwrap_or_else(|e| e.into_inner());
        map.get(owner).cloned()
    }

    /// Own list when non-empty, otherwise the owner's default arches
    pub fn resolve_arches(&self, owner: &str, own: &[String]) -> Vec<String> {
        if !own.is_empty() {
            return own.to_vec();
        }

        self.defaults_for(owner)
            .map(|d| d.default_arches)
            .unwrap_or_default()
    }

    /// Own interval when parseable, otherwise the owner's default interval
    pub fn resolve_interval(&self, owner: &str, own: &str) -> Result<i64, IntervalError> {
        let own_err = match parse_interval(own) {
            Ok(seconds) => return Ok(seconds),
            Err(e) => e,
        };

        match self.defaults_for(owner) {
            Some(defaults) => parse_interval(&defaults.default_interval),
            None => Err(own_err),
        }
    }

    /// Compute the desired task set for one owner
    pub async fn desired_tasks(&self, owner: &str, config: &ScanConfig) -> DesiredTasks {
        self.record_defaults(owner, &config.scanner.global);

        let mut tasks = DesiredTasks::new();

        for repo in &config.repos {
            self.expand_repo(owner, repo, &mut tasks).await;
        }

        for image in &config.images {
            self.expand_image(owner, image, &mut tasks);
        }

        tracing::info!(owner, count = tasks.len(), "Computed desired task set");
        tasks
    }

    async fn expand_repo(&self, owner: &str, repo: &RepoDecl, tasks: &mut DesiredTasks) {
        let arch = self.resolve_arches(owner, &repo.arches);
        let interval = match self.resolve_interval(owner, &repo.interval) {
            Ok(interval) => interval,
            Err(e) => {
                tracing::error!(owner, namespace = %repo.namespace, error = %e, "Skipping repo declaration");
                return;
            }
        };

        let registry: Registry = match repo.registry.parse() {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!(owner, namespace = %repo.namespace, error = %e, "Skipping repo declaration");
                return;
            }
        };

        for image in &repo.images {
            let tags = match self
                .tag_lister
                .list_tags(registry, &repo.namespace, image)
                .await
            {
                Ok(tags) => tags,
                Err(e) => {
                    tracing::error!(
                        owner,
                        registry = %registry,
                        namespace = %repo.namespace,
                        image = %image,
                        error = %e,
                        "Failed to list tags"
                    );
                    continue;
                }
            };

            for tag in tags {
                let identity = TaskIdentity::new(owner, registry, &repo.namespace, image, tag);
                tasks.insert(identity.clone(), Task::new(identity, arch.clone(), interval));
            }
        }
    }

    fn expand_image(&self, owner: &str, image: &ImageDecl, tasks: &mut DesiredTasks) {
        for tag in &image.tags {
            if tag.disable {
                tracing::debug!(owner, tag = %tag.tag, "Tag is disabled");
                continue;
            }

            match self.tag_to_task(owner, tag) {
                Ok(task) => {
                    tasks.insert(task.identity.clone(), task);
                }
                Err(e) => {
                    tracing::error!(owner, tag = %tag.tag, error = %e, "Skipping tag declaration");
                }
            }
        }
    }

    fn tag_to_task(&self, owner: &str, tag: &TagDecl) -> Result<Task, DeclarationError> {
        let arch = self.resolve_arches(owner, &tag.arches);
        let interval = self.resolve_interval(owner, &tag.interval)?;
        let (registry, namespace, image, tag_name) = parse_tag_spec(&tag.tag)?;

        let identity = TaskIdentity::new(owner, registry, namespace, image, tag_name);
        Ok(Task::new(identity, arch, interval))
    }
}
