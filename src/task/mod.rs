//! Scan task domain
//!
//! - [`interval`] - `24h` / `1d` / `1w` interval strings
//! - [`entity`] - task identity, registries and the due check
//! - [`scan_config`] - the declarative YAML snapshot an owner publishes
//! - [`reconciler`] - expansion of a snapshot into the desired task set

pub mod entity;
pub mod interval;
pub mod reconciler;
pub mod scan_config;

pub use entity::{Registry, Task, TaskIdentity, UnsupportedRegistry};
pub use interval::{parse_interval, IntervalError};
pub use reconciler::{parse_tag_spec, ConfigReconciler, DeclarationError, DesiredTasks};
pub use scan_config::{
    ConfigParseError, GlobalDefaults, ImageDecl, Output, RepoDecl, ScanConfig, Scanner, TagDecl,
};
