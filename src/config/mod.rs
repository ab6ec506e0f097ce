//! Configuration management for imagescan
//!
//! Configuration is read from a TOML file. Secrets and deployment paths can be
//! overridden through `IMAGESCAN_*` environment variables, so the file itself
//! can be committed without tokens.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Owners whose scan configs are reconciled
    pub communities: Vec<CommunityConfig>,

    /// Task ledger configuration
    pub database: DatabaseConfig,

    /// Worker pool configuration
    pub execution: ExecutionConfig,

    /// Cron expressions of the periodic actions
    pub schedule: ScheduleConfig,

    /// Vulnerability scanner configuration
    pub scanner: ScannerConfig,

    /// Registry API configuration
    pub registry: RegistryConfig,

    /// Health server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Communities
// ============================================================================

/// Code hosting platform an owner publishes its scan config on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Github,
    Gitee,
    /// Plain files on disk
    Local,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitee => "gitee",
            Self::Local => "local",
        }
    }

    /// Remote platforms need an API token
    pub fn requires_token(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One owner (community) and where its scan config lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Owner name; also the organization that holds the repositories
    pub name: String,

    pub platform: PlatformKind,

    /// API token, usually supplied via `IMAGESCAN_TOKEN_<NAME>`
    #[serde(default)]
    pub token: String,

    pub scan_config_location: Location,

    /// Override of the platform API base URL
    #[serde(default)]
    pub api_url: Option<String>,
}

impl CommunityConfig {
    /// Environment variable holding this owner's token
    pub fn token_env_var(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("IMAGESCAN_TOKEN_{name}")
    }
}

/// File location inside a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub repo: String,

    pub path: String,

    /// Branch, tag or commit to read from
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
}

fn default_ref() -> String {
    String::from("main")
}

// ============================================================================
// Database
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    /// Non-persistent, for development and tests
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,

    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// PostgreSQL connection string
    pub postgres_url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            sqlite_path: PathBuf::from("data/tasks.db"),
            postgres_url: String::from("postgresql://localhost/imagescan"),
            pool_size: 10,
        }
    }
}

// ============================================================================
// Execution and schedule
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Number of scan workers
    pub concurrency: usize,

    /// Capacity of the shared task queue
    pub queue_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue_capacity: 1000,
        }
    }
}

/// Six-field cron expressions (with seconds) for the periodic actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub reconcile: String,
    pub execute: String,
    pub update_db: String,
    pub cleanup: String,

    /// Periodically wipe the local images directory
    pub cleanup_enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            reconcile: String::from("0 55 * * * *"),
            execute: String::from("0 */30 * * * *"),
            update_db: String::from("0 0 */6 * * *"),
            cleanup: String::from("0 0 3 1 * *"),
            cleanup_enabled: false,
        }
    }
}

impl ScheduleConfig {
    fn expressions(&self) -> [(&'static str, &str); 4] {
        [
            ("reconcile", &self.reconcile),
            ("execute", &self.execute),
            ("update_db", &self.update_db),
            ("cleanup", &self.cleanup),
        ]
    }
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Trivy executable
    pub trivy_bin: String,

    /// Trivy cache directory holding the vulnerability DB
    pub cache_dir: PathBuf,

    /// Environment script with `init` and `update` commands
    pub script: PathBuf,

    /// Directory created by `script init`; init is skipped when it exists
    pub resource_dir: PathBuf,

    /// Local directory for pulled images
    pub images_dir: PathBuf,

    /// Repositories passed to `script init`
    pub trivy_repo: String,
    pub trivy_db_repo: String,
    pub vuln_list_repo: String,

    /// Run `script init` before serving
    pub init_on_startup: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            trivy_bin: String::from("trivy"),
            cache_dir: PathBuf::from("./trivy_resource/"),
            script: PathBuf::from("./trivy_env.sh"),
            resource_dir: PathBuf::from("./trivy_resource"),
            images_dir: PathBuf::from("images"),
            trivy_repo: String::new(),
            trivy_db_repo: String::new(),
            vuln_list_repo: String::new(),
            init_on_startup: false,
        }
    }
}

// ============================================================================
// Registry, server, logging
// ============================================================================

/// Registry API endpoints and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    pub docker_hub_url: String,

    pub quay_url: String,

    /// Tags requested per page
    pub page_size: u32,

    /// Minimum gap between Docker Hub requests
    pub docker_request_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            docker_hub_url: String::from("https://hub.docker.com"),
            quay_url: String::from("https://quay.io"),
            page_size: 100,
            docker_request_interval_ms: 500,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn docker_request_interval(&self) -> Duration {
        Duration::from_millis(self.docker_request_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub health_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: String::from("0.0.0.0"),
            health_port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `IMAGESCAN_*` overrides using `lookup` as the variable source
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("IMAGESCAN_SQLITE_PATH") {
            self.database.sqlite_path = path.into();
        }
        if let Some(url) = lookup("IMAGESCAN_POSTGRES_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.postgres_url = url;
        }
        if let Some(level) = lookup("IMAGESCAN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("IMAGESCAN_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(port) = lookup("IMAGESCAN_HEALTH_PORT").and_then(|v| v.parse().ok()) {
            self.server.health_port = port;
        }
        if let Some(bin) = lookup("IMAGESCAN_TRIVY_BIN") {
            self.scanner.trivy_bin = bin;
        }

        for community in &mut self.communities {
            if let Some(token) = lookup(&community.token_env_var()) {
                community.token = token;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.execution.concurrency == 0 {
            anyhow::bail!("execution.concurrency must be greater than 0");
        }

        if self.execution.queue_capacity == 0 {
            anyhow::bail!("execution.queue_capacity must be greater than 0");
        }

        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be greater than 0");
        }

        if self.registry.page_size == 0 {
            anyhow::bail!("registry.page_size must be greater than 0");
        }

        for (name, expr) in self.schedule.expressions() {
            cron::Schedule::from_str(expr)
                .with_context(|| format!("schedule.{name} is not a valid cron expression: {expr}"))?;
        }

        let mut seen = HashSet::new();
        for community in &self.communities {
            if community.name.is_empty() {
                anyhow::bail!("community name must not be empty");
            }
            if !seen.insert(community.name.as_str()) {
                anyhow::bail!("duplicate community: {}", community.name);
            }
            if community.platform.requires_token() && community.token.is_empty() {
                anyhow::bail!(
                    "community {} on {} needs a token (set {})",
                    community.name,
                    community.platform.as_str(),
                    community.token_env_var()
                );
            }
        }

        Ok(())
    }
}
