//! Scan task entity and identity scheme

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Registry
// ============================================================================

/// Container registries a task may point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Registry {
    #[serde(rename = "docker.io")]
    Docker,
    #[serde(rename = "quay.io")]
    Quay,
    #[serde(rename = "hub.oepkgs.net")]
    Oepkgs,
}

impl Registry {
    /// Host name as written in image references
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker.io",
            Self::Quay => "quay.io",
            Self::Oepkgs => "hub.oepkgs.net",
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry host not in the supported set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported registry: {0}")]
pub struct UnsupportedRegistry(pub String);

impl FromStr for Registry {
    type Err = UnsupportedRegistry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker.io" => Ok(Self::Docker),
            "quay.io" => Ok(Self::Quay),
            "hub.oepkgs.net" => Ok(Self::Oepkgs),
            other => Err(UnsupportedRegistry(other.to_string())),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Composite key identifying one recurring scan task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub owner: String,
    pub registry: Registry,
    pub namespace: String,
    pub image: String,
    pub tag: String,
}

impl TaskIdentity {
    pub fn new(
        owner: impl Into<String>,
        registry: Registry,
        namespace: impl Into<String>,
        image: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            registry,
            namespace: namespace.into(),
            image: image.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.owner, self.registry, self.namespace, self.image, self.tag
        )
    }
}

// ============================================================================
// Task
// ============================================================================

/// Unit of recurring scan work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Storage identifier, assigned by the ledger on first insert
    pub id: Option<i64>,

    pub identity: TaskIdentity,

    /// Platforms to scan, e.g. `linux/amd64`
    pub arch: Vec<String>,

    /// Seconds between scans
    pub interval: i64,

    /// Last execution attempt; `None` when never scanned
    pub last_scan_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task that has not been stored or scanned yet
    pub fn new(identity: TaskIdentity, arch: Vec<String>, interval: i64) -> Self {
        Self {
            id: None,
            identity,
            arch,
            interval,
            last_scan_time: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.identity.owner
    }

    /// Replace the mutable scan settings, keeping id and last scan time
    pub fn update_interval_and_arch(&mut self, interval: i64, arch: Vec<String>) {
        self.interval = interval;
        self.arch = arch;
    }

    /// True when never scanned, or strictly after `last_scan_time + interval`
    ///
    /// An interval that overflows the calendar is never due again.
    pub fn is_need_to_scan(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_scan_time else {
            return true;
        };

        Duration::try_seconds(self.interval)
            .and_then(|interval| last.checked_add_signed(interval))
            .is_some_and(|due_at| now > due_at)
    }

    pub fn mark_scanned(&mut self, at: DateTime<Utc>) {
        self.last_scan_time = Some(at);
    }

    /// Full image reference, `registry/namespace/image:tag`
    pub fn image_ref(&self) -> String {
        let id = &self.identity;
        format!("{}/{}/{}:{}", id.registry, id.namespace, id.image, id.tag)
    }

    /// Report location relative to the owner's output path
    pub fn report_path(&self) -> String {
        let id = &self.identity;
        format!("{}/{}/{}/{}.md", id.registry, id.namespace, id.image, id.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task() -> Task {
        Task::new(
            TaskIdentity::new("openeuler", Registry::Docker, "openeuler", "openeuler", "24.03"),
            vec!["linux/amd64".to_string()],
            3600,
        )
    }

    #[test]
    fn test_registry_round_trip() {
        for r in [Registry::Docker, Registry::Quay, Registry::Oepkgs] {
            assert_eq!(r.as_str().parse::<Registry>().unwrap(), r);
        }
        assert!("ghcr.io".parse::<Registry>().is_err());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(
            task().identity.to_string(),
            "openeuler-docker.io-openeuler-openeuler-24.03"
        );
    }

    #[test]
    fn test_never_scanned_is_due() {
        assert!(task().is_need_to_scan(Utc::now()));
    }

    #[test]
    fn test_due_boundary() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut t = task();
        t.mark_scanned(last);

        assert!(!t.is_need_to_scan(last + Duration::seconds(1800)));
        assert!(!t.is_need_to_scan(last + Duration::seconds(3600)));
        assert!(t.is_need_to_scan(last + Duration::seconds(3601)));
    }

    #[test]
    fn test_overflowing_interval_is_never_due() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let now = last + Duration::days(3650);

        for interval in [12_096_000_000_000, i64::MAX] {
            let mut t = task();
            t.interval = interval;
            t.mark_scanned(last);
            assert!(!t.is_need_to_scan(now), "interval {interval}");
        }
    }

    #[test]
    fn test_update_keeps_id_and_last_scan() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut t = task();
        t.id = Some(7);
        t.mark_scanned(last);

        t.update_interval_and_arch(7200, vec!["linux/arm64".to_string()]);

        assert_eq!(t.id, Some(7));
        assert_eq!(t.last_scan_time, Some(last));
        assert_eq!(t.interval, 7200);
        assert_eq!(t.arch, vec!["linux/arm64".to_string()]);
    }

    #[test]
    fn test_paths() {
        let t = task();
        assert_eq!(t.image_ref(), "docker.io/openeuler/openeuler:24.03");
        assert_eq!(t.report_path(), "docker.io/openeuler/openeuler/24.03.md");
    }
}
