//! Unified error handling for the imagescan crate
//!
//! Each module keeps its own error enum. [`Error`] wraps all of them so code
//! that crosses module boundaries (service wiring, commands) can use a single
//! type while still asking what kind of failure it is.
//!
//! # Usage
//!
//! ```rust,ignore
//! use imagescan::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying next cycle: {}", err);
//!     } else {
//!         tracing::error!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::platform::PlatformError;
pub use crate::registry::RegistryError;
pub use crate::scanner::ScanError;
pub use crate::scheduler::SchedulerError;
pub use crate::storage::LedgerError;
pub use crate::task::{ConfigParseError, DeclarationError, IntervalError};

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Registry and source platform HTTP failures
    Network,
    /// Scan config, interval and scanner output decoding
    Parsing,
    /// Ledger and filesystem errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Reconciliation and trigger errors
    Scheduler,
    /// External scanner process failures
    Scanner,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Scanner => "scanner",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the imagescan crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Scan config error: {0}")]
    ConfigParse(#[from] ConfigParseError),

    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("Interval error: {0}")]
    Interval(#[from] IntervalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Whether retrying on a later cycle may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Ledger(e) => !matches!(e, LedgerError::CorruptRow { .. } | LedgerError::Open(_)),
            Self::Platform(e) => e.is_recoverable(),
            Self::Registry(e) => e.is_recoverable(),
            Self::Scan(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::ConfigParse(_) | Self::Declaration(_) | Self::Interval(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Platform(PlatformError::Parse(_) | PlatformError::Decode(_)) => {
                ErrorCategory::Parsing
            }
            Self::Platform(PlatformError::Io(_)) => ErrorCategory::Storage,
            Self::Platform(_) | Self::Registry(_) => ErrorCategory::Network,
            Self::ConfigParse(_) | Self::Declaration(_) | Self::Interval(_) => {
                ErrorCategory::Parsing
            }
            Self::Ledger(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Scan(ScanError::Publish(_)) => ErrorCategory::Network,
            Self::Scan(_) => ErrorCategory::Scanner,
            Self::Scheduler(SchedulerError::InvalidCron { .. }) => ErrorCategory::Config,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err: Error = IntervalError::UnsupportedUnit('x').into();
        assert_eq!(err.category(), ErrorCategory::Parsing);

        let err: Error = LedgerError::NotFound("openeuler/docker.io/library/nginx:1".into()).into();
        assert_eq!(err.category(), ErrorCategory::Storage);

        let err: Error = ScanError::NoArchitectures.into();
        assert_eq!(err.category(), ErrorCategory::Scanner);
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = LedgerError::Poisoned.into();
        assert!(err.is_recoverable());

        let err: Error = LedgerError::Open("permission denied".into()).into();
        assert!(!err.is_recoverable());

        let err: Error = IntervalError::InvalidFormat("x".into()).into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_cron_is_config() {
        let err: Error = SchedulerError::invalid_cron("execute", "bogus", "bad field").into();
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing token");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(err.category().as_str(), "config");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error_keeps_source() {
        let io = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = Error::with_source("writing report", io);
        assert_eq!(err.category(), ErrorCategory::Other);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "writing report");
    }
}
