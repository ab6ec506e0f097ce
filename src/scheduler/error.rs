//! Error types for the scheduler module

use std::fmt;

use crate::platform::PlatformError;
use crate::storage::LedgerError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// The owner's scan config could not be fetched or parsed
    ConfigFetch { owner: String, source: PlatformError },

    /// The owner's tasks could not be loaded or written
    Persistence { owner: String, source: LedgerError },

    /// Cron expression of a periodic action does not parse
    InvalidCron {
        action: String,
        expression: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigFetch { owner, source } => {
                write!(f, "Failed to fetch scan config of '{}': {}", owner, source)
            }
            Self::Persistence { owner, source } => {
                write!(f, "Ledger error for '{}': {}", owner, source)
            }
            Self::InvalidCron {
                action,
                expression,
                reason,
            } => {
                write!(
                    f,
                    "Invalid cron expression '{}' for '{}': {}",
                    expression, action, reason
                )
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigFetch { source, .. } => Some(source),
            Self::Persistence { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl SchedulerError {
    pub fn config_fetch(owner: impl Into<String>, source: PlatformError) -> Self {
        Self::ConfigFetch {
            owner: owner.into(),
            source,
        }
    }

    pub fn persistence(owner: impl Into<String>, source: LedgerError) -> Self {
        Self::Persistence {
            owner: owner.into(),
            source,
        }
    }

    pub fn invalid_cron(
        action: impl Into<String>,
        expression: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidCron {
            action: action.into(),
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConfigFetch { source, .. } => source.is_recoverable(),
            Self::Persistence { .. } => true,
            Self::InvalidCron { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_cron_error() {
        let err = SchedulerError::invalid_cron("execute", "every now and then", "bad field");
        assert!(err.to_string().contains("execute"));
        assert!(err.to_string().contains("every now and then"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_persistence_error_keeps_source() {
        let err = SchedulerError::persistence("openeuler", LedgerError::Poisoned);
        assert!(err.is_recoverable());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("openeuler"));
    }
}
