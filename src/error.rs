/// Unified error handling for the tenant router
///
/// Resolution misses are not errors: the cache turns them into empty
/// descriptor sets. The types here cover configuration problems, discovery
/// provider failures and misuse of the cache API.

use std::fmt;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for tenant router operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Discovery provider errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Routing cache misuse
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Failures reported by a discovery provider
///
/// A provider that simply does not know a tenant answers `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Discovery request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Discovery backend returned status {status_code}: {}", errors.join(", "))]
    Rejected { status_code: u16, errors: Vec<String> },

    #[error("Malformed discovery response: {message}")]
    Malformed { message: String },
}

/// Errors raised by the routing cache for invalid calls
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Tenant id must not be empty")]
    EmptyTenantId,
}

/// Result type alias for tenant router operations
pub type RouterResult<T> = Result<T, RouterError>;

impl RouterError {
    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        RouterError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            RouterError::Discovery(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RouterError::Config(_) => ErrorSeverity::Critical,
            RouterError::Internal { .. } => ErrorSeverity::Critical,
            RouterError::Discovery(DiscoveryError::Malformed { .. }) => ErrorSeverity::Error,
            RouterError::Discovery(_) => ErrorSeverity::Warning,
            RouterError::Routing(_) => ErrorSeverity::Error,
        }
    }
}

impl DiscoveryError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        DiscoveryError::Transport {
            message: message.into(),
        }
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        DiscoveryError::Malformed {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        DiscoveryError::Timeout { timeout_ms }
    }

    /// Server-side rejections are retried too; the next sweep may succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DiscoveryError::Malformed { .. })
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
}

impl ErrorSeverity {
    /// Level to log an error of this severity at
    pub fn log_level(self) -> log::Level {
        match self {
            ErrorSeverity::Critical | ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Warning => log::Level::Warn,
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
        }
    }
}
