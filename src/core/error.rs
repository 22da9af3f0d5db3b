//! Unified error handling for conductor
//!
//! This module provides the error types shared by every layer: terminal
//! orchestration errors surfaced to callers, dependency failures that are
//! absorbed into results, and the circuit breaker's wrapper around both.

use std::{fmt, time::Duration};

/// Errors surfaced by the orchestrator's public operations
#[derive(Debug)]
pub enum OrchestratorError {
    /// A precondition failed before any side effect
    Validation(String),

    /// Startup has not completed or too few dependencies are healthy
    SystemNotReady(String),

    /// The authoritative primary call failed
    PrimaryDependency(DependencyError),

    /// Configuration-related errors
    Configuration(String),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Validation(msg) => write!(f, "Validation error: {msg}"),
            OrchestratorError::SystemNotReady(msg) => write!(f, "System not ready: {msg}"),
            OrchestratorError::PrimaryDependency(err) => {
                write!(f, "Primary dependency failed: {err}")
            }
            OrchestratorError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            OrchestratorError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrchestratorError::PrimaryDependency(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Failure reported by a dependency, a sink or a cache
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyError {
    /// The call completed with an error
    Failed(String),

    /// The call did not complete within its deadline
    Timeout(Duration),
}

impl DependencyError {
    pub fn failed(msg: impl Into<String>) -> Self {
        DependencyError::Failed(msg.into())
    }
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyError::Failed(msg) => write!(f, "{msg}"),
            DependencyError::Timeout(after) => {
                write!(f, "timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for DependencyError {}

/// Result type alias for dependency calls
pub type DependencyResult<T> = std::result::Result<T, DependencyError>;

/// Error returned by a call routed through a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerError<E> {
    /// The breaker short-circuited the call; the operation never ran
    Open { key: String },

    /// The operation ran and failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { key } => write!(f, "circuit breaker for '{key}' is open"),
            BreakerError::Inner(err) => write!(f, "{err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> OrchestratorResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> OrchestratorResult<T> {
        self.map_err(|e| OrchestratorError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($fmt:literal) => {
        $crate::core::error::OrchestratorError::Configuration(format!($fmt))
    };
    ($msg:expr) => {
        $crate::core::error::OrchestratorError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::OrchestratorError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($fmt:literal) => {
        $crate::core::error::OrchestratorError::Internal(format!($fmt))
    };
    ($msg:expr) => {
        $crate::core::error::OrchestratorError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::OrchestratorError::Internal(format!($fmt, $($arg)*))
    };
}
