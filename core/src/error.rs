//! Error types for the health-check engine

use thiserror::Error;

/// Errors surfaced at the registry boundary.
#[derive(Error, Debug)]
pub enum HealthCheckError {
    /// A health check with the given name is already registered.
    #[error("health check named [{0}] is already registered")]
    Duplicate(String),

    /// No health check with the given name exists.
    #[error("no health check named [{0}] found")]
    NoSuchCheck(String),

    /// Reports were requested before `start_health_checks` was called.
    #[error("health checks have not been started - call start_health_checks() before generating reports")]
    NotRunning,

    /// The registry has been shut down and can no longer be started.
    #[error("the health check registry has been shut down")]
    AlreadyShutdown,

    /// A check specification failed validation at commit time.
    #[error("invalid check specification: {reason}")]
    InvalidSpecification {
        /// What was wrong with the specification
        reason: String,
    },
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, HealthCheckError>;

/// Errors returned when waiting for an on-demand refresh of a check.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// The refresh did not complete within the caller's timeout.
    #[error("timed out waiting for a fresh health check result")]
    Timeout,

    /// The runner was stopped before the refresh could complete.
    #[error("refresh cancelled because the health check runner is shutting down")]
    Interrupted,

    /// The worker iteration that should have produced the result failed.
    #[error("health check execution failed: {0}")]
    ExecutionFailure(String),
}
