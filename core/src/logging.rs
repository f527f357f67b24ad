//! Logging capabilities for the health-check engine
//!
//! Runners invoke an injected [`CheckLogger`] with the DTO of every not-ok
//! result, so faulty states land in the service's log stream even when no
//! one asks for a report. Logger failures are caught by the runner and never
//! affect check execution.

use schema::HealthCheckDto;
use tracing::{info, warn};

/// Receives the DTO of every not-ok health check result. Implementations
/// must be thread safe; invocation is best effort.
pub trait CheckLogger: Send + Sync {
    /// Log a not-ok health check result.
    fn log_health_check_result(&self, health_check: &HealthCheckDto);
}

/// Default logger that emits not-ok results through `tracing`.
#[derive(Debug, Default)]
pub struct TracingCheckLogger;

impl CheckLogger for TracingCheckLogger {
    fn log_health_check_result(&self, health_check: &HealthCheckDto) {
        let payload = serde_json::to_string(health_check)
            .unwrap_or_else(|error| format!("<unserializable health check: {}>", error));
        warn!(
            "HealthCheck[{}] is not OK - activated axes {:?}: {}",
            health_check.name, health_check.axes.activated, payload
        );
    }
}

/// A logger that drops everything. Useful in tests and embedders that handle
/// reporting through observers instead.
#[derive(Debug, Default)]
pub struct NullCheckLogger;

impl CheckLogger for NullCheckLogger {
    fn log_health_check_result(&self, _health_check: &HealthCheckDto) {}
}

/// Initialize tracing for the application, honoring `RUST_LOG` when set.
pub fn init_tracing(level: &str) -> Result<(), String> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| error.to_string())?;

    info!("Tracing initialized with level: {}", level);
    Ok(())
}
