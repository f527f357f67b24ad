//! Core engine for the Alcor health-reporting system
//!
//! Application code registers named health checks with the
//! [`HealthCheckRegistry`]; each check runs on a private schedule, caches its
//! latest result, and reports along operational axes. The registry renders
//! aggregated reports and the specialised startup / readiness / liveness /
//! critical probe views, and publishes structural status changes to
//! observers.
//!
//! ```no_run
//! use alcor_core::{
//!     Axis, CheckMetadata, HealthCheckRegistry, Responsible, ServiceInfo,
//! };
//! use alcor_core::clock::SystemClock;
//! use alcor_core::logging::TracingCheckLogger;
//! use std::sync::Arc;
//!
//! # async fn example() -> alcor_core::Result<()> {
//! let registry = HealthCheckRegistry::new(
//!     Arc::new(SystemClock),
//!     Arc::new(TracingCheckLogger),
//!     ServiceInfo::builder("order-service", "2.4.1").build(),
//! );
//!
//! registry.register_health_check(CheckMetadata::new("database"), |spec| {
//!     spec.static_text("Database connectivity");
//!     spec.check([Responsible::Developers], [Axis::NotReady], |context| {
//!         context.fault_conditionally(false, "connection pool is healthy")
//!     });
//! })?;
//!
//! registry.start_health_checks()?;
//! let readiness = registry.get_readiness_status().await?;
//! assert!(readiness.ready);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod instance;
pub mod logging;
pub mod metadata;
pub mod registry;
pub mod report;
pub mod result;
pub mod runner;
pub mod service_info;
pub mod spec;
pub mod status;

// Re-export schema types for convenience
pub use schema::*;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HealthCheckError, RefreshError, Result};
pub use instance::CheckInstance;
pub use logging::{init_tracing, CheckLogger, NullCheckLogger, TracingCheckLogger};
pub use metadata::{CheckMetadata, CheckMetadataBuilder};
pub use registry::{
    HealthCheckObserver, HealthCheckRegistry, RegisteredHealthCheck, SubscriptionHandle,
};
pub use report::CreateReportRequest;
pub use result::CheckResult;
pub use runner::CheckRunner;
pub use service_info::{InfoProperty, InfoPropertiesSupplier, ServiceInfo, ServiceInfoBuilder};
pub use spec::{CheckContext, CheckOutcome, CheckSpecification, SharedContext};
pub use status::{EntityRef, FailureInfo, StatusPart, StatusWithAxes, StatusWithFailure};
