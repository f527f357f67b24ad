//! Wire-exact report DTOs for the Alcor health-check system
//!
//! These types define the JSON contract consumed by orchestrators, load
//! balancers and on-call tooling. Instants serialize as ISO-8601 with
//! sub-second precision (`2021-11-26T09:08:58.460186100Z`). Changing any
//! field is a breaking change and must bump [`HEALTH_CHECK_REPORT_DTO_VERSION`].

use crate::axis::Axis;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Version of the report DTO schema. Not tied to the crate version, but any
/// breaking DTO change should be reflected here.
pub const HEALTH_CHECK_REPORT_DTO_VERSION: &str = "0.3";

/// The aggregated health report for an entire service.
///
/// Contains one [`HealthCheckDto`] per included check plus service-level
/// aggregates derived from the union of all activated axes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckReportDto {
    /// Schema version of this DTO, currently [`HEALTH_CHECK_REPORT_DTO_VERSION`]
    pub version: String,
    /// Information about the service and the host it runs on
    pub service: ServiceInfoDto,
    /// One entry per health check included in this report
    pub health_checks: Vec<HealthCheckDto>,
    /// Aggregated axes across all included health checks
    pub axes: AxesDto,
    /// True unless [`Axis::NotReady`] is activated anywhere in the report
    pub ready: bool,
    /// True unless [`Axis::RequiresReboot`] is activated anywhere in the report
    pub live: bool,
    /// True if [`Axis::CriticalWakePeopleUp`] is activated anywhere in the report
    pub critical_fault: bool,
    /// True if the report was generated from fresh data instead of cached results
    pub synchronous: bool,
}

/// The response from a single health check. May contain multiple [`StatusDto`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckDto {
    /// Unique name of the health check
    pub name: String,
    /// An optional description of what this check examines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional user-defined type, hinting at the shape of any structured data
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    /// Set when this check reports an issue on behalf of another service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<String>,
    /// The aggregated axes for this health check
    pub axes: AxesDto,
    /// The individual statuses reported by this check, in specification order
    pub statuses: Vec<StatusDto>,
    /// Optional machine-readable payload; content is entirely up to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<String>,
    /// Timing and failure details for the run that produced this entry
    pub run_status: RunStatusDto,
}

/// Details about one run of a health check: when it ran, how long it took,
/// and whether the run itself had problems.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusDto {
    /// Wall time the run took, in nanoseconds
    pub running_time_in_ns: u64,
    /// When the run started
    pub check_started: DateTime<Utc>,
    /// When the run completed
    pub check_completed: DateTime<Utc>,
    /// The result is considered stale after this instant: three times the
    /// check interval plus its expected maximum runtime past completion
    pub stale_after: DateTime<Utc>,
    /// True when the report was generated after [`RunStatusDto::stale_after`].
    /// Set at report time; a result is never stale at the moment it is produced.
    pub stale: bool,
    /// True when the run exceeded the check's expected maximum runtime
    pub slow: bool,
    /// True when the run ended with an unhandled failure. The check could not
    /// determine its own state, so all its specified axes are activated.
    pub crashed: bool,
}

/// A set of specified axes and the subset that is currently activated.
///
/// `Sys*` axes are never specified (user code cannot declare them), so they
/// only ever appear in `activated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AxesDto {
    /// Axes this check declared it might trigger
    pub specified: BTreeSet<Axis>,
    /// Axes actually triggered by the latest run
    pub activated: BTreeSet<Axis>,
}

/// One status line from a check: information text, a link, a checked
/// condition with axes, or a captured exception.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusDto {
    /// Human-readable description of this status
    pub description: String,
    /// Present when this status checked something; absent for plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<AxesDto>,
    /// Entities affected by a faulty state, when the check supplied them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_entities: Option<Vec<EntityRefDto>>,
    /// An exception captured as part of this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionDto>,
    /// A link to a relevant page, such as a monitor or admin UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkDto>,
    /// Deprecated: first entry of `responsibleTeams`, kept for old consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    /// The teams responsible for looking into this status when it is faulty
    #[serde(default)]
    pub responsible_teams: Vec<String>,
}

/// An exception flattened to strings so it survives serialization.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDto {
    /// The type of the underlying error
    pub class_name: String,
    /// The error's display message
    pub message: String,
    /// The rendered failure trace, including any error sources
    pub stack_trace: String,
}

/// A reference to an entity affected by a fault, such as an order or a queue.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct EntityRefDto {
    /// What kind of entity this is
    #[serde(rename = "type")]
    pub entity_type: String,
    /// The entity's identifier
    pub id: String,
}

/// A link with display text, so HTML renderers can hide the raw URL.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkDto {
    /// The URL the link points to
    pub url: String,
    /// The text to show for the link
    pub display_text: String,
}

/// Information about the service and its host, attached to every report.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfoDto {
    /// The host this service instance runs on
    pub host: HostDto,
    /// The project name and version of the service
    pub project: ProjectDto,
    /// Number of CPUs available to the process
    pub cpus: u32,
    /// Operating system identifier
    pub operating_system: String,
    /// The user the process runs as
    pub running_user: String,
    /// Memory figures for the host and process
    pub memory: MemoryDto,
    /// Load figures, when the platform exposes them
    pub load: LoadDto,
    /// When this service instance started
    pub running_since: DateTime<Utc>,
    /// The instant this report was generated
    pub time_now: DateTime<Utc>,
    /// Static and dynamic properties contributed by the embedder
    pub properties: Vec<PropertyDto>,
}

/// A named property contributed to the service info section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDto {
    /// Machine-readable property name
    pub name: String,
    /// Optional human-friendly name for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// The property value
    pub value: String,
}

/// Host identity for the service info section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostDto {
    /// Host name
    pub name: String,
    /// Primary network address of the host
    pub primary_address: String,
}

/// Project identity for the service info section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    /// Project or service name
    pub name: String,
    /// Deployed version of the project
    pub version: String,
}

/// Memory figures for the service info section, in bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDto {
    /// Total physical memory on the host
    pub system_total: u64,
    /// Free physical memory, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_free: Option<u64>,
    /// Maximum heap the process is allowed, in managed environments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heap_max_allowed: Option<u64>,
    /// Memory currently allocated by the process
    pub heap_allocated: u64,
    /// Allocated memory currently in use
    pub heap_used: u64,
}

/// Load figures for the service info section, in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadDto {
    /// System-wide CPU load, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<f64>,
    /// CPU load of this process, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<f64>,
}
