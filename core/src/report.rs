//! Report requests and conversion of results to wire DTOs

use crate::registry::RegisteredHealthCheck;
use crate::result::CheckResult;
use crate::status::StatusPart;
use chrono::{DateTime, Utc};
use schema::{
    AxesDto, Axis, EntityRefDto, ExceptionDto, HealthCheckDto, HealthCheckReportDto, LinkDto,
    RunStatusDto, ServiceInfoDto, StatusDto, HEALTH_CHECK_REPORT_DTO_VERSION,
};
use std::collections::{BTreeMap, BTreeSet};

/// Filter predicate over registered checks.
pub type CheckFilter = Box<dyn Fn(&dyn RegisteredHealthCheck) -> bool + Send + Sync>;

/// Configures which checks a report should include and whether cached
/// results are acceptable.
#[derive(Default)]
pub struct CreateReportRequest {
    axes: Option<BTreeSet<Axis>>,
    exclude_checks: BTreeSet<String>,
    filters: Vec<CheckFilter>,
    force_fresh_data: bool,
}

impl CreateReportRequest {
    /// A report over all registered checks, from cached results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include only checks declaring at least one of the given axes.
    pub fn include_only_checks_with_any_of_these_axes(
        mut self,
        axes: impl IntoIterator<Item = Axis>,
    ) -> Self {
        self.axes = Some(axes.into_iter().collect());
        self
    }

    /// Exclude the named checks.
    pub fn exclude_checks(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.exclude_checks.extend(names);
        self
    }

    /// Include a check only when the filter returns true.
    pub fn filter_checks<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn RegisteredHealthCheck) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    /// Run every included check synchronously instead of using cached results.
    pub fn force_fresh_data(mut self, force_fresh_data: bool) -> Self {
        self.force_fresh_data = force_fresh_data;
        self
    }

    /// The readiness report: checks that may trigger [`Axis::NotReady`].
    /// Used by load balancers to decide whether to route traffic here.
    pub fn readiness_status() -> Self {
        Self::new().include_only_checks_with_any_of_these_axes([Axis::NotReady])
    }

    /// The liveness report: checks that may trigger [`Axis::RequiresReboot`].
    /// Used by orchestrators that may kill and restart the instance.
    pub fn liveness_status() -> Self {
        Self::new().include_only_checks_with_any_of_these_axes([Axis::RequiresReboot])
    }

    /// The critical report: checks that may trigger
    /// [`Axis::CriticalWakePeopleUp`].
    pub fn critical_status() -> Self {
        Self::new().include_only_checks_with_any_of_these_axes([Axis::CriticalWakePeopleUp])
    }

    pub(crate) fn should_include_check(&self, check: &dyn RegisteredHealthCheck) -> bool {
        for filter in &self.filters {
            if !filter(check) {
                return false;
            }
        }

        if self.exclude_checks.contains(&check.metadata().name) {
            return false;
        }

        match &self.axes {
            None => true,
            Some(axes) => !axes.is_disjoint(&check.axes()),
        }
    }

    pub(crate) fn should_force_fresh_data(&self) -> bool {
        self.force_fresh_data
    }
}

/// Convert one result to its DTO, judging staleness against `now`.
///
/// Staleness is a property of the view: when `now` is past the result's
/// stale deadline the DTO is marked stale and gets [`Axis::SysStale`] in its
/// activated axes, while the underlying result stays untouched.
pub(crate) fn check_result_to_dto(result: &CheckResult, now: DateTime<Utc>) -> HealthCheckDto {
    let metadata = result.metadata();
    let mut axes = axes_to_dto(&result.aggregated_axes());

    let stale_after = result.stale_after();
    let stale = now > stale_after;
    if stale {
        // Never stored on the result; a result is not stale when produced.
        axes.activated.insert(Axis::SysStale);
    }

    HealthCheckDto {
        name: metadata.name.clone(),
        description: metadata.description.clone(),
        check_type: metadata.check_type.clone(),
        on_behalf_of: metadata.on_behalf_of.clone(),
        axes,
        statuses: result.parts().iter().map(status_part_to_dto).collect(),
        structured_data: result.structured_data().map(str::to_string),
        run_status: RunStatusDto {
            running_time_in_ns: result.running_time().as_nanos() as u64,
            check_started: result.check_started(),
            check_completed: result.check_completed(),
            stale_after,
            stale,
            slow: result.is_slow(),
            crashed: result.is_crashed(),
        },
    }
}

fn status_part_to_dto(part: &StatusPart) -> StatusDto {
    let mut dto = StatusDto {
        description: part.description(),
        axes: None,
        affected_entities: None,
        exception: None,
        link: None,
        responsible: None,
        responsible_teams: Vec::new(),
    };

    match part {
        StatusPart::Info { .. } => {}
        StatusPart::Link { display_text, url } => {
            dto.link = Some(LinkDto { url: url.clone(), display_text: display_text.clone() });
        }
        StatusPart::WithAxes(status) => {
            dto.axes = Some(axes_to_dto(status.axes()));
            dto.responsible_teams = status
                .responsible_teams()
                .iter()
                .map(|team| team.name().to_string())
                .collect();
            dto.responsible = dto.responsible_teams.first().cloned();
            dto.affected_entities = status
                .affected_entities()
                .map(|entities| entities.iter().map(|entity| entity.to_dto()).collect::<Vec<EntityRefDto>>());
        }
        StatusPart::WithFailure(status) => {
            let failure = status.failure();
            dto.exception = Some(ExceptionDto {
                class_name: failure.class_name.clone(),
                message: failure.message.clone(),
                stack_trace: failure.trace.clone(),
            });
            if status.is_unhandled() {
                dto.axes = Some(AxesDto {
                    specified: BTreeSet::new(),
                    activated: BTreeSet::from([Axis::SysCrashed]),
                });
            }
        }
    }

    dto
}

/// Split an axis map into the specified and activated sets. System axes can
/// never be specified, so they are stripped from `specified` but kept in
/// `activated` when triggered.
fn axes_to_dto(axes: &BTreeMap<Axis, bool>) -> AxesDto {
    let mut specified: BTreeSet<Axis> = axes.keys().copied().collect();
    let activated: BTreeSet<Axis> = axes
        .iter()
        .filter(|(_, active)| **active)
        .map(|(axis, _)| *axis)
        .collect();

    for system_axis in Axis::SYSTEM_AXES {
        specified.remove(&system_axis);
    }

    AxesDto { specified, activated }
}

fn aggregate_axes_dtos<'a>(axes: impl IntoIterator<Item = &'a AxesDto>) -> AxesDto {
    let mut aggregated = AxesDto::default();
    for dto in axes {
        aggregated.specified.extend(dto.specified.iter().copied());
        aggregated.activated.extend(dto.activated.iter().copied());
    }
    aggregated
}

/// Assemble the top-level report from converted check DTOs: aggregate axes,
/// then derive the ready / live / critical-fault verdicts from the union of
/// activated axes.
pub(crate) fn build_report_dto(
    service: ServiceInfoDto,
    health_checks: Vec<HealthCheckDto>,
    synchronous: bool,
) -> HealthCheckReportDto {
    let axes = aggregate_axes_dtos(health_checks.iter().map(|check| &check.axes));
    let ready = !axes.activated.contains(&Axis::NotReady);
    let live = !axes.activated.contains(&Axis::RequiresReboot);
    let critical_fault = axes.activated.contains(&Axis::CriticalWakePeopleUp);

    HealthCheckReportDto {
        version: HEALTH_CHECK_REPORT_DTO_VERSION.to_string(),
        service,
        health_checks,
        axes,
        ready,
        live,
        critical_fault,
        synchronous,
    }
}
