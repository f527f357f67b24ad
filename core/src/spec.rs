//! The declarative specification DSL for health checks
//!
//! User code lays out a check as an ordered sequence of steps: static text,
//! dynamic text, links, one or more checked conditions, and structured data.
//! Steps accumulate in a [`CheckSpecification`] until committed, at which
//! point they become the active steps of the owning check instance.
//!
//! A checked condition declares up front which [`Axis`] values it may
//! trigger; the step body only decides activation. The body receives a
//! [`CheckContext`] and must finish through one of the terminators
//! ([`CheckContext::ok`], [`CheckContext::fault`],
//! [`CheckContext::fault_conditionally`], ...) whose [`CheckOutcome`] can
//! turn declared axes off again - never on, so a check can never trigger an
//! axis it did not declare.
//!
//! Checks must not let failures escape their steps. If one does, the engine
//! catches it, reports it, and activates every declared axis, because the
//! check can no longer attest to its own state. For checks declaring
//! [`Axis::NotReady`] or [`Axis::RequiresReboot`] that can take the instance
//! out of the load balancer or reboot it.

use crate::error::{HealthCheckError, Result};
use crate::status::{EntityRef, FailureInfo, StatusPart, StatusWithAxes};
use schema::{expand_declared_axes, Axis, Responsible};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::warn;

pub(crate) type TextFn = Box<dyn Fn(&SharedContext) -> String + Send + Sync>;
pub(crate) type CheckFn = Box<dyn Fn(&mut CheckContext<'_>) -> CheckOutcome + Send + Sync>;

/// One step of a committed specification.
pub(crate) enum Step {
    /// A part that is the same on every run (static text or a link).
    Static(StatusPart),
    /// Text computed from the shared context on every run.
    DynamicText(TextFn),
    /// Structured data computed from the shared context. Last writer wins.
    StructuredData(TextFn),
    /// A checked condition with declared responsibility and axes.
    Check {
        responsible_teams: Vec<Responsible>,
        axes: BTreeSet<Axis>,
        run: CheckFn,
    },
}

/// What one step produced when run.
pub(crate) struct StepOutput {
    pub(crate) parts: Vec<StatusPart>,
    pub(crate) structured_data: Option<String>,
}

impl Step {
    pub(crate) fn run(&self, shared: &mut SharedContext) -> StepOutput {
        match self {
            Step::Static(part) => StepOutput { parts: vec![part.clone()], structured_data: None },
            Step::DynamicText(text_fn) => StepOutput {
                parts: vec![StatusPart::info(text_fn(shared))],
                structured_data: None,
            },
            Step::StructuredData(data_fn) => StepOutput {
                parts: Vec::new(),
                structured_data: Some(data_fn(shared)),
            },
            Step::Check { responsible_teams, axes, run } => {
                let mut context = CheckContext {
                    shared,
                    responsible_teams: responsible_teams.clone(),
                    axes: axes.clone(),
                    parts: Vec::new(),
                };
                let outcome = run(&mut context);
                let mut parts = context.parts;
                parts.extend(outcome.into_parts());
                StepOutput { parts, structured_data: None }
            }
        }
    }
}

/// The steps and declared-axis union of a committed specification.
pub(crate) struct CommittedSteps {
    pub(crate) steps: Vec<Step>,
    pub(crate) axes: BTreeSet<Axis>,
}

/// Mutable builder for the steps of a health check.
///
/// Steps accumulate in an uncommitted buffer; [`CheckSpecification::commit`]
/// validates them and atomically makes them the active sequence, clearing
/// the buffer so the check can be re-specified later. Registration commits
/// automatically, so explicit commits are only needed when re-specifying.
#[derive(Default)]
pub struct CheckSpecification {
    uncommitted: Vec<Step>,
    uncommitted_axes: BTreeSet<Axis>,
    invalid: Option<String>,
    committed: Option<Arc<CommittedSteps>>,
}

impl CheckSpecification {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add text that is the same on every run, such as a header or help text.
    pub fn static_text(&mut self, text_line: impl Into<String>) -> &mut Self {
        self.uncommitted.push(Step::Static(StatusPart::info(text_line)));
        self
    }

    /// Add text computed on every run from the shared context.
    pub fn dynamic_text<F>(&mut self, text_fn: F) -> &mut Self
    where
        F: Fn(&SharedContext) -> String + Send + Sync + 'static,
    {
        self.uncommitted.push(Step::DynamicText(Box::new(text_fn)));
        self
    }

    /// Add a static link, e.g. to a monitor page relevant for this check.
    pub fn link(&mut self, display_text: impl Into<String>, url: impl Into<String>) -> &mut Self {
        self.uncommitted.push(Step::Static(StatusPart::link(display_text, url)));
        self
    }

    /// Add a checked condition. `axes` declares, worst case, what the check
    /// may trigger; the body decides activation through its terminator.
    ///
    /// Declaring no axes or declaring a system axis makes the whole
    /// specification invalid, surfaced as
    /// [`HealthCheckError::InvalidSpecification`] at commit.
    pub fn check<T, A, F>(&mut self, responsible_teams: T, axes: A, run: F) -> &mut Self
    where
        T: IntoIterator<Item = Responsible>,
        A: IntoIterator<Item = Axis>,
        F: Fn(&mut CheckContext<'_>) -> CheckOutcome + Send + Sync + 'static,
    {
        let responsible_teams: Vec<Responsible> = responsible_teams.into_iter().collect();
        let axes: BTreeSet<Axis> = axes.into_iter().collect();

        if axes.is_empty() {
            self.mark_invalid("a check must be able to trigger at least one axis");
            return self;
        }
        if let Some(system_axis) = axes.iter().find(|axis| axis.is_system()) {
            self.mark_invalid(format!(
                "a check can not declare the system axis {:?} directly",
                system_axis
            ));
            return self;
        }
        if axes.contains(&Axis::InternalInconsistency) {
            warn!("Using deprecated Axis::InternalInconsistency - should be replaced with Axis::Inconsistency");
        }

        let axes = expand_declared_axes(axes);
        self.uncommitted_axes.extend(axes.iter().copied());
        self.uncommitted.push(Step::Check {
            responsible_teams,
            axes,
            run: Box::new(run),
        });
        self
    }

    /// Attach machine-readable data to the result, for consumers that know
    /// the check's type. Only one payload is kept per run; later structured
    /// data steps overwrite earlier ones.
    pub fn structured_data<F>(&mut self, data_fn: F) -> &mut Self
    where
        F: Fn(&SharedContext) -> String + Send + Sync + 'static,
    {
        self.uncommitted.push(Step::StructuredData(Box::new(data_fn)));
        self
    }

    /// Validate the buffered steps and atomically make them the active
    /// sequence, replacing any previously committed steps and clearing the
    /// buffer. Committing with an empty buffer on an already committed
    /// specification is a no-op, so repeated commits are harmless.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(reason) = self.invalid.take() {
            self.uncommitted.clear();
            self.uncommitted_axes.clear();
            return Err(HealthCheckError::InvalidSpecification { reason });
        }
        if self.uncommitted.is_empty() && self.committed.is_some() {
            return Ok(());
        }
        let committed = CommittedSteps {
            steps: std::mem::take(&mut self.uncommitted),
            axes: std::mem::take(&mut self.uncommitted_axes),
        };
        self.committed = Some(Arc::new(committed));
        Ok(())
    }

    pub(crate) fn take_committed(&mut self) -> Option<Arc<CommittedSteps>> {
        self.committed.take()
    }

    fn mark_invalid(&mut self, reason: impl Into<String>) {
        if self.invalid.is_none() {
            self.invalid = Some(reason.into());
        }
    }
}

/// A key-value map shared by all steps of one run. Later steps read what
/// earlier steps stored, so a check can compute state once and report on it
/// in several places.
#[derive(Default)]
pub struct SharedContext {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl SharedContext {
    /// Get a value stored earlier in this run, if present with that type.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|value| value.downcast_ref())
    }

    fn put(&mut self, name: impl Into<String>, value: Box<dyn Any + Send>) {
        self.values.insert(name.into(), value);
    }
}

/// The context handed to a checked condition's body. Offers the shared map,
/// helpers for adding text, links and exceptions before the terminator, and
/// the terminators that produce the step's [`CheckOutcome`].
pub struct CheckContext<'run> {
    shared: &'run mut SharedContext,
    responsible_teams: Vec<Responsible>,
    axes: BTreeSet<Axis>,
    parts: Vec<StatusPart>,
}

impl CheckContext<'_> {
    /// Get a value from the shared context of this run.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.shared.get(name)
    }

    /// Store a value in the shared context for later steps of this run.
    pub fn put<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.shared.put(name, Box::new(value));
    }

    /// Add a text line ahead of the checked status.
    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.parts.push(StatusPart::info(text));
        self
    }

    /// Add a link ahead of the checked status.
    pub fn link(&mut self, display_text: impl Into<String>, url: impl Into<String>) -> &mut Self {
        self.parts.push(StatusPart::link(display_text, url));
        self
    }

    /// Add a captured error ahead of the checked status.
    pub fn exception<E>(&mut self, description: impl Into<String>, error: &E) -> &mut Self
    where
        E: StdError + ?Sized,
    {
        self.parts
            .push(StatusPart::with_failure(description, FailureInfo::from_error(error)));
        self
    }

    /// Terminator: fault the check when `faulty` is true, otherwise report ok.
    /// When faulty, every declared axis starts activated; use
    /// [`CheckOutcome::turn_off_axes`] to moderate.
    pub fn fault_conditionally(&self, faulty: bool, description: impl Into<String>) -> CheckOutcome {
        self.outcome(faulty, description, None, None)
    }

    /// Terminator variant supplying the entities affected by the fault.
    /// Change detection then compares the entity sets instead of the
    /// description, so a flapping description does not count as a change.
    pub fn fault_conditionally_with_entities(
        &self,
        faulty: bool,
        description: impl Into<String>,
        affected_entities: impl IntoIterator<Item = EntityRef>,
    ) -> CheckOutcome {
        self.outcome(
            faulty,
            description,
            Some(affected_entities.into_iter().collect()),
            None,
        )
    }

    /// Terminator variant supplying a stable comparison key, for checks whose
    /// description embeds volatile detail (timestamps, ages) but cannot name
    /// affected entities.
    pub fn fault_conditionally_with_compare_string(
        &self,
        faulty: bool,
        description: impl Into<String>,
        static_compare_string: impl Into<String>,
    ) -> CheckOutcome {
        self.outcome(faulty, description, None, Some(static_compare_string.into()))
    }

    /// Terminator: the check is faulty.
    pub fn fault(&self, description: impl Into<String>) -> CheckOutcome {
        self.fault_conditionally(true, description)
    }

    /// Terminator: the check is faulty, with affected entities.
    pub fn fault_with_entities(
        &self,
        description: impl Into<String>,
        affected_entities: impl IntoIterator<Item = EntityRef>,
    ) -> CheckOutcome {
        self.fault_conditionally_with_entities(true, description, affected_entities)
    }

    /// Terminator: the check is faulty, with a stable comparison key.
    pub fn fault_with_compare_string(
        &self,
        description: impl Into<String>,
        static_compare_string: impl Into<String>,
    ) -> CheckOutcome {
        self.fault_conditionally_with_compare_string(true, description, static_compare_string)
    }

    /// Terminator: the check is ok.
    pub fn ok(&self, description: impl Into<String>) -> CheckOutcome {
        self.fault_conditionally(false, description)
    }

    fn outcome(
        &self,
        faulty: bool,
        description: impl Into<String>,
        affected_entities: Option<BTreeSet<EntityRef>>,
        static_compare_string: Option<String>,
    ) -> CheckOutcome {
        let mut status = StatusWithAxes::new(
            self.responsible_teams.clone(),
            description,
            self.axes.iter().copied(),
        );
        status.set_all_axes(faulty);
        status.set_affected_entities(affected_entities);
        if let Some(compare_string) = static_compare_string {
            status.set_static_compare_string(compare_string);
        }
        CheckOutcome { status, trailing: Vec::new() }
    }
}

/// The result handle returned by a terminator. The step body may keep
/// chaining on it: turning declared axes off again, or adding text, links
/// and exceptions that land after the checked status.
pub struct CheckOutcome {
    status: StatusWithAxes,
    trailing: Vec<StatusPart>,
}

impl CheckOutcome {
    /// Turn declared axes off again. A fault activates every declared axis
    /// by default; a check may decide some of them do not apply, e.g. only
    /// escalating to [`Axis::CriticalWakePeopleUp`] after a grace period.
    /// Turning axes on is intentionally impossible, so the declared set
    /// stays the contract of what the check can ever trigger.
    pub fn turn_off_axes(mut self, axes: &[Axis]) -> Self {
        self.status.set_axes(false, axes);
        self
    }

    /// Turn declared axes off again only when `turn_off` is true.
    pub fn turn_off_axes_conditionally(self, turn_off: bool, axes: &[Axis]) -> Self {
        if turn_off {
            self.turn_off_axes(axes)
        } else {
            self
        }
    }

    /// Add a text line after the checked status.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.trailing.push(StatusPart::info(text));
        self
    }

    /// Add a link after the checked status.
    pub fn link(mut self, display_text: impl Into<String>, url: impl Into<String>) -> Self {
        self.trailing.push(StatusPart::link(display_text, url));
        self
    }

    /// Add a captured error after the checked status.
    pub fn exception<E>(mut self, description: impl Into<String>, error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        self.trailing
            .push(StatusPart::with_failure(description, FailureInfo::from_error(error)));
        self
    }

    fn into_parts(self) -> Vec<StatusPart> {
        let mut parts = Vec::with_capacity(1 + self.trailing.len());
        parts.push(StatusPart::WithAxes(self.status));
        parts.extend(self.trailing);
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_single_check<F>(axes: impl IntoIterator<Item = Axis>, body: F) -> Vec<StatusPart>
    where
        F: Fn(&mut CheckContext<'_>) -> CheckOutcome + Send + Sync + 'static,
    {
        let mut spec = CheckSpecification::new();
        spec.check([Responsible::Developers], axes, body);
        spec.commit().unwrap();
        let committed = spec.take_committed().unwrap();
        let mut shared = SharedContext::default();
        let mut parts = Vec::new();
        for step in &committed.steps {
            parts.extend(step.run(&mut shared).parts);
        }
        parts
    }

    #[test]
    fn test_commit_requires_at_least_one_axis() {
        let mut spec = CheckSpecification::new();
        spec.check([Responsible::Developers], Vec::new(), |context| context.ok("fine"));
        let error = spec.commit().unwrap_err();
        assert!(matches!(error, HealthCheckError::InvalidSpecification { .. }));
    }

    #[test]
    fn test_commit_rejects_system_axes() {
        for system_axis in Axis::SYSTEM_AXES {
            let mut spec = CheckSpecification::new();
            spec.check([Responsible::Developers], [system_axis], |context| context.ok("fine"));
            let error = spec.commit().unwrap_err();
            assert!(matches!(error, HealthCheckError::InvalidSpecification { .. }));
        }
    }

    #[test]
    fn test_declared_axes_are_expanded() {
        let mut spec = CheckSpecification::new();
        spec.check([Responsible::Developers], [Axis::InternalInconsistency], |context| {
            context.ok("consistent")
        });
        spec.commit().unwrap();
        let committed = spec.take_committed().unwrap();
        assert!(committed.axes.contains(&Axis::Inconsistency));
        assert!(committed.axes.contains(&Axis::InternalInconsistency));
    }

    #[test]
    fn test_commit_is_idempotent_when_nothing_new() {
        let mut spec = CheckSpecification::new();
        spec.static_text("header");
        spec.commit().unwrap();
        let first = spec.take_committed().unwrap();
        assert_eq!(first.steps.len(), 1);

        // nothing buffered: the committed steps stay in place
        spec.committed = Some(first.clone());
        spec.commit().unwrap();
        let second = spec.take_committed().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_recommit_replaces_steps() {
        let mut spec = CheckSpecification::new();
        spec.static_text("first");
        spec.check([Responsible::Developers], [Axis::NotReady], |context| context.ok("fine"));
        spec.commit().unwrap();
        assert_eq!(spec.committed.as_ref().unwrap().steps.len(), 2);

        spec.static_text("replacement");
        spec.commit().unwrap();
        let committed = spec.take_committed().unwrap();
        assert_eq!(committed.steps.len(), 1);
        assert!(committed.axes.is_empty());
    }

    #[test]
    fn test_fault_activates_all_declared_axes() {
        let parts = run_single_check([Axis::DegradedComplete], |context| {
            context.fault("database gone")
        });
        assert_eq!(parts.len(), 1);
        let StatusPart::WithAxes(status) = &parts[0] else {
            panic!("expected a checked status");
        };
        assert_eq!(status.axes()[&Axis::DegradedComplete], true);
        assert_eq!(status.axes()[&Axis::DegradedPartial], true);
        assert_eq!(status.axes()[&Axis::DegradedMinor], true);
    }

    #[test]
    fn test_turn_off_axes_moderates_fault() {
        let parts = run_single_check(
            [Axis::DegradedPartial, Axis::CriticalWakePeopleUp],
            |context| {
                context
                    .fault("degraded, but not critical yet")
                    .turn_off_axes(&[Axis::CriticalWakePeopleUp])
            },
        );
        let StatusPart::WithAxes(status) = &parts[0] else {
            panic!("expected a checked status");
        };
        assert_eq!(status.axes()[&Axis::CriticalWakePeopleUp], false);
        assert_eq!(status.axes()[&Axis::DegradedPartial], true);
    }

    #[test]
    fn test_parts_keep_specification_order() {
        let parts = run_single_check([Axis::NotReady], |context| {
            context.text("before");
            context.ok("the check").text("after").link("monitor", "https://example.com")
        });
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[0], StatusPart::Info { description } if description == "before"));
        assert!(matches!(&parts[1], StatusPart::WithAxes(_)));
        assert!(matches!(&parts[2], StatusPart::Info { description } if description == "after"));
        assert!(matches!(&parts[3], StatusPart::Link { .. }));
    }

    #[test]
    fn test_shared_context_flows_between_steps() {
        let mut spec = CheckSpecification::new();
        spec.check([Responsible::Developers], [Axis::DegradedMinor], |context| {
            context.put("queue-depth", 17_usize);
            context.ok("queue drained")
        });
        spec.dynamic_text(|shared| {
            format!("depth was {}", shared.get::<usize>("queue-depth").copied().unwrap_or(0))
        });
        spec.commit().unwrap();
        let committed = spec.take_committed().unwrap();

        let mut shared = SharedContext::default();
        let mut parts = Vec::new();
        for step in &committed.steps {
            parts.extend(step.run(&mut shared).parts);
        }
        assert!(matches!(&parts[1], StatusPart::Info { description } if description == "depth was 17"));
    }
}
