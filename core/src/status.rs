//! Status parts that make up the output of a health check
//!
//! A single run of a check produces an ordered list of [`StatusPart`]s:
//! plain information lines, links, checked conditions carrying axes, and
//! captured failures. The parts also carry the structural-equality rules
//! used to decide whether observers should be notified of a change.

use schema::{expand_declared_axes, Axis, EntityRefDto, Responsible};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as StdError;
use tracing::warn;

/// A reference to an entity affected by a fault. Equality is by both fields,
/// and sets of entity refs take part in structural change detection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    /// What kind of entity this is, e.g. "order" or "queue"
    pub entity_type: String,
    /// The entity's identifier
    pub id: String,
}

impl EntityRef {
    /// Create an entity reference from a type and an id.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), id: id.into() }
    }

    /// Create a set of entity references sharing one type.
    pub fn set_of<I, S>(entity_type: &str, ids: I) -> BTreeSet<EntityRef>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter().map(|id| EntityRef::new(entity_type, id)).collect()
    }

    pub(crate) fn to_dto(&self) -> EntityRefDto {
        EntityRefDto { entity_type: self.entity_type.clone(), id: self.id.clone() }
    }
}

/// A failure flattened to strings, so results stay comparable and serializable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    /// The type of the underlying error
    pub class_name: String,
    /// The error's display message
    pub message: String,
    /// The rendered failure trace, including any error sources
    pub trace: String,
}

impl FailureInfo {
    /// Capture an error, rendering its source chain as the trace.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let mut trace = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push_str("\nCaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            class_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            trace,
        }
    }

    /// Capture the payload of a caught panic.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self {
            class_name: "panic".to_string(),
            trace: message.clone(),
            message,
        }
    }
}

/// A checked condition: which teams own it, which axes it may trigger, and
/// which of those are currently in a bad state.
#[derive(Debug, Clone)]
pub struct StatusWithAxes {
    responsible_teams: Vec<Responsible>,
    description: String,
    axes: BTreeMap<Axis, bool>,
    affected_entities: Option<BTreeSet<EntityRef>>,
    static_compare_string: Option<String>,
}

impl StatusWithAxes {
    /// Create a status declaring the given axes, all initially inactive.
    /// The declared set is closed over the declaration rules (degraded
    /// lattice, inconsistency sibling).
    pub fn new(
        responsible_teams: Vec<Responsible>,
        description: impl Into<String>,
        axes: impl IntoIterator<Item = Axis>,
    ) -> Self {
        let axes = expand_declared_axes(axes).into_iter().map(|axis| (axis, false)).collect();
        Self {
            responsible_teams,
            description: description.into(),
            axes,
            affected_entities: None,
            static_compare_string: None,
        }
    }

    /// Create a status with a single axis, already activated.
    pub fn with_one_active_axis(
        responsible: Responsible,
        description: impl Into<String>,
        axis: Axis,
    ) -> Self {
        let mut status = Self::new(vec![responsible], description, [axis]);
        status.set_axis(axis, true);
        status
    }

    /// The teams that should look into this status when it is faulty.
    pub fn responsible_teams(&self) -> &[Responsible] {
        &self.responsible_teams
    }

    /// The description of this status.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The declared axes and their current activation state.
    pub fn axes(&self) -> &BTreeMap<Axis, bool> {
        &self.axes
    }

    /// True when none of the declared axes are activated.
    pub fn is_ok(&self) -> bool {
        self.axes.values().all(|active| !active)
    }

    /// Update the activation state of a declared axis. Activating a degraded
    /// axis also activates every lower degraded level. Axes that were not
    /// declared cannot be introduced here and are ignored with a warning.
    pub fn set_axis(&mut self, axis: Axis, active: bool) {
        if !self.axes.contains_key(&axis) {
            warn!("Attempt to set axis {:?} that this status does not declare - ignoring", axis);
            return;
        }
        self.axes.insert(axis, active);
        if active {
            for implied in axis.activation_implies() {
                if self.axes.contains_key(implied) {
                    self.axes.insert(*implied, true);
                }
            }
        }
    }

    /// Update the activation state of several axes at once.
    pub fn set_axes(&mut self, active: bool, axes: &[Axis]) {
        for axis in axes {
            self.set_axis(*axis, active);
        }
    }

    /// Set the activation state of every declared axis.
    pub fn set_all_axes(&mut self, active: bool) {
        let declared: Vec<Axis> = self.axes.keys().copied().collect();
        for axis in declared {
            self.set_axis(axis, active);
        }
    }

    /// Entities affected by the faulty state described here, if supplied.
    pub fn affected_entities(&self) -> Option<&BTreeSet<EntityRef>> {
        self.affected_entities.as_ref()
    }

    pub(crate) fn set_affected_entities(&mut self, entities: Option<BTreeSet<EntityRef>>) {
        self.affected_entities = entities;
    }

    /// The stable comparison key for change detection, if supplied.
    pub fn static_compare_string(&self) -> Option<&str> {
        self.static_compare_string.as_deref()
    }

    pub(crate) fn set_static_compare_string(&mut self, compare_string: impl Into<String>) {
        self.static_compare_string = Some(compare_string.into());
    }

    /// Structural equality between two checked statuses.
    ///
    /// The rules, in order:
    /// 1. The responsible teams must match pairwise.
    /// 2. If both are ok, they are equal when they declare the same axes.
    /// 3. Otherwise the full activation maps must match, and then the first
    ///    available stable key decides: affected entities if both carry them,
    ///    the static compare string if both carry one, or the description if
    ///    neither does. A key carried by only one side means "changed".
    pub fn is_equal_status(&self, other: &StatusWithAxes) -> bool {
        if self.responsible_teams != other.responsible_teams {
            return false;
        }

        if self.is_ok() && other.is_ok() {
            return self.axes.keys().eq(other.axes.keys());
        }

        if self.axes != other.axes {
            return false;
        }

        match (&self.affected_entities, &other.affected_entities) {
            (Some(mine), Some(theirs)) => return mine == theirs,
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }

        match (&self.static_compare_string, &other.static_compare_string) {
            (Some(mine), Some(theirs)) => return mine == theirs,
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }

        self.description == other.description
    }
}

/// A captured failure. When `unhandled` is set the part was produced by the
/// engine catching a failure escaping a check step, and it carries the
/// [`Axis::SysCrashed`] axis.
#[derive(Debug, Clone)]
pub struct StatusWithFailure {
    description: String,
    failure: FailureInfo,
    unhandled: bool,
    axes: BTreeMap<Axis, bool>,
}

impl StatusWithFailure {
    fn new(description: impl Into<String>, failure: FailureInfo, unhandled: bool) -> Self {
        let mut axes = BTreeMap::new();
        if unhandled {
            axes.insert(Axis::SysCrashed, true);
        }
        Self { description: description.into(), failure, unhandled, axes }
    }

    /// The description of what this failure represents.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The captured failure details.
    pub fn failure(&self) -> &FailureInfo {
        &self.failure
    }

    /// True when the failure escaped a check step unhandled.
    pub fn is_unhandled(&self) -> bool {
        self.unhandled
    }

    /// The axes this part carries: `SYS_CRASHED` when unhandled, none otherwise.
    pub fn axes(&self) -> &BTreeMap<Axis, bool> {
        &self.axes
    }

    /// Equal when the failure type, unhandled flag, description, message and
    /// rendered trace all match.
    pub fn is_equal_status(&self, other: &StatusWithFailure) -> bool {
        self.failure.class_name == other.failure.class_name
            && self.unhandled == other.unhandled
            && self.description == other.description
            && self.failure.message == other.failure.message
            && self.failure.trace == other.failure.trace
    }
}

/// One element of a health check's output.
#[derive(Debug, Clone)]
pub enum StatusPart {
    /// A pure text line with no level and no axes.
    Info {
        /// The text to show
        description: String,
    },
    /// A link to a relevant page.
    Link {
        /// The text to show for the link
        display_text: String,
        /// The URL the link points to
        url: String,
    },
    /// A checked condition with declared axes.
    WithAxes(StatusWithAxes),
    /// A captured failure.
    WithFailure(StatusWithFailure),
}

impl StatusPart {
    /// A pure information line.
    pub fn info(description: impl Into<String>) -> Self {
        StatusPart::Info { description: description.into() }
    }

    /// A link with display text.
    pub fn link(display_text: impl Into<String>, url: impl Into<String>) -> Self {
        StatusPart::Link { display_text: display_text.into(), url: url.into() }
    }

    /// A failure the check chose to report.
    pub fn with_failure(description: impl Into<String>, failure: FailureInfo) -> Self {
        StatusPart::WithFailure(StatusWithFailure::new(description, failure, false))
    }

    /// A failure that escaped a check step; carries [`Axis::SysCrashed`].
    pub fn with_unhandled_failure(description: impl Into<String>, failure: FailureInfo) -> Self {
        StatusPart::WithFailure(StatusWithFailure::new(description, failure, true))
    }

    /// The human-readable description of this part.
    pub fn description(&self) -> String {
        match self {
            StatusPart::Info { description } => description.clone(),
            StatusPart::Link { display_text, url } => format!("{}:\n -> {}", display_text, url),
            StatusPart::WithAxes(status) => status.description().to_string(),
            StatusPart::WithFailure(status) => status.description().to_string(),
        }
    }

    /// Whether this part is in an ok state. Information and links always are;
    /// failures never are.
    pub fn is_ok(&self) -> bool {
        match self {
            StatusPart::Info { .. } | StatusPart::Link { .. } => true,
            StatusPart::WithAxes(status) => status.is_ok(),
            StatusPart::WithFailure(_) => false,
        }
    }

    /// The axes carried by this part, when it has any.
    pub fn axes(&self) -> Option<&BTreeMap<Axis, bool>> {
        match self {
            StatusPart::WithAxes(status) => Some(status.axes()),
            StatusPart::WithFailure(status) => Some(status.axes()),
            _ => None,
        }
    }
}

/// Union the axis maps of many parts: an axis is activated in the aggregate
/// when it is activated in any part.
pub fn aggregate_axes<'a>(parts: impl IntoIterator<Item = &'a StatusPart>) -> BTreeMap<Axis, bool> {
    let mut aggregated: BTreeMap<Axis, bool> = BTreeMap::new();
    for part in parts {
        if let Some(axes) = part.axes() {
            for (axis, active) in axes {
                let entry = aggregated.entry(*axis).or_insert(false);
                *entry = *entry || *active;
            }
        }
    }
    aggregated
}
