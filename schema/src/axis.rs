//! Axes that classify what a health check fault means operationally
//!
//! An axis is a named dimension along which a check may signal a fault.
//! Checks declare up front which axes they might trigger ("specified"), and
//! each run decides which of those are actually in a bad state ("activated").
//! Automated consumers key off axes rather than description text: readiness
//! probes look for [`Axis::NotReady`], liveness probes for
//! [`Axis::RequiresReboot`], alerting for [`Axis::CriticalWakePeopleUp`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Operational dimensions a health check may report along.
///
/// The `Sys*` variants are reserved for the engine itself: they are attached
/// to results when a check crashes, runs slow, or goes stale, and can never
/// be declared by user code.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Axis {
    /// The problem will not go away by itself; a human must take action.
    ManualInterventionRequired,
    /// The service is completely unable to perform its job.
    DegradedComplete,
    /// Parts of the service do not work, but the primary task still does.
    DegradedPartial,
    /// A minor part of the service is down.
    DegradedMinor,
    /// Sound the alarms and wake people up; must be handled immediately.
    CriticalWakePeopleUp,
    /// Soft-deprecated alias of [`Axis::Inconsistency`]. Declaring either of
    /// the pair also declares the other.
    InternalInconsistency,
    /// A consistency check over the service's data has failed.
    Inconsistency,
    /// The root cause is an external service misbehaving, not this one.
    External,
    /// The issue directly affects customer experience.
    AffectsCustomers,
    /// A business-process error (bad data, missing payment), not a system bug.
    ProcessError,
    /// The service is not ready for traffic; used by startup and readiness
    /// probes. Should normally only trigger during startup.
    NotReady,
    /// The service is in an unrecoverable state and asks to be restarted.
    /// Used by liveness probes; use with extreme care.
    RequiresReboot,
    /// The check crashed with an unhandled failure. Engine-set only.
    SysCrashed,
    /// The check took longer than its expected maximum runtime. Engine-set only.
    SysSlow,
    /// The cached result is older than its stale deadline. Engine-set only.
    SysStale,
}

impl Axis {
    /// The axes reserved for the engine. Declaring one of these in a check
    /// specification is rejected as invalid.
    pub const SYSTEM_AXES: [Axis; 3] = [Axis::SysCrashed, Axis::SysSlow, Axis::SysStale];

    /// True for the `Sys*` axes that only the engine may set.
    pub fn is_system(self) -> bool {
        matches!(self, Axis::SysCrashed | Axis::SysSlow | Axis::SysStale)
    }

    /// Axes that are forced active whenever this axis is activated.
    ///
    /// The degraded axes form a lattice: a complete degradation implies a
    /// partial one, which implies a minor one.
    pub fn activation_implies(self) -> &'static [Axis] {
        match self {
            Axis::DegradedComplete => &[Axis::DegradedPartial, Axis::DegradedMinor],
            Axis::DegradedPartial => &[Axis::DegradedMinor],
            _ => &[],
        }
    }
}

/// Close a set of declared axes over the declaration rules.
///
/// Declaring [`Axis::Inconsistency`] or [`Axis::InternalInconsistency`] also
/// declares the other (the pair is a back-compat alias), and declaring a
/// degraded axis declares every lower degraded level as well.
pub fn expand_declared_axes(axes: impl IntoIterator<Item = Axis>) -> BTreeSet<Axis> {
    let mut expanded: BTreeSet<Axis> = axes.into_iter().collect();
    if expanded.contains(&Axis::Inconsistency) || expanded.contains(&Axis::InternalInconsistency) {
        expanded.insert(Axis::Inconsistency);
        expanded.insert(Axis::InternalInconsistency);
    }
    if expanded.contains(&Axis::DegradedComplete) {
        expanded.insert(Axis::DegradedPartial);
    }
    if expanded.contains(&Axis::DegradedPartial) {
        expanded.insert(Axis::DegradedMinor);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_wire_names() {
        let json = serde_json::to_string(&Axis::NotReady).unwrap();
        assert_eq!(json, "\"NOT_READY\"");
        let json = serde_json::to_string(&Axis::CriticalWakePeopleUp).unwrap();
        assert_eq!(json, "\"CRITICAL_WAKE_PEOPLE_UP\"");
        let json = serde_json::to_string(&Axis::SysCrashed).unwrap();
        assert_eq!(json, "\"SYS_CRASHED\"");

        let parsed: Axis = serde_json::from_str("\"INTERNAL_INCONSISTENCY\"").unwrap();
        assert_eq!(parsed, Axis::InternalInconsistency);
    }

    #[test]
    fn test_system_axes() {
        assert!(Axis::SysCrashed.is_system());
        assert!(Axis::SysSlow.is_system());
        assert!(Axis::SysStale.is_system());
        assert!(!Axis::NotReady.is_system());
        assert!(!Axis::DegradedComplete.is_system());
    }

    #[test]
    fn test_inconsistency_declares_sibling() {
        let expanded = expand_declared_axes([Axis::Inconsistency]);
        assert!(expanded.contains(&Axis::InternalInconsistency));

        let expanded = expand_declared_axes([Axis::InternalInconsistency]);
        assert!(expanded.contains(&Axis::Inconsistency));
    }

    #[test]
    fn test_degraded_declaration_lattice() {
        let expanded = expand_declared_axes([Axis::DegradedComplete]);
        assert!(expanded.contains(&Axis::DegradedPartial));
        assert!(expanded.contains(&Axis::DegradedMinor));

        let expanded = expand_declared_axes([Axis::DegradedPartial]);
        assert!(expanded.contains(&Axis::DegradedMinor));
        assert!(!expanded.contains(&Axis::DegradedComplete));
    }

    #[test]
    fn test_degraded_activation_cascade() {
        assert_eq!(
            Axis::DegradedComplete.activation_implies(),
            &[Axis::DegradedPartial, Axis::DegradedMinor]
        );
        assert_eq!(Axis::DegradedPartial.activation_implies(), &[Axis::DegradedMinor]);
        assert!(Axis::NotReady.activation_implies().is_empty());
    }
}
