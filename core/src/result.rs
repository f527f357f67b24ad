//! The result of one execution of a health check

use crate::metadata::CheckMetadata;
use crate::status::{aggregate_axes, StatusPart, StatusWithAxes, StatusWithFailure};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use schema::{Axis, Responsible};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The immutable outcome of one run of a check: the ordered status parts,
/// optional structured data, timing, and the derived `ok` / `slow` /
/// `crashed` flags.
#[derive(Debug)]
pub struct CheckResult {
    metadata: Arc<CheckMetadata>,
    parts: Vec<StatusPart>,
    structured_data: Option<String>,
    running_time: Duration,
    check_started: DateTime<Utc>,
    check_completed: DateTime<Utc>,
    ok: bool,
    slow: bool,
    crashed: bool,
}

impl CheckResult {
    /// Assemble a result from the parts an execution produced.
    ///
    /// Derivations happen here: a run exceeding the expected maximum runtime
    /// gets a synthetic part activating [`Axis::SysSlow`] appended; the
    /// crashed flag is set when any part carries an unhandled failure; and
    /// the result is ok only when every part is ok and it is neither slow
    /// nor crashed.
    pub(crate) fn new(
        metadata: Arc<CheckMetadata>,
        mut parts: Vec<StatusPart>,
        structured_data: Option<String>,
        running_time: Duration,
        check_started: DateTime<Utc>,
        check_completed: DateTime<Utc>,
    ) -> Self {
        let expected_maximum = metadata.expected_maximum_run_time_in_seconds;
        let slow = running_time.as_nanos() > u128::from(expected_maximum) * 1_000_000_000;
        let crashed = parts.iter().any(|part| match part {
            StatusPart::WithFailure(status) => status.is_unhandled(),
            _ => false,
        });
        let ok = parts.iter().all(StatusPart::is_ok) && !slow && !crashed;

        if slow {
            parts.push(StatusPart::WithAxes(StatusWithAxes::with_one_active_axis(
                Responsible::Developers,
                format!(
                    "Health check took more than the expected maximum of {} seconds!",
                    expected_maximum
                ),
                Axis::SysSlow,
            )));
        }

        Self {
            metadata,
            parts,
            structured_data,
            running_time,
            check_started,
            check_completed,
            ok,
            slow,
            crashed,
        }
    }

    /// The metadata of the check that produced this result.
    pub fn metadata(&self) -> &Arc<CheckMetadata> {
        &self.metadata
    }

    /// The name of the check that produced this result.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The ordered status parts of this result.
    pub fn parts(&self) -> &[StatusPart] {
        &self.parts
    }

    /// The structured data produced by the run, if any.
    pub fn structured_data(&self) -> Option<&str> {
        self.structured_data.as_deref()
    }

    /// How long the run took.
    pub fn running_time(&self) -> Duration {
        self.running_time
    }

    /// When the run started.
    pub fn check_started(&self) -> DateTime<Utc> {
        self.check_started
    }

    /// When the run completed.
    pub fn check_completed(&self) -> DateTime<Utc> {
        self.check_completed
    }

    /// True when every part is ok and the run was neither slow nor crashed.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// True when the run exceeded the expected maximum runtime.
    pub fn is_slow(&self) -> bool {
        self.slow
    }

    /// True when the run ended with an unhandled failure.
    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    /// The instant after which this result is considered stale: three times
    /// the check interval plus its expected maximum runtime, past completion.
    /// Staleness itself is judged at report time, never stored here.
    pub fn stale_after(&self) -> DateTime<Utc> {
        let max_expected_seconds = i64::from(self.metadata.interval_in_seconds)
            + i64::from(self.metadata.expected_maximum_run_time_in_seconds);
        self.check_completed + ChronoDuration::seconds(max_expected_seconds * 3)
    }

    /// The union of the axis maps of all parts: an axis is activated when
    /// any part activates it.
    pub fn aggregated_axes(&self) -> BTreeMap<Axis, bool> {
        aggregate_axes(&self.parts)
    }

    fn parts_with_axes(&self) -> impl Iterator<Item = &StatusWithAxes> {
        self.parts.iter().filter_map(|part| match part {
            StatusPart::WithAxes(status) => Some(status),
            _ => None,
        })
    }

    fn parts_with_failures(&self) -> impl Iterator<Item = &StatusWithFailure> {
        self.parts.iter().filter_map(|part| match part {
            StatusPart::WithFailure(status) => Some(status),
            _ => None,
        })
    }

    /// Structural equality between two results, used to decide whether
    /// observers should be notified. A result never equals an absent one.
    ///
    /// The aggregated axis maps must match, the checked parts must match
    /// pairwise in order under [`StatusWithAxes::is_equal_status`], and the
    /// failure parts must match pairwise under
    /// [`StatusWithFailure::is_equal_status`].
    pub fn is_equal_status(&self, other: Option<&CheckResult>) -> bool {
        let Some(other) = other else {
            return false;
        };

        if self.aggregated_axes() != other.aggregated_axes() {
            return false;
        }

        let mine: Vec<&StatusWithAxes> = self.parts_with_axes().collect();
        let theirs: Vec<&StatusWithAxes> = other.parts_with_axes().collect();
        if mine.len() != theirs.len() {
            return false;
        }
        if !mine.iter().zip(&theirs).all(|(a, b)| a.is_equal_status(b)) {
            return false;
        }

        let my_failures: Vec<&StatusWithFailure> = self.parts_with_failures().collect();
        let their_failures: Vec<&StatusWithFailure> = other.parts_with_failures().collect();
        if my_failures.len() != their_failures.len() {
            return false;
        }
        my_failures
            .iter()
            .zip(&their_failures)
            .all(|(a, b)| a.is_equal_status(b))
    }
}
