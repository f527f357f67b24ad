//! A registered health check: committed specification plus execution

use crate::clock::Clock;
use crate::metadata::CheckMetadata;
use crate::result::CheckResult;
use crate::spec::{CheckSpecification, CommittedSteps, SharedContext};
use crate::status::{FailureInfo, StatusPart, StatusWithAxes};
use crate::Result;
use schema::{Axis, Responsible};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::info;

/// A check instance holds the committed specification for one registered
/// check and executes it on demand. The specification can be swapped out
/// atomically through [`CheckInstance::respecify`] while the check is live.
pub struct CheckInstance {
    metadata: Arc<CheckMetadata>,
    clock: Arc<dyn Clock>,
    committed: RwLock<Arc<CommittedSteps>>,
}

impl std::fmt::Debug for CheckInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckInstance")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl CheckInstance {
    /// Build the specification once via `build`, commit it, and wrap it in a
    /// new instance. Fails when the specification does not validate.
    pub(crate) fn create(
        metadata: Arc<CheckMetadata>,
        clock: Arc<dyn Clock>,
        build: impl FnOnce(&mut CheckSpecification),
    ) -> Result<Self> {
        let committed = build_committed(&metadata.name, build)?;
        Ok(Self {
            metadata,
            clock,
            committed: RwLock::new(committed),
        })
    }

    /// The metadata of this check.
    pub fn metadata(&self) -> &Arc<CheckMetadata> {
        &self.metadata
    }

    /// The name of this check.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The union of axes declared by the committed specification.
    pub fn axes(&self) -> BTreeSet<Axis> {
        self.committed_steps().axes.clone()
    }

    /// Convenience check for whether this check declares a specific axis.
    pub fn has_axis(&self, axis: Axis) -> bool {
        self.committed_steps().axes.contains(&axis)
    }

    /// Replace the committed steps with a freshly built specification.
    /// The swap is atomic: runs already in flight finish on the old steps,
    /// later runs see the new ones.
    pub(crate) fn respecify(&self, build: impl FnOnce(&mut CheckSpecification)) -> Result<()> {
        let committed = build_committed(&self.metadata.name, build)?;
        let mut slot = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        *slot = committed;
        Ok(())
    }

    fn committed_steps(&self) -> Arc<CommittedSteps> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run every step of the committed specification in order and assemble a
    /// [`CheckResult`].
    ///
    /// Never returns an error and never panics outward: a failure escaping a
    /// step is captured as an unhandled-failure part, followed by a synthetic
    /// part activating every declared axis, because the check can no longer
    /// attest to its own state.
    pub(crate) fn execute(&self) -> CheckResult {
        let run_timer = Instant::now();
        let started = self.clock.now();
        let committed = self.committed_steps();

        let mut shared = SharedContext::default();
        let mut parts: Vec<StatusPart> = Vec::new();
        let mut structured_data: Option<String> = None;

        for step in &committed.steps {
            match catch_unwind(AssertUnwindSafe(|| step.run(&mut shared))) {
                Ok(output) => {
                    parts.extend(output.parts);
                    if output.structured_data.is_some() {
                        structured_data = output.structured_data;
                    }
                }
                Err(payload) => {
                    let failure = FailureInfo::from_panic(payload.as_ref());
                    parts.push(StatusPart::with_unhandled_failure(
                        "Unhandled failure caught during execution of health check",
                        failure,
                    ));
                    let mut assume_worst = StatusWithAxes::new(
                        vec![Responsible::Developers],
                        "As we are unable to determine the actual outcome of this check we must\n\
                         assume the worst case scenario, and trigger all specified axes",
                        committed.axes.iter().copied(),
                    );
                    assume_worst.set_all_axes(true);
                    parts.push(StatusPart::WithAxes(assume_worst));
                    break;
                }
            }
        }

        CheckResult::new(
            Arc::clone(&self.metadata),
            parts,
            structured_data,
            run_timer.elapsed(),
            started,
            self.clock.now(),
        )
    }
}

fn build_committed(
    name: &str,
    build: impl FnOnce(&mut CheckSpecification),
) -> Result<Arc<CommittedSteps>> {
    let mut spec = CheckSpecification::new();
    build(&mut spec);
    spec.commit()?;
    let committed = spec.take_committed().unwrap_or_else(|| {
        // commit() always leaves a committed sequence behind on success
        Arc::new(CommittedSteps { steps: Vec::new(), axes: BTreeSet::new() })
    });
    info!(
        "Committed specification for HealthCheck[{}] with axes: {:?}",
        name, committed.axes
    );
    Ok(committed)
}
