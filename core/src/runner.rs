//! Per-check scheduler: background worker, result cache, change detection
//!
//! Every registered check gets one [`CheckRunner`] owning one long-lived
//! worker task. Each iteration executes the check, swaps the cached result,
//! publishes to the registry's observer queue when the status structurally
//! changed, resolves pending refresh requests, and sleeps until the next
//! interval or an explicit wake-up. Synchronous checks bypass the cache on
//! queries but keep their background worker, so state changes are detected
//! even when no one asks.

use crate::clock::Clock;
use crate::error::RefreshError;
use crate::instance::CheckInstance;
use crate::logging::CheckLogger;
use crate::metadata::{
    CheckMetadata, DEFAULT_INTERVAL_IN_SECONDS, DEFAULT_INTERVAL_WHEN_NOT_OK_IN_SECONDS,
};
use crate::registry::RegisteredHealthCheck;
use crate::report::check_result_to_dto;
use crate::result::CheckResult;
use crate::status::{FailureInfo, StatusPart, StatusWithAxes};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use schema::{Axis, HealthCheckDto, Responsible};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

type RefreshResult = std::result::Result<Arc<CheckResult>, RefreshError>;
type RefreshSender = oneshot::Sender<RefreshResult>;

/// Receiver side of a one-shot refresh request. Resolves with the next
/// result the runner produces; dropped without a value when the runner is
/// stopped first. Abandoning it does not affect the runner.
pub type RefreshReceiver = oneshot::Receiver<RefreshResult>;

struct RunnerState {
    should_run: bool,
    is_running: bool,
    update_requested: bool,
    /// Bumped on every start/stop so stale workers notice they were replaced.
    epoch: u64,
    waiting_for_fresh_data: Vec<RefreshSender>,
}

struct RunnerShared {
    metadata: Arc<CheckMetadata>,
    instance: Arc<CheckInstance>,
    logger: Arc<dyn CheckLogger>,
    clock: Arc<dyn Clock>,
    /// When the surrounding service started; used to judge how worried the
    /// slow-startup result should be.
    running_since: DateTime<Utc>,
    /// Queue towards the registry's observer publisher.
    publish_tx: mpsc::UnboundedSender<Arc<CheckResult>>,
    state: Mutex<RunnerState>,
    /// Wakes the worker out of its inter-iteration sleep.
    wakeup: Notify,
    /// Guarded separately so the transition from "no result" to the first
    /// result, and every replacement after it, serialises with change
    /// detection and observer publication.
    last_result: Mutex<Option<Arc<CheckResult>>>,
    first_result_tx: watch::Sender<bool>,
    first_result_rx: watch::Receiver<bool>,
    /// Serialises executions of this check so one run never overlaps another.
    exec_lock: tokio::sync::Mutex<()>,
}

impl RunnerShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_result(&self) -> Option<Arc<CheckResult>> {
        self.last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute the check once, cache the result, release the first-result
    /// latch, and log not-ok results. Serialised by the execution lock.
    async fn perform_check(&self) -> std::result::Result<Arc<CheckResult>, String> {
        let _exec_guard = self.exec_lock.lock().await;
        let instance = Arc::clone(&self.instance);
        let result = tokio::task::spawn_blocking(move || instance.execute())
            .await
            .map_err(|join_error| format!("health check execution task failed: {}", join_error))?;
        let result = Arc::new(result);

        self.update_last_result(&result);
        let _ = self.first_result_tx.send(true);

        if !result.is_ok() {
            let dto = check_result_to_dto(&result, self.clock.now());
            let logger = Arc::clone(&self.logger);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                logger.log_health_check_result(&dto);
            })) {
                let failure = FailureInfo::from_panic(payload.as_ref());
                error!(
                    "Health check logger failed for HealthCheck[{}]: {}",
                    self.metadata.name, failure.message
                );
            }
        }

        Ok(result)
    }

    /// Swap in the new result and publish it when the status structurally
    /// changed. The publish happens while holding the result lock, so the
    /// order of published updates matches the order of state transitions.
    fn update_last_result(&self, new_result: &Arc<CheckResult>) {
        let mut last = self.last_result.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = !new_result.is_equal_status(last.as_deref());
        *last = Some(Arc::clone(new_result));
        if changed && self.publish_tx.send(Arc::clone(new_result)).is_err() {
            debug!(
                "Observer publisher is gone - dropping update for HealthCheck[{}]",
                self.metadata.name
            );
        }
    }

    fn drain_waiters(&self) -> Vec<RefreshSender> {
        std::mem::take(&mut self.lock_state().waiting_for_fresh_data)
    }

    async fn wait_for_next_run(&self, sleep_time: Duration) {
        let woken = self.wakeup.notified();
        tokio::select! {
            _ = sleep(sleep_time) => {}
            _ = woken => {
                debug!("HealthCheck[{}] worker woken up early", self.metadata.name);
            }
        }
    }

    /// The result reported when an async check has produced nothing yet and
    /// the wait for its first result ran out.
    fn slow_startup_result(&self) -> CheckResult {
        let axes = self.instance.axes();
        let mut parts =
            vec![StatusPart::info("This health check has not created any reports since startup.")];

        if axes.contains(&Axis::NotReady) {
            let mut not_ready = StatusWithAxes::new(
                vec![Responsible::Developers],
                "As this health check affects readiness we mark it as NOT READY.",
                axes.iter().copied(),
            );
            not_ready.set_axis(Axis::NotReady, true);
            parts.push(StatusPart::WithAxes(not_ready));
        }

        let now = self.clock.now();
        let uptime = now - self.running_since;
        // The time between updates should at most be interval plus maximum
        // runtime. Nothing for twice that since startup means the async
        // worker may have died, and we assume the worst.
        let warn_after_seconds = (i64::from(self.metadata.interval_in_seconds)
            + i64::from(self.metadata.expected_maximum_run_time_in_seconds))
            * 2;
        if uptime > ChronoDuration::seconds(warn_after_seconds) {
            let mut assume_worst = StatusWithAxes::new(
                vec![Responsible::Developers],
                "We have not received any health status since startup, and assume worst case \
                 scenario. Has the async health check died?",
                axes.iter().copied(),
            );
            assume_worst.set_all_axes(true);
            parts.push(StatusPart::WithAxes(assume_worst));
        }

        CheckResult::new(
            Arc::clone(&self.metadata),
            parts,
            None,
            uptime.to_std().unwrap_or_default(),
            self.running_since,
            now,
        )
    }
}

/// Owns one check's scheduler, cache and change detection for the runner's
/// lifetime. Created and held by the registry.
pub struct CheckRunner {
    shared: Arc<RunnerShared>,
}

impl CheckRunner {
    pub(crate) fn new(
        instance: Arc<CheckInstance>,
        logger: Arc<dyn CheckLogger>,
        clock: Arc<dyn Clock>,
        running_since: DateTime<Utc>,
        publish_tx: mpsc::UnboundedSender<Arc<CheckResult>>,
    ) -> Self {
        let (first_result_tx, first_result_rx) = watch::channel(false);
        Self {
            shared: Arc::new(RunnerShared {
                metadata: Arc::clone(instance.metadata()),
                instance,
                logger,
                clock,
                running_since,
                publish_tx,
                state: Mutex::new(RunnerState {
                    should_run: false,
                    is_running: false,
                    update_requested: false,
                    epoch: 0,
                    waiting_for_fresh_data: Vec::new(),
                }),
                wakeup: Notify::new(),
                last_result: Mutex::new(None),
                first_result_tx,
                first_result_rx,
                exec_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub(crate) fn instance(&self) -> &Arc<CheckInstance> {
        &self.shared.instance
    }

    /// Start the background worker that runs this check at its interval.
    /// A no-op when the worker is already running.
    pub fn start(&self) {
        let epoch = {
            let mut state = self.shared.lock_state();
            if state.is_running {
                debug!(
                    "Worker for HealthCheck[{}] already running - leaving it as is",
                    self.shared.metadata.name
                );
                return;
            }
            state.should_run = true;
            state.is_running = true;
            state.epoch += 1;
            state.epoch
        };
        info!(" - Starting worker for HealthCheck[{}]", self.shared.metadata.name);
        tokio::spawn(run_worker(Arc::clone(&self.shared), epoch));
    }

    /// Stop the background worker if it is running. The worker finishes any
    /// in-flight execution, then exits and cancels pending refreshes.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            if !state.is_running {
                return;
            }
            info!(" - Stopping worker for HealthCheck[{}]", self.shared.metadata.name);
            state.should_run = false;
            state.is_running = false;
            state.epoch += 1;
            // refresh requests enqueued before the stop will never complete
            state.waiting_for_fresh_data.clear();
        }
        self.shared.wakeup.notify_one();
    }

    /// Request that the check runs at least once more, without waiting for
    /// the result. A no-op while the runner is stopping.
    pub fn request_update(&self) {
        {
            let mut state = self.shared.lock_state();
            if !state.should_run {
                return;
            }
            state.update_requested = true;
        }
        self.shared.wakeup.notify_one();
    }

    /// Request a fresh run and get a one-shot receiver for its result.
    /// When the runner is stopping the receiver resolves immediately with a
    /// cancellation.
    pub fn refresh_status(&self) -> RefreshReceiver {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.shared.lock_state();
            if !state.should_run {
                // dropping the sender cancels the receiver
                return receiver;
            }
            state.waiting_for_fresh_data.push(sender);
        }
        self.shared.wakeup.notify_one();
        receiver
    }

    /// Request a fresh run and wait up to `timeout_in_ms` for its result.
    pub async fn update_status_and_wait(&self, timeout_in_ms: u64) -> RefreshResult {
        match timeout(Duration::from_millis(timeout_in_ms), self.refresh_status()).await {
            Err(_elapsed) => Err(RefreshError::Timeout),
            Ok(Err(_cancelled)) => {
                info!(
                    "Refresh of HealthCheck[{}] was cancelled - assuming shutdown",
                    self.shared.metadata.name
                );
                Err(RefreshError::Interrupted)
            }
            Ok(Ok(outcome)) => outcome,
        }
    }

    /// Get the status of this check.
    ///
    /// Synchronous checks and forced-fresh queries execute the check on the
    /// calling task. Otherwise the latest cached result is returned; when no
    /// result exists yet the caller waits briefly on the first-result latch
    /// and falls back to a synthetic slow-startup result.
    pub async fn get_status(&self, force_fresh_data: bool) -> Arc<CheckResult> {
        if self.shared.metadata.sync || force_fresh_data {
            if self.shared.metadata.sync {
                debug!("Performing check directly because this check is synchronous");
            } else {
                debug!("Performing check directly because fresh data was forced");
            }
            match self.shared.perform_check().await {
                Ok(result) => return result,
                Err(message) => error!(
                    "Direct execution of HealthCheck[{}] failed: {}",
                    self.shared.metadata.name, message
                ),
            }
        }

        if let Some(result) = self.shared.cached_result() {
            return result;
        }

        // Wait expected maximum runtime plus a little slack for the first result.
        let first_result_wait = Duration::from_secs(
            u64::from(self.shared.metadata.expected_maximum_run_time_in_seconds) + 2,
        );
        let mut latch = self.shared.first_result_rx.clone();
        if timeout(first_result_wait, latch.wait_for(|released| *released))
            .await
            .is_err()
        {
            warn!(
                "Timed out waiting for the first result of HealthCheck[{}]",
                self.shared.metadata.name
            );
        }

        match self.shared.cached_result() {
            Some(result) => result,
            None => Arc::new(self.shared.slow_startup_result()),
        }
    }
}

impl RegisteredHealthCheck for CheckRunner {
    fn metadata(&self) -> Arc<CheckMetadata> {
        Arc::clone(&self.shared.metadata)
    }

    fn axes(&self) -> BTreeSet<Axis> {
        self.shared.instance.axes()
    }

    fn is_running(&self) -> bool {
        self.shared.lock_state().is_running
    }

    fn latest_status(&self) -> Option<HealthCheckDto> {
        self.shared
            .cached_result()
            .map(|result| check_result_to_dto(&result, self.shared.clock.now()))
    }
}

/// The worker loop. Exits when stopped or replaced by a newer epoch; must
/// never die for any other reason, so every iteration failure is caught,
/// reported to pending refreshers, and followed by a not-ok sleep.
async fn run_worker(shared: Arc<RunnerShared>, epoch: u64) {
    let sleep_when_ok_seconds = if shared.metadata.interval_in_seconds > 0 {
        shared.metadata.interval_in_seconds
    } else {
        DEFAULT_INTERVAL_IN_SECONDS
    };
    let sleep_when_not_ok_seconds = if shared.metadata.interval_when_not_ok_in_seconds > 0 {
        shared.metadata.interval_when_not_ok_in_seconds
    } else {
        DEFAULT_INTERVAL_WHEN_NOT_OK_IN_SECONDS
    };
    // the interval must not grow when we are not ok
    let sleep_when_ok = Duration::from_secs(u64::from(sleep_when_ok_seconds));
    let sleep_when_not_ok =
        Duration::from_secs(u64::from(sleep_when_not_ok_seconds.min(sleep_when_ok_seconds)));

    loop {
        {
            let mut state = shared.lock_state();
            if !state.should_run || state.epoch != epoch {
                break;
            }
            // updates requested before now are covered by the run we are
            // about to perform
            state.update_requested = false;
        }

        match shared.perform_check().await {
            Ok(result) => {
                for waiter in shared.drain_waiters() {
                    let _ = waiter.send(Ok(Arc::clone(&result)));
                }

                let sleep_time = if result.is_ok() { sleep_when_ok } else { sleep_when_not_ok };
                let skip_sleep = {
                    let state = shared.lock_state();
                    state.update_requested || !state.should_run || state.epoch != epoch
                };
                if !skip_sleep {
                    shared.wait_for_next_run(sleep_time).await;
                }
            }
            Err(message) => {
                error!(
                    "Unhandled failure in worker for HealthCheck[{}]: {}",
                    shared.metadata.name, message
                );
                for waiter in shared.drain_waiters() {
                    let _ = waiter.send(Err(RefreshError::ExecutionFailure(message.clone())));
                }
                shared.wait_for_next_run(sleep_when_not_ok).await;
            }
        }
    }

    info!(
        "HealthCheck[{}] background worker shutdown complete",
        shared.metadata.name
    );
    let mut state = shared.lock_state();
    // cancel refresh requests that arrived while we were exiting
    state.waiting_for_fresh_data.clear();
    if state.epoch == epoch {
        state.is_running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::logging::NullCheckLogger;
    use crate::spec::CheckSpecification;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn runner_for(
        metadata: CheckMetadata,
        clock: Arc<dyn Clock>,
        build: impl FnOnce(&mut CheckSpecification),
    ) -> (CheckRunner, mpsc::UnboundedReceiver<Arc<CheckResult>>) {
        let running_since = clock.now();
        let instance =
            Arc::new(CheckInstance::create(Arc::new(metadata), Arc::clone(&clock), build).unwrap());
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let runner = CheckRunner::new(
            instance,
            Arc::new(NullCheckLogger),
            clock,
            running_since,
            publish_tx,
        );
        (runner, publish_rx)
    }

    #[tokio::test]
    async fn test_sync_check_executes_on_caller() {
        let metadata = CheckMetadata::new_synchronous("in-memory");
        let (runner, _publish_rx) = runner_for(metadata, Arc::new(SystemClock), |spec| {
            spec.check([Responsible::Developers], [Axis::DegradedMinor], |context| {
                context.ok("all in memory")
            });
        });

        // no worker started: sync queries still produce fresh results
        let result = runner.get_status(false).await;
        assert!(result.is_ok());
        assert_eq!(result.name(), "in-memory");
    }

    #[tokio::test]
    async fn test_sync_check_with_panicking_body_reports_crash() {
        let metadata = CheckMetadata::new_synchronous("crashing");
        let (runner, _publish_rx) = runner_for(metadata, Arc::new(SystemClock), |spec| {
            spec.check(
                [Responsible::Developers],
                [Axis::NotReady, Axis::RequiresReboot],
                |_context| panic!("boom"),
            );
        });

        let result = runner.get_status(false).await;
        assert!(result.is_crashed());
        let aggregated = result.aggregated_axes();
        assert_eq!(aggregated.get(&Axis::SysCrashed), Some(&true));
        assert_eq!(aggregated.get(&Axis::NotReady), Some(&true));
        assert_eq!(aggregated.get(&Axis::RequiresReboot), Some(&true));
    }

    #[tokio::test]
    async fn test_update_status_and_wait_returns_fresh_result() {
        let metadata = CheckMetadata::new("background");
        let flag = Arc::new(AtomicBool::new(false));
        let flag_for_check = Arc::clone(&flag);
        let (runner, _publish_rx) = runner_for(metadata, Arc::new(SystemClock), move |spec| {
            spec.check([Responsible::Developers], [Axis::DegradedMinor], move |context| {
                context.fault_conditionally(flag_for_check.load(Ordering::SeqCst), "flag is up")
            });
        });
        runner.start();

        let first = runner.update_status_and_wait(5_000).await.unwrap();
        assert!(first.is_ok());

        // a refresh issued while a run is in flight may resolve with that
        // run's result, so retry until a run has observed the flip
        flag.store(true, Ordering::SeqCst);
        let mut faulty_seen = false;
        for _ in 0..50 {
            let fresh = runner.update_status_and_wait(5_000).await.unwrap();
            if !fresh.is_ok() {
                faulty_seen = true;
                break;
            }
        }
        assert!(faulty_seen);

        runner.stop();
    }

    #[tokio::test]
    async fn test_refresh_after_stop_is_interrupted() {
        let metadata = CheckMetadata::new("stopped");
        let (runner, _publish_rx) = runner_for(metadata, Arc::new(SystemClock), |spec| {
            spec.check([Responsible::Developers], [Axis::DegradedMinor], |context| {
                context.ok("fine")
            });
        });
        runner.start();
        runner.update_status_and_wait(5_000).await.unwrap();
        runner.stop();

        let outcome = runner.update_status_and_wait(1_000).await;
        assert!(matches!(outcome, Err(RefreshError::Interrupted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_startup_result_marks_not_ready() {
        let metadata = CheckMetadata::builder("slow-starter")
            .interval_in_seconds(600)
            .expected_maximum_run_time_in_seconds(4)
            .build();
        let clock = Arc::new(ManualClock::starting_now());
        let (runner, _publish_rx) =
            runner_for(metadata, clock as Arc<dyn Clock>, |spec| {
                spec.check([Responsible::Developers], [Axis::NotReady], |context| {
                    context.ok("ready")
                });
            });

        // worker never started: the latch wait times out and we get the
        // synthetic startup result
        let result = runner.get_status(false).await;
        assert!(!result.is_crashed());
        let aggregated = result.aggregated_axes();
        assert_eq!(aggregated.get(&Axis::NotReady), Some(&true));
        assert!(result
            .parts()
            .iter()
            .any(|part| part.description().contains("has not created any reports")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_startup_result_assumes_worst_after_long_uptime() {
        let metadata = CheckMetadata::builder("slow-starter")
            .interval_in_seconds(10)
            .expected_maximum_run_time_in_seconds(1)
            .build();
        let clock = Arc::new(ManualClock::starting_now());
        let (runner, _publish_rx) = runner_for(
            metadata,
            Arc::clone(&clock) as Arc<dyn Clock>,
            |spec| {
                spec.check(
                    [Responsible::Developers],
                    [Axis::NotReady, Axis::CriticalWakePeopleUp],
                    |context| context.ok("ready"),
                );
            },
        );

        // well past twice (interval + expected runtime) since startup
        clock.advance_seconds(60);
        let result = runner.get_status(false).await;
        let aggregated = result.aggregated_axes();
        assert_eq!(aggregated.get(&Axis::NotReady), Some(&true));
        assert_eq!(aggregated.get(&Axis::CriticalWakePeopleUp), Some(&true));
    }

    #[tokio::test]
    async fn test_publishes_only_structural_changes_in_order() {
        let metadata = CheckMetadata::new("flapper");
        let flag = Arc::new(AtomicBool::new(false));
        let flag_for_check = Arc::clone(&flag);
        let (runner, mut publish_rx) = runner_for(metadata, Arc::new(SystemClock), move |spec| {
            spec.check([Responsible::Developers], [Axis::DegradedMinor], move |context| {
                context.fault_conditionally(
                    flag_for_check.load(Ordering::SeqCst),
                    "description stays stable",
                )
            });
        });
        runner.start();

        // first result publishes the nil -> ok transition
        runner.update_status_and_wait(5_000).await.unwrap();
        // a second identical run publishes nothing
        runner.update_status_and_wait(5_000).await.unwrap();
        // flipping the flag publishes the ok -> faulty transition; retry in
        // case a refresh resolves with a run that started before the flip
        flag.store(true, Ordering::SeqCst);
        let mut faulty_seen = false;
        for _ in 0..50 {
            if !runner.update_status_and_wait(5_000).await.unwrap().is_ok() {
                faulty_seen = true;
                break;
            }
        }
        assert!(faulty_seen);
        runner.stop();

        let first = publish_rx.try_recv().expect("expected the initial publication");
        assert!(first.is_ok());
        let second = publish_rx.try_recv().expect("expected the change publication");
        assert!(!second.is_ok());
        assert!(publish_rx.try_recv().is_err(), "structurally equal results must not publish");
    }

    #[tokio::test]
    async fn test_request_update_runs_again() {
        let metadata = CheckMetadata::new("counter");
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter_for_check = Arc::clone(&counter);
        let (runner, _publish_rx) = runner_for(metadata, Arc::new(SystemClock), move |spec| {
            spec.check([Responsible::Developers], [Axis::DegradedMinor], move |context| {
                counter_for_check.fetch_add(1, Ordering::SeqCst);
                context.ok("counted")
            });
        });
        runner.start();
        runner.update_status_and_wait(5_000).await.unwrap();
        let runs_before = counter.load(Ordering::SeqCst);

        runner.request_update();
        // the update is guaranteed to trigger at least one more run
        let mut runs_after = counter.load(Ordering::SeqCst);
        for _ in 0..200 {
            if runs_after > runs_before {
                break;
            }
            sleep(Duration::from_millis(10)).await;
            runs_after = counter.load(Ordering::SeqCst);
        }
        assert!(runs_after > runs_before);
        runner.stop();
    }
}
