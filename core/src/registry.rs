//! The health-check registry: registration, lifecycle, reports and probes
//!
//! The registry owns one [`CheckRunner`] per registered check, assembles
//! aggregated reports on request, and fans status changes out to observers
//! from a dedicated publisher task, so slow or failing observers never touch
//! the check workers.
//!
//! ## Lifecycle
//!
//! A registry starts out initialising: registrations are accepted but
//! reports fail with [`HealthCheckError::NotRunning`]. After
//! [`HealthCheckRegistry::start_health_checks`] the runners are live and new
//! registrations start immediately. [`HealthCheckRegistry::stop_health_checks`]
//! halts the runners but keeps registrations, allowing a later restart;
//! [`HealthCheckRegistry::shutdown`] is final.

use crate::clock::Clock;
use crate::error::{HealthCheckError, Result};
use crate::instance::CheckInstance;
use crate::logging::CheckLogger;
use crate::metadata::CheckMetadata;
use crate::report::{build_report_dto, check_result_to_dto, CreateReportRequest};
use crate::result::CheckResult;
use crate::runner::CheckRunner;
use crate::service_info::ServiceInfo;
use crate::spec::CheckSpecification;
use crate::status::FailureInfo;
use schema::{Axis, HealthCheckDto, HealthCheckReportDto};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

/// How long shutdown waits for in-flight observer notifications before the
/// publish queue is abandoned.
const OBSERVER_SHUTDOWN_GRACE: Duration = Duration::from_millis(800);

/// Read-only view of a registered check, handed to report filters and
/// introspection callers.
pub trait RegisteredHealthCheck: Send + Sync {
    /// The metadata of the check.
    fn metadata(&self) -> Arc<CheckMetadata>;
    /// The axes declared by the check's committed specification.
    fn axes(&self) -> BTreeSet<Axis>;
    /// Whether the check's background worker is running.
    fn is_running(&self) -> bool;
    /// The latest cached status, or `None` before the first run.
    fn latest_status(&self) -> Option<HealthCheckDto>;
}

/// Receives status changes for registered checks. Notifications arrive on a
/// single publisher task: do not block or do heavy work in the callback, and
/// failures are caught and logged rather than propagated.
pub trait HealthCheckObserver: Send + Sync {
    /// Called when a check's status structurally changed.
    fn on_health_check_changed(&self, health_check: &HealthCheckDto);
}

struct ObserverHub {
    observers: RwLock<Vec<(u64, Arc<dyn HealthCheckObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverHub {
    fn add(&self, observer: Arc<dyn HealthCheckObserver>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        observers.push((id, observer));
        id
    }

    fn remove(&self, id: u64) {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|(observer_id, _)| *observer_id != id);
    }

    fn snapshot(&self) -> Vec<Arc<dyn HealthCheckObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

/// Handle returned from a subscription. Keep it to be able to unsubscribe;
/// dropping the handle leaves the subscription in place.
pub struct SubscriptionHandle {
    id: u64,
    hub: Arc<ObserverHub>,
}

impl SubscriptionHandle {
    /// Remove the observer this handle was returned for.
    pub fn unsubscribe(self) {
        self.hub.remove(self.id);
    }
}

/// The central registry managing all health checks of a service.
pub struct HealthCheckRegistry {
    clock: Arc<dyn Clock>,
    logger: Arc<dyn CheckLogger>,
    service_info: Arc<ServiceInfo>,
    runners: Mutex<BTreeMap<String, Arc<CheckRunner>>>,
    /// Binding keys recorded by [`HealthCheckRegistry::register_health_check_bound`].
    bindings: Mutex<BTreeSet<String>>,
    observers: Arc<ObserverHub>,
    publish_tx: mpsc::UnboundedSender<Arc<CheckResult>>,
    publisher: Mutex<Option<JoinHandle<()>>>,
    publisher_stop: Arc<Notify>,
    /// Checks that have reported ready at least once; the startup probe
    /// never queries them again.
    finished_startup_checks: Mutex<BTreeSet<String>>,
    health_checks_are_running: AtomicBool,
    is_shutdown: AtomicBool,
}

impl HealthCheckRegistry {
    /// Create a registry. Must be called within a tokio runtime, as the
    /// observer publisher task is spawned here.
    pub fn new(
        clock: Arc<dyn Clock>,
        logger: Arc<dyn CheckLogger>,
        service_info: ServiceInfo,
    ) -> Self {
        let observers = Arc::new(ObserverHub {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });
        let publisher_stop = Arc::new(Notify::new());
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let publisher = tokio::spawn(run_publisher(
            publish_rx,
            Arc::clone(&observers),
            Arc::clone(&clock),
            Arc::clone(&publisher_stop),
        ));

        Self {
            clock,
            logger,
            service_info: Arc::new(service_info),
            runners: Mutex::new(BTreeMap::new()),
            bindings: Mutex::new(BTreeSet::new()),
            observers,
            publish_tx,
            publisher: Mutex::new(Some(publisher)),
            publisher_stop,
            finished_startup_checks: Mutex::new(BTreeSet::new()),
            health_checks_are_running: AtomicBool::new(false),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// The service info this registry reports for.
    pub fn service_info(&self) -> &Arc<ServiceInfo> {
        &self.service_info
    }

    // ===== Registering health checks =====

    /// Register a health check: `build` is invoked once to lay out the
    /// specification, which is validated and committed. When the registry is
    /// already running the check's worker starts immediately.
    pub fn register_health_check(
        &self,
        metadata: CheckMetadata,
        build: impl FnOnce(&mut CheckSpecification),
    ) -> Result<()> {
        let metadata = Arc::new(metadata);
        let mut runners = self.lock_runners();
        if runners.contains_key(&metadata.name) {
            return Err(HealthCheckError::Duplicate(metadata.name.clone()));
        }

        let instance = Arc::new(CheckInstance::create(
            Arc::clone(&metadata),
            Arc::clone(&self.clock),
            build,
        )?);
        let runner = Arc::new(CheckRunner::new(
            instance,
            Arc::clone(&self.logger),
            Arc::clone(&self.clock),
            self.service_info.running_since(),
            self.publish_tx.clone(),
        ));
        runners.insert(metadata.name.clone(), Arc::clone(&runner));

        if self.is_running() {
            runner.start();
        }
        Ok(())
    }

    /// Registration variant that records a binding key, so integration
    /// layers that discover checks (and may encounter the same one twice)
    /// can de-duplicate with
    /// [`HealthCheckRegistry::is_binding_registered`].
    pub fn register_health_check_bound(
        &self,
        metadata: CheckMetadata,
        binding_key: impl Into<String>,
        build: impl FnOnce(&mut CheckSpecification),
    ) -> Result<()> {
        self.register_health_check(metadata, build)?;
        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        bindings.insert(binding_key.into());
        Ok(())
    }

    /// Whether a check was already registered under this binding key.
    pub fn is_binding_registered(&self, binding_key: &str) -> bool {
        let bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        bindings.contains(binding_key)
    }

    /// Rebuild the specification of a registered check and swap it in
    /// atomically. Runs already in flight finish on the old steps.
    pub fn respecify_health_check(
        &self,
        name: &str,
        build: impl FnOnce(&mut CheckSpecification),
    ) -> Result<()> {
        let runner = self
            .find_runner(name)
            .ok_or_else(|| HealthCheckError::NoSuchCheck(name.to_string()))?;
        runner.instance().respecify(build)
    }

    /// Register a supplier of additional service-info properties, delivered
    /// with every report.
    pub fn register_info_properties_supplier(
        &self,
        supplier: Arc<dyn crate::service_info::InfoPropertiesSupplier>,
    ) {
        self.service_info.add_properties_supplier(supplier);
    }

    /// Snapshot of all registered checks.
    pub fn get_registered_health_checks(&self) -> Vec<Arc<dyn RegisteredHealthCheck>> {
        self.lock_runners()
            .values()
            .map(|runner| Arc::clone(runner) as Arc<dyn RegisteredHealthCheck>)
            .collect()
    }

    // ===== Starting and stopping =====

    /// Start the background workers of all registered checks. Checks
    /// registered later start automatically.
    pub fn start_health_checks(&self) -> Result<()> {
        let runners = self.lock_runners();
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(HealthCheckError::AlreadyShutdown);
        }
        info!("Starting health check background workers");
        for runner in runners.values() {
            runner.start();
        }
        self.health_checks_are_running.store(true, Ordering::SeqCst);
        info!("Health checks initialized and ready for use");
        Ok(())
    }

    /// Whether health checks are currently running.
    pub fn is_running(&self) -> bool {
        self.health_checks_are_running.load(Ordering::SeqCst)
    }

    /// Stop all background workers. Registrations persist, and the registry
    /// can be started again unless it was shut down.
    pub fn stop_health_checks(&self) {
        let runners = self.lock_runners();
        info!("Stopping health check background workers");
        for runner in runners.values() {
            runner.stop();
        }
        self.health_checks_are_running.store(false, Ordering::SeqCst);
    }

    /// Shut the registry down for good: stop all workers and retire the
    /// observer publisher, granting in-flight notifications a short grace
    /// period. Restarting afterwards fails with
    /// [`HealthCheckError::AlreadyShutdown`].
    pub async fn shutdown(&self) {
        self.is_shutdown.store(true, Ordering::SeqCst);
        self.stop_health_checks();

        info!("Shutting down health check observer publisher");
        self.publisher_stop.notify_one();
        let publisher = {
            let mut slot = self.publisher.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take()
        };
        if let Some(mut publisher) = publisher {
            if timeout(OBSERVER_SHUTDOWN_GRACE, &mut publisher).await.is_err() {
                publisher.abort();
            }
        }
        info!("Done shutting down health check observer publisher");
    }

    // ===== Triggering updates and subscribing to changes =====

    /// Ask the named check to run again as soon as possible, e.g. after user
    /// action known to change its state. Guarantees at least one run after
    /// this call, unless the runner is stopped first.
    pub fn trigger_update_for_health_check(&self, name: &str) -> Result<()> {
        let runner = self
            .find_runner(name)
            .ok_or_else(|| HealthCheckError::NoSuchCheck(name.to_string()))?;
        runner.request_update();
        Ok(())
    }

    /// Ask the named check to run again and wait up to `timeout_in_ms` for
    /// the fresh result's DTO.
    pub async fn update_health_check_and_wait(
        &self,
        name: &str,
        timeout_in_ms: u64,
    ) -> Result<std::result::Result<HealthCheckDto, crate::error::RefreshError>> {
        let runner = self
            .find_runner(name)
            .ok_or_else(|| HealthCheckError::NoSuchCheck(name.to_string()))?;
        let outcome = runner.update_status_and_wait(timeout_in_ms).await;
        Ok(outcome.map(|result| check_result_to_dto(&result, self.clock.now())))
    }

    /// Subscribe to structural status changes. The returned handle can
    /// unsubscribe; dropping it keeps the subscription.
    pub fn subscribe_to_status_changes(
        &self,
        observer: Arc<dyn HealthCheckObserver>,
    ) -> SubscriptionHandle {
        let id = self.observers.add(observer);
        SubscriptionHandle { id, hub: Arc::clone(&self.observers) }
    }

    // ===== Reports and probes =====

    /// Generate a report as configured by the request.
    pub async fn create_report(&self, request: &CreateReportRequest) -> Result<HealthCheckReportDto> {
        if !self.is_running() {
            return Err(HealthCheckError::NotRunning);
        }

        let service = self.service_info.to_dto(self.clock.now());
        let runners: Vec<Arc<CheckRunner>> = self.lock_runners().values().cloned().collect();

        let mut health_checks = Vec::new();
        for runner in runners {
            let registered: &dyn RegisteredHealthCheck = runner.as_ref();
            if !request.should_include_check(registered) {
                continue;
            }
            let result = runner.get_status(request.should_force_fresh_data()).await;
            health_checks.push(check_result_to_dto(&result, self.clock.now()));
        }

        Ok(build_report_dto(service, health_checks, request.should_force_fresh_data()))
    }

    /// The startup probe: queries checks declaring [`Axis::NotReady`]
    /// synchronously, and stops querying each check once it has reported
    /// ready. Startup is a one-way gate; use the readiness probe for ongoing
    /// checks.
    pub async fn get_startup_status(&self) -> Result<HealthCheckReportDto> {
        let finished: Vec<String> = {
            let finished = self
                .finished_startup_checks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            finished.iter().cloned().collect()
        };
        let request = CreateReportRequest::new()
            .force_fresh_data(true)
            .include_only_checks_with_any_of_these_axes([Axis::NotReady])
            .exclude_checks(finished);

        let report = self.create_report(&request).await?;

        let mut finished = self
            .finished_startup_checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for check in &report.health_checks {
            if !check.axes.activated.contains(&Axis::NotReady) {
                finished.insert(check.name.clone());
            }
        }

        Ok(report)
    }

    /// The readiness probe: checks declaring [`Axis::NotReady`], used by
    /// load balancers to decide whether to route traffic here.
    pub async fn get_readiness_status(&self) -> Result<HealthCheckReportDto> {
        self.create_report(&CreateReportRequest::readiness_status()).await
    }

    /// The liveness probe: checks declaring [`Axis::RequiresReboot`], used
    /// by orchestrators that may kill and restart the instance.
    pub async fn get_liveness_status(&self) -> Result<HealthCheckReportDto> {
        self.create_report(&CreateReportRequest::liveness_status()).await
    }

    /// The critical probe: checks declaring [`Axis::CriticalWakePeopleUp`].
    pub async fn get_critical_status(&self) -> Result<HealthCheckReportDto> {
        self.create_report(&CreateReportRequest::critical_status()).await
    }

    /// Build, commit and execute a check once on the calling task, without
    /// registering it. Intended for tests and tooling that exercise a
    /// specification outside the regular scheduling machinery.
    pub fn execute_transient_check(
        &self,
        metadata: CheckMetadata,
        build: impl FnOnce(&mut CheckSpecification),
    ) -> Result<HealthCheckDto> {
        let instance =
            CheckInstance::create(Arc::new(metadata), Arc::clone(&self.clock), build)?;
        let result = instance.execute();
        Ok(check_result_to_dto(&result, self.clock.now()))
    }

    // ===== Internals =====

    fn lock_runners(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<CheckRunner>>> {
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_runner(&self, name: &str) -> Option<Arc<CheckRunner>> {
        self.lock_runners().get(name).cloned()
    }
}

/// Drains the publish queue and notifies observers. Observer code is
/// untrusted: every invocation is caught, so one broken observer cannot
/// stall the queue or the check workers.
async fn run_publisher(
    mut publish_rx: mpsc::UnboundedReceiver<Arc<CheckResult>>,
    observers: Arc<ObserverHub>,
    clock: Arc<dyn Clock>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            received = publish_rx.recv() => {
                match received {
                    Some(result) => {
                        let dto = check_result_to_dto(&result, clock.now());
                        for observer in observers.snapshot() {
                            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                                observer.on_health_check_changed(&dto);
                            })) {
                                let failure = FailureInfo::from_panic(payload.as_ref());
                                error!(
                                    "Error publishing HealthCheck[{}] status to observer: {}",
                                    dto.name, failure.message
                                );
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = stop.notified() => break,
        }
    }
    info!("Health check observer publisher stopped");
}
