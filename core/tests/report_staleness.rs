//! Tests for stale-result handling and axis declaration rules, driven by a
//! manual clock

use alcor_core::{
    Axis, CheckMetadata, Clock, CreateReportRequest, HealthCheckRegistry, ManualClock,
    NullCheckLogger, Responsible, ServiceInfo,
};
use std::sync::Arc;

fn registry_with_clock(clock: Arc<ManualClock>) -> HealthCheckRegistry {
    let running_since = clock.now();
    HealthCheckRegistry::new(
        clock,
        Arc::new(NullCheckLogger),
        ServiceInfo::builder("test-service", "0.0.1")
            .running_since(running_since)
            .build(),
    )
}

#[tokio::test]
async fn test_cached_result_goes_stale_at_report_time() {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = registry_with_clock(Arc::clone(&clock));

    registry
        .register_health_check(
            CheckMetadata::builder("background")
                .interval_in_seconds(600)
                .expected_maximum_run_time_in_seconds(4)
                .build(),
            |spec| {
                spec.check([Responsible::Developers], [Axis::DegradedMinor], |context| {
                    context.ok("fine")
                });
            },
        )
        .unwrap();
    registry.start_health_checks().unwrap();
    registry
        .update_health_check_and_wait("background", 5_000)
        .await
        .unwrap()
        .unwrap();

    // fresh: not stale
    let report = registry.create_report(&CreateReportRequest::new()).await.unwrap();
    let check = &report.health_checks[0];
    assert!(!check.run_status.stale);
    assert!(!check.axes.activated.contains(&Axis::SysStale));

    // past three times (interval + expected runtime): the same cached result
    // is now reported stale
    clock.advance_seconds((600 + 4) * 3 + 1);
    let report = registry.create_report(&CreateReportRequest::new()).await.unwrap();
    let check = &report.health_checks[0];
    assert!(check.run_status.stale);
    assert!(check.axes.activated.contains(&Axis::SysStale));
    // staleness is a property of the view: never specified, and no status
    // part of the stored result carries it
    assert!(!check.axes.specified.contains(&Axis::SysStale));
    for status in &check.statuses {
        if let Some(axes) = &status.axes {
            assert!(!axes.activated.contains(&Axis::SysStale));
        }
    }

    registry.shutdown().await;
}

#[tokio::test]
async fn test_inconsistency_sibling_is_specified_both_ways() {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = registry_with_clock(clock);

    registry
        .register_health_check(CheckMetadata::new("ledger"), |spec| {
            spec.check(
                [Responsible::Developers],
                [Axis::InternalInconsistency],
                |context| context.ok("books balance"),
            );
        })
        .unwrap();
    registry.start_health_checks().unwrap();

    let report = registry
        .create_report(&CreateReportRequest::new().force_fresh_data(true))
        .await
        .unwrap();
    let axes = &report.health_checks[0].axes;
    assert!(axes.specified.contains(&Axis::Inconsistency));
    assert!(axes.specified.contains(&Axis::InternalInconsistency));
    assert!(axes.activated.is_empty());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_degraded_complete_activates_whole_lattice() {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = registry_with_clock(clock);

    registry
        .register_health_check(CheckMetadata::new("pipeline"), |spec| {
            spec.check(
                [Responsible::Developers],
                [Axis::DegradedComplete],
                |context| context.fault("pipeline is down"),
            );
        })
        .unwrap();
    registry.start_health_checks().unwrap();

    let report = registry
        .create_report(&CreateReportRequest::new().force_fresh_data(true))
        .await
        .unwrap();
    let axes = &report.health_checks[0].axes;
    assert!(axes.activated.contains(&Axis::DegradedComplete));
    assert!(axes.activated.contains(&Axis::DegradedPartial));
    assert!(axes.activated.contains(&Axis::DegradedMinor));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_report_carries_service_info_and_version() {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = registry_with_clock(Arc::clone(&clock));
    registry
        .register_health_check(CheckMetadata::new("noop"), |spec| {
            spec.check([Responsible::Developers], [Axis::DegradedMinor], |context| {
                context.ok("fine")
            });
        })
        .unwrap();
    registry.start_health_checks().unwrap();

    let report = registry
        .create_report(&CreateReportRequest::new().force_fresh_data(true))
        .await
        .unwrap();
    assert_eq!(report.version, "0.3");
    assert_eq!(report.service.project.name, "test-service");
    assert_eq!(report.service.time_now, clock.now());

    registry.shutdown().await;
}
