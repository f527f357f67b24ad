//! JSON round-trip tests for schema types
//!
//! These tests verify that the report DTOs serialize to the expected wire
//! layout and deserialize back to the original values, ensuring API
//! compatibility and proper serde configuration.

use crate::axis::Axis;
use crate::report::*;
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to test JSON round-trip for any serializable type
    fn test_json_roundtrip<T>(original: &T)
    where
        T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let json = serde_json::to_string(original).expect("Failed to serialize to JSON");
        let deserialized: T = serde_json::from_str(&json).expect("Failed to deserialize from JSON");
        assert_eq!(*original, deserialized, "Round-trip failed for JSON: {}", json);
    }

    fn sample_service_info() -> ServiceInfoDto {
        ServiceInfoDto {
            host: HostDto {
                name: "app-host-01".to_string(),
                primary_address: "10.0.0.17".to_string(),
            },
            project: ProjectDto {
                name: "order-service".to_string(),
                version: "2.4.1".to_string(),
            },
            cpus: 8,
            operating_system: "linux".to_string(),
            running_user: "app".to_string(),
            memory: MemoryDto {
                system_total: 16_000_000_000,
                system_free: Some(4_000_000_000),
                heap_max_allowed: None,
                heap_allocated: 2_000_000_000,
                heap_used: 1_500_000_000,
            },
            load: LoadDto {
                system: Some(0.35),
                process: None,
            },
            running_since: Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap(),
            time_now: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            properties: vec![PropertyDto {
                name: "rust.version".to_string(),
                display_name: Some("Rust version".to_string()),
                value: "1.76".to_string(),
            }],
        }
    }

    fn sample_check() -> HealthCheckDto {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 8, 59, 58).unwrap();
        let completed = Utc.with_ymd_and_hms(2024, 3, 1, 8, 59, 59).unwrap();
        HealthCheckDto {
            name: "database".to_string(),
            description: Some("Checks database connectivity".to_string()),
            check_type: None,
            on_behalf_of: None,
            axes: AxesDto {
                specified: BTreeSet::from([Axis::NotReady, Axis::DegradedComplete]),
                activated: BTreeSet::from([Axis::NotReady]),
            },
            statuses: vec![
                StatusDto {
                    description: "Database connection pool".to_string(),
                    axes: Some(AxesDto {
                        specified: BTreeSet::from([Axis::NotReady]),
                        activated: BTreeSet::from([Axis::NotReady]),
                    }),
                    affected_entities: Some(vec![EntityRefDto {
                        entity_type: "pool".to_string(),
                        id: "primary".to_string(),
                    }]),
                    exception: None,
                    link: None,
                    responsible: Some("DEVELOPERS".to_string()),
                    responsible_teams: vec!["DEVELOPERS".to_string(), "OPERATIONS".to_string()],
                },
                StatusDto {
                    description: "Connection dashboard".to_string(),
                    axes: None,
                    affected_entities: None,
                    exception: None,
                    link: Some(LinkDto {
                        url: "https://monitor.example.com/db".to_string(),
                        display_text: "DB monitor".to_string(),
                    }),
                    responsible: None,
                    responsible_teams: vec![],
                },
            ],
            structured_data: Some("{\"connections\":0}".to_string()),
            run_status: RunStatusDto {
                running_time_in_ns: 1_200_000,
                check_started: started,
                check_completed: completed,
                stale_after: completed + chrono::Duration::seconds(1812),
                stale: false,
                slow: false,
                crashed: false,
            },
        }
    }

    #[test]
    fn test_report_json_roundtrip() {
        let check = sample_check();
        let report = HealthCheckReportDto {
            version: HEALTH_CHECK_REPORT_DTO_VERSION.to_string(),
            service: sample_service_info(),
            axes: check.axes.clone(),
            health_checks: vec![check],
            ready: false,
            live: true,
            critical_fault: false,
            synchronous: false,
        };
        test_json_roundtrip(&report);
    }

    #[test]
    fn test_report_wire_field_names() {
        let check = sample_check();
        let report = HealthCheckReportDto {
            version: HEALTH_CHECK_REPORT_DTO_VERSION.to_string(),
            service: sample_service_info(),
            axes: check.axes.clone(),
            health_checks: vec![check],
            ready: false,
            live: true,
            critical_fault: false,
            synchronous: true,
        };
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["version"], "0.3");
        assert_eq!(json["criticalFault"], false);
        assert_eq!(json["synchronous"], true);
        assert_eq!(json["service"]["runningSince"], "2024-03-01T07:30:00Z");
        assert_eq!(json["service"]["operatingSystem"], "linux");

        let check = &json["healthChecks"][0];
        assert_eq!(check["name"], "database");
        assert_eq!(check["axes"]["specified"][0], "DEGRADED_COMPLETE");
        assert_eq!(check["axes"]["specified"][1], "NOT_READY");
        assert_eq!(check["axes"]["activated"][0], "NOT_READY");
        assert_eq!(check["runStatus"]["runningTimeInNs"], 1_200_000);
        assert!(check["runStatus"]["staleAfter"].is_string());

        let status = &check["statuses"][0];
        assert_eq!(status["affectedEntities"][0]["type"], "pool");
        assert_eq!(status["responsibleTeams"][1], "OPERATIONS");
        // "type" on the check is optional and absent here
        assert!(check.get("type").is_none());
    }

    #[test]
    fn test_exception_dto_roundtrip() {
        let status = StatusDto {
            description: "Unhandled failure during check".to_string(),
            axes: Some(AxesDto {
                specified: BTreeSet::new(),
                activated: BTreeSet::from([Axis::SysCrashed]),
            }),
            affected_entities: None,
            exception: Some(ExceptionDto {
                class_name: "std::io::Error".to_string(),
                message: "connection refused".to_string(),
                stack_trace: "connection refused\nCaused by: os error 111".to_string(),
            }),
            link: None,
            responsible: None,
            responsible_teams: vec![],
        };
        test_json_roundtrip(&status);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["exception"]["className"], "std::io::Error");
        assert_eq!(json["exception"]["stackTrace"], "connection refused\nCaused by: os error 111");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let dto = StatusDto {
            description: "plain text".to_string(),
            axes: None,
            affected_entities: None,
            exception: None,
            link: None,
            responsible: None,
            responsible_teams: vec![],
        };
        let json = serde_json::to_value(&dto).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("axes"));
        assert!(!object.contains_key("exception"));
        assert!(!object.contains_key("link"));
        assert!(!object.contains_key("affectedEntities"));
        // the teams list is always present, even when empty
        assert!(object.contains_key("responsibleTeams"));
    }

    #[test]
    fn test_schema_generation() {
        let report_schema = schemars::schema_for!(HealthCheckReportDto);
        let json = serde_json::to_value(&report_schema).unwrap();
        assert!(json["definitions"].is_object() || json["$defs"].is_object());
    }
}
