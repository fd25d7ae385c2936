//! Snapshot tests for error message formatting.
//!
//! Operators read these messages in plan failure reasons and audit logs, so
//! their wording is pinned here.

use fleetfw_errors::{CatalogError, FailureKind, FleetError, ProtocolFailure, VersionError};
use insta::assert_snapshot;

mod fleet_error_snapshots {
    use super::*;

    #[test]
    fn test_capacity_violation() {
        assert_snapshot!(
            FleetError::capacity("prod-01", 4, 3, 2).to_string(),
            @"Capacity violation in cluster prod-01: 4 active hosts cannot release 3 while keeping 2 online"
        );
    }

    #[test]
    fn test_approval_required() {
        assert_snapshot!(
            FleetError::ApprovalRequired("plan-7".into()).to_string(),
            @"Plan plan-7 requires manual approval"
        );
    }

    #[test]
    fn test_incompatible_update() {
        let err = FleetError::IncompatibleUpdate {
            component: "bios".into(),
            from: "1.0.0".into(),
            to: "3.0.0".into(),
            reason: "no declared path".into(),
        };
        assert_snapshot!(err.to_string(), @"No valid update path for bios from 1.0.0 to 3.0.0: no declared path");
    }

    #[test]
    fn test_protocol_execution() {
        let err = FleetError::ProtocolExecution {
            host_id: "esx-01".into(),
            failure: ProtocolFailure::new("redfish", FailureKind::Timeout, "no response within 30s"),
        };
        assert_snapshot!(err.to_string(), @"Protocol execution failed on host esx-01: redfish timeout: no response within 30s");
    }

    #[test]
    fn test_invalid_transition() {
        assert_snapshot!(
            FleetError::transition("plan", "cancelled", "running").to_string(),
            @"Invalid plan transition: cancelled -> running"
        );
    }

    #[test]
    fn test_cancellation_rejected() {
        let err = FleetError::CancellationRejected {
            job_id: "j-1".into(),
            state: "rebooting".into(),
        };
        assert_snapshot!(err.to_string(), @"Cancellation rejected for job j-1 in state rebooting: flash in progress");
    }

    #[test]
    fn test_timeout() {
        let err = FleetError::Timeout {
            operation: "enter_maintenance_mode".into(),
            timeout_secs: 600,
        };
        assert_snapshot!(err.to_string(), @"enter_maintenance_mode timed out after 600s");
    }

    #[test]
    fn test_not_found() {
        assert_snapshot!(
            FleetError::not_found("plan", "p-42").to_string(),
            @"plan not found: p-42"
        );
    }
}

mod catalog_error_snapshots {
    use super::*;

    #[test]
    fn test_cycle() {
        let err = CatalogError::Cycle {
            model: "R750".into(),
            component: "bios".into(),
            version: "1.5.0".into(),
        };
        assert_snapshot!(err.to_string(), @"Upgrade graph for R750/bios contains a cycle through version 1.5.0");
    }

    #[test]
    fn test_wrapped_in_fleet_error() {
        let err: FleetError = CatalogError::EmptyChain {
            model: "R650".into(),
            component: "nic".into(),
        }
        .into();
        assert_snapshot!(err.to_string(), @"Catalog error: Upgrade chain for R650/nic must list at least two versions");
    }

    #[test]
    fn test_invalid_version() {
        let err = CatalogError::InvalidVersion {
            model: "R650".into(),
            component: "bmc".into(),
            version: "7..1".into(),
            source: VersionError::InvalidComponent(String::new(), "empty component".into()),
        };
        assert_snapshot!(err.to_string(), @"Invalid version '7..1' in catalog entry R650/bmc: invalid version component '': empty component");
    }
}
