//! Property-based tests for error classification.

use fleetfw_errors::{ErrorSeverity, FailureKind, FleetError, ProtocolFailure};
use proptest::prelude::*;

fn arb_failure_kind() -> impl Strategy<Value = FailureKind> {
    prop_oneof![
        Just(FailureKind::Timeout),
        Just(FailureKind::Connection),
        Just(FailureKind::TransientAuth),
        Just(FailureKind::Authentication),
        Just(FailureKind::Rejected),
        Just(FailureKind::Unsupported),
        Just(FailureKind::VerificationMismatch),
    ]
}

proptest! {
    #[test]
    fn test_error_severity_ordering(a in 0u8..=3, b in 0u8..=3) {
        let to_severity = |v: u8| match v {
            0 => ErrorSeverity::Info,
            1 => ErrorSeverity::Warning,
            2 => ErrorSeverity::Error,
            _ => ErrorSeverity::Critical,
        };
        prop_assert_eq!(a.cmp(&b), to_severity(a).cmp(&to_severity(b)));
    }

    #[test]
    fn test_protocol_error_recoverability_matches_kind(
        kind in arb_failure_kind(),
        host in "[a-z]{3}-[0-9]{2}",
        message in "[a-z ]{0,20}",
    ) {
        let err = FleetError::ProtocolExecution {
            host_id: host.clone(),
            failure: ProtocolFailure::new("redfish", kind, message),
        };
        let expected = if kind.is_recoverable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        };
        prop_assert_eq!(err.severity(), expected);
        prop_assert!(err.to_string().contains(&host));
    }

    #[test]
    fn test_capacity_message_carries_numbers(
        active in 0usize..500,
        requested in 0usize..500,
        min_active in 0usize..500,
    ) {
        let msg = FleetError::capacity("prod", active, requested, min_active).to_string();
        prop_assert!(msg.contains(&active.to_string()));
        prop_assert!(msg.contains(&requested.to_string()));
        prop_assert!(msg.contains(&min_active.to_string()));
    }
}
