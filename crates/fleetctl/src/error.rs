//! Error types and exit codes for fleetctl

use fleetfw_errors::FleetError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("No fleet snapshot given; pass --snapshot or set FLEETCTL_SNAPSHOT")]
    MissingSnapshot,

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Process exit code for a failed command.
///
/// 2 not found, 3 capacity violation, 4 configuration or validation error,
/// 1 anything else.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(cli) = error.downcast_ref::<CliError>() {
        return match cli {
            CliError::HostNotFound(_) | CliError::ClusterNotFound(_) => 2,
            CliError::MissingSnapshot | CliError::ValidationError(_) => 4,
        };
    }
    match error.downcast_ref::<FleetError>() {
        Some(FleetError::NotFound { .. }) => 2,
        Some(FleetError::CapacityViolation { .. }) => 3,
        Some(
            FleetError::Config(_)
            | FleetError::Catalog(_)
            | FleetError::MaintenanceWindowViolation { .. },
        ) => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let not_found = anyhow::Error::new(CliError::HostNotFound("esx-9".to_string()));
        assert_eq!(exit_code(&not_found), 2);

        let capacity: anyhow::Result<()> =
            Err(FleetError::capacity("prod-01", 3, 2, 2)).context("Planning failed");
        let capacity = capacity.err().map(|e| exit_code(&e));
        assert_eq!(capacity, Some(3));

        let config = anyhow::Error::new(FleetError::config("bad ratio"));
        assert_eq!(exit_code(&config), 4);

        assert_eq!(exit_code(&anyhow::anyhow!("disk on fire")), 1);
    }

    #[test]
    fn test_missing_snapshot_message() {
        insta::assert_snapshot!(
            CliError::MissingSnapshot.to_string(),
            @"No fleet snapshot given; pass --snapshot or set FLEETCTL_SNAPSHOT"
        );
    }
}
