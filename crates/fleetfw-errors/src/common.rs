//! Common error types and utilities used across all fleetfw crates.
//!
//! This module provides the top-level error enum covering the orchestration
//! taxonomy, along with error classification, severity levels, and utility traits.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{CatalogError, ProtocolFailure};

/// Top-level error type for fleet firmware orchestration.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Host could not be found or its inventory could not be read
    #[error("Discovery failed for host {host_id}: {reason}")]
    Discovery {
        /// Host identifier
        host_id: String,
        /// Failure reason
        reason: String,
    },

    /// No valid version path exists between the installed and target firmware
    #[error("No valid update path for {component} from {from} to {to}: {reason}")]
    IncompatibleUpdate {
        /// Component type
        component: String,
        /// Installed version
        from: String,
        /// Catalog target version
        to: String,
        /// Why the path could not be resolved
        reason: String,
    },

    /// Taking hosts out of service would drop a cluster below its floor
    #[error(
        "Capacity violation in cluster {cluster}: {active} active hosts cannot release {requested} while keeping {min_active} online"
    )]
    CapacityViolation {
        /// Cluster name
        cluster: String,
        /// Hosts currently active
        active: usize,
        /// Hosts requested for maintenance
        requested: usize,
        /// Minimum hosts that must stay active
        min_active: usize,
    },

    /// Plan cannot run before an operator approves it
    #[error("Plan {0} requires manual approval")]
    ApprovalRequired(String),

    /// A phase cannot be placed inside its cluster's maintenance window
    #[error("Maintenance window violation for cluster {cluster}: {reason}")]
    MaintenanceWindowViolation {
        /// Cluster name
        cluster: String,
        /// Violation detail
        reason: String,
    },

    /// A management protocol operation failed on a host
    #[error("Protocol execution failed on host {host_id}: {failure}")]
    ProtocolExecution {
        /// Host identifier
        host_id: String,
        /// Underlying protocol failure
        #[source]
        failure: ProtocolFailure,
    },

    /// A collaborator did not answer in time
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// Restoring the previous state failed
    #[error("Rollback failed for {target}: {reason}")]
    Rollback {
        /// Host or plan being rolled back
        target: String,
        /// Failure reason
        reason: String,
    },

    /// A lifecycle transition that the state machine does not allow
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        /// Kind of record (plan, job)
        entity: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Job cancellation requested after flashing started
    #[error("Cancellation rejected for job {job_id} in state {state}: flash in progress")]
    CancellationRejected {
        /// Job identifier
        job_id: String,
        /// State the job was in
        state: String,
    },

    /// Host still runs workloads and the cluster cannot evacuate it automatically
    #[error("Host {host_id} is not evacuated and cluster {cluster} has no automatic placement")]
    EvacuationRequired {
        /// Host identifier
        host_id: String,
        /// Cluster name
        cluster: String,
    },

    /// Firmware catalog configuration errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind
        kind: String,
        /// Record identifier
        id: String,
    },

    /// Persistent store errors
    #[error("Store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl FleetError {
    /// Get the error category for classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FleetError::Discovery { .. } => ErrorCategory::Discovery,
            FleetError::IncompatibleUpdate { .. } => ErrorCategory::Analysis,
            FleetError::CapacityViolation { .. } | FleetError::EvacuationRequired { .. } => {
                ErrorCategory::Capacity
            }
            FleetError::ApprovalRequired(_) | FleetError::MaintenanceWindowViolation { .. } => {
                ErrorCategory::Policy
            }
            FleetError::ProtocolExecution { .. } | FleetError::Timeout { .. } => {
                ErrorCategory::Protocol
            }
            FleetError::Rollback { .. } => ErrorCategory::Execution,
            FleetError::InvalidTransition { .. } | FleetError::CancellationRejected { .. } => {
                ErrorCategory::Lifecycle
            }
            FleetError::Catalog(_) => ErrorCategory::Catalog,
            FleetError::Config(_) => ErrorCategory::Config,
            FleetError::NotFound { .. } | FleetError::Store(_) | FleetError::Io(_) => {
                ErrorCategory::Storage
            }
        }
    }

    /// Get the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FleetError::ApprovalRequired(_) | FleetError::CancellationRejected { .. } => {
                ErrorSeverity::Info
            }
            FleetError::IncompatibleUpdate { .. }
            | FleetError::MaintenanceWindowViolation { .. }
            | FleetError::Timeout { .. } => ErrorSeverity::Warning,
            FleetError::ProtocolExecution { failure, .. } => {
                if failure.is_recoverable() {
                    ErrorSeverity::Warning
                } else {
                    ErrorSeverity::Error
                }
            }
            FleetError::Rollback { .. } => ErrorSeverity::Critical,
            FleetError::Discovery { .. }
            | FleetError::CapacityViolation { .. }
            | FleetError::InvalidTransition { .. }
            | FleetError::EvacuationRequired { .. }
            | FleetError::Catalog(_)
            | FleetError::Config(_)
            | FleetError::NotFound { .. }
            | FleetError::Store(_)
            | FleetError::Io(_) => ErrorSeverity::Error,
        }
    }

    /// Check if this error is recoverable.
    pub fn is_recoverable(&self) -> bool {
        self.severity() < ErrorSeverity::Critical
    }

    /// Create a discovery error.
    pub fn discovery(host_id: impl Into<String>, reason: impl Into<String>) -> Self {
        FleetError::Discovery {
            host_id: host_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a capacity violation error.
    pub fn capacity(
        cluster: impl Into<String>,
        active: usize,
        requested: usize,
        min_active: usize,
    ) -> Self {
        FleetError::CapacityViolation {
            cluster: cluster.into(),
            active,
            requested,
            min_active,
        }
    }

    /// Create an invalid transition error.
    pub fn transition(
        entity: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        FleetError::InvalidTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: impl Into<String>, id: impl fmt::Display) -> Self {
        FleetError::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        FleetError::Config(msg.into())
    }

    /// Create a store error with a message.
    pub fn store(msg: impl Into<String>) -> Self {
        FleetError::Store(msg.into())
    }
}

impl From<std::io::Error> for FleetError {
    fn from(e: std::io::Error) -> Self {
        FleetError::Io(e)
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorCategory {
    /// Inventory and host discovery
    Discovery = 0,
    /// Gap and path analysis
    Analysis = 1,
    /// Cluster availability
    Capacity = 2,
    /// Operator policy gates
    Policy = 3,
    /// Management protocol I/O
    Protocol = 4,
    /// Plan execution
    Execution = 5,
    /// Lifecycle state machine
    Lifecycle = 6,
    /// Firmware catalog
    Catalog = 7,
    /// Configuration
    Config = 8,
    /// Persistence
    Storage = 9,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Discovery => write!(f, "Discovery"),
            ErrorCategory::Analysis => write!(f, "Analysis"),
            ErrorCategory::Capacity => write!(f, "Capacity"),
            ErrorCategory::Policy => write!(f, "Policy"),
            ErrorCategory::Protocol => write!(f, "Protocol"),
            ErrorCategory::Execution => write!(f, "Execution"),
            ErrorCategory::Lifecycle => write!(f, "Lifecycle"),
            ErrorCategory::Catalog => write!(f, "Catalog"),
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::Storage => write!(f, "Storage"),
        }
    }
}

/// Error severity level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info = 0,
    /// Warning, may require attention
    Warning = 1,
    /// Error, operation failed
    Error = 2,
    /// Critical, fleet may be in an inconsistent state
    Critical = 3,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Context information for errors.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// The operation that was being performed
    pub operation: String,
    /// Additional context key-value pairs
    pub context: Vec<(String, String)>,
}

impl ErrorContext {
    /// Create a new error context for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            context: Vec::new(),
        }
    }

    /// Add a context key-value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation: {}", self.operation)?;
        for (key, value) in &self.context {
            write!(f, ", {}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to store and I/O errors.
pub trait ResultExt<T> {
    /// Add context to an error, converting it into a store error.
    fn context(self, ctx: ErrorContext) -> Result<T, FleetError>;

    /// Add context with an operation name.
    fn with_context(self, operation: impl Into<String>) -> Result<T, FleetError>;
}

impl<T, E: fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, ctx: ErrorContext) -> Result<T, FleetError> {
        self.map_err(|e| FleetError::Store(format!("{}: {}", ctx, e)))
    }

    fn with_context(self, operation: impl Into<String>) -> Result<T, FleetError> {
        self.context(ErrorContext::new(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Capacity.to_string(), "Capacity");
        assert_eq!(ErrorCategory::Protocol.to_string(), "Protocol");
        assert_eq!(ErrorCategory::Storage.to_string(), "Storage");
    }

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    }

    #[test]
    fn test_protocol_severity_follows_recoverability() {
        let transient = FleetError::ProtocolExecution {
            host_id: "esx-01".into(),
            failure: ProtocolFailure::new("redfish", FailureKind::Timeout, "no answer"),
        };
        assert_eq!(transient.severity(), ErrorSeverity::Warning);

        let rejected = FleetError::ProtocolExecution {
            host_id: "esx-01".into(),
            failure: ProtocolFailure::new("redfish", FailureKind::Rejected, "bad image"),
        };
        assert_eq!(rejected.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_rollback_is_not_recoverable() {
        let err = FleetError::Rollback {
            target: "plan-1".into(),
            reason: "bmc offline".into(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Execution);
    }

    #[test]
    fn test_error_context() {
        let ctx = ErrorContext::new("save_plan")
            .with("plan_id", "abc")
            .with("path", "/var/lib/fleetfw");
        assert!(ctx.to_string().contains("save_plan"));
        assert!(ctx.to_string().contains("plan_id: abc"));
    }

    #[test]
    fn test_result_ext_wraps_into_store_error() -> std::result::Result<(), String> {
        let result: std::result::Result<(), String> = Err("disk full".to_string());
        let Err(err) = result.with_context("append_log") else {
            return Err("expected an error".to_string());
        };
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(err.to_string().contains("append_log"));
        assert!(err.to_string().contains("disk full"));
        Ok(())
    }
}
