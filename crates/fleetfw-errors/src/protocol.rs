//! Management protocol failure types.
//!
//! A [`ProtocolFailure`] describes why a call to a board management controller
//! failed. Its [`FailureKind`] decides whether the orchestrator may retry the
//! same step on the next protocol.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a protocol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The controller did not answer in time
    Timeout,
    /// Transport-level connection failure
    Connection,
    /// Authentication failed in a way that may clear on retry (session limit, lockout window)
    TransientAuth,
    /// Credentials were rejected
    Authentication,
    /// The controller rejected the firmware payload
    Rejected,
    /// The protocol does not support the requested operation
    Unsupported,
    /// Installed version after the update does not match the target
    VerificationMismatch,
}

impl FailureKind {
    /// Whether a failure of this kind may succeed on another protocol.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::Connection | FailureKind::TransientAuth
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::TransientAuth => "transient auth",
            FailureKind::Authentication => "authentication",
            FailureKind::Rejected => "payload rejected",
            FailureKind::Unsupported => "unsupported",
            FailureKind::VerificationMismatch => "verification mismatch",
        };
        f.write_str(name)
    }
}

/// A failed management protocol operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{protocol} {kind}: {message}")]
pub struct ProtocolFailure {
    /// Protocol name
    pub protocol: String,
    /// Failure classification
    pub kind: FailureKind,
    /// Detail reported by the transport
    pub message: String,
}

impl ProtocolFailure {
    /// Create a new protocol failure.
    pub fn new(protocol: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether the failed step may be retried on another protocol.
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(FailureKind::Timeout.is_recoverable());
        assert!(FailureKind::Connection.is_recoverable());
        assert!(FailureKind::TransientAuth.is_recoverable());
        assert!(!FailureKind::Authentication.is_recoverable());
        assert!(!FailureKind::Rejected.is_recoverable());
        assert!(!FailureKind::Unsupported.is_recoverable());
        assert!(!FailureKind::VerificationMismatch.is_recoverable());
    }

    #[test]
    fn test_display() {
        let failure = ProtocolFailure::new("wsman", FailureKind::Connection, "reset by peer");
        assert_eq!(failure.to_string(), "wsman connection: reset by peer");
    }
}
