//! Operator alerts for failures that must not go unnoticed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::model::{ComponentType, Criticality};

/// A failure raised to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Plan being executed
    pub plan_id: Uuid,
    /// Host that failed
    pub host_id: String,
    /// Cluster or pseudo-cluster
    pub cluster_name: String,
    /// Most critical component on the host's update
    pub criticality: Criticality,
    /// Critical components the host was updating
    pub components: Vec<ComponentType>,
    /// Failure detail
    pub message: String,
    /// When it was raised
    pub raised_at: DateTime<Utc>,
}

/// Destination for alerts.
pub trait AlertSink: Send + Sync {
    /// Deliver an alert. Must not block.
    fn raise(&self, alert: &Alert);
}

/// Emits alerts as `error` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &Alert) {
        error!(
            plan_id = %alert.plan_id,
            host_id = %alert.host_id,
            cluster = %alert.cluster_name,
            criticality = ?alert.criticality,
            components = ?alert.components,
            "ALERT: {}",
            alert.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_tracing_sink_logs_alert() {
        TracingAlertSink.raise(&Alert {
            plan_id: Uuid::nil(),
            host_id: "esx-07".to_string(),
            cluster_name: "prod-01".to_string(),
            criticality: Criticality::Critical,
            components: vec![ComponentType::Bios],
            message: "BIOS flash failed".to_string(),
            raised_at: Utc::now(),
        });
        assert!(logs_contain("ALERT: BIOS flash failed"));
        assert!(logs_contain("esx-07"));
    }
}
