//! Orchestration plan records
//!
//! An [`OrchestrationPlan`] is the persisted source of truth for a rollout:
//! its phases are fixed once approved, and only the executor moves its status,
//! checkpoints and failure list forward.

use chrono::{DateTime, Utc};
use fleetfw_errors::{ErrorCategory, FleetError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CompatibilityRisk, ComponentType, Criticality, HostFirmwareGap};
use crate::planner::OrchestrationConfig;
use crate::state::{Lifecycle, PlanStatus, StateMachine, Transition};

/// Hosts from one cluster (or one standalone host) updated as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPhase {
    /// 1-based position in the plan
    pub phase_number: u32,
    /// Cluster name, or a `standalone:` pseudo-cluster
    pub cluster_name: String,
    /// Hosts in batch order
    pub hosts: Vec<HostFirmwareGap>,
    /// Whole hours for the phase
    pub estimated_duration_hours: u64,
    /// More than one host per batch
    pub parallel_execution: bool,
    /// Hosts taken out of service at once
    pub hosts_per_batch: usize,
    /// Availability floor enforced during the phase
    pub min_active_hosts: usize,
    /// Planned start
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    /// Start was moved to the next maintenance window
    #[serde(default)]
    pub deferred: bool,
    /// Singleton phase for a host outside any cluster
    #[serde(default)]
    pub standalone: bool,
    /// Planner findings for operators
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ExecutionPhase {
    /// Highest host risk in the phase.
    pub fn worst_risk(&self) -> CompatibilityRisk {
        self.hosts
            .iter()
            .map(|h| h.compatibility_risk)
            .max()
            .unwrap_or_default()
    }

    /// Host batches in execution order.
    pub fn batches(&self) -> impl Iterator<Item = &[HostFirmwareGap]> {
        self.hosts.chunks(self.hosts_per_batch.max(1))
    }
}

/// Execution status of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not started
    #[default]
    Pending,
    /// Batches running
    Running,
    /// Every batch finished
    Completed,
    /// Halted on a failure
    Failed,
}

/// Resume checkpoint for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Phase this entry tracks
    pub phase_number: u32,
    /// Phase status
    pub status: PhaseStatus,
    /// Index of the first host not yet processed
    pub next_host_index: usize,
    /// Hosts updated successfully
    #[serde(default)]
    pub succeeded: Vec<String>,
    /// Hosts that failed
    #[serde(default)]
    pub failed: Vec<String>,
}

/// A host update failure kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFailure {
    /// Host id
    pub host_id: String,
    /// Cluster or pseudo-cluster
    pub cluster_name: String,
    /// Phase the host belonged to
    pub phase_number: u32,
    /// Most critical component on the host's update
    #[serde(default)]
    pub criticality: Option<Criticality>,
    /// Error category
    pub category: ErrorCategory,
    /// Error message
    pub message: String,
    /// When it failed
    pub at: DateTime<Utc>,
}

/// Version to restore for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRollback {
    /// Component
    pub component_type: ComponentType,
    /// Version installed before the plan
    pub restore_version: String,
    /// Version the plan installs
    pub target_version: String,
}

/// Restore targets for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRollback {
    /// Host id
    pub host_id: String,
    /// Components the plan touches
    pub components: Vec<ComponentRollback>,
}

/// How to return hosts to their pre-plan firmware.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Whether the executor halts and leaves hosts for rollback on failure
    pub automatic: bool,
    /// Per-host restore targets
    pub hosts: Vec<HostRollback>,
}

impl RollbackPlan {
    /// Restore targets derived from each host's installed versions.
    pub fn from_phases(phases: &[ExecutionPhase], automatic: bool) -> Self {
        let hosts = phases
            .iter()
            .flat_map(|p| p.hosts.iter())
            .map(|gap| HostRollback {
                host_id: gap.host_id.clone(),
                components: gap
                    .components
                    .iter()
                    .map(|c| ComponentRollback {
                        component_type: c.component_type,
                        restore_version: gap
                            .installed_versions
                            .get(&c.component_type)
                            .cloned()
                            .unwrap_or_else(|| c.current_version.clone()),
                        target_version: c.target_version.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self { automatic, hosts }
    }

    /// Restore targets for one host.
    pub fn for_host(&self, host_id: &str) -> Option<&HostRollback> {
        self.hosts.iter().find(|h| h.host_id == host_id)
    }
}

/// A phased rollout plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    /// Plan id
    pub id: Uuid,
    /// Operator policy the plan was built with
    pub config: OrchestrationConfig,
    /// Phases in execution order
    pub phases: Vec<ExecutionPhase>,
    /// Whole hours for the rollout
    pub total_duration_hours: u64,
    #[serde(flatten)]
    lifecycle: StateMachine<PlanStatus>,
    /// Index of the phase being executed
    pub current_phase: usize,
    /// Times execution was resumed after an interruption
    pub retry_count: u32,
    /// Restore targets
    pub rollback_plan: RollbackPlan,
    /// First blocking failure
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Approval time
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// First execution time
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-phase checkpoints
    pub phase_progress: Vec<PhaseProgress>,
    /// Accumulated host failures
    #[serde(default)]
    pub host_failures: Vec<HostFailure>,
    /// Plan-level planner findings
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl OrchestrationPlan {
    /// Create a plan in `initial` state.
    pub fn new(
        config: OrchestrationConfig,
        phases: Vec<ExecutionPhase>,
        total_duration_hours: u64,
        initial: PlanStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        let phase_progress = phases
            .iter()
            .map(|p| PhaseProgress {
                phase_number: p.phase_number,
                status: PhaseStatus::Pending,
                next_host_index: 0,
                succeeded: Vec::new(),
                failed: Vec::new(),
            })
            .collect();
        let rollback_plan = RollbackPlan::from_phases(&phases, config.rollback_on_failure);
        let approved_at = (initial == PlanStatus::Approved).then_some(created_at);
        Self {
            id: Uuid::new_v4(),
            config,
            phases,
            total_duration_hours,
            lifecycle: StateMachine::new(initial),
            current_phase: 0,
            retry_count: 0,
            rollback_plan,
            failure_reason: None,
            created_at,
            approved_at,
            started_at: None,
            completed_at: None,
            phase_progress,
            host_failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> PlanStatus {
        self.lifecycle.state()
    }

    /// Status history.
    pub fn history(&self) -> &[Transition<PlanStatus>] {
        self.lifecycle.history()
    }

    /// Whether the plan can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Move to `next`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidTransition`] for moves the plan lifecycle
    /// does not allow.
    pub fn transition(&mut self, next: PlanStatus, reason: Option<String>) -> Result<(), FleetError> {
        self.lifecycle.transition(next, reason)?;
        let now = Utc::now();
        match next {
            PlanStatus::Approved => self.approved_at = Some(now),
            PlanStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Approve a plan waiting for an operator.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidTransition`] unless the plan is pending approval.
    pub fn approve(&mut self, approver: Option<String>) -> Result<(), FleetError> {
        self.transition(PlanStatus::Approved, approver)
    }

    /// Mark the plan failed, keeping the first blocking reason.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidTransition`] if the plan cannot fail from
    /// its current status.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), FleetError> {
        let reason = reason.into();
        if self.failure_reason.is_none() {
            self.failure_reason = Some(reason.clone());
        }
        self.transition(PlanStatus::Failed, Some(reason))
    }

    /// Checkpoint for a phase.
    pub fn progress_mut(&mut self, phase_number: u32) -> Option<&mut PhaseProgress> {
        self.phase_progress
            .iter_mut()
            .find(|p| p.phase_number == phase_number)
    }

    /// Checkpoint for a phase.
    pub fn progress(&self, phase_number: u32) -> Option<&PhaseProgress> {
        self.phase_progress
            .iter()
            .find(|p| p.phase_number == phase_number)
    }

    /// Hosts updated successfully across all phases.
    pub fn succeeded_hosts(&self) -> usize {
        self.phase_progress.iter().map(|p| p.succeeded.len()).sum()
    }

    /// Hosts that failed across all phases.
    pub fn failed_hosts(&self) -> usize {
        self.host_failures.len()
    }

    /// Total hosts across all phases.
    pub fn total_hosts(&self) -> usize {
        self.phases.iter().map(|p| p.hosts.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::FirmwareComponent;

    fn gap(id: &str) -> HostFirmwareGap {
        HostFirmwareGap {
            host_id: id.to_string(),
            hostname: id.to_string(),
            model: "R750".to_string(),
            service_tag: "T".to_string(),
            cluster_name: Some("c".to_string()),
            management_address: "10.0.0.1".to_string(),
            compatibility_risk: CompatibilityRisk::Medium,
            total_update_time_minutes: 30,
            components: vec![FirmwareComponent {
                component_type: ComponentType::Bios,
                current_version: "1.0.0".to_string(),
                target_version: "2.0.0".to_string(),
                criticality: Criticality::Critical,
                requires_reboot: true,
                intermediate_versions: Vec::new(),
                estimated_duration_minutes: 30,
            }],
            update_sequence: Vec::new(),
            requires_multi_step: false,
            installed_versions: BTreeMap::from([(ComponentType::Bios, "1.0.0".to_string())]),
            unresolved: Vec::new(),
        }
    }

    fn phase(hosts: Vec<HostFirmwareGap>, per_batch: usize) -> ExecutionPhase {
        ExecutionPhase {
            phase_number: 1,
            cluster_name: "c".to_string(),
            hosts,
            estimated_duration_hours: 1,
            parallel_execution: per_batch > 1,
            hosts_per_batch: per_batch,
            min_active_hosts: 1,
            scheduled_start: None,
            deferred: false,
            standalone: false,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_batches_follow_host_order() {
        let p = phase(vec![gap("a"), gap("b"), gap("c")], 2);
        let batches: Vec<Vec<&str>> = p
            .batches()
            .map(|b| b.iter().map(|h| h.host_id.as_str()).collect())
            .collect();
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_rollback_plan_restores_installed_versions() {
        let rollback = RollbackPlan::from_phases(&[phase(vec![gap("a")], 1)], true);
        assert!(rollback.automatic);
        let host = rollback.for_host("a");
        assert_eq!(
            host.and_then(|h| h.components.first()).map(|c| c.restore_version.as_str()),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_plan_timestamps_follow_transitions() -> Result<(), FleetError> {
        let mut plan = OrchestrationPlan::new(
            OrchestrationConfig::default(),
            vec![phase(vec![gap("a")], 1)],
            1,
            PlanStatus::PendingApproval,
            Utc::now(),
        );
        assert!(plan.approved_at.is_none());
        plan.approve(Some("alice".into()))?;
        assert!(plan.approved_at.is_some());
        plan.transition(PlanStatus::Running, None)?;
        assert!(plan.started_at.is_some());
        plan.fail("bmc unreachable")?;
        assert_eq!(plan.failure_reason.as_deref(), Some("bmc unreachable"));
        assert!(plan.completed_at.is_some());
        assert!(plan.is_terminal());
        Ok(())
    }

    #[test]
    fn test_plan_serializes_status_at_top_level() -> Result<(), serde_json::Error> {
        let plan = OrchestrationPlan::new(
            OrchestrationConfig::default(),
            Vec::new(),
            0,
            PlanStatus::Approved,
            Utc::now(),
        );
        let value = serde_json::to_value(&plan)?;
        assert_eq!(value.get("status"), Some(&serde_json::json!("approved")));
        let back: OrchestrationPlan = serde_json::from_value(value)?;
        assert_eq!(back.status(), PlanStatus::Approved);
        Ok(())
    }
}
