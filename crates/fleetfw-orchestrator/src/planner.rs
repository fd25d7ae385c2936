//! Orchestration planning
//!
//! Turns host gaps plus operator policy into a phased [`OrchestrationPlan`]:
//! one phase per cluster, one singleton phase per standalone host. The planner
//! never talks to hardware; every number it produces comes from gap and cluster
//! analysis.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fleetfw_errors::FleetError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::ClusterCompatibilityAnalysis;
use crate::model::HostFirmwareGap;
use crate::plan::{ExecutionPhase, OrchestrationPlan};
use crate::state::PlanStatus;
use crate::window::MaintenanceCalendar;

/// Prefix for standalone host pseudo-clusters.
pub const STANDALONE_PREFIX: &str = "standalone:";

/// When and in what order phases run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Start now, submission order
    Immediate,
    /// Start at `scheduled_start`, submission order
    Scheduled,
    /// Every phase inside its cluster's maintenance window
    MaintenanceWindow,
    /// Lowest-risk, shortest phases first
    #[default]
    SmartRolling,
}

/// How much risk the operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    /// Reject infeasible clusters and halt on the first failure
    Conservative,
    /// Serialize infeasible clusters
    #[default]
    Balanced,
    /// Same gating as balanced
    Aggressive,
}

fn default_parallel() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Operator rollout policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Ordering and start strategy
    #[serde(default)]
    pub strategy: Strategy,
    /// Risk tolerance
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    /// Phases that may run at the same time
    #[serde(default = "default_parallel")]
    pub max_parallel_clusters: usize,
    /// Hosts per cluster that may update at the same time
    #[serde(default = "default_parallel")]
    pub max_parallel_hosts_per_cluster: usize,
    /// Plan starts pending approval
    #[serde(default = "default_true")]
    pub require_manual_approval: bool,
    /// Defer phases to their cluster's maintenance window
    #[serde(default = "default_true")]
    pub respect_maintenance_windows: bool,
    /// Start time for the `scheduled` strategy
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    /// Gate clusters on the compatibility matrix
    #[serde(default = "default_true")]
    pub compatibility_validation: bool,
    /// Halt on the first host failure
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            risk_tolerance: RiskTolerance::default(),
            max_parallel_clusters: 1,
            max_parallel_hosts_per_cluster: 1,
            require_manual_approval: true,
            respect_maintenance_windows: true,
            scheduled_start: None,
            compatibility_validation: true,
            rollback_on_failure: true,
        }
    }
}

impl OrchestrationConfig {
    /// Check policy invariants.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Config`] when a parallelism bound is zero or the
    /// `scheduled` strategy has no start time.
    pub fn validate(&self) -> Result<(), FleetError> {
        if self.max_parallel_clusters < 1 {
            return Err(FleetError::config("max_parallel_clusters must be at least 1"));
        }
        if self.max_parallel_hosts_per_cluster < 1 {
            return Err(FleetError::config(
                "max_parallel_hosts_per_cluster must be at least 1",
            ));
        }
        if self.strategy == Strategy::Scheduled && self.scheduled_start.is_none() {
            return Err(FleetError::config(
                "scheduled strategy requires scheduled_start",
            ));
        }
        Ok(())
    }

    /// Whether phases are placed inside maintenance windows.
    pub fn uses_windows(&self) -> bool {
        self.respect_maintenance_windows || self.strategy == Strategy::MaintenanceWindow
    }

    /// Whether a host failure halts the plan.
    pub fn halts_on_failure(&self) -> bool {
        self.rollback_on_failure || self.risk_tolerance == RiskTolerance::Conservative
    }
}

/// Builds phased plans.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationPlanner {
    calendar: MaintenanceCalendar,
}

impl OrchestrationPlanner {
    /// Planner using `calendar` for window placement.
    pub fn new(calendar: MaintenanceCalendar) -> Self {
        Self { calendar }
    }

    /// Maintenance calendar in use.
    pub fn calendar(&self) -> &MaintenanceCalendar {
        &self.calendar
    }

    /// Build a plan starting from the current time.
    ///
    /// # Errors
    ///
    /// See [`OrchestrationPlanner::plan_at`].
    pub fn plan(
        &self,
        gaps: &[HostFirmwareGap],
        config: &OrchestrationConfig,
        analyses: &[ClusterCompatibilityAnalysis],
    ) -> Result<OrchestrationPlan, FleetError> {
        self.plan_at(gaps, config, analyses, Utc::now())
    }

    /// Build a plan as if planning at `now`.
    ///
    /// Hosts with nothing to flash are left out of every phase.
    ///
    /// # Errors
    ///
    /// - [`FleetError::Config`] for an invalid policy
    /// - [`FleetError::NotFound`] when a cluster has no analysis
    /// - [`FleetError::CapacityViolation`] for an infeasible cluster under
    ///   conservative compatibility validation
    /// - [`FleetError::MaintenanceWindowViolation`] when a phase cannot be
    ///   placed in any window
    pub fn plan_at(
        &self,
        gaps: &[HostFirmwareGap],
        config: &OrchestrationConfig,
        analyses: &[ClusterCompatibilityAnalysis],
        now: DateTime<Utc>,
    ) -> Result<OrchestrationPlan, FleetError> {
        config.validate()?;
        let by_cluster: HashMap<&str, &ClusterCompatibilityAnalysis> = analyses
            .iter()
            .map(|a| (a.cluster_name.as_str(), a))
            .collect();

        let mut phases = Vec::new();
        for (key, hosts) in group_in_submission_order(gaps) {
            let phase = match key {
                GroupKey::Cluster(name) => {
                    let analysis = by_cluster
                        .get(name)
                        .copied()
                        .ok_or_else(|| FleetError::not_found("cluster analysis", name))?;
                    cluster_phase(name, hosts, analysis, config)?
                }
                GroupKey::Standalone(host) => standalone_phase(host),
            };
            phases.push(phase);
        }

        if config.strategy == Strategy::SmartRolling {
            phases.sort_by_key(|p| (p.worst_risk(), p.estimated_duration_hours));
        }
        for (i, phase) in phases.iter_mut().enumerate() {
            phase.phase_number = u32::try_from(i + 1).unwrap_or(u32::MAX);
        }

        self.schedule(&mut phases, config, now)?;
        let total_duration_hours = total_duration(&phases, config.max_parallel_clusters);

        let initial = if config.require_manual_approval {
            PlanStatus::PendingApproval
        } else {
            PlanStatus::Approved
        };
        let mut plan =
            OrchestrationPlan::new(config.clone(), phases, total_duration_hours, initial, now);
        plan.warnings = plan
            .phases
            .iter()
            .flat_map(|p| p.warnings.iter().map(move |w| format!("{}: {w}", p.cluster_name)))
            .collect();

        info!(
            plan_id = %plan.id,
            phases = plan.phases.len(),
            hosts = plan.total_hosts(),
            total_duration_hours,
            status = %plan.status(),
            "Orchestration plan created"
        );
        Ok(plan)
    }

    // Assign start times group by group, deferring into maintenance windows.
    fn schedule(
        &self,
        phases: &mut [ExecutionPhase],
        config: &OrchestrationConfig,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        let mut group_start = match config.strategy {
            Strategy::Scheduled => config.scheduled_start.unwrap_or(now),
            _ => now,
        };

        for group in phases.chunks_mut(config.max_parallel_clusters.max(1)) {
            let mut group_end = group_start;
            for phase in group.iter_mut() {
                let start = self.place(phase, config, group_start)?;
                phase.scheduled_start = Some(start);
                let hours = i64::try_from(phase.estimated_duration_hours).unwrap_or(i64::MAX);
                let end = chrono::TimeDelta::try_hours(hours)
                    .and_then(|d| start.checked_add_signed(d))
                    .unwrap_or(start);
                group_end = group_end.max(end);
            }
            group_start = group_end;
        }
        Ok(())
    }

    fn place(
        &self,
        phase: &mut ExecutionPhase,
        config: &OrchestrationConfig,
        candidate: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, FleetError> {
        if !config.uses_windows() || phase.standalone {
            return Ok(candidate);
        }
        if !self.calendar.has_windows(&phase.cluster_name) {
            if config.strategy == Strategy::MaintenanceWindow {
                return Err(FleetError::MaintenanceWindowViolation {
                    cluster: phase.cluster_name.clone(),
                    reason: "no maintenance window defined".to_string(),
                });
            }
            phase
                .warnings
                .push("no maintenance window defined, starting immediately".to_string());
            return Ok(candidate);
        }

        let (start, available_minutes) = self
            .calendar
            .earliest_start(&phase.cluster_name, candidate)
            .ok_or_else(|| FleetError::MaintenanceWindowViolation {
                cluster: phase.cluster_name.clone(),
                reason: format!("no maintenance window at or after {candidate}"),
            })?;

        if start != candidate {
            phase.deferred = true;
            warn!(
                cluster = %phase.cluster_name,
                requested = %candidate,
                deferred_to = %start,
                "Phase deferred to next maintenance window"
            );
            phase
                .warnings
                .push(format!("deferred to maintenance window at {start}"));
        }
        let needed = phase.estimated_duration_hours.saturating_mul(60);
        if needed > u64::from(available_minutes) {
            phase.warnings.push(format!(
                "estimated {needed} minutes exceeds the {available_minutes} minute window"
            ));
        }
        Ok(start)
    }
}

enum GroupKey<'a> {
    Cluster(&'a str),
    Standalone(&'a HostFirmwareGap),
}

fn group_in_submission_order(gaps: &[HostFirmwareGap]) -> Vec<(GroupKey<'_>, Vec<&HostFirmwareGap>)> {
    let mut groups: Vec<(GroupKey<'_>, Vec<&HostFirmwareGap>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for gap in gaps.iter().filter(|g| g.has_updates()) {
        match gap.cluster_name.as_deref() {
            Some(name) => {
                if let Some(&i) = index.get(name) {
                    if let Some((_, hosts)) = groups.get_mut(i) {
                        hosts.push(gap);
                    }
                } else {
                    index.insert(name, groups.len());
                    groups.push((GroupKey::Cluster(name), vec![gap]));
                }
            }
            None => groups.push((GroupKey::Standalone(gap), vec![gap])),
        }
    }
    groups
}

fn batch_hours(hosts: &[&HostFirmwareGap], per_batch: usize) -> u64 {
    let minutes: u64 = hosts.iter().map(|h| h.total_update_time_minutes).sum();
    let per_batch = u64::try_from(per_batch.max(1)).unwrap_or(1);
    minutes.div_ceil(per_batch.saturating_mul(60))
}

fn cluster_phase(
    name: &str,
    hosts: Vec<&HostFirmwareGap>,
    analysis: &ClusterCompatibilityAnalysis,
    config: &OrchestrationConfig,
) -> Result<ExecutionPhase, FleetError> {
    let mut warnings = analysis.warnings.clone();
    let mut hosts_per_batch = config
        .max_parallel_hosts_per_cluster
        .min(analysis.max_simultaneous_updates)
        .max(1);

    if config.compatibility_validation && !analysis.rolling_update_feasible {
        if config.risk_tolerance == RiskTolerance::Conservative {
            return Err(FleetError::capacity(
                name,
                analysis.total_hosts,
                analysis.max_simultaneous_updates,
                analysis.min_active_hosts,
            ));
        }
        warn!(cluster = name, "Rolling update infeasible, serializing phase");
        warnings.push("rolling update infeasible, hosts updated one at a time".to_string());
        hosts_per_batch = 1;
    }

    Ok(ExecutionPhase {
        phase_number: 0,
        cluster_name: name.to_string(),
        estimated_duration_hours: batch_hours(&hosts, hosts_per_batch),
        hosts: hosts.into_iter().cloned().collect(),
        parallel_execution: hosts_per_batch > 1,
        hosts_per_batch,
        min_active_hosts: analysis.min_active_hosts,
        scheduled_start: None,
        deferred: false,
        standalone: false,
        warnings,
    })
}

fn standalone_phase(host: &HostFirmwareGap) -> ExecutionPhase {
    ExecutionPhase {
        phase_number: 0,
        cluster_name: format!("{STANDALONE_PREFIX}{}", host.host_id),
        estimated_duration_hours: batch_hours(&[host], 1),
        hosts: vec![host.clone()],
        parallel_execution: false,
        hosts_per_batch: 1,
        min_active_hosts: 0,
        scheduled_start: None,
        deferred: false,
        standalone: true,
        warnings: Vec::new(),
    }
}

/// Rollout hours for phases run `max_parallel_clusters` at a time.
///
/// With one cluster at a time this is the plain sum of phase durations;
/// otherwise each consecutive group of phases costs its longest member.
pub fn total_duration(phases: &[ExecutionPhase], max_parallel_clusters: usize) -> u64 {
    phases
        .chunks(max_parallel_clusters.max(1))
        .map(|group| {
            group
                .iter()
                .map(|p| p.estimated_duration_hours)
                .max()
                .unwrap_or(0)
        })
        .sum()
}
