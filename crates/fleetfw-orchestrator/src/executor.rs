//! Cluster rolling execution
//!
//! [`ClusterRollingExecutor`] drives an approved [`OrchestrationPlan`]. Phases
//! run `max_parallel_clusters` at a time; within a phase, hosts go through
//! maintenance mode in batches of `hosts_per_batch`:
//!
//! 1. Reserve the batch against the cluster's `min_active_hosts` floor. A
//!    refusal pauses the plan with [`FleetError::CapacityViolation`].
//! 2. Enter maintenance mode and wait for the acknowledgement. Without DRS
//!    the host must already be evacuated.
//! 3. Run one [`UpdateJob`](crate::protocol::UpdateJob) per host.
//! 4. Exit maintenance mode, checkpoint, and write the audit log.
//!
//! Pause and cancel are observed between batches. In-flight batches always
//! finish. The checkpoint (`current_phase` and each phase's next host
//! index) is persisted after every batch, so [`ClusterRollingExecutor::execute`]
//! can resume a plan after a restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetfw_errors::{FailureKind, FleetError, ProtocolFailure};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::{Alert, AlertSink};
use crate::capacity::CapacityTracker;
use crate::model::{Criticality, HostFirmwareGap};
use crate::plan::{ExecutionPhase, HostFailure, OrchestrationPlan, PhaseStatus};
use crate::planner::Strategy;
use crate::protocol::ProtocolOrchestrator;
use crate::state::{JobStatus, PlanStatus};
use crate::store::{ExecutionLogEntry, LogEvent, PlanStore};

/// Capacity snapshot reported by the virtualization manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCapacity {
    /// Hosts currently serving workloads
    pub active: usize,
    /// Cluster members
    pub total: usize,
    /// Whether the cluster evacuates hosts automatically
    pub drs_enabled: bool,
}

/// Hypervisor cluster management.
#[async_trait]
pub trait VirtualizationManager: Send + Sync {
    /// Put a host into maintenance mode. Resolves once the manager
    /// acknowledges it, including any VM evacuation it performs.
    async fn enter_maintenance_mode(&self, host_id: &str) -> Result<(), FleetError>;

    /// Return a host to service.
    async fn exit_maintenance_mode(&self, host_id: &str) -> Result<(), FleetError>;

    /// Current capacity of a cluster.
    async fn cluster_capacity(&self, cluster: &str) -> Result<ClusterCapacity, FleetError>;

    /// Whether a host runs no workloads.
    async fn is_evacuated(&self, host_id: &str) -> Result<bool, FleetError>;
}

/// Execution tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Bound on maintenance-mode enter/exit acknowledgements
    pub maintenance_ack_timeout_secs: u64,
    /// Wait for deferred and scheduled phases to reach their start time
    pub honor_scheduled_start: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            maintenance_ack_timeout_secs: 600,
            honor_scheduled_start: true,
        }
    }
}

/// Operator request observed between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Keep going
    Run,
    /// Stop after the in-flight batch and mark the plan paused
    Pause,
    /// Stop after the in-flight batch and mark the plan cancelled
    Cancel,
}

/// Pause and cancel flags for one execution run.
#[derive(Debug)]
pub struct PlanControl {
    tx: watch::Sender<ControlSignal>,
}

impl Default for PlanControl {
    fn default() -> Self {
        let (tx, _) = watch::channel(ControlSignal::Run);
        Self { tx }
    }
}

impl PlanControl {
    /// Fresh control in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current request.
    pub fn signal(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    /// Request a pause. Ignored once cancelled.
    pub fn pause(&self) {
        self.tx.send_if_modified(|s| {
            if *s == ControlSignal::Run {
                *s = ControlSignal::Pause;
                true
            } else {
                false
            }
        });
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(ControlSignal::Cancel);
    }

    /// Resolves with the first pause or cancel request.
    async fn interrupted(&self) -> ControlSignal {
        let mut rx = self.tx.subscribe();
        loop {
            let signal = *rx.borrow_and_update();
            if signal != ControlSignal::Run {
                return signal;
            }
            if rx.changed().await.is_err() {
                return ControlSignal::Cancel;
            }
        }
    }
}

/// Summary of an execution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutcome {
    /// Plan id
    pub plan_id: Uuid,
    /// Status after the run
    pub status: PlanStatus,
    /// Hosts in the plan
    pub total_hosts: usize,
    /// Hosts updated successfully
    pub succeeded: usize,
    /// Hosts that failed
    pub failed: usize,
    /// Per-host failures
    pub failures: Vec<HostFailure>,
    /// First blocking failure
    pub failure_reason: Option<String>,
}

impl PlanOutcome {
    /// Summarize a plan record.
    pub fn from_plan(plan: &OrchestrationPlan) -> Self {
        Self {
            plan_id: plan.id,
            status: plan.status(),
            total_hosts: plan.total_hosts(),
            succeeded: plan.succeeded_hosts(),
            failed: plan.failed_hosts(),
            failures: plan.host_failures.clone(),
            failure_reason: plan.failure_reason.clone(),
        }
    }
}

enum PhaseEnd {
    Completed,
    Paused,
    Cancelled,
    Failed(String),
    Blocked(FleetError),
}

enum PlanEnd {
    Completed,
    Paused,
    Cancelled,
    Failed(String),
    Blocked(FleetError),
}

/// Drives plans phase by phase against virtualization clusters.
pub struct ClusterRollingExecutor {
    protocol: Arc<ProtocolOrchestrator>,
    virtualization: Arc<dyn VirtualizationManager>,
    store: Arc<dyn PlanStore>,
    alerts: Arc<dyn AlertSink>,
    capacity: CapacityTracker,
    settings: ExecutionSettings,
}

impl ClusterRollingExecutor {
    /// Create an executor.
    pub fn new(
        protocol: Arc<ProtocolOrchestrator>,
        virtualization: Arc<dyn VirtualizationManager>,
        store: Arc<dyn PlanStore>,
        alerts: Arc<dyn AlertSink>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            protocol,
            virtualization,
            store,
            alerts,
            capacity: CapacityTracker::new(),
            settings,
        }
    }

    /// Capacity tracker shared by all phases.
    pub fn capacity(&self) -> &CapacityTracker {
        &self.capacity
    }

    /// Run or resume a plan until it completes, fails, pauses or is cancelled.
    ///
    /// Terminal plans are returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`FleetError::ApprovalRequired`] for plans pending approval
    /// - [`FleetError::CapacityViolation`] when a batch would breach its
    ///   cluster's floor; the plan is left paused
    /// - store and lifecycle errors
    pub async fn execute(
        &self,
        mut plan: OrchestrationPlan,
        control: Arc<PlanControl>,
    ) -> Result<PlanOutcome, FleetError> {
        match plan.status() {
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled => {
                return Ok(PlanOutcome::from_plan(&plan));
            }
            PlanStatus::PendingApproval => {
                return Err(FleetError::ApprovalRequired(plan.id.to_string()));
            }
            PlanStatus::Approved => {
                plan.transition(PlanStatus::Running, None)?;
                self.log(ExecutionLogEntry::new(
                    plan.id,
                    LogEvent::PlanStarted,
                    format!("{} phases, {} hosts", plan.phases.len(), plan.total_hosts()),
                ))
                .await?;
            }
            PlanStatus::Paused => {
                plan.retry_count += 1;
                plan.transition(PlanStatus::Running, Some("resumed".to_string()))?;
                self.log(ExecutionLogEntry::new(
                    plan.id,
                    LogEvent::PlanStarted,
                    format!("resumed at phase index {}", plan.current_phase),
                ))
                .await?;
            }
            PlanStatus::Running => {
                // Interrupted run picked up from its checkpoint.
                plan.retry_count += 1;
                warn!(plan_id = %plan.id, phase = plan.current_phase, "Resuming interrupted plan");
            }
        }
        self.store.save_plan(&plan).await?;
        info!(
            plan_id = %plan.id,
            phases = plan.phases.len(),
            retry = plan.retry_count,
            "Executing orchestration plan"
        );

        let group_size = plan.config.max_parallel_clusters.max(1);
        let halts = plan.config.halts_on_failure();
        let phase_count = plan.phases.len();
        let mut start = plan.current_phase;
        let shared = Mutex::new(plan);

        let mut end = PlanEnd::Completed;
        while start < phase_count {
            match control.signal() {
                ControlSignal::Cancel => {
                    end = PlanEnd::Cancelled;
                    break;
                }
                ControlSignal::Pause => {
                    end = PlanEnd::Paused;
                    break;
                }
                ControlSignal::Run => {}
            }

            let stop = start.saturating_add(group_size).min(phase_count);
            {
                let mut plan = shared.lock().await;
                plan.current_phase = start;
                self.store.save_plan(&plan).await?;
            }

            let results = join_all(
                (start..stop).map(|index| self.run_phase(&shared, index, &control, halts)),
            )
            .await;

            let mut group_end = PlanEnd::Completed;
            for result in results {
                group_end = match (group_end, result?) {
                    (PlanEnd::Failed(r), _) | (_, PhaseEnd::Failed(r)) => PlanEnd::Failed(r),
                    (PlanEnd::Blocked(e), _) | (_, PhaseEnd::Blocked(e)) => PlanEnd::Blocked(e),
                    (PlanEnd::Cancelled, _) | (_, PhaseEnd::Cancelled) => PlanEnd::Cancelled,
                    (PlanEnd::Paused, _) | (_, PhaseEnd::Paused) => PlanEnd::Paused,
                    (PlanEnd::Completed, PhaseEnd::Completed) => PlanEnd::Completed,
                };
            }
            if !matches!(group_end, PlanEnd::Completed) {
                end = group_end;
                break;
            }
            start = stop;
        }

        let mut plan = shared.into_inner();
        let plan_id = plan.id;
        let (event, message, blocked) = match end {
            PlanEnd::Completed => {
                plan.current_phase = phase_count;
                plan.transition(PlanStatus::Completed, None)?;
                let msg = format!(
                    "{} succeeded, {} failed",
                    plan.succeeded_hosts(),
                    plan.failed_hosts()
                );
                (LogEvent::PlanCompleted, msg, None)
            }
            PlanEnd::Paused => {
                plan.transition(PlanStatus::Paused, Some("paused by operator".to_string()))?;
                (LogEvent::PlanPaused, "paused by operator".to_string(), None)
            }
            PlanEnd::Cancelled => {
                plan.transition(
                    PlanStatus::Cancelled,
                    Some("cancelled by operator".to_string()),
                )?;
                (LogEvent::PlanCancelled, "cancelled by operator".to_string(), None)
            }
            PlanEnd::Failed(reason) => {
                plan.fail(reason.clone())?;
                (LogEvent::PlanFailed, reason, None)
            }
            PlanEnd::Blocked(err) => {
                plan.transition(PlanStatus::Paused, Some(err.to_string()))?;
                (LogEvent::PlanPaused, err.to_string(), Some(err))
            }
        };
        self.store.save_plan(&plan).await?;
        self.log(ExecutionLogEntry::new(plan_id, event, message)).await?;
        info!(
            plan_id = %plan_id,
            status = %plan.status(),
            succeeded = plan.succeeded_hosts(),
            failed = plan.failed_hosts(),
            "Plan execution stopped"
        );

        match blocked {
            Some(err) => Err(err),
            None => Ok(PlanOutcome::from_plan(&plan)),
        }
    }

    async fn run_phase(
        &self,
        shared: &Mutex<OrchestrationPlan>,
        index: usize,
        control: &PlanControl,
        halts: bool,
    ) -> Result<PhaseEnd, FleetError> {
        let (plan_id, strategy, phase, mut next) = {
            let mut plan = shared.lock().await;
            let plan_id = plan.id;
            let strategy = plan.config.strategy;
            let Some(phase) = plan.phases.get(index).cloned() else {
                return Ok(PhaseEnd::Completed);
            };
            let Some(progress) = plan.progress_mut(phase.phase_number) else {
                return Err(FleetError::not_found("phase checkpoint", phase.phase_number));
            };
            if progress.status == PhaseStatus::Completed {
                return Ok(PhaseEnd::Completed);
            }
            progress.status = PhaseStatus::Running;
            let next = progress.next_host_index;
            self.store.save_plan(&plan).await?;
            (plan_id, strategy, phase, next)
        };
        let number = phase.phase_number;

        if self.settings.honor_scheduled_start
            && (phase.deferred || strategy == Strategy::Scheduled)
            && let Some(at) = phase.scheduled_start
        {
            match self.wait_until(at, control).await {
                ControlSignal::Run => {}
                ControlSignal::Pause => {
                    info!(plan_id = %plan_id, phase = number, "Paused before scheduled start");
                    return Ok(PhaseEnd::Paused);
                }
                ControlSignal::Cancel => return Ok(PhaseEnd::Cancelled),
            }
        }

        info!(plan_id = %plan_id, phase = number, cluster = %phase.cluster_name, from_host = next, "Phase started");
        let per_batch = phase.hosts_per_batch.max(1);
        while next < phase.hosts.len() {
            match control.signal() {
                ControlSignal::Cancel => return Ok(PhaseEnd::Cancelled),
                ControlSignal::Pause => return Ok(PhaseEnd::Paused),
                ControlSignal::Run => {}
            }
            let end = next.saturating_add(per_batch).min(phase.hosts.len());
            let Some(batch) = phase.hosts.get(next..end) else {
                break;
            };

            // Standalone hosts are outside any virtualization cluster.
            let (lease, drs_enabled) = if phase.standalone {
                (None, true)
            } else {
                let capacity = match self
                    .virtualization
                    .cluster_capacity(&phase.cluster_name)
                    .await
                {
                    Ok(capacity) => capacity,
                    Err(err) => return self.blocked(plan_id, number, err).await,
                };
                match self.capacity.try_acquire(
                    &phase.cluster_name,
                    batch.len(),
                    capacity.active,
                    phase.min_active_hosts,
                ) {
                    Ok(lease) => (Some(lease), capacity.drs_enabled),
                    Err(err) => return self.blocked(plan_id, number, err).await,
                }
            };

            let host_ids: Vec<&str> = batch.iter().map(|g| g.host_id.as_str()).collect();
            self.log(
                ExecutionLogEntry::new(plan_id, LogEvent::BatchStarted, host_ids.join(","))
                    .phase(number),
            )
            .await?;
            debug!(plan_id = %plan_id, phase = number, hosts = ?host_ids, "Batch entering maintenance");

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|gap| self.run_host(plan_id, &phase, gap, drs_enabled)),
            )
            .await;
            drop(lease);

            let (entries, first_failure) = {
                let mut plan = shared.lock().await;
                let (entries, first_failure) =
                    self.record_batch(&mut plan, &phase, batch, outcomes);
                if let Some(progress) = plan.progress_mut(number) {
                    progress.next_host_index = end;
                    if halts && first_failure.is_some() {
                        progress.status = PhaseStatus::Failed;
                    }
                }
                self.store.save_plan(&plan).await?;
                (entries, first_failure)
            };
            for entry in entries {
                self.log(entry).await?;
            }
            self.log(
                ExecutionLogEntry::new(
                    plan_id,
                    LogEvent::BatchCompleted,
                    format!("hosts {next}..{end} of {}", phase.hosts.len()),
                )
                .phase(number),
            )
            .await?;

            if halts && let Some(reason) = first_failure {
                warn!(plan_id = %plan_id, phase = number, %reason, "Phase halted on host failure");
                self.log(
                    ExecutionLogEntry::new(plan_id, LogEvent::PhaseFailed, reason.clone())
                        .phase(number),
                )
                .await?;
                return Ok(PhaseEnd::Failed(reason));
            }
            next = end;
        }

        {
            let mut plan = shared.lock().await;
            if let Some(progress) = plan.progress_mut(number) {
                progress.status = PhaseStatus::Completed;
            }
            self.store.save_plan(&plan).await?;
        }
        self.log(
            ExecutionLogEntry::new(plan_id, LogEvent::PhaseCompleted, phase.cluster_name.clone())
                .phase(number),
        )
        .await?;
        info!(plan_id = %plan_id, phase = number, cluster = %phase.cluster_name, "Phase completed");
        Ok(PhaseEnd::Completed)
    }

    // Apply batch results to the plan record; returns audit entries and the
    // first failure message.
    fn record_batch(
        &self,
        plan: &mut OrchestrationPlan,
        phase: &ExecutionPhase,
        batch: &[HostFirmwareGap],
        outcomes: Vec<Result<(), FleetError>>,
    ) -> (Vec<ExecutionLogEntry>, Option<String>) {
        let plan_id = plan.id;
        let number = phase.phase_number;
        let mut entries = Vec::new();
        let mut first_failure = None;

        for (gap, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    if let Some(progress) = plan.progress_mut(number) {
                        progress.succeeded.push(gap.host_id.clone());
                    }
                    entries.push(
                        ExecutionLogEntry::new(plan_id, LogEvent::HostSucceeded, "firmware updated")
                            .phase(number)
                            .host(gap.host_id.clone()),
                    );
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(plan_id = %plan_id, host_id = %gap.host_id, error = %message, "Host update failed");
                    if let Some(progress) = plan.progress_mut(number) {
                        progress.failed.push(gap.host_id.clone());
                    }
                    plan.host_failures.push(HostFailure {
                        host_id: gap.host_id.clone(),
                        cluster_name: phase.cluster_name.clone(),
                        phase_number: number,
                        criticality: gap.max_criticality(),
                        category: err.category(),
                        message: message.clone(),
                        at: Utc::now(),
                    });
                    entries.push(
                        ExecutionLogEntry::new(plan_id, LogEvent::HostFailed, message.clone())
                            .phase(number)
                            .host(gap.host_id.clone()),
                    );

                    // Critical components alert whatever the risk tolerance.
                    if gap.has_critical_component() {
                        let alert = Alert {
                            plan_id,
                            host_id: gap.host_id.clone(),
                            cluster_name: phase.cluster_name.clone(),
                            criticality: Criticality::Critical,
                            components: gap
                                .components
                                .iter()
                                .filter(|c| c.criticality == Criticality::Critical)
                                .map(|c| c.component_type)
                                .collect(),
                            message: message.clone(),
                            raised_at: Utc::now(),
                        };
                        self.alerts.raise(&alert);
                        entries.push(
                            ExecutionLogEntry::new(plan_id, LogEvent::Alert, message.clone())
                                .phase(number)
                                .host(gap.host_id.clone()),
                        );
                    }
                    if first_failure.is_none() {
                        first_failure = Some(format!("{}: {message}", gap.host_id));
                    }
                }
            }
        }
        (entries, first_failure)
    }

    async fn run_host(
        &self,
        plan_id: Uuid,
        phase: &ExecutionPhase,
        gap: &HostFirmwareGap,
        drs_enabled: bool,
    ) -> Result<(), FleetError> {
        if phase.standalone {
            return self.flash(plan_id, gap).await;
        }
        if !drs_enabled && !self.virtualization.is_evacuated(&gap.host_id).await? {
            return Err(FleetError::EvacuationRequired {
                host_id: gap.host_id.clone(),
                cluster: phase.cluster_name.clone(),
            });
        }

        let ack = Duration::from_secs(self.settings.maintenance_ack_timeout_secs);
        match timeout(ack, self.virtualization.enter_maintenance_mode(&gap.host_id)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FleetError::Timeout {
                    operation: format!("enter maintenance mode on {}", gap.host_id),
                    timeout_secs: ack.as_secs(),
                });
            }
        }
        debug!(host_id = %gap.host_id, "Maintenance mode acknowledged");

        let flashed = self.flash(plan_id, gap).await;

        let exited = match timeout(ack, self.virtualization.exit_maintenance_mode(&gap.host_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(FleetError::Timeout {
                operation: format!("exit maintenance mode on {}", gap.host_id),
                timeout_secs: ack.as_secs(),
            }),
        };
        if let Err(err) = &exited {
            warn!(host_id = %gap.host_id, error = %err, "Host did not leave maintenance mode");
        }
        flashed.and(exited)
    }

    async fn flash(&self, plan_id: Uuid, gap: &HostFirmwareGap) -> Result<(), FleetError> {
        let job = self.protocol.update_host(gap, Some(plan_id)).await?;
        if job.status() == JobStatus::Completed {
            return Ok(());
        }
        let protocol = job.protocol.map(|p| p.as_str()).unwrap_or("none");
        let message = job
            .error
            .clone()
            .unwrap_or_else(|| format!("job ended {}", job.status()));
        Err(FleetError::ProtocolExecution {
            host_id: gap.host_id.clone(),
            failure: ProtocolFailure::new(
                protocol,
                job.failure_kind.unwrap_or(FailureKind::Rejected),
                message,
            ),
        })
    }

    async fn blocked(
        &self,
        plan_id: Uuid,
        phase_number: u32,
        err: FleetError,
    ) -> Result<PhaseEnd, FleetError> {
        self.log(
            ExecutionLogEntry::new(plan_id, LogEvent::CapacityBlocked, err.to_string())
                .phase(phase_number),
        )
        .await?;
        Ok(PhaseEnd::Blocked(err))
    }

    // `Run` once `at` is reached, otherwise the request that interrupted the wait.
    async fn wait_until(&self, at: DateTime<Utc>, control: &PlanControl) -> ControlSignal {
        let Ok(delay) = (at - Utc::now()).to_std() else {
            return control.signal();
        };
        info!(start = %at, "Waiting for scheduled phase start");
        tokio::select! {
            () = tokio::time::sleep(delay) => control.signal(),
            signal = control.interrupted() => signal,
        }
    }

    async fn log(&self, entry: ExecutionLogEntry) -> Result<(), FleetError> {
        self.store.append_log(&entry).await
    }
}
