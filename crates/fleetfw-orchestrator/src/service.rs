//! Orchestration facade
//!
//! [`FleetOrchestrator`] wires the analyzers, planner, executor and protocol
//! engine to their collaborators and exposes the operator operations. Plans
//! and jobs live in the [`PlanStore`]; callers poll them or subscribe to
//! progress, and never hold authoritative state themselves.

use std::collections::HashMap;
use std::sync::Arc;

use fleetfw_errors::FleetError;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::alert::AlertSink;
use crate::catalog::FirmwareCatalog;
use crate::cluster::{
    ClusterCompatibilityAnalysis, ClusterCompatibilityAnalyzer, CompatibilityMatrix,
};
use crate::config::EngineConfig;
use crate::executor::{ClusterRollingExecutor, PlanControl, PlanOutcome, VirtualizationManager};
use crate::gap::{GapAnalyzer, GapReport};
use crate::inventory::{CredentialResolver, HostInventory};
use crate::model::HostFirmwareGap;
use crate::plan::OrchestrationPlan;
use crate::planner::{OrchestrationConfig, OrchestrationPlanner};
use crate::protocol::{BmcTransport, ProtocolOrchestrator, UpdateProgress};
use crate::state::PlanStatus;
use crate::store::{ExecutionLogEntry, LogEvent, PlanStore};
use crate::window::MaintenanceCalendar;

/// External systems the orchestrator depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Host inventory
    pub inventory: Arc<dyn HostInventory>,
    /// Firmware catalog
    pub catalog: Arc<dyn FirmwareCatalog>,
    /// Management controller credentials
    pub credentials: Arc<dyn CredentialResolver>,
    /// Management controller transport
    pub transport: Arc<dyn BmcTransport>,
    /// Hypervisor cluster manager
    pub virtualization: Arc<dyn VirtualizationManager>,
    /// Risky version pairs
    pub matrix: Arc<dyn CompatibilityMatrix>,
    /// Plan, job and log records
    pub store: Arc<dyn PlanStore>,
    /// Alert destination
    pub alerts: Arc<dyn AlertSink>,
}

type RunningPlans = Arc<Mutex<HashMap<Uuid, Arc<PlanControl>>>>;

// Removes a plan from the running table when its execution ends or is dropped.
struct RunningGuard {
    running: RunningPlans,
    plan_id: Uuid,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.plan_id);
    }
}

/// Firmware gap analysis and rolling update orchestration.
pub struct FleetOrchestrator {
    inventory: Arc<dyn HostInventory>,
    gap_analyzer: GapAnalyzer,
    cluster_analyzer: ClusterCompatibilityAnalyzer,
    planner: OrchestrationPlanner,
    protocol: Arc<ProtocolOrchestrator>,
    executor: ClusterRollingExecutor,
    store: Arc<dyn PlanStore>,
    running: RunningPlans,
}

impl FleetOrchestrator {
    /// Build an orchestrator from engine settings and collaborators.
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            inventory,
            catalog,
            credentials,
            transport,
            virtualization,
            matrix,
            store,
            alerts,
        } = collaborators;

        let protocol = Arc::new(ProtocolOrchestrator::new(
            transport,
            credentials,
            Arc::clone(&store),
            config.protocol.clone(),
        ));
        let executor = ClusterRollingExecutor::new(
            Arc::clone(&protocol),
            virtualization,
            Arc::clone(&store),
            alerts,
            config.execution.clone(),
        );
        Self {
            inventory,
            gap_analyzer: GapAnalyzer::new(catalog),
            cluster_analyzer: ClusterCompatibilityAnalyzer::new(matrix, config.capacity.clone()),
            planner: OrchestrationPlanner::new(MaintenanceCalendar::new(
                config.maintenance_windows.clone(),
            )),
            protocol,
            executor,
            store,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Gap analysis for `host_ids`, or for the whole inventory when empty.
    ///
    /// Hosts that cannot be read are reported in [`GapReport::failures`].
    ///
    /// # Errors
    ///
    /// Returns the inventory's error if listing all hosts fails.
    pub async fn analyze_gaps(&self, host_ids: &[String]) -> Result<GapReport, FleetError> {
        let ids: Vec<String> = if host_ids.is_empty() {
            self.inventory
                .list_hosts()
                .await?
                .into_iter()
                .map(|h| h.host_id)
                .collect()
        } else {
            host_ids.to_vec()
        };
        let report = self
            .gap_analyzer
            .analyze_hosts(self.inventory.as_ref(), &ids)
            .await;
        info!(
            hosts = report.gaps.len(),
            outdated = report.outdated().count(),
            failures = report.failures.len(),
            "Gap analysis complete"
        );
        Ok(report)
    }

    /// Per-cluster drift and capacity analysis.
    pub fn analyze_cluster_compatibility(
        &self,
        gaps: &[HostFirmwareGap],
    ) -> Vec<ClusterCompatibilityAnalysis> {
        self.cluster_analyzer.analyze(gaps)
    }

    /// Build and persist a plan.
    ///
    /// # Errors
    ///
    /// Planner errors (see [`OrchestrationPlanner::plan_at`]) and store errors.
    pub async fn plan_orchestration(
        &self,
        gaps: &[HostFirmwareGap],
        config: &OrchestrationConfig,
    ) -> Result<OrchestrationPlan, FleetError> {
        let analyses = self.analyze_cluster_compatibility(gaps);
        let plan = self.planner.plan(gaps, config, &analyses)?;
        self.store.save_plan(&plan).await?;
        Ok(plan)
    }

    /// Approve a plan pending approval.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotFound`] for unknown plans and
    /// [`FleetError::InvalidTransition`] unless the plan is pending approval.
    pub async fn approve_plan(
        &self,
        plan_id: Uuid,
        approver: Option<String>,
    ) -> Result<OrchestrationPlan, FleetError> {
        let mut plan = self.store.load_plan(plan_id).await?;
        plan.approve(approver)?;
        self.store.save_plan(&plan).await?;
        info!(plan_id = %plan_id, "Plan approved");
        Ok(plan)
    }

    /// Execute or resume a plan and wait for it to stop.
    ///
    /// Terminal plans return their final outcome. A plan already executing in
    /// this process is not started twice; its current state is returned.
    ///
    /// # Errors
    ///
    /// See [`ClusterRollingExecutor::execute`].
    pub async fn execute_plan(&self, plan_id: Uuid) -> Result<PlanOutcome, FleetError> {
        let plan = self.store.load_plan(plan_id).await?;
        if plan.is_terminal() {
            return Ok(PlanOutcome::from_plan(&plan));
        }

        let control = Arc::new(PlanControl::new());
        let guard = {
            let mut running = self.running.lock();
            if running.contains_key(&plan_id) {
                None
            } else {
                running.insert(plan_id, Arc::clone(&control));
                Some(RunningGuard {
                    running: Arc::clone(&self.running),
                    plan_id,
                })
            }
        };
        let Some(_guard) = guard else {
            info!(plan_id = %plan_id, "Plan already executing");
            return Ok(PlanOutcome::from_plan(&plan));
        };

        self.executor.execute(plan, control).await
    }

    /// Progress snapshot for a job.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotFound`] for unknown jobs.
    pub async fn job_progress(&self, job_id: Uuid) -> Result<UpdateProgress, FleetError> {
        self.protocol.progress(job_id).await
    }

    /// Cancel a job that has not started flashing.
    ///
    /// # Errors
    ///
    /// See [`ProtocolOrchestrator::cancel_job`].
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<(), FleetError> {
        self.protocol.cancel_job(job_id).await
    }

    /// Pause a plan after its in-flight batches.
    ///
    /// # Errors
    ///
    /// [`FleetError::InvalidTransition`] unless the plan is running.
    pub async fn pause_plan(&self, plan_id: Uuid) -> Result<(), FleetError> {
        if let Some(control) = self.control(plan_id) {
            control.pause();
            info!(plan_id = %plan_id, "Pause requested");
            return Ok(());
        }
        // Running in the store but not here: an interrupted run.
        self.settle(plan_id, PlanStatus::Paused, LogEvent::PlanPaused, "paused by operator")
            .await
    }

    /// Resume a paused or interrupted plan and wait for it to stop.
    ///
    /// # Errors
    ///
    /// [`FleetError::InvalidTransition`] unless the plan is paused or running,
    /// plus everything [`FleetOrchestrator::execute_plan`] returns.
    pub async fn resume_plan(&self, plan_id: Uuid) -> Result<PlanOutcome, FleetError> {
        let plan = self.store.load_plan(plan_id).await?;
        match plan.status() {
            PlanStatus::Paused | PlanStatus::Running => self.execute_plan(plan_id).await,
            other => Err(FleetError::transition("plan", other, PlanStatus::Running)),
        }
    }

    /// Cancel a plan. In-flight batches finish; nothing new starts.
    ///
    /// # Errors
    ///
    /// [`FleetError::InvalidTransition`] for terminal plans.
    pub async fn cancel_plan(&self, plan_id: Uuid) -> Result<(), FleetError> {
        if let Some(control) = self.control(plan_id) {
            control.cancel();
            info!(plan_id = %plan_id, "Cancellation requested");
            return Ok(());
        }
        self.settle(
            plan_id,
            PlanStatus::Cancelled,
            LogEvent::PlanCancelled,
            "cancelled by operator",
        )
        .await
    }

    /// Subscribe to job progress.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<UpdateProgress> {
        self.protocol.subscribe_progress()
    }

    /// Load a plan.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotFound`] for unknown plans.
    pub async fn plan(&self, plan_id: Uuid) -> Result<OrchestrationPlan, FleetError> {
        self.store.load_plan(plan_id).await
    }

    /// All stored plans, oldest first.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn plans(&self) -> Result<Vec<OrchestrationPlan>, FleetError> {
        self.store.list_plans().await
    }

    /// Audit log of a plan.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn logs(&self, plan_id: Uuid) -> Result<Vec<ExecutionLogEntry>, FleetError> {
        self.store.logs(plan_id).await
    }

    /// Whether a plan is executing in this process.
    pub fn is_executing(&self, plan_id: Uuid) -> bool {
        self.running.lock().contains_key(&plan_id)
    }

    fn control(&self, plan_id: Uuid) -> Option<Arc<PlanControl>> {
        self.running.lock().get(&plan_id).cloned()
    }

    async fn settle(
        &self,
        plan_id: Uuid,
        next: PlanStatus,
        event: LogEvent,
        reason: &str,
    ) -> Result<(), FleetError> {
        let mut plan = self.store.load_plan(plan_id).await?;
        plan.transition(next, Some(reason.to_string()))?;
        self.store.save_plan(&plan).await?;
        self.store
            .append_log(&ExecutionLogEntry::new(plan_id, event, reason))
            .await?;
        info!(plan_id = %plan_id, status = %next, "Plan stopped outside an active run");
        Ok(())
    }
}
