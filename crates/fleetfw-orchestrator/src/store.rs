//! Persistent plan and job records
//!
//! Plans and jobs are stored whole, keyed by id; execution logs are
//! append-only. The file store writes one JSON document per record and one
//! JSON-lines file per plan log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetfw_errors::{FleetError, ResultExt, error_context};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::plan::OrchestrationPlan;
use crate::protocol::UpdateJob;

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// Plan moved to running
    PlanStarted,
    /// Batch of hosts entered maintenance
    BatchStarted,
    /// Batch finished
    BatchCompleted,
    /// A host finished its update
    HostSucceeded,
    /// A host failed its update
    HostFailed,
    /// Capacity check refused a batch
    CapacityBlocked,
    /// Phase finished
    PhaseCompleted,
    /// Phase halted
    PhaseFailed,
    /// Plan paused between batches
    PlanPaused,
    /// Plan cancelled
    PlanCancelled,
    /// Plan completed
    PlanCompleted,
    /// Plan failed
    PlanFailed,
    /// Alert raised for a critical component
    Alert,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Plan the entry belongs to
    pub plan_id: Uuid,
    /// When it was written
    pub timestamp: DateTime<Utc>,
    /// Event kind
    pub event: LogEvent,
    /// Phase, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_number: Option<u32>,
    /// Host, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Detail
    pub message: String,
}

impl ExecutionLogEntry {
    /// Plan-level entry stamped now.
    pub fn new(plan_id: Uuid, event: LogEvent, message: impl Into<String>) -> Self {
        Self {
            plan_id,
            timestamp: Utc::now(),
            event,
            phase_number: None,
            host_id: None,
            message: message.into(),
        }
    }

    /// Attach a phase number.
    pub fn phase(mut self, phase_number: u32) -> Self {
        self.phase_number = Some(phase_number);
        self
    }

    /// Attach a host id.
    pub fn host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }
}

/// Storage for plans, jobs and audit logs.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Insert or replace a plan.
    async fn save_plan(&self, plan: &OrchestrationPlan) -> Result<(), FleetError>;

    /// Load a plan, [`FleetError::NotFound`] if absent.
    async fn load_plan(&self, id: Uuid) -> Result<OrchestrationPlan, FleetError>;

    /// All plans, oldest first.
    async fn list_plans(&self) -> Result<Vec<OrchestrationPlan>, FleetError>;

    /// Insert or replace a job.
    async fn save_job(&self, job: &UpdateJob) -> Result<(), FleetError>;

    /// Load a job, [`FleetError::NotFound`] if absent.
    async fn load_job(&self, id: Uuid) -> Result<UpdateJob, FleetError>;

    /// Append an audit entry.
    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), FleetError>;

    /// Audit entries for a plan in append order.
    async fn logs(&self, plan_id: Uuid) -> Result<Vec<ExecutionLogEntry>, FleetError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    plans: RwLock<HashMap<Uuid, OrchestrationPlan>>,
    jobs: RwLock<HashMap<Uuid, UpdateJob>>,
    logs: RwLock<HashMap<Uuid, Vec<ExecutionLogEntry>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for InMemoryStore {
    async fn save_plan(&self, plan: &OrchestrationPlan) -> Result<(), FleetError> {
        self.plans.write().await.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn load_plan(&self, id: Uuid) -> Result<OrchestrationPlan, FleetError> {
        self.plans
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::not_found("plan", id))
    }

    async fn list_plans(&self) -> Result<Vec<OrchestrationPlan>, FleetError> {
        let mut plans: Vec<OrchestrationPlan> = self.plans.read().await.values().cloned().collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn save_job(&self, job: &UpdateJob) -> Result<(), FleetError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<UpdateJob, FleetError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::not_found("job", id))
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), FleetError> {
        self.logs
            .write()
            .await
            .entry(entry.plan_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn logs(&self, plan_id: Uuid) -> Result<Vec<ExecutionLogEntry>, FleetError> {
        Ok(self
            .logs
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// JSON documents under a state directory.
///
/// Layout: `plans/<id>.json`, `jobs/<id>.json`, `logs/<plan id>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open a store, creating its directories.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Io`] if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, FleetError> {
        let root = root.into();
        for dir in ["plans", "jobs", "logs"] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        debug!(root = %root.display(), "Opened JSON file store");
        Ok(Self { root })
    }

    /// State directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plan_path(&self, id: Uuid) -> PathBuf {
        self.root.join("plans").join(format!("{id}.json"))
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.root.join("jobs").join(format!("{id}.json"))
    }

    fn log_path(&self, plan_id: Uuid) -> PathBuf {
        self.root.join("logs").join(format!("{plan_id}.jsonl"))
    }

    // Write to a sibling temp file and rename, so readers never see a torn record.
    async fn write_document<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), FleetError> {
        let body = serde_json::to_vec_pretty(value)
            .context(error_context!("serialize", "path" => path.display().to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_document<T: serde::de::DeserializeOwned>(
        path: &Path,
        kind: &str,
        id: Uuid,
    ) -> Result<T, FleetError> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FleetError::not_found(kind, id));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&body)
            .context(error_context!("deserialize", "path" => path.display().to_string()))
    }
}

#[async_trait]
impl PlanStore for JsonFileStore {
    async fn save_plan(&self, plan: &OrchestrationPlan) -> Result<(), FleetError> {
        Self::write_document(&self.plan_path(plan.id), plan).await
    }

    async fn load_plan(&self, id: Uuid) -> Result<OrchestrationPlan, FleetError> {
        Self::read_document(&self.plan_path(id), "plan", id).await
    }

    async fn list_plans(&self) -> Result<Vec<OrchestrationPlan>, FleetError> {
        let mut plans = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join("plans")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let body = tokio::fs::read(&path).await?;
            let plan: OrchestrationPlan = serde_json::from_slice(&body)
                .context(error_context!("deserialize", "path" => path.display().to_string()))?;
            plans.push(plan);
        }
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn save_job(&self, job: &UpdateJob) -> Result<(), FleetError> {
        Self::write_document(&self.job_path(job.id), job).await
    }

    async fn load_job(&self, id: Uuid) -> Result<UpdateJob, FleetError> {
        Self::read_document(&self.job_path(id), "job", id).await
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), FleetError> {
        let mut line = serde_json::to_vec(entry).with_context("serialize log entry")?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(entry.plan_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn logs(&self, plan_id: Uuid) -> Result<Vec<ExecutionLogEntry>, FleetError> {
        let body = match tokio::fs::read_to_string(self.log_path(plan_id)).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        body.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).with_context("parse log entry"))
            .collect()
    }
}

/// Open the store for a state directory, or an in-memory store without one.
///
/// # Errors
///
/// Returns [`FleetError::Io`] if the state directory cannot be created.
pub async fn open_store(state_dir: Option<&Path>) -> Result<Arc<dyn PlanStore>, FleetError> {
    match state_dir {
        Some(dir) => Ok(Arc::new(JsonFileStore::open(dir).await?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::OrchestrationConfig;
    use crate::state::PlanStatus;

    fn plan() -> OrchestrationPlan {
        OrchestrationPlan::new(
            OrchestrationConfig::default(),
            Vec::new(),
            0,
            PlanStatus::PendingApproval,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() -> Result<(), FleetError> {
        let store = InMemoryStore::new();
        let plan = plan();
        store.save_plan(&plan).await?;
        assert_eq!(store.load_plan(plan.id).await?.id, plan.id);
        assert!(matches!(
            store.load_plan(Uuid::new_v4()).await,
            Err(FleetError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_persists_plans_and_logs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::open(dir.path()).await?;
        let mut plan = plan();
        store.save_plan(&plan).await?;
        plan.approve(None)?;
        store.save_plan(&plan).await?;

        let reopened = JsonFileStore::open(dir.path()).await?;
        let loaded = reopened.load_plan(plan.id).await?;
        assert_eq!(loaded.status(), PlanStatus::Approved);
        assert_eq!(reopened.list_plans().await?.len(), 1);

        reopened
            .append_log(&ExecutionLogEntry::new(plan.id, LogEvent::PlanStarted, "start"))
            .await?;
        reopened
            .append_log(
                &ExecutionLogEntry::new(plan.id, LogEvent::HostFailed, "bmc timeout")
                    .phase(1)
                    .host("esx-01"),
            )
            .await?;
        let logs = store.logs(plan.id).await?;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs.get(1).and_then(|e| e.host_id.clone()), Some("esx-01".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_missing_records() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileStore::open(dir.path()).await?;
        assert!(matches!(
            store.load_job(Uuid::new_v4()).await,
            Err(FleetError::NotFound { .. })
        ));
        assert!(store.logs(Uuid::new_v4()).await?.is_empty());
        Ok(())
    }
}
