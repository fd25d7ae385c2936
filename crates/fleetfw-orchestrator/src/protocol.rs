//! Out-of-band firmware execution for a single host
//!
//! The [`ProtocolOrchestrator`] probes a host's management controller,
//! picks a protocol and drives one [`UpdateJob`] through
//! `queued -> transferring -> applying -> (rebooting) -> verifying`.
//!
//! Recoverable failures (timeouts, connection drops, transient auth) while
//! transferring or applying move the job to the next supported protocol and
//! retry the same step. Anything else fails the job.
//!
//! Cancellation is only honored before flashing starts. The check and the
//! move into `applying` happen under the same job lock, so a cancel request
//! either wins before the first flash or is rejected.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetfw_errors::{FailureKind, FleetError, ProtocolFailure};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::inventory::{CredentialResolver, Credentials};
use crate::model::{ComponentType, HostFirmwareGap, UpdateStep};
use crate::state::{JobStatus, Lifecycle, StateMachine, Transition};
use crate::store::PlanStore;
use crate::version::FirmwareVersion;

/// Out-of-band management protocols, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementProtocol {
    /// DMTF Redfish REST API
    Redfish,
    /// WS-Management
    Wsman,
    /// Dell remote access controller CLI
    Racadm,
    /// IPMI over LAN
    Ipmi,
    /// Vendor shell over SSH
    Ssh,
}

impl ManagementProtocol {
    /// Every protocol in preference order.
    pub const ALL: [ManagementProtocol; 5] = [
        ManagementProtocol::Redfish,
        ManagementProtocol::Wsman,
        ManagementProtocol::Racadm,
        ManagementProtocol::Ipmi,
        ManagementProtocol::Ssh,
    ];

    /// Selection priority, higher wins.
    pub fn priority(self) -> u8 {
        match self {
            ManagementProtocol::Redfish => 5,
            ManagementProtocol::Wsman => 4,
            ManagementProtocol::Racadm => 3,
            ManagementProtocol::Ipmi => 2,
            ManagementProtocol::Ssh => 1,
        }
    }

    /// Stable name.
    pub fn as_str(self) -> &'static str {
        match self {
            ManagementProtocol::Redfish => "redfish",
            ManagementProtocol::Wsman => "wsman",
            ManagementProtocol::Racadm => "racadm",
            ManagementProtocol::Ipmi => "ipmi",
            ManagementProtocol::Ssh => "ssh",
        }
    }
}

impl fmt::Display for ManagementProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to reach a host's management controller.
#[derive(Debug, Clone)]
pub struct BmcEndpoint {
    /// Host id
    pub host_id: String,
    /// Controller address
    pub address: String,
    /// Resolved credentials
    pub credentials: Credentials,
}

/// Low-level management controller operations.
///
/// Implementations speak one wire protocol family each or dispatch on
/// `protocol`. Every call is bounded by the orchestrator's timeouts.
#[async_trait]
pub trait BmcTransport: Send + Sync {
    /// Whether the controller answers on `protocol`.
    async fn probe(
        &self,
        endpoint: &BmcEndpoint,
        protocol: ManagementProtocol,
    ) -> Result<bool, ProtocolFailure>;

    /// Upload the image for `step` without installing it.
    async fn stage(
        &self,
        endpoint: &BmcEndpoint,
        protocol: ManagementProtocol,
        step: &UpdateStep,
    ) -> Result<(), ProtocolFailure>;

    /// Install a staged image.
    async fn apply(
        &self,
        endpoint: &BmcEndpoint,
        protocol: ManagementProtocol,
        step: &UpdateStep,
    ) -> Result<(), ProtocolFailure>;

    /// Reboot the host and wait for the controller to report it up.
    async fn reboot(
        &self,
        endpoint: &BmcEndpoint,
        protocol: ManagementProtocol,
    ) -> Result<(), ProtocolFailure>;

    /// Installed firmware version of `component`.
    async fn installed_version(
        &self,
        endpoint: &BmcEndpoint,
        protocol: ManagementProtocol,
        component: ComponentType,
    ) -> Result<String, ProtocolFailure>;
}

/// Result of probing one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Protocol probed
    pub protocol: ManagementProtocol,
    /// Whether the controller answered
    pub supported: bool,
    /// Selection priority
    pub priority: u8,
    /// Round-trip time
    pub latency_ms: u64,
}

/// Protocol selection and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Retry recoverable failures on the next protocol
    pub enable_fallback: bool,
    /// Protocol to use when supported
    pub preferred_protocol: Option<ManagementProtocol>,
    /// Per-probe timeout
    pub probe_timeout_ms: u64,
    /// Per stage/apply/verify call timeout
    pub step_timeout_secs: u64,
    /// Reboot timeout
    pub reboot_timeout_secs: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            preferred_protocol: None,
            probe_timeout_ms: 5_000,
            step_timeout_secs: 1_800,
            reboot_timeout_secs: 900,
        }
    }
}

/// A protocol switch after a recoverable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRecord {
    /// Protocol that failed
    pub from_protocol: ManagementProtocol,
    /// Protocol used for the retry
    pub to_protocol: ManagementProtocol,
    /// Failure that caused the switch
    pub reason: String,
    /// When the switch happened
    pub timestamp: DateTime<Utc>,
}

/// Timing data collected while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTelemetry {
    /// Probe results in probe order
    #[serde(default)]
    pub probes: Vec<ProbeResult>,
    /// Probe latency of the protocol in use
    #[serde(default)]
    pub protocol_latency_ms: Option<u64>,
    /// Running completion estimate
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// One host's firmware update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJob {
    /// Job id
    pub id: Uuid,
    /// Plan that dispatched the job
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    /// Host id
    pub host_id: String,
    /// Controller address
    pub management_address: String,
    /// Component currently being processed
    #[serde(default)]
    pub component_type: Option<ComponentType>,
    /// Protocol in use
    #[serde(default)]
    pub protocol: Option<ManagementProtocol>,
    #[serde(flatten)]
    lifecycle: StateMachine<JobStatus>,
    /// Percent complete
    pub progress: u8,
    /// Steps in execution order
    pub steps: Vec<UpdateStep>,
    /// Protocol switches
    #[serde(default)]
    pub fallback_history: Vec<FallbackRecord>,
    /// Timing data
    #[serde(default)]
    pub telemetry: JobTelemetry,
    /// Failure detail for failed jobs
    #[serde(default)]
    pub error: Option<String>,
    /// Failure classification for failed jobs
    #[serde(default)]
    pub failure_kind: Option<FailureKind>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl UpdateJob {
    /// Queued job for a host's update sequence.
    pub fn new(gap: &HostFirmwareGap, plan_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_id,
            host_id: gap.host_id.clone(),
            management_address: gap.management_address.clone(),
            component_type: None,
            protocol: None,
            lifecycle: StateMachine::new(JobStatus::Queued),
            progress: 0,
            steps: gap.update_sequence.clone(),
            fallback_history: Vec::new(),
            telemetry: JobTelemetry::default(),
            error: None,
            failure_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        self.lifecycle.state()
    }

    /// Status history.
    pub fn history(&self) -> &[Transition<JobStatus>] {
        self.lifecycle.history()
    }

    /// Whether the job has finished.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    fn total_minutes(&self) -> u64 {
        self.steps.iter().map(|s| u64::from(s.duration_minutes)).sum()
    }

    fn transition(&mut self, next: JobStatus, reason: Option<String>) -> Result<(), FleetError> {
        self.lifecycle.transition(next, reason)?;
        self.progress = next.base_progress();
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        if self.is_terminal() {
            self.telemetry.estimated_completion = Some(now);
            return;
        }
        let remaining = self.total_minutes().saturating_mul(u64::from(100 - self.progress.min(100))) / 100;
        let remaining = i64::try_from(remaining).unwrap_or(i64::MAX);
        self.telemetry.estimated_completion = chrono::TimeDelta::try_minutes(remaining)
            .and_then(|d| now.checked_add_signed(d));
    }

    // Progress within a state, from its base towards the next state's base.
    fn ramp(&mut self, done: usize, total: usize, ceiling: u8) {
        let base = self.status().base_progress();
        let span = usize::from(ceiling.saturating_sub(base));
        let step = span.saturating_mul(done) / total.max(1);
        self.progress = base.saturating_add(u8::try_from(step).unwrap_or(0));
        self.touch();
    }
}

/// Progress snapshot pushed to subscribers and returned by polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    /// Job id
    pub job_id: Uuid,
    /// Plan id
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    /// Host id
    pub host_id: String,
    /// Job status
    pub status: JobStatus,
    /// Percent complete
    pub progress: u8,
    /// Protocol in use
    #[serde(default)]
    pub protocol: Option<ManagementProtocol>,
    /// Component in progress
    #[serde(default)]
    pub component_type: Option<ComponentType>,
    /// Completion estimate
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Status message
    pub message: String,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

impl UpdateProgress {
    fn from_job(job: &UpdateJob, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            plan_id: job.plan_id,
            host_id: job.host_id.clone(),
            status: job.status(),
            progress: job.progress,
            protocol: job.protocol,
            component_type: job.component_type,
            estimated_completion: job.telemetry.estimated_completion,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

type JobHandle = Arc<Mutex<UpdateJob>>;

enum Halt {
    Cancelled,
    Failed(ProtocolFailure),
    Engine(FleetError),
}

impl From<FleetError> for Halt {
    fn from(e: FleetError) -> Self {
        Halt::Engine(e)
    }
}

#[derive(Clone, Copy)]
enum StepOp {
    Stage,
    Apply,
}

/// Runs single-host update jobs over management protocols.
pub struct ProtocolOrchestrator {
    transport: Arc<dyn BmcTransport>,
    credentials: Arc<dyn CredentialResolver>,
    store: Arc<dyn PlanStore>,
    settings: ProtocolSettings,
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    active: Arc<parking_lot::Mutex<HashSet<Uuid>>>,
    progress_tx: broadcast::Sender<UpdateProgress>,
}

// Clears a job's in-flight mark when its pipeline ends.
struct ActiveRun {
    active: Arc<parking_lot::Mutex<HashSet<Uuid>>>,
    job_id: Uuid,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.lock().remove(&self.job_id);
    }
}

impl ProtocolOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        transport: Arc<dyn BmcTransport>,
        credentials: Arc<dyn CredentialResolver>,
        store: Arc<dyn PlanStore>,
        settings: ProtocolSettings,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(1000);
        Self {
            transport,
            credentials,
            store,
            settings,
            jobs: RwLock::new(HashMap::new()),
            active: Arc::default(),
            progress_tx,
        }
    }

    /// Protocol settings in use.
    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    /// Subscribe to job progress.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<UpdateProgress> {
        self.progress_tx.subscribe()
    }

    /// Probe every allowed protocol in preference order.
    pub async fn detect(&self, endpoint: &BmcEndpoint) -> Vec<ProbeResult> {
        let limit = Duration::from_millis(self.settings.probe_timeout_ms);
        let mut results = Vec::new();
        for protocol in ManagementProtocol::ALL {
            if !endpoint.credentials.allows(protocol) {
                continue;
            }
            let started = Instant::now();
            let supported = match timeout(limit, self.transport.probe(endpoint, protocol)).await {
                Ok(Ok(supported)) => supported,
                Ok(Err(failure)) => {
                    debug!(host_id = %endpoint.host_id, %protocol, error = %failure, "Probe failed");
                    false
                }
                Err(_) => {
                    debug!(host_id = %endpoint.host_id, %protocol, "Probe timed out");
                    false
                }
            };
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            results.push(ProbeResult {
                protocol,
                supported,
                priority: protocol.priority(),
                latency_ms,
            });
        }
        results
    }

    /// Supported protocols in the order they will be tried.
    ///
    /// The preferred protocol leads when supported; the rest follow by
    /// priority.
    pub fn candidates(
        probes: &[ProbeResult],
        preferred: Option<ManagementProtocol>,
    ) -> Vec<ManagementProtocol> {
        let mut supported: Vec<&ProbeResult> = probes.iter().filter(|p| p.supported).collect();
        supported.sort_by_key(|p| std::cmp::Reverse(p.priority));
        let mut order: Vec<ManagementProtocol> = supported.iter().map(|p| p.protocol).collect();
        if let Some(pref) = preferred
            && let Some(pos) = order.iter().position(|p| *p == pref)
        {
            order.remove(pos);
            order.insert(0, pref);
        }
        order
    }

    /// Queue a job for a host.
    ///
    /// # Errors
    ///
    /// Returns a store error if the job cannot be persisted.
    pub async fn submit(
        &self,
        gap: &HostFirmwareGap,
        plan_id: Option<Uuid>,
    ) -> Result<Uuid, FleetError> {
        let job = UpdateJob::new(gap, plan_id);
        let id = job.id;
        self.store.save_job(&job).await?;
        self.publish(&job, "queued");
        self.jobs.write().await.insert(id, Arc::new(Mutex::new(job)));
        info!(job_id = %id, host_id = %gap.host_id, "Update job queued");
        Ok(id)
    }

    /// Queue and run a job for a host.
    ///
    /// # Errors
    ///
    /// See [`ProtocolOrchestrator::run`].
    pub async fn update_host(
        &self,
        gap: &HostFirmwareGap,
        plan_id: Option<Uuid>,
    ) -> Result<UpdateJob, FleetError> {
        let id = self.submit(gap, plan_id).await?;
        self.run(id).await
    }

    /// Drive a queued job to a terminal state.
    ///
    /// Protocol failures end the job in `failed` and are reported through the
    /// returned record, not as an error. A job already being driven by another
    /// caller is returned as it stands.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::NotFound`] for unknown jobs, and store or
    /// lifecycle errors from the engine itself.
    pub async fn run(&self, job_id: Uuid) -> Result<UpdateJob, FleetError> {
        let handle = self.handle(job_id).await?;
        let (host_id, address, steps) = {
            let job = handle.lock().await;
            if job.is_terminal() {
                return Ok(job.clone());
            }
            if !self.active.lock().insert(job_id) {
                debug!(job_id = %job_id, status = %job.status(), "Update job already running");
                return Ok(job.clone());
            }
            (
                job.host_id.clone(),
                job.management_address.clone(),
                job.steps.clone(),
            )
        };
        let _active = ActiveRun {
            active: Arc::clone(&self.active),
            job_id,
        };

        let outcome = self.pipeline(&handle, &host_id, &address, &steps).await;

        let snapshot = {
            let mut job = handle.lock().await;
            match outcome {
                Ok(()) => {
                    info!(job_id = %job_id, host_id = %host_id, protocol = ?job.protocol, "Update job completed");
                }
                Err(Halt::Cancelled) => {
                    info!(job_id = %job_id, host_id = %host_id, "Update job cancelled before flashing");
                }
                Err(Halt::Failed(failure)) => {
                    error!(job_id = %job_id, host_id = %host_id, error = %failure, "Update job failed");
                    job.error = Some(failure.to_string());
                    job.failure_kind = Some(failure.kind);
                    if !job.is_terminal() {
                        job.transition(JobStatus::Failed, Some(failure.to_string()))?;
                    }
                }
                Err(Halt::Engine(err)) => {
                    error!(job_id = %job_id, host_id = %host_id, error = %err, "Update job aborted");
                    job.error = Some(err.to_string());
                    if !job.is_terminal() {
                        job.transition(JobStatus::Failed, Some(err.to_string()))?;
                    }
                }
            }
            job.clone()
        };
        self.store.save_job(&snapshot).await?;
        self.publish(&snapshot, snapshot.status().to_string());
        Ok(snapshot)
    }

    async fn pipeline(
        &self,
        handle: &JobHandle,
        host_id: &str,
        address: &str,
        steps: &[UpdateStep],
    ) -> Result<(), Halt> {
        let credentials = self.credentials.credentials(host_id).await?;
        let endpoint = BmcEndpoint {
            host_id: host_id.to_string(),
            address: address.to_string(),
            credentials,
        };

        let probes = self.detect(&endpoint).await;
        let candidates = Self::candidates(&probes, self.settings.preferred_protocol);
        let Some(&first) = candidates.first() else {
            return Err(Halt::Failed(ProtocolFailure::new(
                "none",
                FailureKind::Unsupported,
                "no supported management protocol",
            )));
        };
        let latency = |p: ManagementProtocol| {
            probes
                .iter()
                .find(|r| r.protocol == p)
                .map(|r| r.latency_ms)
        };
        {
            let mut job = handle.lock().await;
            job.telemetry.probes = probes.clone();
            job.protocol = Some(first);
            job.telemetry.protocol_latency_ms = latency(first);
        }
        info!(host_id, protocol = %first, candidates = candidates.len(), "Selected management protocol");

        let mut current = 0usize;
        self.advance(handle, JobStatus::Transferring).await?;
        self.run_steps(handle, &endpoint, steps, StepOp::Stage, &candidates, &mut current, &latency)
            .await?;

        self.advance(handle, JobStatus::Applying).await?;
        self.run_steps(handle, &endpoint, steps, StepOp::Apply, &candidates, &mut current, &latency)
            .await?;

        let protocol = candidates.get(current).copied().unwrap_or(first);
        if steps.iter().any(|s| s.requires_reboot) {
            self.advance(handle, JobStatus::Rebooting).await?;
            let limit = Duration::from_secs(self.settings.reboot_timeout_secs);
            match timeout(limit, self.transport.reboot(&endpoint, protocol)).await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => return Err(Halt::Failed(failure)),
                Err(_) => {
                    return Err(Halt::Failed(ProtocolFailure::new(
                        protocol.as_str(),
                        FailureKind::Timeout,
                        format!("reboot not confirmed within {}s", limit.as_secs()),
                    )));
                }
            }
        }

        self.advance(handle, JobStatus::Verifying).await?;
        self.verify(handle, &endpoint, protocol, steps).await?;
        self.advance(handle, JobStatus::Completed).await?;
        Ok(())
    }

    #[expect(
        clippy::too_many_arguments,
        reason = "fallback cursor is shared between stage and apply passes"
    )]
    async fn run_steps(
        &self,
        handle: &JobHandle,
        endpoint: &BmcEndpoint,
        steps: &[UpdateStep],
        op: StepOp,
        candidates: &[ManagementProtocol],
        current: &mut usize,
        latency: &(dyn Fn(ManagementProtocol) -> Option<u64> + Sync),
    ) -> Result<(), Halt> {
        let limit = Duration::from_secs(self.settings.step_timeout_secs);
        let ceiling = match op {
            StepOp::Stage => JobStatus::Applying.base_progress(),
            StepOp::Apply => JobStatus::Rebooting.base_progress(),
        };

        for (done, step) in steps.iter().enumerate() {
            {
                let mut job = handle.lock().await;
                if job.status() == JobStatus::Cancelled {
                    return Err(Halt::Cancelled);
                }
                job.component_type = Some(step.component_type);
            }
            loop {
                let protocol = candidates.get(*current).copied().ok_or_else(|| {
                    Halt::Failed(ProtocolFailure::new(
                        "none",
                        FailureKind::Unsupported,
                        "no protocol left to try",
                    ))
                })?;
                let call = async {
                    match op {
                        StepOp::Stage => self.transport.stage(endpoint, protocol, step).await,
                        StepOp::Apply => self.transport.apply(endpoint, protocol, step).await,
                    }
                };
                let result = match timeout(limit, call).await {
                    Ok(r) => r,
                    Err(_) => Err(ProtocolFailure::new(
                        protocol.as_str(),
                        FailureKind::Timeout,
                        format!("step {} not acknowledged within {}s", step.step_number, limit.as_secs()),
                    )),
                };
                let failure = match result {
                    Ok(()) => break,
                    Err(f) => f,
                };

                let next = candidates.get(*current + 1).copied();
                match next {
                    Some(next) if failure.is_recoverable() && self.settings.enable_fallback => {
                        warn!(
                            host_id = %endpoint.host_id,
                            from = %protocol,
                            to = %next,
                            step = step.step_number,
                            error = %failure,
                            "Falling back to next management protocol"
                        );
                        let snapshot = {
                            let mut job = handle.lock().await;
                            if job.status() == JobStatus::Cancelled {
                                return Err(Halt::Cancelled);
                            }
                            job.fallback_history.push(FallbackRecord {
                                from_protocol: protocol,
                                to_protocol: next,
                                reason: failure.to_string(),
                                timestamp: Utc::now(),
                            });
                            job.protocol = Some(next);
                            job.telemetry.protocol_latency_ms = latency(next);
                            job.touch();
                            job.clone()
                        };
                        self.store.save_job(&snapshot).await?;
                        self.publish(&snapshot, format!("fallback {protocol} -> {next}"));
                        *current += 1;
                    }
                    _ => return Err(Halt::Failed(failure)),
                }
            }

            let snapshot = {
                let mut job = handle.lock().await;
                if job.status() == JobStatus::Cancelled {
                    return Err(Halt::Cancelled);
                }
                job.ramp(done + 1, steps.len(), ceiling);
                job.clone()
            };
            debug!(
                host_id = %endpoint.host_id,
                step = step.step_number,
                component = %step.component_type,
                to = %step.to_version,
                "Step acknowledged"
            );
            self.publish(&snapshot, format!("step {} of {}", done + 1, steps.len()));
        }
        Ok(())
    }

    async fn verify(
        &self,
        handle: &JobHandle,
        endpoint: &BmcEndpoint,
        protocol: ManagementProtocol,
        steps: &[UpdateStep],
    ) -> Result<(), Halt> {
        let limit = Duration::from_secs(self.settings.step_timeout_secs);
        // The last step per component carries its final version.
        let mut expected: Vec<(ComponentType, &str)> = Vec::new();
        for step in steps {
            match expected.iter_mut().find(|(c, _)| *c == step.component_type) {
                Some(slot) => slot.1 = step.to_version.as_str(),
                None => expected.push((step.component_type, step.to_version.as_str())),
            }
        }

        for (component, want) in expected {
            handle.lock().await.component_type = Some(component);
            let got = match timeout(
                limit,
                self.transport.installed_version(endpoint, protocol, component),
            )
            .await
            {
                Ok(Ok(v)) => v,
                Ok(Err(failure)) => return Err(Halt::Failed(failure)),
                Err(_) => {
                    return Err(Halt::Failed(ProtocolFailure::new(
                        protocol.as_str(),
                        FailureKind::Timeout,
                        format!("{component} version query timed out"),
                    )));
                }
            };
            let matches = match (FirmwareVersion::parse(&got), FirmwareVersion::parse(want)) {
                (Ok(a), Ok(b)) => a == b,
                _ => got.trim() == want.trim(),
            };
            if !matches {
                return Err(Halt::Failed(ProtocolFailure::new(
                    protocol.as_str(),
                    FailureKind::VerificationMismatch,
                    format!("{component} reports {got}, expected {want}"),
                )));
            }
        }
        Ok(())
    }

    // Transition under the job lock. A job cancelled concurrently stays cancelled.
    async fn advance(&self, handle: &JobHandle, next: JobStatus) -> Result<(), Halt> {
        let snapshot = {
            let mut job = handle.lock().await;
            if job.status() == JobStatus::Cancelled {
                return Err(Halt::Cancelled);
            }
            job.transition(next, None)?;
            job.clone()
        };
        debug!(job_id = %snapshot.id, status = %next, "Job state changed");
        self.store.save_job(&snapshot).await?;
        self.publish(&snapshot, next.to_string());
        Ok(())
    }

    /// Cancel a job that has not started flashing.
    ///
    /// # Errors
    ///
    /// - [`FleetError::CancellationRejected`] once the job is applying,
    ///   rebooting or verifying; the job continues to its natural end
    /// - [`FleetError::InvalidTransition`] for finished jobs
    /// - [`FleetError::NotFound`] for unknown jobs
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<(), FleetError> {
        let handle = self.handle(job_id).await?;
        let snapshot = {
            let mut job = handle.lock().await;
            let status = job.status();
            if status.is_flashing() {
                warn!(job_id = %job_id, %status, "Cancellation rejected, flash in progress");
                return Err(FleetError::CancellationRejected {
                    job_id: job_id.to_string(),
                    state: status.to_string(),
                });
            }
            job.transition(JobStatus::Cancelled, Some("cancelled by operator".to_string()))?;
            job.clone()
        };
        info!(job_id = %job_id, host_id = %snapshot.host_id, "Update job cancelled");
        self.store.save_job(&snapshot).await?;
        self.publish(&snapshot, "cancelled");
        Ok(())
    }

    /// Current job record.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::NotFound`] when neither memory nor the store has it.
    pub async fn job(&self, job_id: Uuid) -> Result<UpdateJob, FleetError> {
        if let Some(handle) = self.jobs.read().await.get(&job_id).cloned() {
            return Ok(handle.lock().await.clone());
        }
        self.store.load_job(job_id).await
    }

    /// Progress snapshot for a job.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::NotFound`] for unknown jobs.
    pub async fn progress(&self, job_id: Uuid) -> Result<UpdateProgress, FleetError> {
        let job = self.job(job_id).await?;
        Ok(UpdateProgress::from_job(&job, job.status().to_string()))
    }

    /// Ids of jobs tracked in memory that have not finished.
    pub async fn active_jobs(&self) -> Vec<Uuid> {
        let handles: Vec<(Uuid, JobHandle)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();
        let mut active = Vec::new();
        for (id, handle) in handles {
            if !handle.lock().await.is_terminal() {
                active.push(id);
            }
        }
        active
    }

    async fn handle(&self, job_id: Uuid) -> Result<JobHandle, FleetError> {
        if let Some(handle) = self.jobs.read().await.get(&job_id).cloned() {
            return Ok(handle);
        }
        // Not in memory: adopt the persisted record, e.g. after a restart.
        let job = self.store.load_job(job_id).await?;
        let handle = Arc::new(Mutex::new(job));
        self.jobs
            .write()
            .await
            .entry(job_id)
            .or_insert_with(|| Arc::clone(&handle));
        Ok(handle)
    }

    fn publish(&self, job: &UpdateJob, message: impl Into<String>) {
        let _ = self.progress_tx.send(UpdateProgress::from_job(job, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(protocol: ManagementProtocol, supported: bool) -> ProbeResult {
        ProbeResult {
            protocol,
            supported,
            priority: protocol.priority(),
            latency_ms: 3,
        }
    }

    #[test]
    fn test_priority_follows_preference_order() {
        for pair in ManagementProtocol::ALL.windows(2) {
            if let [a, b] = pair {
                assert!(a.priority() > b.priority());
            }
        }
    }

    #[test]
    fn test_candidates_highest_priority_first() {
        let probes = vec![
            probe(ManagementProtocol::Ipmi, true),
            probe(ManagementProtocol::Redfish, false),
            probe(ManagementProtocol::Wsman, true),
        ];
        assert_eq!(
            ProtocolOrchestrator::candidates(&probes, None),
            vec![ManagementProtocol::Wsman, ManagementProtocol::Ipmi]
        );
    }

    #[test]
    fn test_preferred_protocol_leads_when_supported() {
        let probes = vec![
            probe(ManagementProtocol::Redfish, true),
            probe(ManagementProtocol::Racadm, true),
        ];
        assert_eq!(
            ProtocolOrchestrator::candidates(&probes, Some(ManagementProtocol::Racadm)),
            vec![ManagementProtocol::Racadm, ManagementProtocol::Redfish]
        );
        assert_eq!(
            ProtocolOrchestrator::candidates(&probes, Some(ManagementProtocol::Ssh)),
            vec![ManagementProtocol::Redfish, ManagementProtocol::Racadm]
        );
    }

    #[test]
    fn test_protocol_serde_names() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&ManagementProtocol::Wsman)?;
        assert_eq!(json, "\"wsman\"");
        Ok(())
    }
}
