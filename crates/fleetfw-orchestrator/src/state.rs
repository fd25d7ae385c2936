//! Lifecycle state machines for plans and jobs
//!
//! Every status change goes through [`StateMachine::transition`], which checks
//! the move against the lifecycle's table and records it in the history. No
//! caller can write a status field directly.

use std::fmt;

use chrono::{DateTime, Utc};
use fleetfw_errors::FleetError;
use serde::{Deserialize, Serialize};

/// A closed set of states with a fixed transition table.
pub trait Lifecycle: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Record kind used in error messages.
    const ENTITY: &'static str;

    /// Whether moving from `self` to `next` is allowed.
    fn can_transition_to(self, next: Self) -> bool;

    /// Whether no further transitions are possible.
    fn is_terminal(self) -> bool;
}

/// Orchestration plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Waiting for an operator
    PendingApproval,
    /// Ready to execute
    Approved,
    /// Phases executing
    Running,
    /// Halted between batches
    Paused,
    /// All phases finished
    Completed,
    /// Halted by a blocking failure
    Failed,
    /// Stopped by an operator
    Cancelled,
}

impl Lifecycle for PlanStatus {
    const ENTITY: &'static str = "plan";

    fn can_transition_to(self, next: Self) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Approved | Cancelled)
                | (Approved, Running | Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Failed | Cancelled)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::PendingApproval => "pending_approval",
            PlanStatus::Approved => "approved",
            PlanStatus::Running => "running",
            PlanStatus::Paused => "paused",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Single-host update job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, nothing sent to the controller yet
    Queued,
    /// Uploading firmware images
    Transferring,
    /// Controller is flashing
    Applying,
    /// Host is rebooting to activate firmware
    Rebooting,
    /// Reading back installed versions
    Verifying,
    /// Every step verified
    Completed,
    /// A step failed
    Failed,
    /// Aborted before any flash started
    Cancelled,
}

impl JobStatus {
    /// Whether a flash may be in progress, so cancellation must be refused.
    pub fn is_flashing(self) -> bool {
        matches!(
            self,
            JobStatus::Applying | JobStatus::Rebooting | JobStatus::Verifying
        )
    }

    /// Nominal progress at the start of this state.
    pub fn base_progress(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Transferring => 5,
            JobStatus::Applying => 40,
            JobStatus::Rebooting => 75,
            JobStatus::Verifying => 90,
            JobStatus::Completed => 100,
            JobStatus::Failed | JobStatus::Cancelled => 0,
        }
    }
}

impl Lifecycle for JobStatus {
    const ENTITY: &'static str = "job";

    fn can_transition_to(self, next: Self) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Transferring | Failed | Cancelled)
                | (Transferring, Applying | Failed | Cancelled)
                | (Applying, Rebooting | Verifying | Failed)
                | (Rebooting, Verifying | Failed)
                | (Verifying, Completed | Failed)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Transferring => "transferring",
            JobStatus::Applying => "applying",
            JobStatus::Rebooting => "rebooting",
            JobStatus::Verifying => "verifying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition<S> {
    /// Previous state
    pub from: S,
    /// New state
    pub to: S,
    /// When it happened
    pub at: DateTime<Utc>,
    /// Optional operator or engine note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Current state plus validated history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine<S> {
    #[serde(rename = "status")]
    state: S,
    history: Vec<Transition<S>>,
}

impl<S: Lifecycle> StateMachine<S> {
    /// Start in `initial` with empty history.
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            history: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.state
    }

    /// All transitions so far, oldest first.
    pub fn history(&self) -> &[Transition<S>] {
        &self.history
    }

    /// Whether the machine has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidTransition`] when the lifecycle does not
    /// allow the move; the state is left unchanged.
    pub fn transition(&mut self, next: S, reason: Option<String>) -> Result<(), FleetError> {
        if !self.state.can_transition_to(next) {
            return Err(FleetError::transition(S::ENTITY, self.state, next));
        }
        self.history.push(Transition {
            from: self.state,
            to: next,
            at: Utc::now(),
            reason,
        });
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_happy_path_records_history() -> Result<(), FleetError> {
        let mut sm = StateMachine::new(PlanStatus::PendingApproval);
        sm.transition(PlanStatus::Approved, Some("ops approved".into()))?;
        sm.transition(PlanStatus::Running, None)?;
        sm.transition(PlanStatus::Paused, None)?;
        sm.transition(PlanStatus::Running, None)?;
        sm.transition(PlanStatus::Completed, None)?;
        assert!(sm.is_terminal());
        assert_eq!(sm.history().len(), 5);
        assert_eq!(
            sm.history().first().and_then(|t| t.reason.clone()),
            Some("ops approved".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_cancelled_plan_cannot_run() {
        let mut sm = StateMachine::new(PlanStatus::Cancelled);
        let result = sm.transition(PlanStatus::Running, None);
        assert!(matches!(
            result,
            Err(FleetError::InvalidTransition { ref from, ref to, .. })
                if from == "cancelled" && to == "running"
        ));
        assert_eq!(sm.state(), PlanStatus::Cancelled);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_pending_plan_cannot_skip_approval() {
        let mut sm = StateMachine::new(PlanStatus::PendingApproval);
        assert!(matches!(
            sm.transition(PlanStatus::Running, None),
            Err(FleetError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_job_cannot_cancel_once_applying() {
        assert!(JobStatus::Transferring.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Applying.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Rebooting.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Rebooting.is_flashing());
    }

    #[test]
    fn test_job_reboot_is_optional() {
        assert!(JobStatus::Applying.can_transition_to(JobStatus::Verifying));
        assert!(JobStatus::Applying.can_transition_to(JobStatus::Rebooting));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Applying));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [
            JobStatus::Queued,
            JobStatus::Transferring,
            JobStatus::Applying,
            JobStatus::Rebooting,
            JobStatus::Verifying,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }
}
