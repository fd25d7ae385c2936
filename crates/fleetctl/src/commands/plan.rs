//! Orchestration planning
//!
//! Builds a plan from the snapshot without executing it. The plan is printed,
//! not persisted; execution needs live management and hypervisor endpoints.

use anyhow::{Context, Result};
use fleetfw_orchestrator::config::load_document;
use fleetfw_orchestrator::prelude::*;
use tracing::info;

use crate::commands::{PlanArgs, Session};
use crate::error::CliError;
use crate::output;

/// Execute the plan command
pub async fn execute(args: &PlanArgs, session: &Session, json: bool) -> Result<()> {
    let policy = match &args.policy {
        Some(path) => load_document::<OrchestrationConfig>(path)
            .await
            .with_context(|| format!("Failed to load policy {}", path.display()))?,
        None => OrchestrationConfig::default(),
    };

    let (fleet, _) = session.fleet().await?;
    let report = fleet.analyze(&args.hosts).await?;
    if !args.hosts.is_empty() && !report.failures.is_empty() {
        let missing: Vec<&str> = report.failures.iter().map(|f| f.host_id.as_str()).collect();
        return Err(CliError::HostNotFound(missing.join(", ")).into());
    }

    let outdated: Vec<HostFirmwareGap> = report.outdated().cloned().collect();
    if outdated.is_empty() {
        return Err(CliError::ValidationError("no host needs a firmware update".to_string()).into());
    }

    let analyses = fleet.clusters.analyze(&outdated);
    let plan = fleet
        .planner
        .plan(&outdated, &policy, &analyses)
        .context("Planning failed")?;
    info!(plan_id = %plan.id, phases = plan.phases.len(), "Plan built");

    output::print_plan(&plan, json);
    Ok(())
}
