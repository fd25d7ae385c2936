//! Firmware gap analysis

use anyhow::Result;
use tracing::info;

use crate::commands::{GapsArgs, Session};
use crate::error::CliError;
use crate::output;

/// Execute the gaps command
pub async fn execute(args: &GapsArgs, session: &Session, json: bool) -> Result<()> {
    let (fleet, _) = session.fleet().await?;
    let mut report = fleet.analyze(&args.hosts).await?;

    // Explicitly requested hosts must exist.
    if !args.hosts.is_empty() && !report.failures.is_empty() {
        let missing: Vec<&str> = report.failures.iter().map(|f| f.host_id.as_str()).collect();
        return Err(CliError::HostNotFound(missing.join(", ")).into());
    }
    if args.outdated {
        report.gaps.retain(|g| g.has_updates() || !g.unresolved.is_empty());
    }

    info!(hosts = report.gaps.len(), "Gap analysis finished");
    output::print_gap_report(&report, json, args.steps);
    Ok(())
}
