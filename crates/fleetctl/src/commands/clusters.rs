//! Cluster compatibility analysis

use anyhow::Result;

use crate::commands::{ClustersArgs, Session};
use crate::error::CliError;
use crate::output;

/// Execute the clusters command
pub async fn execute(args: &ClustersArgs, session: &Session, json: bool) -> Result<()> {
    let (fleet, _) = session.fleet().await?;
    let report = fleet.analyze(&[]).await?;
    let mut analyses = fleet.clusters.analyze(&report.gaps);

    if let Some(name) = &args.cluster {
        analyses.retain(|a| &a.cluster_name == name);
        if analyses.is_empty() {
            return Err(CliError::ClusterNotFound(name.clone()).into());
        }
    }

    output::print_cluster_analyses(&analyses, json);
    Ok(())
}
