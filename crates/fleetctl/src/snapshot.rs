//! Fleet snapshot loading
//!
//! A snapshot is one JSON or YAML document holding the host inventory, the
//! firmware catalog, known risky version pairs and maintenance windows.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleetfw_orchestrator::cluster::StaticCompatibilityMatrix;
use fleetfw_orchestrator::config::load_document;
use fleetfw_orchestrator::prelude::*;
use fleetfw_orchestrator::window::{MaintenanceCalendar, MaintenanceWindow};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything the CLI knows about a fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// Host inventory
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    /// Firmware catalog
    #[serde(default)]
    pub catalog: CatalogDocument,
    /// Version pairs that must not coexist in a cluster
    #[serde(default)]
    pub risky_combinations: Vec<RiskyCombination>,
    /// Cluster maintenance windows
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,
}

impl FleetSnapshot {
    /// Read a snapshot file.
    pub async fn load(path: &Path) -> Result<Self> {
        let snapshot: FleetSnapshot = load_document(path)
            .await
            .with_context(|| format!("Failed to load snapshot {}", path.display()))?;
        info!(
            path = %path.display(),
            hosts = snapshot.hosts.len(),
            catalog_entries = snapshot.catalog.entries.len(),
            "Loaded fleet snapshot"
        );
        Ok(snapshot)
    }
}

/// Analyzers and planner wired to one snapshot.
pub struct Fleet {
    /// Host inventory
    pub inventory: InMemoryInventory,
    /// Validated catalog
    pub catalog: Arc<StaticCatalog>,
    /// Gap analyzer over the catalog
    pub gaps: GapAnalyzer,
    /// Cluster analyzer with the merged risky pairs
    pub clusters: ClusterCompatibilityAnalyzer,
    /// Planner with the merged maintenance windows
    pub planner: OrchestrationPlanner,
}

impl Fleet {
    /// Build from a snapshot plus engine settings. Config entries are added
    /// to the snapshot's risky pairs and windows.
    pub fn new(snapshot: FleetSnapshot, config: &EngineConfig) -> Result<Self> {
        let catalog = Arc::new(
            StaticCatalog::from_document(snapshot.catalog)
                .map_err(FleetError::from)
                .context("Invalid firmware catalog")?,
        );
        let matrix = StaticCompatibilityMatrix::from_combinations(
            snapshot
                .risky_combinations
                .iter()
                .chain(config.risky_combinations.iter()),
        );
        let mut windows = snapshot.maintenance_windows;
        windows.extend(config.maintenance_windows.iter().cloned());

        Ok(Self {
            inventory: InMemoryInventory::from_hosts(snapshot.hosts),
            gaps: GapAnalyzer::new(Arc::clone(&catalog) as Arc<dyn FirmwareCatalog>),
            catalog,
            clusters: ClusterCompatibilityAnalyzer::new(Arc::new(matrix), config.capacity.clone()),
            planner: OrchestrationPlanner::new(MaintenanceCalendar::new(windows)),
        })
    }

    /// Gap analysis for `host_ids`, or every host when empty.
    pub async fn analyze(&self, host_ids: &[String]) -> Result<GapReport> {
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
        Ok(self.gaps.analyze_hosts(&self.inventory, &ids).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"
hosts:
  - host_id: esx-01
    hostname: esx-01.example.net
    model: R750
    service_tag: ABC0001
    cluster_name: prod-01
    management_address: 10.0.0.11
    current_versions:
      bios: "1.0.0"
catalog:
  entries:
    - model: R750
      component: bios
      target_version: "2.0.0"
      criticality: critical
risky_combinations:
  - component: bios
    version_a: "1.0.0"
    version_b: "2.0.0"
"#;

    #[tokio::test]
    async fn test_fleet_from_yaml_snapshot() -> Result<()> {
        let snapshot: FleetSnapshot = serde_yaml::from_str(SNAPSHOT)?;
        let fleet = Fleet::new(snapshot, &EngineConfig::default())?;
        assert_eq!(fleet.catalog.len(), 1);

        let report = fleet.analyze(&[]).await?;
        assert_eq!(report.gaps.len(), 1);
        let analyses = fleet.clusters.analyze(&report.gaps);
        assert!(analyses.iter().all(|a| a.has_risky_combinations()));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_host_is_reported_not_fatal() -> Result<()> {
        let snapshot: FleetSnapshot = serde_yaml::from_str(SNAPSHOT)?;
        let fleet = Fleet::new(snapshot, &EngineConfig::default())?;
        let report = fleet.analyze(&["esx-99".to_string()]).await?;
        assert!(report.gaps.is_empty());
        assert_eq!(report.failures.len(), 1);
        Ok(())
    }
}
