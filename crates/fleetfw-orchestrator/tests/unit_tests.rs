//! Analysis and planning tests over a realistic catalog

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use fleetfw_orchestrator::config::load_document;
use fleetfw_orchestrator::prelude::*;
use fleetfw_orchestrator::store::open_store;

const CATALOG: &str = r#"
entries:
  - model: R750
    component: bios
    target_version: "2.0.0"
    criticality: critical
    step_duration_minutes: 20
    upgrade_chains: [["1.0.0", "1.5.0", "2.0.0"]]
  - model: R750
    component: bmc
    target_version: "7.00.00.00"
    criticality: important
    step_duration_minutes: 10
    requires_reboot: false
"#;

fn analyzer() -> Result<GapAnalyzer> {
    let document: CatalogDocument = serde_yaml::from_str(CATALOG)?;
    Ok(GapAnalyzer::new(Arc::new(StaticCatalog::from_document(document)?)))
}

fn host(id: &str, cluster: &str, bios: &str) -> HostRecord {
    HostRecord {
        host_id: id.to_string(),
        hostname: format!("{id}.dc1.example.net"),
        model: "R750".to_string(),
        service_tag: format!("SVC{id}"),
        cluster_name: Some(cluster.to_string()),
        management_address: format!("idrac-{id}.dc1.example.net"),
        current_versions: BTreeMap::from([
            (ComponentType::Bios, bios.to_string()),
            (ComponentType::Bmc, "6.10.00.00".to_string()),
        ]),
    }
}

fn render_steps(gap: &HostFirmwareGap) -> String {
    gap.update_sequence
        .iter()
        .map(|s| {
            let mut line = format!(
                "{} {} {} -> {} {}m",
                s.step_number, s.component_type, s.from_version, s.to_version, s.duration_minutes
            );
            if s.requires_reboot {
                line.push_str(" reboot");
            }
            if s.validation_required {
                line.push_str(" validate");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_update_sequence_orders_critical_hops_first() -> Result<()> {
    let gap = analyzer()?.analyze(&host("esx-01", "prod-01", "1.0.0"));

    insta::assert_snapshot!(render_steps(&gap), @r"
    1 bios 1.0.0 -> 1.5.0 20m reboot validate
    2 bios 1.5.0 -> 2.0.0 20m reboot validate
    3 bmc 6.10.00.00 -> 7.00.00.00 10m
    ");
    assert_eq!(gap.total_update_time_minutes, 50);
    assert!(gap.requires_multi_step);
    assert!(gap.requires_reboot());
    assert_eq!(gap.max_criticality(), Some(Criticality::Critical));
    Ok(())
}

#[test]
fn test_gap_serializes_component_type_key() -> Result<()> {
    let gap = analyzer()?.analyze(&host("esx-01", "prod-01", "1.5.0"));
    let value = serde_json::to_value(&gap)?;
    let first = value
        .get("components")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow!("missing components"))?;
    assert_eq!(first.get("type").and_then(|t| t.as_str()), Some("bios"));
    assert_eq!(
        first.get("criticality").and_then(|t| t.as_str()),
        Some("critical")
    );
    assert_eq!(
        value.get("requires_multi_step").and_then(|v| v.as_bool()),
        Some(false)
    );
    Ok(())
}

#[test]
fn test_intermediate_versions_make_rolls_unsafe() -> Result<()> {
    let analyzer = analyzer()?;
    let gaps: Vec<HostFirmwareGap> = (1..=4)
        .map(|i| analyzer.analyze(&host(&format!("esx-{i:02}"), "prod-01", "1.0.0")))
        .collect();

    let mut matrix = StaticCompatibilityMatrix::default();
    matrix.insert(ComponentType::Bios, "1.0.0", "1.5.0");
    let analyses = ClusterCompatibilityAnalyzer::new(Arc::new(matrix), CapacityPolicy::default())
        .analyze(&gaps);
    let analysis = analyses.first().ok_or_else(|| anyhow!("no analysis"))?;
    assert!(analysis.has_risky_combinations());
    assert!(!analysis.rolling_update_feasible);

    let config = OrchestrationConfig {
        max_parallel_hosts_per_cluster: 4,
        require_manual_approval: false,
        ..OrchestrationConfig::default()
    };
    let plan = OrchestrationPlanner::default().plan(&gaps, &config, &analyses)?;
    let phase = plan.phases.first().ok_or_else(|| anyhow!("no phase"))?;
    assert_eq!(phase.hosts_per_batch, 1);
    assert!(!phase.parallel_execution);
    assert!(phase.warnings.iter().any(|w| w.contains("one at a time")));

    let conservative = OrchestrationConfig {
        risk_tolerance: RiskTolerance::Conservative,
        ..config
    };
    assert!(matches!(
        OrchestrationPlanner::default().plan(&gaps, &conservative, &analyses),
        Err(FleetError::CapacityViolation { .. })
    ));
    Ok(())
}

#[test]
fn test_rollback_plan_restores_installed_versions() -> Result<()> {
    let analyzer = analyzer()?;
    let gaps = vec![
        analyzer.analyze(&host("esx-01", "prod-01", "1.0.0")),
        analyzer.analyze(&host("esx-02", "prod-01", "1.5.0")),
    ];
    let analyses =
        ClusterCompatibilityAnalyzer::new(Arc::new(NoRiskMatrix), CapacityPolicy::default())
            .analyze(&gaps);
    let plan =
        OrchestrationPlanner::default().plan(&gaps, &OrchestrationConfig::default(), &analyses)?;

    assert_eq!(plan.status(), PlanStatus::PendingApproval);
    assert!(plan.rollback_plan.automatic);
    let rollback = plan
        .rollback_plan
        .for_host("esx-02")
        .ok_or_else(|| anyhow!("no rollback for esx-02"))?;
    let bios = rollback
        .components
        .iter()
        .find(|c| c.component_type == ComponentType::Bios)
        .ok_or_else(|| anyhow!("bios not in rollback"))?;
    assert_eq!(bios.restore_version, "1.5.0");
    assert_eq!(bios.target_version, "2.0.0");
    Ok(())
}

#[tokio::test]
async fn test_catalog_loads_from_yaml_and_json_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let yaml = dir.path().join("catalog.yaml");
    tokio::fs::write(&yaml, CATALOG).await?;
    let from_yaml: CatalogDocument = load_document(&yaml).await?;

    let json = dir.path().join("catalog.json");
    tokio::fs::write(&json, serde_json::to_string(&from_yaml)?).await?;
    let from_json: CatalogDocument = load_document(&json).await?;

    assert_eq!(from_yaml, from_json);
    assert_eq!(StaticCatalog::from_document(from_json)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_open_store_persists_only_with_state_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let gaps = vec![analyzer()?.analyze(&host("esx-01", "prod-01", "1.0.0"))];
    let analyses =
        ClusterCompatibilityAnalyzer::new(Arc::new(NoRiskMatrix), CapacityPolicy::default())
            .analyze(&gaps);
    let plan =
        OrchestrationPlanner::default().plan(&gaps, &OrchestrationConfig::default(), &analyses)?;

    let store = open_store(Some(dir.path())).await?;
    store.save_plan(&plan).await?;
    let reopened = open_store(Some(dir.path())).await?;
    assert_eq!(reopened.load_plan(plan.id).await?, plan);

    let memory = open_store(None).await?;
    assert!(matches!(
        memory.load_plan(plan.id).await,
        Err(FleetError::NotFound { .. })
    ));
    Ok(())
}
