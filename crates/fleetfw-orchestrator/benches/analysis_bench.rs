//! Benchmarks for gap and cluster analysis
//!
//! Run with: cargo bench --bench analysis_bench

use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fleetfw_orchestrator::prelude::*;

fn catalog() -> Option<Arc<StaticCatalog>> {
    let chain: Vec<String> = (0..12).map(|i| format!("2.{i}.0")).collect();
    let target = chain.last()?.clone();
    let document = CatalogDocument {
        entries: vec![
            CatalogEntry {
                model: "R760".to_string(),
                component: ComponentType::Bios,
                target_version: target,
                criticality: Criticality::Critical,
                step_duration_minutes: 20,
                requires_reboot: true,
                update_sequence_order: 0,
                strict_paths: false,
                upgrade_chains: vec![chain],
            },
            CatalogEntry {
                model: "R760".to_string(),
                component: ComponentType::Nic,
                target_version: "22.5.7".to_string(),
                criticality: Criticality::Recommended,
                step_duration_minutes: 5,
                requires_reboot: false,
                update_sequence_order: 0,
                strict_paths: false,
                upgrade_chains: Vec::new(),
            },
        ],
    };
    StaticCatalog::from_document(document).ok().map(Arc::new)
}

fn hosts(count: usize, clusters: usize) -> Vec<HostRecord> {
    (0..count)
        .map(|i| HostRecord {
            host_id: format!("esx-{i:04}"),
            hostname: format!("esx-{i:04}.example.net"),
            model: "R760".to_string(),
            service_tag: format!("TAG{i:04}"),
            cluster_name: Some(format!("cluster-{}", i % clusters.max(1))),
            management_address: format!("10.1.{}.{}", i / 250, i % 250),
            current_versions: BTreeMap::from([
                (ComponentType::Bios, format!("2.{}.0", i % 6)),
                (ComponentType::Nic, "21.0.1".to_string()),
            ]),
        })
        .collect()
}

fn bench_gap_analysis(c: &mut Criterion) {
    let Some(catalog) = catalog() else {
        return;
    };
    let analyzer = GapAnalyzer::new(catalog);
    let mut group = c.benchmark_group("gap_analysis");
    for count in [10usize, 100, 1000] {
        let records = hosts(count, 8);
        group.bench_with_input(BenchmarkId::from_parameter(count), &records, |b, records| {
            b.iter(|| {
                for record in records {
                    black_box(analyzer.analyze(black_box(record)));
                }
            });
        });
    }
    group.finish();
}

fn bench_cluster_analysis(c: &mut Criterion) {
    let Some(catalog) = catalog() else {
        return;
    };
    let analyzer = GapAnalyzer::new(catalog);
    let cluster_analyzer =
        ClusterCompatibilityAnalyzer::new(Arc::new(NoRiskMatrix), CapacityPolicy::default());
    let mut group = c.benchmark_group("cluster_analysis");
    for count in [100usize, 1000] {
        let gaps: Vec<HostFirmwareGap> = hosts(count, 16)
            .iter()
            .map(|h| analyzer.analyze(h))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &gaps, |b, gaps| {
            b.iter(|| black_box(cluster_analyzer.analyze(black_box(gaps))));
        });
    }
    group.finish();
}

fn bench_planning(c: &mut Criterion) {
    let Some(catalog) = catalog() else {
        return;
    };
    let analyzer = GapAnalyzer::new(catalog);
    let cluster_analyzer =
        ClusterCompatibilityAnalyzer::new(Arc::new(NoRiskMatrix), CapacityPolicy::default());
    let planner = OrchestrationPlanner::default();
    let config = OrchestrationConfig {
        max_parallel_clusters: 4,
        max_parallel_hosts_per_cluster: 4,
        ..OrchestrationConfig::default()
    };
    let gaps: Vec<HostFirmwareGap> = hosts(500, 16).iter().map(|h| analyzer.analyze(h)).collect();
    let analyses = cluster_analyzer.analyze(&gaps);

    c.bench_function("plan_500_hosts", |b| {
        b.iter(|| black_box(planner.plan(black_box(&gaps), &config, &analyses).ok()));
    });
}

criterion_group!(
    benches,
    bench_gap_analysis,
    bench_cluster_analysis,
    bench_planning
);
criterion_main!(benches);
