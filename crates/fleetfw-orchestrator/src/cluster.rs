//! Cluster-level rolling update feasibility
//!
//! Hosts are grouped by cluster membership; standalone hosts are skipped here
//! and handled by the planner as singleton phases. For each cluster the
//! analyzer derives the availability floor, the safe batch size, the firmware
//! drift currently present, and any version pairs the compatibility matrix
//! marks as unsafe to run side by side.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{ComponentType, HostFirmwareGap};
use crate::version::FirmwareVersion;

/// Lookup of firmware version pairs that must not coexist in a cluster.
pub trait CompatibilityMatrix: Send + Sync {
    /// Whether `version_a` and `version_b` of `component` are unsafe together.
    fn is_risky(&self, component: ComponentType, version_a: &str, version_b: &str) -> bool;
}

/// Matrix with no known risky combinations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRiskMatrix;

impl CompatibilityMatrix for NoRiskMatrix {
    fn is_risky(&self, _component: ComponentType, _a: &str, _b: &str) -> bool {
        false
    }
}

/// A version pair flagged by the compatibility matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiskyCombination {
    /// Component the pair applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentType>,
    /// First version
    pub version_a: String,
    /// Second version
    pub version_b: String,
}

/// Symmetric in-memory matrix.
#[derive(Debug, Clone, Default)]
pub struct StaticCompatibilityMatrix {
    pairs: HashSet<(ComponentType, String, String)>,
}

impl StaticCompatibilityMatrix {
    fn key(component: ComponentType, a: &str, b: &str) -> (ComponentType, String, String) {
        let a = canonical(a);
        let b = canonical(b);
        if a <= b {
            (component, a, b)
        } else {
            (component, b, a)
        }
    }

    /// Flag a pair as risky in both directions.
    pub fn insert(&mut self, component: ComponentType, version_a: &str, version_b: &str) {
        self.pairs.insert(Self::key(component, version_a, version_b));
    }

    /// Build from declared combinations; entries without a component are ignored.
    pub fn from_combinations<'a>(combinations: impl IntoIterator<Item = &'a RiskyCombination>) -> Self {
        let mut matrix = Self::default();
        for combo in combinations {
            if let Some(component) = combo.component {
                matrix.insert(component, &combo.version_a, &combo.version_b);
            }
        }
        matrix
    }

    /// Number of flagged pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no pairs are flagged.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl CompatibilityMatrix for StaticCompatibilityMatrix {
    fn is_risky(&self, component: ComponentType, version_a: &str, version_b: &str) -> bool {
        self.pairs.contains(&Self::key(component, version_a, version_b))
    }
}

fn canonical(raw: &str) -> String {
    FirmwareVersion::parse(raw)
        .map(|v| v.canonical())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn default_min_active_ratio() -> f64 {
    0.5
}

fn default_max_simultaneous_cap() -> usize {
    4
}

/// Availability floor and batch size policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    /// Fraction of hosts that must stay active
    #[serde(default = "default_min_active_ratio")]
    pub min_active_ratio: f64,
    /// Fixed floor applied to every cluster, overrides the ratio
    #[serde(default)]
    pub min_active_hosts: Option<usize>,
    /// Per-cluster floors, override everything else
    #[serde(default)]
    pub min_active_overrides: HashMap<String, usize>,
    /// Upper bound on hosts updated at once in one cluster
    #[serde(default = "default_max_simultaneous_cap")]
    pub max_simultaneous_cap: usize,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            min_active_ratio: default_min_active_ratio(),
            min_active_hosts: None,
            min_active_overrides: HashMap::new(),
            max_simultaneous_cap: default_max_simultaneous_cap(),
        }
    }
}

impl CapacityPolicy {
    /// Hosts that must stay active in `cluster` of `total_hosts`.
    pub fn min_active_hosts(&self, cluster: &str, total_hosts: usize) -> usize {
        let floor = match self.min_active_overrides.get(cluster) {
            Some(&n) => n,
            None => match self.min_active_hosts {
                Some(n) => n,
                None => ratio_floor(total_hosts, self.min_active_ratio),
            },
        };
        floor.min(total_hosts)
    }

    /// Safe batch size: `max(1, min(total - min_active, cap))`.
    pub fn max_simultaneous_updates(&self, total_hosts: usize, min_active: usize) -> usize {
        total_hosts
            .saturating_sub(min_active)
            .min(self.max_simultaneous_cap)
            .max(1)
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "ratio is clamped to [0, 1] and host counts are small"
)]
fn ratio_floor(total_hosts: usize, ratio: f64) -> usize {
    let ratio = ratio.clamp(0.0, 1.0);
    let scaled = (total_hosts as f64 * ratio).ceil();
    (scaled as usize).min(total_hosts)
}

/// Distinct installed versions of one component across a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVariation {
    /// Distinct versions, oldest first
    pub versions: Vec<String>,
    /// Hosts on each version
    pub host_count_per_version: BTreeMap<String, usize>,
}

/// Versions that will coexist while a component rolls through a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityWindow {
    /// Component being rolled
    pub component_type: ComponentType,
    /// Installed and intermediate versions present during the roll
    pub coexisting_versions: Vec<String>,
    /// Version the cluster converges on
    pub target_version: String,
    /// Pairs the matrix flags
    pub risky_combinations: Vec<RiskyCombination>,
}

/// Rolling update assessment for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCompatibilityAnalysis {
    /// Cluster name
    pub cluster_name: String,
    /// Hosts analyzed in the cluster
    pub total_hosts: usize,
    /// Availability floor
    pub min_active_hosts: usize,
    /// Safe batch size
    pub max_simultaneous_updates: usize,
    /// Whole hours for the batched roll
    pub estimated_cluster_update_duration_hours: u64,
    /// Drift per component
    pub firmware_variations: BTreeMap<ComponentType, FirmwareVariation>,
    /// Whether a rolling update can proceed in parallel batches
    ///
    /// False when the cluster has no capacity headroom or when any component
    /// window holds a risky version pair. A risky pair alone does not block
    /// the rollout: the planner serializes the phase to one host per batch,
    /// and only a conservative policy rejects it.
    pub rolling_update_feasible: bool,
    /// Per-component coexistence windows
    pub compatibility_windows: Vec<CompatibilityWindow>,
    /// Human-readable findings
    pub warnings: Vec<String>,
}

impl ClusterCompatibilityAnalysis {
    /// Whether any window has a flagged pair.
    pub fn has_risky_combinations(&self) -> bool {
        self.compatibility_windows
            .iter()
            .any(|w| !w.risky_combinations.is_empty())
    }
}

/// Aggregates host gaps into per-cluster assessments.
#[derive(Clone)]
pub struct ClusterCompatibilityAnalyzer {
    matrix: Arc<dyn CompatibilityMatrix>,
    policy: CapacityPolicy,
}

impl ClusterCompatibilityAnalyzer {
    /// Create an analyzer.
    pub fn new(matrix: Arc<dyn CompatibilityMatrix>, policy: CapacityPolicy) -> Self {
        Self { matrix, policy }
    }

    /// Capacity policy in effect.
    pub fn policy(&self) -> &CapacityPolicy {
        &self.policy
    }

    /// Analyze every cluster present in `gaps`, sorted by cluster name.
    pub fn analyze(&self, gaps: &[HostFirmwareGap]) -> Vec<ClusterCompatibilityAnalysis> {
        let mut clusters: BTreeMap<&str, Vec<&HostFirmwareGap>> = BTreeMap::new();
        for gap in gaps {
            if let Some(name) = gap.cluster_name.as_deref() {
                clusters.entry(name).or_default().push(gap);
            }
        }
        clusters
            .into_iter()
            .map(|(name, hosts)| self.analyze_cluster(name, &hosts))
            .collect()
    }

    /// Analyze one cluster's hosts.
    pub fn analyze_cluster(
        &self,
        cluster_name: &str,
        hosts: &[&HostFirmwareGap],
    ) -> ClusterCompatibilityAnalysis {
        let total_hosts = hosts.len();
        let min_active_hosts = self.policy.min_active_hosts(cluster_name, total_hosts);
        let max_simultaneous_updates = self
            .policy
            .max_simultaneous_updates(total_hosts, min_active_hosts);
        let mut warnings = Vec::new();

        let total_minutes: u64 = hosts.iter().map(|h| h.total_update_time_minutes).sum();
        let batch_minutes = (max_simultaneous_updates as u64).saturating_mul(60);
        let estimated_cluster_update_duration_hours = total_minutes.div_ceil(batch_minutes);

        let firmware_variations = variations(hosts);
        for (component, variation) in &firmware_variations {
            if variation.versions.len() > 1 {
                warnings.push(format!(
                    "{component} drift: {} versions installed ({})",
                    variation.versions.len(),
                    variation.versions.join(", ")
                ));
            }
        }

        let compatibility_windows = self.windows(hosts);
        for window in &compatibility_windows {
            for combo in &window.risky_combinations {
                warn!(
                    cluster = cluster_name,
                    component = %window.component_type,
                    version_a = %combo.version_a,
                    version_b = %combo.version_b,
                    "Risky firmware combination during rolling update"
                );
                warnings.push(format!(
                    "{} versions {} and {} are flagged as unsafe together",
                    window.component_type, combo.version_a, combo.version_b
                ));
            }
        }

        let has_headroom = total_hosts.saturating_sub(min_active_hosts) >= 1;
        if !has_headroom {
            warnings.push(format!(
                "no capacity headroom: {total_hosts} hosts with {min_active_hosts} required active"
            ));
        }
        let risky = compatibility_windows
            .iter()
            .any(|w| !w.risky_combinations.is_empty());
        let rolling_update_feasible = has_headroom && !risky;

        debug!(
            cluster = cluster_name,
            total_hosts,
            min_active_hosts,
            max_simultaneous_updates,
            rolling_update_feasible,
            "Cluster analyzed"
        );

        ClusterCompatibilityAnalysis {
            cluster_name: cluster_name.to_string(),
            total_hosts,
            min_active_hosts,
            max_simultaneous_updates,
            estimated_cluster_update_duration_hours,
            firmware_variations,
            rolling_update_feasible,
            compatibility_windows,
            warnings,
        }
    }

    fn windows(&self, hosts: &[&HostFirmwareGap]) -> Vec<CompatibilityWindow> {
        // component -> (coexisting versions, target)
        let mut rolling: BTreeMap<ComponentType, (BTreeSet<String>, Option<String>)> =
            BTreeMap::new();
        for host in hosts {
            for component in &host.components {
                let slot = rolling.entry(component.component_type).or_default();
                slot.0.extend(component.intermediate_versions.iter().cloned());
                if slot.1.is_none() {
                    slot.1 = Some(component.target_version.clone());
                }
            }
        }
        for host in hosts {
            for (component, version) in &host.installed_versions {
                if let Some(slot) = rolling.get_mut(component) {
                    slot.0.insert(version.clone());
                }
            }
        }

        rolling
            .into_iter()
            .filter_map(|(component_type, (versions, target))| {
                let target_version = target?;
                let mut coexisting: Vec<String> = versions.into_iter().collect();
                sort_versions(&mut coexisting);

                let mut everything = coexisting.clone();
                if !everything.iter().any(|v| canonical(v) == canonical(&target_version)) {
                    everything.push(target_version.clone());
                }
                let mut risky_combinations = Vec::new();
                for (i, a) in everything.iter().enumerate() {
                    for b in everything.iter().skip(i + 1) {
                        if self.matrix.is_risky(component_type, a, b) {
                            risky_combinations.push(RiskyCombination {
                                component: Some(component_type),
                                version_a: a.clone(),
                                version_b: b.clone(),
                            });
                        }
                    }
                }
                Some(CompatibilityWindow {
                    component_type,
                    coexisting_versions: coexisting,
                    target_version,
                    risky_combinations,
                })
            })
            .collect()
    }
}

fn variations(hosts: &[&HostFirmwareGap]) -> BTreeMap<ComponentType, FirmwareVariation> {
    let mut out: BTreeMap<ComponentType, FirmwareVariation> = BTreeMap::new();
    for host in hosts {
        for (component, version) in &host.installed_versions {
            let entry = out.entry(*component).or_default();
            *entry
                .host_count_per_version
                .entry(version.clone())
                .or_insert(0) += 1;
        }
    }
    for variation in out.values_mut() {
        variation.versions = variation.host_count_per_version.keys().cloned().collect();
        sort_versions(&mut variation.versions);
    }
    out
}

fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        FirmwareVersion::try_compare(a, b).unwrap_or_else(|| a.cmp(b))
    });
}
