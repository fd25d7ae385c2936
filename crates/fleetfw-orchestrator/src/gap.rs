//! Per-host firmware gap analysis
//!
//! [`GapAnalyzer::analyze`] is a pure function of a host record and the
//! catalog. A component whose path cannot be resolved is recorded in
//! [`HostFirmwareGap::unresolved`] and does not stop the other components from
//! being analyzed.

use std::cmp::Reverse;
use std::sync::Arc;

use fleetfw_errors::{ErrorCategory, FleetError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::FirmwareCatalog;
use crate::inventory::HostInventory;
use crate::model::{
    CompatibilityRisk, Criticality, FirmwareComponent, HostFirmwareGap, HostRecord,
    UnresolvedComponent, UpdateStep,
};
use crate::version::FirmwareVersion;

/// Major-version distance at which an outdated critical component makes a host high risk.
pub const CRITICAL_MAJOR_DISTANCE: u64 = 2;

/// A host that could not be analyzed at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    /// Requested host id
    pub host_id: String,
    /// Error category
    pub category: ErrorCategory,
    /// Error message
    pub message: String,
}

/// Result of analyzing a set of hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    /// One entry per host that could be read
    pub gaps: Vec<HostFirmwareGap>,
    /// Hosts that could not be read
    pub failures: Vec<AnalysisFailure>,
}

impl GapReport {
    /// Hosts with at least one step to run.
    pub fn outdated(&self) -> impl Iterator<Item = &HostFirmwareGap> {
        self.gaps.iter().filter(|g| g.has_updates())
    }
}

struct PlannedComponent {
    component: FirmwareComponent,
    hops: Vec<String>,
    step_minutes: u32,
    sequence_order: u32,
}

/// Computes firmware gaps against a catalog.
#[derive(Clone)]
pub struct GapAnalyzer {
    catalog: Arc<dyn FirmwareCatalog>,
}

impl GapAnalyzer {
    /// Create an analyzer over `catalog`.
    pub fn new(catalog: Arc<dyn FirmwareCatalog>) -> Self {
        Self { catalog }
    }

    /// Analyze one host.
    pub fn analyze(&self, host: &HostRecord) -> HostFirmwareGap {
        let mut planned = Vec::new();
        let mut unresolved = Vec::new();

        for (&component_type, current) in &host.current_versions {
            let Some(target) = self.catalog.target(&host.model, component_type) else {
                continue;
            };

            match self
                .catalog
                .resolve_path(&host.model, component_type, current)
            {
                Ok(hops) if hops.is_empty() => {
                    if FirmwareVersion::try_compare(current, &target.version)
                        == Some(std::cmp::Ordering::Greater)
                    {
                        debug!(
                            host_id = %host.host_id,
                            component = %component_type,
                            current,
                            target = %target.version,
                            "Installed firmware is newer than catalog target"
                        );
                    }
                }
                Ok(hops) => {
                    let step_count = u32::try_from(hops.len()).unwrap_or(u32::MAX);
                    let intermediate_versions = hops
                        .iter()
                        .take(hops.len().saturating_sub(1))
                        .cloned()
                        .collect();
                    planned.push(PlannedComponent {
                        component: FirmwareComponent {
                            component_type,
                            current_version: current.clone(),
                            target_version: target.version.clone(),
                            criticality: target.criticality,
                            requires_reboot: target.requires_reboot,
                            intermediate_versions,
                            estimated_duration_minutes: target
                                .step_duration_minutes
                                .saturating_mul(step_count),
                        },
                        hops,
                        step_minutes: target.step_duration_minutes,
                        sequence_order: target.update_sequence_order,
                    });
                }
                Err(err) => {
                    warn!(
                        host_id = %host.host_id,
                        component = %component_type,
                        error = %err,
                        "Component update path unresolved"
                    );
                    let reason = match err {
                        FleetError::IncompatibleUpdate { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    unresolved.push(UnresolvedComponent {
                        component_type,
                        current_version: current.clone(),
                        target_version: target.version.clone(),
                        reason,
                    });
                }
            }
        }

        planned.sort_by_key(|p| {
            (
                Reverse(p.component.criticality),
                p.component.component_type.precedence(),
                p.sequence_order,
            )
        });

        let update_sequence = build_sequence(&planned);
        let components: Vec<FirmwareComponent> =
            planned.into_iter().map(|p| p.component).collect();
        let total_update_time_minutes = update_sequence
            .iter()
            .map(|s| u64::from(s.duration_minutes))
            .sum();

        HostFirmwareGap {
            host_id: host.host_id.clone(),
            hostname: host.hostname.clone(),
            model: host.model.clone(),
            service_tag: host.service_tag.clone(),
            cluster_name: host.cluster_name.clone(),
            management_address: host.management_address.clone(),
            compatibility_risk: assess_risk(&components),
            total_update_time_minutes,
            requires_multi_step: components.iter().any(FirmwareComponent::is_multi_step),
            components,
            update_sequence,
            installed_versions: host.current_versions.clone(),
            unresolved,
        }
    }

    /// Fetch and analyze hosts. Hosts that cannot be fetched are reported in
    /// [`GapReport::failures`] and do not abort the others.
    pub async fn analyze_hosts(
        &self,
        inventory: &dyn HostInventory,
        host_ids: &[String],
    ) -> GapReport {
        let mut report = GapReport::default();
        for host_id in host_ids {
            match inventory.host(host_id).await {
                Ok(host) => report.gaps.push(self.analyze(&host)),
                Err(err) => {
                    warn!(host_id = %host_id, error = %err, "Host discovery failed");
                    report.failures.push(AnalysisFailure {
                        host_id: host_id.clone(),
                        category: err.category(),
                        message: err.to_string(),
                    });
                }
            }
        }
        report
    }
}

fn build_sequence(planned: &[PlannedComponent]) -> Vec<UpdateStep> {
    let mut steps = Vec::new();
    for p in planned {
        let component_type = p.component.component_type;
        let mut from = p.component.current_version.clone();
        for to in &p.hops {
            let step_number = u32::try_from(steps.len() + 1).unwrap_or(u32::MAX);
            steps.push(UpdateStep {
                step_number,
                component_type,
                from_version: from.clone(),
                to_version: to.clone(),
                duration_minutes: p.step_minutes,
                requires_reboot: p.component.requires_reboot,
                validation_required: component_type.is_boot_critical(),
            });
            from.clone_from(to);
        }
    }
    steps
}

/// Derive host risk from its outdated components.
pub fn assess_risk(components: &[FirmwareComponent]) -> CompatibilityRisk {
    let far_behind_critical = |c: &FirmwareComponent| {
        c.criticality == Criticality::Critical
            && FirmwareVersion::major_distance(&c.current_version, &c.target_version)
                .is_some_and(|d| d >= CRITICAL_MAJOR_DISTANCE)
    };

    if components
        .iter()
        .any(|c| c.is_multi_step() || far_behind_critical(c))
    {
        CompatibilityRisk::High
    } else if components.is_empty() {
        CompatibilityRisk::Low
    } else {
        CompatibilityRisk::Medium
    }
}
