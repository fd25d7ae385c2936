//! Fleet and firmware data model
//!
//! These are immutable snapshots: a [`HostFirmwareGap`] is recomputed from the
//! inventory and catalog on every analysis run and is never the source of truth.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Firmware component tracked on a host.
///
/// Variant order is the hardware dependency convention: lower-level
/// components are updated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// System BIOS / UEFI
    Bios,
    /// Board management controller (iDRAC, iLO, XCC)
    Bmc,
    /// RAID / HBA storage controller
    StorageController,
    /// Network interface card
    Nic,
    /// Complex programmable logic device
    Cpld,
    /// Power supply unit
    PowerSupply,
}

impl ComponentType {
    /// All component types in precedence order.
    pub const ALL: [ComponentType; 6] = [
        ComponentType::Bios,
        ComponentType::Bmc,
        ComponentType::StorageController,
        ComponentType::Nic,
        ComponentType::Cpld,
        ComponentType::PowerSupply,
    ];

    /// Position in the update order, lower runs first.
    pub fn precedence(self) -> u8 {
        match self {
            ComponentType::Bios => 0,
            ComponentType::Bmc => 1,
            ComponentType::StorageController => 2,
            ComponentType::Nic => 3,
            ComponentType::Cpld => 4,
            ComponentType::PowerSupply => 5,
        }
    }

    /// Whether changing this firmware can leave the host unable to boot.
    pub fn is_boot_critical(self) -> bool {
        matches!(self, ComponentType::Bios | ComponentType::StorageController)
    }

    /// Stable name used in logs and documents.
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::Bios => "bios",
            ComponentType::Bmc => "bmc",
            ComponentType::StorageController => "storage_controller",
            ComponentType::Nic => "nic",
            ComponentType::Cpld => "cpld",
            ComponentType::PowerSupply => "power_supply",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bios" | "uefi" => Ok(ComponentType::Bios),
            "bmc" | "idrac" => Ok(ComponentType::Bmc),
            "storage_controller" | "raid" => Ok(ComponentType::StorageController),
            "nic" => Ok(ComponentType::Nic),
            "cpld" => Ok(ComponentType::Cpld),
            "power_supply" | "psu" => Ok(ComponentType::PowerSupply),
            other => Err(format!("unknown component type '{other}'")),
        }
    }
}

/// How urgently a firmware release should be applied.
///
/// Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Apply when convenient
    Optional,
    /// Vendor recommended
    Recommended,
    /// Fixes significant defects
    Important,
    /// Security or data-integrity fix
    Critical,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criticality::Optional => "optional",
            Criticality::Recommended => "recommended",
            Criticality::Important => "important",
            Criticality::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Risk of updating a host, derived from its component gaps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityRisk {
    /// Nothing outdated
    #[default]
    Low,
    /// Single-step updates only
    Medium,
    /// Multi-step paths or far-behind critical firmware
    High,
}

impl fmt::Display for CompatibilityRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompatibilityRisk::Low => "low",
            CompatibilityRisk::Medium => "medium",
            CompatibilityRisk::High => "high",
        };
        f.write_str(name)
    }
}

/// Inventory record for a physical server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Inventory identifier
    pub host_id: String,
    /// DNS hostname
    pub hostname: String,
    /// Hardware model, used as the catalog key
    pub model: String,
    /// Vendor service tag / serial
    pub service_tag: String,
    /// Virtualization cluster membership, `None` for standalone hosts
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Out-of-band management controller address
    pub management_address: String,
    /// Installed firmware per component
    #[serde(default)]
    pub current_versions: BTreeMap<ComponentType, String>,
}

/// One outdated component on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareComponent {
    /// Component type
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    /// Installed version
    pub current_version: String,
    /// Catalog target version
    pub target_version: String,
    /// Catalog criticality
    pub criticality: Criticality,
    /// Whether applying this firmware needs a host reboot
    pub requires_reboot: bool,
    /// Versions that must be installed on the way to the target
    #[serde(default)]
    pub intermediate_versions: Vec<String>,
    /// Sum of this component's step durations
    pub estimated_duration_minutes: u32,
}

impl FirmwareComponent {
    /// Number of update steps this component contributes.
    pub fn step_count(&self) -> usize {
        self.intermediate_versions.len().saturating_add(1)
    }

    /// Whether the target can only be reached through intermediate versions.
    pub fn is_multi_step(&self) -> bool {
        !self.intermediate_versions.is_empty()
    }
}

/// A single firmware flash in a host's update sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStep {
    /// 1-based position in the host's sequence
    pub step_number: u32,
    /// Component being flashed
    pub component_type: ComponentType,
    /// Version before this step
    pub from_version: String,
    /// Version after this step
    pub to_version: String,
    /// Expected duration
    pub duration_minutes: u32,
    /// Host reboot needed to activate
    pub requires_reboot: bool,
    /// Post-step validation needed (boot-critical firmware)
    pub validation_required: bool,
}

/// A component whose update path could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedComponent {
    /// Component type
    pub component_type: ComponentType,
    /// Installed version
    pub current_version: String,
    /// Catalog target version
    pub target_version: String,
    /// Why no path exists
    pub reason: String,
}

/// Per-host result of gap analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFirmwareGap {
    /// Inventory identifier
    pub host_id: String,
    /// DNS hostname
    pub hostname: String,
    /// Hardware model
    pub model: String,
    /// Vendor service tag
    pub service_tag: String,
    /// Cluster membership
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Out-of-band management controller address
    pub management_address: String,
    /// Derived update risk
    pub compatibility_risk: CompatibilityRisk,
    /// Sum of all step durations
    pub total_update_time_minutes: u64,
    /// Outdated components
    pub components: Vec<FirmwareComponent>,
    /// Ordered update steps for the whole host
    pub update_sequence: Vec<UpdateStep>,
    /// Whether any component needs intermediate versions
    pub requires_multi_step: bool,
    /// Every tracked component's installed version, outdated or not
    #[serde(default)]
    pub installed_versions: BTreeMap<ComponentType, String>,
    /// Components with no valid update path
    #[serde(default)]
    pub unresolved: Vec<UnresolvedComponent>,
}

impl HostFirmwareGap {
    /// Whether the host has anything to flash.
    pub fn has_updates(&self) -> bool {
        !self.update_sequence.is_empty()
    }

    /// Whether any step needs a host reboot.
    pub fn requires_reboot(&self) -> bool {
        self.update_sequence.iter().any(|s| s.requires_reboot)
    }

    /// Highest criticality among outdated components.
    pub fn max_criticality(&self) -> Option<Criticality> {
        self.components.iter().map(|c| c.criticality).max()
    }

    /// Whether a critical component is part of this host's update.
    pub fn has_critical_component(&self) -> bool {
        self.max_criticality() == Some(Criticality::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_precedence_matches_variant_order() {
        for pair in ComponentType::ALL.windows(2) {
            if let [a, b] = pair {
                assert!(a.precedence() < b.precedence());
                assert!(a < b);
            }
        }
    }

    #[test]
    fn test_boot_critical_components() {
        assert!(ComponentType::Bios.is_boot_critical());
        assert!(ComponentType::StorageController.is_boot_critical());
        assert!(!ComponentType::Bmc.is_boot_critical());
        assert!(!ComponentType::Nic.is_boot_critical());
    }

    #[test]
    fn test_component_from_str_aliases() {
        assert_eq!("iDRAC".parse::<ComponentType>(), Ok(ComponentType::Bmc));
        assert_eq!("raid".parse::<ComponentType>(), Ok(ComponentType::StorageController));
        assert!(matches!("gpu".parse::<ComponentType>(), Err(_)));
    }

    #[test]
    fn test_criticality_ordering() {
        assert!(Criticality::Critical > Criticality::Important);
        assert!(Criticality::Important > Criticality::Recommended);
        assert!(Criticality::Recommended > Criticality::Optional);
    }

    #[test]
    fn test_host_record_serde_uses_component_names() -> Result<(), serde_json::Error> {
        let json = r#"{
            "host_id": "h1",
            "hostname": "esx-01.lab",
            "model": "R750",
            "service_tag": "ABC123",
            "cluster_name": "prod-01",
            "management_address": "10.0.0.11",
            "current_versions": {"bios": "1.0.0", "storage_controller": "52.14.0"}
        }"#;
        let host: HostRecord = serde_json::from_str(json)?;
        assert_eq!(
            host.current_versions.get(&ComponentType::StorageController),
            Some(&"52.14.0".to_string())
        );
        Ok(())
    }
}
