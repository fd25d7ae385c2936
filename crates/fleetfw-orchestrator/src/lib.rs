//! Firmware gap analysis and rolling update orchestration for server fleets
//!
//! The crate takes a fleet inventory and a firmware catalog, works out which
//! components on which hosts are behind, and updates them cluster by cluster
//! without dropping any cluster below its availability floor.
//!
//! # Architecture
//!
//! Data flows through the modules in this order:
//!
//! - [`gap`]: per-host gap analysis and ordered update sequences
//! - [`cluster`]: per-cluster drift, risky version pairs and safe batch sizes
//! - [`planner`]: phased [`OrchestrationPlan`]s under an operator policy
//! - [`executor`]: rolling execution with maintenance mode and capacity leases
//! - [`protocol`]: single-host jobs over Redfish, WS-Man, RACADM, IPMI or SSH
//! - [`state`]: validated plan and job lifecycles
//!
//! Supporting modules: [`version`] and [`catalog`] resolve upgrade paths,
//! [`inventory`] and [`store`] define the collaborators, [`window`] places
//! phases in maintenance windows, [`config`] loads engine settings, and
//! [`service`] ties everything into [`FleetOrchestrator`].
//!
//! # Safety
//!
//! A job cannot be cancelled once its controller starts flashing. Capacity is
//! reserved under one lock per cluster, so concurrent batches cannot both
//! take the last free slot.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use fleetfw_orchestrator::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog: CatalogDocument = serde_yaml::from_str(
//!     r#"
//! entries:
//!   - model: R750
//!     component: bios
//!     target_version: "2.0.0"
//!     criticality: critical
//!     upgrade_chains: [["1.0.0", "1.5.0", "2.0.0"]]
//! "#,
//! )?;
//! let analyzer = GapAnalyzer::new(Arc::new(StaticCatalog::from_document(catalog)?));
//!
//! let host = HostRecord {
//!     host_id: "esx-01".into(),
//!     hostname: "esx-01.example.net".into(),
//!     model: "R750".into(),
//!     service_tag: "ABC1234".into(),
//!     cluster_name: Some("prod-01".into()),
//!     management_address: "10.0.0.11".into(),
//!     current_versions: BTreeMap::from([(ComponentType::Bios, "1.0.0".into())]),
//! };
//!
//! let gap = analyzer.analyze(&host);
//! assert_eq!(gap.update_sequence.len(), 2);
//! assert!(gap.requires_multi_step);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod alert;
pub mod capacity;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod executor;
pub mod gap;
pub mod inventory;
pub mod model;
pub mod plan;
pub mod planner;
pub mod prelude;
pub mod protocol;
pub mod service;
pub mod state;
pub mod store;
pub mod version;
pub mod window;

pub use alert::{Alert, AlertSink, TracingAlertSink};
pub use capacity::{CapacityLease, CapacityTracker};
pub use catalog::{CatalogDocument, CatalogEntry, CatalogTarget, FirmwareCatalog, StaticCatalog};
pub use cluster::{
    CapacityPolicy, ClusterCompatibilityAnalysis, ClusterCompatibilityAnalyzer,
    CompatibilityMatrix, NoRiskMatrix, RiskyCombination, StaticCompatibilityMatrix,
};
pub use config::EngineConfig;
pub use executor::{
    ClusterCapacity, ClusterRollingExecutor, ExecutionSettings, PlanControl, PlanOutcome,
    VirtualizationManager,
};
pub use gap::{GapAnalyzer, GapReport};
pub use inventory::{CredentialResolver, Credentials, HostInventory, InMemoryInventory};
pub use model::{
    CompatibilityRisk, ComponentType, Criticality, FirmwareComponent, HostFirmwareGap, HostRecord,
    UpdateStep,
};
pub use plan::{ExecutionPhase, OrchestrationPlan, RollbackPlan};
pub use planner::{OrchestrationConfig, OrchestrationPlanner, RiskTolerance, Strategy};
pub use protocol::{
    BmcTransport, ManagementProtocol, ProtocolOrchestrator, ProtocolSettings, UpdateJob,
    UpdateProgress,
};
pub use service::{Collaborators, FleetOrchestrator};
pub use state::{JobStatus, PlanStatus};
pub use store::{InMemoryStore, JsonFileStore, PlanStore};
pub use version::FirmwareVersion;
