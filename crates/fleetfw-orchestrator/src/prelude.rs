//! Convenience re-exports for common orchestration types

pub use crate::alert::{Alert, AlertSink, TracingAlertSink};
pub use crate::catalog::{CatalogDocument, CatalogEntry, FirmwareCatalog, StaticCatalog};
pub use crate::cluster::{
    CapacityPolicy, ClusterCompatibilityAnalysis, ClusterCompatibilityAnalyzer,
    CompatibilityMatrix, NoRiskMatrix, RiskyCombination, StaticCompatibilityMatrix,
};
pub use crate::config::EngineConfig;
pub use crate::executor::{
    ClusterCapacity, ClusterRollingExecutor, PlanControl, PlanOutcome, VirtualizationManager,
};
pub use crate::gap::{GapAnalyzer, GapReport};
pub use crate::inventory::{
    CredentialResolver, Credentials, HostInventory, InMemoryInventory, StaticCredentialResolver,
};
pub use crate::model::{
    CompatibilityRisk, ComponentType, Criticality, FirmwareComponent, HostFirmwareGap, HostRecord,
    UpdateStep,
};
pub use crate::plan::{ExecutionPhase, OrchestrationPlan};
pub use crate::planner::{OrchestrationConfig, OrchestrationPlanner, RiskTolerance, Strategy};
pub use crate::protocol::{
    BmcEndpoint, BmcTransport, ManagementProtocol, ProtocolOrchestrator, ProtocolSettings,
    UpdateJob, UpdateProgress,
};
pub use crate::service::{Collaborators, FleetOrchestrator};
pub use crate::state::{JobStatus, PlanStatus};
pub use crate::store::{InMemoryStore, JsonFileStore, PlanStore};
pub use fleetfw_errors::{FleetError, ProtocolFailure};
