//! Engine configuration
//!
//! One document covers capacity policy, protocol timeouts, execution tuning,
//! the state directory, maintenance windows and the risky-version list.
//! Files ending in `.yaml`/`.yml` are read as YAML, everything else as JSON.

use std::path::{Path, PathBuf};

use fleetfw_errors::FleetError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{CapacityPolicy, RiskyCombination};
use crate::executor::ExecutionSettings;
use crate::protocol::ProtocolSettings;
use crate::window::MaintenanceWindow;

/// Schema prefix every engine config must carry.
pub const SCHEMA_PREFIX: &str = "fleetfw.config/";

fn default_schema_version() -> String {
    format!("{SCHEMA_PREFIX}v1")
}

/// Persistent store location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory for plan, job and log files; in-memory when unset
    pub state_dir: Option<PathBuf>,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Config schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Availability floors and batch caps
    #[serde(default)]
    pub capacity: CapacityPolicy,
    /// Management protocol selection and timeouts
    #[serde(default)]
    pub protocol: ProtocolSettings,
    /// Executor tuning
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Persistent store
    #[serde(default)]
    pub store: StoreSettings,
    /// Cluster maintenance windows
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,
    /// Version pairs that must not coexist in a cluster
    #[serde(default)]
    pub risky_combinations: Vec<RiskyCombination>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            capacity: CapacityPolicy::default(),
            protocol: ProtocolSettings::default(),
            execution: ExecutionSettings::default(),
            store: StoreSettings::default(),
            maintenance_windows: Vec::new(),
            risky_combinations: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Io`] if the file cannot be read and
    /// [`FleetError::Config`] if it does not parse or validate.
    pub async fn load_from_path(path: impl AsRef<Path>) -> Result<Self, FleetError> {
        let path = path.as_ref();
        let config: EngineConfig = load_document(path).await?;
        config.validate()?;
        info!(
            path = %path.display(),
            windows = config.maintenance_windows.len(),
            risky_pairs = config.risky_combinations.len(),
            "Loaded engine config"
        );
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), FleetError> {
        if !self.schema_version.starts_with(SCHEMA_PREFIX) {
            return Err(FleetError::config(format!(
                "invalid schema version: {}",
                self.schema_version
            )));
        }
        let ratio = self.capacity.min_active_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(FleetError::config(format!(
                "capacity.min_active_ratio must be within [0, 1], got {ratio}"
            )));
        }
        if self.capacity.max_simultaneous_cap == 0 {
            return Err(FleetError::config(
                "capacity.max_simultaneous_cap must be at least 1",
            ));
        }
        if self.protocol.probe_timeout_ms == 0
            || self.protocol.step_timeout_secs == 0
            || self.protocol.reboot_timeout_secs == 0
        {
            return Err(FleetError::config("protocol timeouts must be non-zero"));
        }
        if self.execution.maintenance_ack_timeout_secs == 0 {
            return Err(FleetError::config(
                "execution.maintenance_ack_timeout_secs must be non-zero",
            ));
        }
        if let Some(window) = self.maintenance_windows.iter().find(|w| w.duration_minutes == 0) {
            return Err(FleetError::config(format!(
                "maintenance window for {} has zero duration",
                window.cluster_name
            )));
        }
        Ok(())
    }
}

/// Read a JSON or YAML document, chosen by file extension.
///
/// # Errors
///
/// Returns [`FleetError::Io`] if the file cannot be read and
/// [`FleetError::Config`] if it does not parse.
pub async fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, FleetError> {
    let content = tokio::fs::read_to_string(path).await?;
    let parsed = if is_yaml(path) {
        serde_yaml::from_str(&content)
            .map_err(|e| FleetError::config(format!("{}: {e}", path.display())))?
    } else {
        serde_json::from_str(&content)
            .map_err(|e| FleetError::config(format!("{}: {e}", path.display())))?
    };
    debug!(path = %path.display(), "Loaded document");
    Ok(parsed)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}
