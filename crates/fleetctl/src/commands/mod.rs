//! Command implementations for fleetctl

pub mod catalog;
pub mod clusters;
pub mod gaps;
pub mod plan;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fleetfw_orchestrator::prelude::*;

use crate::error::CliError;
use crate::snapshot::{Fleet, FleetSnapshot};

#[derive(Args, Debug)]
pub struct GapsArgs {
    /// Host ids to analyze; every host when omitted
    pub hosts: Vec<String>,
    /// Only list hosts with pending updates
    #[arg(long)]
    pub outdated: bool,
    /// Print each host's ordered update steps
    #[arg(short, long)]
    pub steps: bool,
}

#[derive(Args, Debug)]
pub struct ClustersArgs {
    /// Restrict output to one cluster
    #[arg(short, long)]
    pub cluster: Option<String>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Orchestration policy file (JSON or YAML)
    #[arg(short, long)]
    pub policy: Option<PathBuf>,
    /// Plan only these hosts; every outdated host when omitted
    #[arg(long = "host")]
    pub hosts: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ValidateCatalogArgs {
    /// Catalog file to validate instead of the snapshot's catalog
    pub catalog: Option<PathBuf>,
}

/// Inputs shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Fleet snapshot path
    pub snapshot: Option<PathBuf>,
    /// Engine config path
    pub config: Option<PathBuf>,
}

impl Session {
    /// Engine settings from `--config`, or defaults.
    pub async fn config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load_from_path(path)
                .await
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(EngineConfig::default()),
        }
    }

    /// Raw snapshot from `--snapshot`.
    pub async fn snapshot(&self) -> Result<FleetSnapshot> {
        let path = self.snapshot.as_ref().ok_or(CliError::MissingSnapshot)?;
        FleetSnapshot::load(path).await
    }

    /// Snapshot wired to analyzers and planner.
    pub async fn fleet(&self) -> Result<(Fleet, EngineConfig)> {
        let config = self.config().await?;
        let fleet = Fleet::new(self.snapshot().await?, &config)?;
        Ok((fleet, config))
    }
}
