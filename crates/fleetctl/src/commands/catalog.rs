//! Catalog validation

use anyhow::{Context, Result};
use fleetfw_orchestrator::config::load_document;
use fleetfw_orchestrator::prelude::*;

use crate::commands::{Session, ValidateCatalogArgs};
use crate::output::{self, CatalogSummary};

/// Execute the validate-catalog command
pub async fn execute(args: &ValidateCatalogArgs, session: &Session, json: bool) -> Result<()> {
    // Validates --config as a side effect when one is given.
    session.config().await?;

    let document: CatalogDocument = match &args.catalog {
        Some(path) => load_document(path)
            .await
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => session.snapshot().await?.catalog,
    };
    let chained_entries = document
        .entries
        .iter()
        .filter(|e| !e.upgrade_chains.is_empty())
        .count();

    let catalog = StaticCatalog::from_document(document)
        .map_err(FleetError::from)
        .context("Catalog validation failed")?;

    output::print_catalog_summary(
        &CatalogSummary {
            entries: catalog.len(),
            models: catalog.models(),
            chained_entries,
        },
        json,
    );
    Ok(())
}
