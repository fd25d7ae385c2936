//! fleetctl - Fleet Firmware Control CLI
//!
//! Offline gap analysis, cluster compatibility analysis, catalog validation
//! and rollout planning over a fleet snapshot.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod output;
mod snapshot;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{ClustersArgs, GapsArgs, PlanArgs, Session, ValidateCatalogArgs};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Fleet Firmware Control CLI - Analyze firmware gaps and plan rolling updates")]
#[command(version)]
#[command(long_about = "
fleetctl analyzes a fleet snapshot (host inventory, firmware catalog, risky
version pairs and maintenance windows) and prints firmware gaps, per-cluster
rolling update assessments and phased orchestration plans.

Use --json for machine-readable output suitable for scripting.

Exit codes: 0 success, 1 failure, 2 host or cluster not found,
3 capacity violation, 4 configuration or validation error.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Fleet snapshot file (JSON or YAML)
    #[arg(long, global = true, env = "FLEETCTL_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Engine config file (JSON or YAML)
    #[arg(long, global = true, env = "FLEETCTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show outdated firmware and update sequences per host
    Gaps(GapsArgs),

    /// Show drift, capacity and rolling update feasibility per cluster
    Clusters(ClustersArgs),

    /// Build a phased rollout plan without executing it
    Plan(PlanArgs),

    /// Check the firmware catalog for malformed or cyclic upgrade chains
    ValidateCatalog(ValidateCatalogArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fleetctl={log_level},fleetfw_orchestrator={log_level}").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = error::exit_code(&e);
            if cli.json {
                output::print_error_json(&e, code);
            } else {
                output::print_error_human(&e);
            }
            ExitCode::from(code)
        }
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let session = Session {
        snapshot: cli.snapshot.clone(),
        config: cli.config.clone(),
    };
    match &cli.command {
        Commands::Gaps(args) => commands::gaps::execute(args, &session, cli.json).await,
        Commands::Clusters(args) => commands::clusters::execute(args, &session, cli.json).await,
        Commands::Plan(args) => commands::plan::execute(args, &session, cli.json).await,
        Commands::ValidateCatalog(args) => {
            commands::catalog::execute(args, &session, cli.json).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    // --- Global flag parsing ---

    #[test]
    fn parse_gaps_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["fleetctl", "gaps"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        match &cli.command {
            Commands::Gaps(args) => {
                assert!(args.hosts.is_empty());
                assert!(!args.outdated);
                assert!(!args.steps);
            }
            _ => return Err("expected Gaps command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from([
            "fleetctl",
            "clusters",
            "--json",
            "--snapshot",
            "fleet.yaml",
            "--config",
            "engine.yaml",
        ])?;
        assert!(cli.json);
        assert_eq!(cli.snapshot, Some(PathBuf::from("fleet.yaml")));
        assert_eq!(cli.config, Some(PathBuf::from("engine.yaml")));
        Ok(())
    }

    #[test]
    fn parse_verbose_levels() -> TestResult {
        for (args, expected) in [
            (vec!["fleetctl", "gaps"], 0),
            (vec!["fleetctl", "-v", "gaps"], 1),
            (vec!["fleetctl", "-vvv", "gaps"], 3),
        ] {
            let cli = Cli::try_parse_from(args)?;
            assert_eq!(cli.verbose, expected);
        }
        Ok(())
    }

    // --- Command parsing ---

    #[test]
    fn parse_gaps_hosts_and_flags() -> TestResult {
        let cli = Cli::try_parse_from(["fleetctl", "gaps", "esx-01", "esx-02", "--outdated", "-s"])?;
        match &cli.command {
            Commands::Gaps(args) => {
                assert_eq!(args.hosts, vec!["esx-01".to_string(), "esx-02".to_string()]);
                assert!(args.outdated);
                assert!(args.steps);
            }
            _ => return Err("expected Gaps command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_plan_policy_and_hosts() -> TestResult {
        let cli = Cli::try_parse_from([
            "fleetctl",
            "plan",
            "--policy",
            "policy.yaml",
            "--host",
            "esx-01",
            "--host",
            "esx-03",
        ])?;
        match &cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.policy, Some(PathBuf::from("policy.yaml")));
                assert_eq!(args.hosts.len(), 2);
            }
            _ => return Err("expected Plan command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_validate_catalog_path() -> TestResult {
        let cli = Cli::try_parse_from(["fleetctl", "validate-catalog", "catalog.json"])?;
        match &cli.command {
            Commands::ValidateCatalog(args) => {
                assert_eq!(args.catalog, Some(PathBuf::from("catalog.json")));
            }
            _ => return Err("expected ValidateCatalog command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_clusters_filter() -> TestResult {
        let cli = Cli::try_parse_from(["fleetctl", "clusters", "-c", "prod-01"])?;
        match &cli.command {
            Commands::Clusters(args) => assert_eq!(args.cluster.as_deref(), Some("prod-01")),
            _ => return Err("expected Clusters command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_unknown_subcommand_fails() {
        assert!(matches!(Cli::try_parse_from(["fleetctl", "flash"]), Err(_)));
    }
}
