//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use fleetfw_orchestrator::prelude::*;
use serde::Serialize;
use serde_json::json;

/// Print error in JSON format
pub fn print_error_json(error: &Error, exit_code: u8) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "chain": error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
            "exit_code": exit_code,
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format error as JSON: {e}"),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "Caused by:".yellow(), cause);
    }
}

fn print_json<T: Serialize>(key: &str, value: &T) {
    let output = json!({ "success": true, key: value });
    match serde_json::to_string_pretty(&output) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format {key} as JSON: {e}"),
    }
}

fn risk_label(risk: CompatibilityRisk) -> ColoredString {
    match risk {
        CompatibilityRisk::Low => "low".green(),
        CompatibilityRisk::Medium => "medium".yellow(),
        CompatibilityRisk::High => "high".red().bold(),
    }
}

fn criticality_label(criticality: Criticality) -> ColoredString {
    match criticality {
        Criticality::Critical => "critical".red().bold(),
        Criticality::Important => "important".yellow(),
        Criticality::Recommended => "recommended".cyan(),
        Criticality::Optional => "optional".dimmed(),
    }
}

/// Print a gap report
pub fn print_gap_report(report: &GapReport, json: bool, show_steps: bool) {
    if json {
        print_json("report", report);
        return;
    }

    let outdated = report.outdated().count();
    println!(
        "{} {} hosts, {} outdated",
        "Firmware gaps:".bold(),
        report.gaps.len(),
        outdated
    );
    for gap in &report.gaps {
        let cluster = gap.cluster_name.as_deref().unwrap_or("standalone");
        if !gap.has_updates() && gap.unresolved.is_empty() {
            println!("  {} {} ({})", "●".green(), gap.host_id.bold(), cluster.dimmed());
            continue;
        }
        println!(
            "  {} {} ({}) risk {} | {} steps, {} min{}",
            "●".yellow(),
            gap.host_id.bold(),
            cluster.dimmed(),
            risk_label(gap.compatibility_risk),
            gap.update_sequence.len(),
            gap.total_update_time_minutes,
            if gap.requires_multi_step { ", multi-step" } else { "" }
        );
        for component in &gap.components {
            println!(
                "      {:<20} {} -> {} [{}]",
                component.component_type.to_string(),
                component.current_version,
                component.target_version,
                criticality_label(component.criticality)
            );
        }
        for unresolved in &gap.unresolved {
            println!(
                "      {:<20} {} -> {} {}",
                unresolved.component_type.to_string(),
                unresolved.current_version,
                unresolved.target_version,
                format!("unresolved: {}", unresolved.reason).red()
            );
        }
        if show_steps {
            for step in &gap.update_sequence {
                println!(
                    "      {}. {} {} -> {} ({} min{})",
                    step.step_number,
                    step.component_type,
                    step.from_version,
                    step.to_version,
                    step.duration_minutes,
                    if step.requires_reboot { ", reboot" } else { "" }
                );
            }
        }
    }
    for failure in &report.failures {
        println!(
            "  {} {} {}",
            "✗".red(),
            failure.host_id.bold(),
            failure.message.red()
        );
    }
}

/// Print cluster analyses
pub fn print_cluster_analyses(analyses: &[ClusterCompatibilityAnalysis], json: bool) {
    if json {
        print_json("clusters", &analyses);
        return;
    }
    if analyses.is_empty() {
        println!("{}", "No clusters found".yellow());
        return;
    }

    println!("{}", "Cluster Compatibility:".bold());
    for analysis in analyses {
        let feasible = if analysis.rolling_update_feasible {
            "rolling".green()
        } else {
            "serialized".red()
        };
        println!(
            "  {} {} hosts, keep {} active, batch {} ({}), ~{}h",
            analysis.cluster_name.bold(),
            analysis.total_hosts,
            analysis.min_active_hosts,
            analysis.max_simultaneous_updates,
            feasible,
            analysis.estimated_cluster_update_duration_hours
        );
        for window in &analysis.compatibility_windows {
            println!(
                "      {:<20} {} -> {}",
                window.component_type.to_string(),
                window.coexisting_versions.join(", "),
                window.target_version
            );
        }
        for warning in &analysis.warnings {
            println!("      {} {}", "!".yellow(), warning);
        }
    }
}

/// Print an orchestration plan
pub fn print_plan(plan: &OrchestrationPlan, json: bool) {
    if json {
        print_json("plan", plan);
        return;
    }

    println!("{} {}", "Plan:".bold(), plan.id);
    println!("  Status: {}", plan.status());
    println!(
        "  Created: {}",
        plan.created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S %Z")
    );
    println!("  Strategy: {:?}", plan.config.strategy);
    println!(
        "  Hosts: {} in {} phases, ~{}h",
        plan.total_hosts(),
        plan.phases.len(),
        plan.total_duration_hours
    );
    for phase in &plan.phases {
        let start = phase
            .scheduled_start
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "now".to_string());
        println!(
            "  {} {} | {} hosts, {} per batch, keep {} active, ~{}h, starts {}{}",
            format!("Phase {}", phase.phase_number).bold(),
            phase.cluster_name.cyan(),
            phase.hosts.len(),
            phase.hosts_per_batch,
            phase.min_active_hosts,
            phase.estimated_duration_hours,
            start,
            if phase.deferred { " (deferred)".yellow().to_string() } else { String::new() }
        );
        for warning in &phase.warnings {
            println!("      {} {}", "!".yellow(), warning);
        }
    }
    for warning in &plan.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
}

/// Summary of a validated catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    /// Entries in the catalog
    pub entries: usize,
    /// Hardware models covered
    pub models: Vec<String>,
    /// Entries with declared upgrade chains
    pub chained_entries: usize,
}

/// Print a catalog validation result
pub fn print_catalog_summary(summary: &CatalogSummary, json: bool) {
    if json {
        print_json("catalog", summary);
        return;
    }
    println!("{} catalog is valid", "✓".green().bold());
    println!("  Entries: {}", summary.entries);
    println!("  Models: {}", summary.models.join(", "));
    println!("  With upgrade chains: {}", summary.chained_entries);
}
