//! Integration tests for fleetctl
//!
//! Each test writes a fleet snapshot to a temp dir and checks output and
//! exit codes of the built binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const SNAPSHOT: &str = r#"
hosts:
  - host_id: esx-01
    hostname: esx-01.dc1.example.net
    model: R750
    service_tag: SVC0001
    cluster_name: prod-01
    management_address: idrac-esx-01.dc1.example.net
    current_versions: {bios: "1.0.0", bmc: "6.10.00.00"}
  - host_id: esx-02
    hostname: esx-02.dc1.example.net
    model: R750
    service_tag: SVC0002
    cluster_name: prod-01
    management_address: idrac-esx-02.dc1.example.net
    current_versions: {bios: "1.5.0", bmc: "6.10.00.00"}
  - host_id: esx-03
    hostname: esx-03.dc1.example.net
    model: R750
    service_tag: SVC0003
    cluster_name: prod-01
    management_address: idrac-esx-03.dc1.example.net
    current_versions: {bios: "2.0.0", bmc: "7.00.00.00"}
catalog:
  entries:
    - model: R750
      component: bios
      target_version: "2.0.0"
      criticality: critical
      step_duration_minutes: 20
      upgrade_chains: [["1.0.0", "1.5.0", "2.0.0"]]
    - model: R750
      component: bmc
      target_version: "7.00.00.00"
      criticality: important
      step_duration_minutes: 10
      requires_reboot: false
"#;

/// Test helper to create a fleetctl command without ambient env
fn fleetctl() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("fleetctl")?;
    cmd.env_remove("FLEETCTL_SNAPSHOT")
        .env_remove("FLEETCTL_CONFIG")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

fn write(dir: &TempDir, name: &str, content: &str) -> Result<PathBuf, std::io::Error> {
    let path = dir.path().join(name);
    fs::write(&path, content)?;
    Ok(path)
}

fn snapshot(dir: &TempDir) -> Result<PathBuf, std::io::Error> {
    write(dir, "fleet.yaml", SNAPSHOT)
}

fn json_stdout(output: &[u8]) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(serde_json::from_slice(output)?)
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap_or_default()
}

#[test]
fn test_gaps_json_lists_every_host() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;

    let output = fleetctl()?
        .args(["--json", "--snapshot", arg(&path), "gaps"])
        .output()?;
    assert!(output.status.success());

    let value = json_stdout(&output.stdout)?;
    assert_eq!(value.get("success"), Some(&Value::Bool(true)));
    let gaps = value
        .pointer("/report/gaps")
        .and_then(Value::as_array)
        .ok_or("missing gaps")?;
    assert_eq!(gaps.len(), 3);
    let first_steps = gaps
        .first()
        .and_then(|g| g.get("update_sequence"))
        .and_then(Value::as_array)
        .map(Vec::len);
    assert_eq!(first_steps, Some(3));
    Ok(())
}

#[test]
fn test_gaps_outdated_filter_and_steps() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;

    fleetctl()?
        .env("FLEETCTL_SNAPSHOT", &path)
        .env("NO_COLOR", "1")
        .args(["gaps", "--outdated", "--steps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("esx-01"))
        .stdout(predicate::str::contains("1. bios 1.0.0 -> 1.5.0"))
        .stdout(predicate::str::contains("esx-03").not());
    Ok(())
}

#[test]
fn test_unknown_host_exits_2() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;

    fleetctl()?
        .args(["--snapshot", arg(&path), "gaps", "esx-99"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Host not found: esx-99"));
    Ok(())
}

#[test]
fn test_unknown_cluster_exits_2() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;

    fleetctl()?
        .args(["--snapshot", arg(&path), "clusters", "--cluster", "edge-09"])
        .assert()
        .code(2);
    Ok(())
}

#[test]
fn test_clusters_json_reports_capacity() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;

    let output = fleetctl()?
        .args(["--json", "--snapshot", arg(&path), "clusters"])
        .output()?;
    assert!(output.status.success());
    let value = json_stdout(&output.stdout)?;
    let cluster = value.pointer("/clusters/0").ok_or("missing cluster")?;
    assert_eq!(cluster.get("cluster_name").and_then(Value::as_str), Some("prod-01"));
    assert_eq!(cluster.get("total_hosts").and_then(Value::as_u64), Some(3));
    assert_eq!(cluster.get("min_active_hosts").and_then(Value::as_u64), Some(2));
    assert_eq!(
        cluster.get("max_simultaneous_updates").and_then(Value::as_u64),
        Some(1)
    );
    Ok(())
}

#[test]
fn test_plan_with_policy_file() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;
    let policy = write(
        &dir,
        "policy.json",
        r#"{"strategy": "immediate", "require_manual_approval": false}"#,
    )?;

    let output = fleetctl()?
        .args(["--json", "--snapshot", arg(&path), "plan", "--policy", arg(&policy)])
        .output()?;
    assert!(output.status.success());
    let value = json_stdout(&output.stdout)?;
    assert_eq!(
        value.pointer("/plan/status").and_then(Value::as_str),
        Some("approved")
    );
    let hosts = value
        .pointer("/plan/phases/0/hosts")
        .and_then(Value::as_array)
        .map(Vec::len);
    // esx-03 is already current.
    assert_eq!(hosts, Some(2));
    Ok(())
}

#[test]
fn test_conservative_plan_on_risky_cluster_exits_3() -> TestResult {
    let dir = TempDir::new()?;
    let risky = format!(
        "{SNAPSHOT}risky_combinations:\n  - component: bios\n    version_a: \"1.0.0\"\n    version_b: \"1.5.0\"\n"
    );
    let path = write(&dir, "risky.yaml", &risky)?;
    let policy = write(&dir, "policy.yaml", "risk_tolerance: conservative\n")?;

    fleetctl()?
        .args(["--snapshot", arg(&path), "plan", "-p", arg(&policy)])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Capacity violation in cluster prod-01"));
    Ok(())
}

#[test]
fn test_invalid_engine_config_exits_4() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;
    let config = write(&dir, "engine.yaml", "capacity:\n  min_active_ratio: 1.5\n")?;

    fleetctl()?
        .args(["--snapshot", arg(&path), "--config", arg(&config), "clusters"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("min_active_ratio"));
    Ok(())
}

#[test]
fn test_missing_snapshot_exits_4() -> TestResult {
    let output = fleetctl()?.args(["--json", "gaps"]).output()?;
    assert_eq!(output.status.code(), Some(4));
    let value = json_stdout(&output.stdout)?;
    assert_eq!(value.get("success"), Some(&Value::Bool(false)));
    assert_eq!(value.pointer("/error/exit_code").and_then(Value::as_u64), Some(4));
    Ok(())
}

#[test]
fn test_validate_catalog_accepts_snapshot_catalog() -> TestResult {
    let dir = TempDir::new()?;
    let path = snapshot(&dir)?;

    let output = fleetctl()?
        .args(["--json", "--snapshot", arg(&path), "validate-catalog"])
        .output()?;
    assert!(output.status.success());
    let value = json_stdout(&output.stdout)?;
    assert_eq!(value.pointer("/catalog/entries").and_then(Value::as_u64), Some(2));
    assert_eq!(
        value.pointer("/catalog/chained_entries").and_then(Value::as_u64),
        Some(1)
    );
    Ok(())
}

#[test]
fn test_validate_catalog_rejects_cycle() -> TestResult {
    let dir = TempDir::new()?;
    let catalog = write(
        &dir,
        "catalog.yaml",
        r#"
entries:
  - model: R650
    component: nic
    target_version: "22.0.0"
    criticality: recommended
    upgrade_chains:
      - ["21.0.0", "22.0.0"]
      - ["22.0.0", "21.0.0"]
"#,
    )?;

    fleetctl()?
        .args(["validate-catalog", arg(&catalog)])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Catalog validation failed"));
    Ok(())
}
