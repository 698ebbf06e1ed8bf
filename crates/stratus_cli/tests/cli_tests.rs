//! End-to-end tests running the `stratus` binary.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn stratus(state_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stratus"))
        .args(args)
        .arg("--state-dir")
        .arg(state_dir)
        .env_remove("RUST_LOG")
        .env_remove("STRATUS_CONFIG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_synth_renders_manifest() {
    let dir = TempDir::new().unwrap();
    let output = stratus(dir.path(), &["synth", "--tag", "team=web"]);
    assert!(output.status.success());

    let manifest: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(manifest["StackName"], "GeneralImmersionDayStack");
    assert_eq!(manifest["Resources"]["Listener"]["Type"], "AWS::ElasticLoadBalancingV2::Listener");
    assert_eq!(manifest["Tags"]["team"], "web");
}

#[test]
fn test_synth_yaml_to_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("stack.yaml");
    let output = stratus(
        dir.path(),
        &["synth", "--format", "yaml", "--output", target.to_str().unwrap()],
    );
    assert!(output.status.success());

    let content = std::fs::read_to_string(&target).unwrap();
    assert!(content.contains("AWS::RDS::DBCluster"));
}

#[test]
fn test_validate_reference_topology() {
    let dir = TempDir::new().unwrap();
    let output = stratus(dir.path(), &["validate"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("All 7 checks passed"));
}

#[test]
fn test_apply_twice_then_destroy() {
    let dir = TempDir::new().unwrap();

    let first = stratus(dir.path(), &["apply"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(dir.path().join("GeneralImmersionDayStack.state.json").exists());

    let plan = stratus(dir.path(), &["plan"]);
    assert!(plan.status.success());
    assert!(stdout(&plan).contains("No changes"));

    let state = stratus(dir.path(), &["state"]);
    assert!(stdout(&state).contains("AWS::EC2::VPC"));

    let destroy = stratus(dir.path(), &["destroy"]);
    assert!(destroy.status.success());
    assert!(!dir.path().join("GeneralImmersionDayStack.state.json").exists());
}

#[test]
fn test_malformed_tag_is_invalid_argument() {
    let dir = TempDir::new().unwrap();
    let output = stratus(dir.path(), &["synth", "--tag", "no-separator"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_inverted_capacity_is_declaration_failure() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("stack.yaml");
    std::fs::write(&config, "compute:\n  min_capacity: 3\n  max_capacity: 1\n").unwrap();

    let output = stratus(dir.path(), &["apply", "--config", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(3));
    assert!(!dir.path().join("GeneralImmersionDayStack.state.json").exists());
}

#[test]
fn test_malformed_cidr_is_declaration_failure() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("stack.yaml");
    std::fs::write(&config, "network:\n  cidr: 10.0.0.0/40\n").unwrap();

    let output = stratus(dir.path(), &["synth", "--config", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_stack_name_cannot_escape_state_dir() {
    let dir = TempDir::new().unwrap();
    let state_dir = dir.path().join("state");
    std::fs::create_dir(&state_dir).unwrap();
    let outside = dir.path().join("victim.state.json");
    std::fs::write(&outside, "{}").unwrap();

    for command in ["destroy", "state", "apply"] {
        let output = stratus(&state_dir, &[command, "--stack-name", "../victim"]);
        assert_eq!(output.status.code(), Some(3), "{} accepted ../victim", command);
    }
    assert!(outside.exists());
}
