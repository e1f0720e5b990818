// ABOUTME: Integration tests for the CLI application
// ABOUTME: Runs the pallet binary against definitions and configs in temporary directories

use serde_json::Value as JsonValue;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const VALID: &str = r#"
metadata: {id: greet, name: Greeting, version: v1}
steps:
  - id: hello
    skill: greeter
    inputs:
      name: "{{ workflow.input.name }}"
"#;

const FORWARD_REFERENCE: &str = r#"
metadata: {id: forward, name: Forward, version: v1}
steps:
  - id: first
    skill: s
    inputs:
      value: "{{ steps.second.outputs }}"
  - id: second
    skill: s
"#;

fn pallet(dir: &Path, args: &[&str]) -> Output {
    let config = dir.join("pallet.yaml");
    if !config.exists() {
        std::fs::write(&config, "logging:\n  level: warn\n").unwrap();
    }
    Command::new(env!("CARGO_BIN_EXE_pallet"))
        .current_dir(dir)
        .env_remove("PALLET_REGISTRY_DIR")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&config)
        .arg("--no-color")
        .args(args)
        .output()
        .expect("Failed to execute pallet")
}

#[test]
fn test_cli_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_pallet"))
        .arg("--help")
        .output()
        .expect("Failed to execute pallet");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pallet"));
    assert!(stdout.contains("validate"));
    assert!(stdout.contains("skills"));
}

#[test]
fn test_cli_validate_valid_workflow() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("greet.yaml"), VALID).unwrap();

    let output = pallet(dir.path(), &["validate", "greet.yaml"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Workflow 'greet' is valid"));
}

#[test]
fn test_cli_validate_strict_rejects_warnings() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("forward.yaml"), FORWARD_REFERENCE).unwrap();

    let lenient = pallet(dir.path(), &["validate", "forward.yaml"]);
    assert!(lenient.status.success());
    assert!(String::from_utf8_lossy(&lenient.stdout).contains("warning"));

    let strict = pallet(dir.path(), &["validate", "--strict", "forward.yaml"]);
    assert!(!strict.status.success());
}

#[test]
fn test_cli_validate_reports_parse_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("empty.yaml"), "metadata: {id: e, name: E, version: v1}\nsteps: []\n").unwrap();

    let output = pallet(dir.path(), &["validate", "empty.yaml"]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_run_failure_writes_report() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("greet.yaml"), VALID).unwrap();

    let output = pallet(
        dir.path(),
        &[
            "run",
            "greet.yaml",
            "--input",
            r#"{"name": "ada"}"#,
            "--var",
            "lang=en",
            "--output",
            "report.json",
        ],
    );

    // No provider serves the greeter skill, so the run fails.
    assert!(!output.status.success());

    let report: JsonValue =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["status"], "failed");
    assert_eq!(report["failure"]["kind"], "capability_not_found");
    assert_eq!(report["failure"]["step_id"], "hello");
    assert_eq!(report["context"]["input"]["name"], "ada");
    assert_eq!(report["context"]["input"]["lang"], "en");
}

#[test]
fn test_cli_run_from_registry_requires_root() {
    let dir = TempDir::new().unwrap();
    let output = pallet(dir.path(), &["run", "--id", "greet"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("registry"));
}

#[test]
fn test_cli_run_from_registry() {
    let dir = TempDir::new().unwrap();
    let definitions = dir.path().join("definitions").join("team").join("greet");
    std::fs::create_dir_all(&definitions).unwrap();
    std::fs::write(definitions.join("v2.yaml"), VALID).unwrap();
    std::fs::write(
        dir.path().join("pallet.yaml"),
        "registry:\n  root: definitions\n  namespace: team\nlogging:\n  level: warn\n",
    )
    .unwrap();

    let output = pallet(
        dir.path(),
        &["run", "--id", "greet", "--version", "v2", "--output", "report.json"],
    );

    // The definition loads; the run then fails on the missing provider.
    assert!(!output.status.success());
    let report: JsonValue =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["workflow"]["id"], "greet");
    assert_eq!(report["failure"]["kind"], "capability_not_found");
}

#[test]
fn test_cli_skills_without_configuration() {
    let dir = TempDir::new().unwrap();
    let output = pallet(dir.path(), &["skills"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No capabilities"));
}

#[test]
fn test_cli_skills_lists_static_table() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("pallet.yaml"),
        "capabilities:\n  greeter: http://127.0.0.1:8001\n",
    )
    .unwrap();

    let output = pallet(dir.path(), &["skills"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("greeter"));
    assert!(stdout.contains("http://127.0.0.1:8001/"));
}
