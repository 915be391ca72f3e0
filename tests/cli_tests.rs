//! Integration tests for the weave CLI
//!
//! These tests run the actual binary and check its output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Get the binary to test
fn weave_cmd() -> Command {
    let mut cmd = Command::cargo_bin("weave").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

fn workflow(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const GREETING: &str = r#"
name: greeting
inputs:
  who:
    type: str
nodes:
  - id: hello
    type: echo
    params:
      text: "Hello ${who}"
  - id: shout
    type: echo
    params:
      loud: "${hello.text}!"
edges:
  - from: hello
    to: shout
outputs:
  message:
    type: str
    source: "${shout.loud}"
"#;

#[test]
fn test_help_flag() {
    weave_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("order"));
}

#[test]
fn test_run_help_lists_mode_flags() {
    weave_cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--permissive"))
        .stdout(predicate::str::contains("--strict"))
        .stdout(predicate::str::contains("--json"));
}

// ============================================================================
// validate
// ============================================================================

#[test]
fn test_validate_valid_workflow() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "greeting.yaml", GREETING);

    weave_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Nodes: 2"))
        .stdout(predicate::str::contains("Start: hello"));
}

#[test]
fn test_validate_reports_forward_reference() {
    let dir = TempDir::new().unwrap();
    let file = workflow(
        &dir,
        "forward.yaml",
        r#"
nodes:
  - id: first
    type: echo
    params:
      text: "${second.text}"
  - id: second
    type: echo
    params:
      text: hi
edges:
  - from: first
    to: second
"#,
    );

    weave_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does not run before it"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_validate_unknown_type_suggests() {
    let dir = TempDir::new().unwrap();
    let file = workflow(
        &dir,
        "typo.json",
        r#"{"nodes": [{"id": "a", "type": "ecko"}]}"#,
    );

    weave_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("node_resolution"))
        .stderr(predicate::str::contains("Did you mean: echo?"));
}

#[test]
fn test_validate_malformed_ir() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "bad.json", r#"{"nodes": [{"id": "a"}]}"#);

    weave_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("WEAVE-010"));
}

#[test]
fn test_validate_inline_child_with_own_inputs() {
    let dir = TempDir::new().unwrap();
    let file = workflow(
        &dir,
        "inline.yaml",
        r#"
nodes:
  - id: sub
    type: workflow
    params:
      param_mapping:
        subject: rust
      workflow_ir:
        inputs:
          subject:
            type: str
        nodes:
          - id: say
            type: echo
            params:
              line: "about ${subject}"
"#,
    );

    weave_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));

    weave_cmd()
        .args(["run", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run success"));
}

#[test]
fn test_validate_missing_file() {
    weave_cmd()
        .args(["validate", "/nonexistent/workflow.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

// ============================================================================
// order
// ============================================================================

#[test]
fn test_order_prints_topological_order() {
    let dir = TempDir::new().unwrap();
    let file = workflow(
        &dir,
        "diamond.json",
        r#"{
  "nodes": [
    {"id": "join", "type": "echo"},
    {"id": "left", "type": "echo"},
    {"id": "right", "type": "echo"},
    {"id": "root", "type": "echo"}
  ],
  "start_node": "root",
  "edges": [
    {"from": "root", "to": "left"},
    {"from": "root", "to": "right", "action": "other"},
    {"from": "left", "to": "join"},
    {"from": "right", "to": "join"}
  ]
}"#,
    );

    weave_cmd()
        .args(["order", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?s)root.*left.*right.*join").unwrap());
}

#[test]
fn test_order_rejects_cycles() {
    let dir = TempDir::new().unwrap();
    let file = workflow(
        &dir,
        "loop.json",
        r#"{"nodes": [{"id": "a", "type": "echo"}, {"id": "b", "type": "echo"}],
            "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "a"}]}"#,
    );

    weave_cmd()
        .args(["order", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cycle detected"));
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_prints_outputs() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "greeting.yaml", GREETING);

    weave_cmd()
        .args(["run", file.to_str().unwrap(), "--param", "who=world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run success"))
        .stdout(predicate::str::contains("message: \"Hello world!\""));
}

#[test]
fn test_run_json_result() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "greeting.yaml", GREETING);

    let output = weave_cmd()
        .args(["run", file.to_str().unwrap(), "-p", "who=json", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "success");
    assert_eq!(result["outputs"]["message"], "Hello json!");
    assert_eq!(
        result["shared_after"]["__completed_nodes__"],
        serde_json::json!(["hello", "shout"])
    );
}

#[test]
fn test_run_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "greeting.yaml", GREETING);

    weave_cmd()
        .args(["run", file.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Run failed"))
        .stderr(predicate::str::contains("who"));
}

#[test]
fn test_run_reads_stdin_input() {
    let dir = TempDir::new().unwrap();
    let file = workflow(
        &dir,
        "piped.yaml",
        r#"
inputs:
  text:
    type: str
    stdin: true
nodes:
  - id: show
    type: echo
    params:
      got: "${text}"
outputs:
  got:
    type: str
"#,
    );

    let output = weave_cmd()
        .args(["run", file.to_str().unwrap(), "--json"])
        .write_stdin("piped text\n")
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["outputs"]["got"], "piped text");
}

const MISSING_FIELD: &str = r#"
nodes:
  - id: step1
    type: echo
    params:
      x: 1
  - id: step2
    type: echo
    params:
      v: "${step1.y}"
edges:
  - from: step1
    to: step2
"#;

#[test]
fn test_run_strict_by_default() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "missing.yaml", MISSING_FIELD);

    weave_cmd()
        .args(["run", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("${step1.y}"))
        .stderr(predicate::str::contains("Available fields on 'step1': x"));
}

#[test]
fn test_run_permissive_flag_degrades() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "missing.yaml", MISSING_FIELD);

    weave_cmd()
        .args(["run", file.to_str().unwrap(), "--permissive"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run degraded"))
        .stderr(predicate::str::contains("Warning:"));
}

#[test]
fn test_run_mode_flags_conflict() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "missing.yaml", MISSING_FIELD);

    weave_cmd()
        .args(["run", file.to_str().unwrap(), "--permissive", "--strict"])
        .assert()
        .failure();
}

#[test]
fn test_run_rejects_bad_param_syntax() {
    let dir = TempDir::new().unwrap();
    let file = workflow(&dir, "greeting.yaml", GREETING);

    weave_cmd()
        .args(["run", file.to_str().unwrap(), "--param", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_run_relative_subworkflow() {
    let dir = TempDir::new().unwrap();
    workflow(
        &dir,
        "child.yaml",
        r#"
inputs:
  n:
    type: int
nodes:
  - id: double
    type: echo
    params:
      value: "${n}"
outputs:
  value:
    type: int
    source: "${double.value}"
"#,
    );
    let parent = workflow(
        &dir,
        "parent.yaml",
        r#"
nodes:
  - id: sub
    type: workflow
    params:
      workflow_ref: child.yaml
      param_mapping:
        n: 21
outputs:
  value:
    type: int
    source: "${sub.value}"
"#,
    );

    let output = weave_cmd()
        .args(["run", parent.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["outputs"]["value"], 21);
}
