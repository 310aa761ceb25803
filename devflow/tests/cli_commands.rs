//! CLI tests for `devflow init`, `score` and `branch-name`.
//!
//! Spawns the devflow binary and checks exit codes and stdout.

use std::process::{Command, Output};

use serde_json::Value;

use devflow::exit_codes;
use devflow::io::config::{DevflowConfig, load_config};
use devflow::io::init::DevflowPaths;

fn devflow(dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devflow"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn devflow")
}

fn score(args: &[&str]) -> (f64, String) {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut full = vec!["score"];
    full.extend_from_slice(args);
    let output = devflow(temp.path(), &full);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let value: Value = serde_json::from_slice(&output.stdout).expect("json");
    (
        value["confidence_score"].as_f64().expect("score"),
        value["merge_decision"].as_str().expect("decision").to_string(),
    )
}

#[test]
fn all_signals_green_without_risk_merges() {
    let (confidence, decision) =
        score(&["--tests-pass", "--review-approved", "--qa-pass", "--risk", "0"]);
    assert!((confidence - 0.9).abs() < 1e-9);
    assert_eq!(decision, "merged");
}

#[test]
fn moderate_risk_rejects() {
    let (confidence, decision) =
        score(&["--tests-pass", "--review-approved", "--qa-pass", "--risk", "2"]);
    assert!((confidence - 0.84).abs() < 1e-9);
    assert_eq!(decision, "rejected");
}

#[test]
fn failing_tests_reject_even_without_risk() {
    let (confidence, decision) = score(&["--review-approved", "--qa-pass", "--risk", "0"]);
    assert!((confidence - 0.5).abs() < 1e-9);
    assert_eq!(decision, "rejected");
}

#[test]
fn out_of_range_risk_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = devflow(temp.path(), &["score", "--risk", "11"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--risk"));
}

#[test]
fn branch_name_is_sanitized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = devflow(
        temp.path(),
        &[
            "branch-name",
            "--feature-id",
            "F101",
            "--title",
            "Implement Light/Dark Mode Toggle",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "feature-F101-implement-light-dark-mode-toggle"
    );
}

#[test]
fn init_writes_default_config_and_refuses_to_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = devflow(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let paths = DevflowPaths::new(temp.path());
    assert!(paths.logs_dir.is_dir());
    assert_eq!(
        load_config(&paths.config_path).expect("load"),
        DevflowConfig::default()
    );

    let second = devflow(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = devflow(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn init_honours_custom_config_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = devflow(temp.path(), &["--config", "conf/devflow.toml", "init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("conf/devflow.toml").is_file());
    assert!(!temp.path().join(".devflow").exists());
}

#[test]
fn run_rejects_an_empty_request_before_contacting_anything() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("request.txt"), "  \n").expect("write request");
    let output = Command::new(env!("CARGO_BIN_EXE_devflow"))
        .current_dir(temp.path())
        .env("GEMINI_API_KEY", "test-key")
        .env("GITHUB_TOKEN", "test-token")
        .args(["run", "--request", "request.txt"])
        .output()
        .expect("spawn devflow");
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("feature request is empty"));
}
