//! Integration tests for the rqp-qr binary
//!
//! Tests cover:
//! - Argument errors and --help exit before any startup logging
//! - A search round trip through the CLI with JSON on stdout

use std::process::{Command, Output};
use tempfile::TempDir;

fn rqp_qr(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rqp-qr"))
        .args(args)
        .env("RUST_LOG", "info")
        .env_remove("RQP_ROOT_FOLDER")
        .output()
        .expect("rqp-qr should run")
}

#[test]
fn test_help_has_no_startup_banner() {
    let output = rqp_qr(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("queue-analysis"));
    assert!(!stdout.contains("Starting rqp-qr"));
    assert!(!stderr.contains("Starting rqp-qr"));
}

#[test]
fn test_bad_arguments_have_no_startup_banner() {
    let output = rqp_qr(&["finish", "abc", "--rows", "3", "--empty"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("Starting rqp-qr"));
}

#[test]
fn test_search_then_status() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_str().unwrap();

    let output = rqp_qr(&["--root-folder", root, "search", "-p", "news", "climate change"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let created: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let key = created["key"].as_str().unwrap().to_string();
    assert_eq!(created["new"], serde_json::json!(true));
    assert_eq!(created["status"], serde_json::json!("Queued"));

    let output = rqp_qr(&["--root-folder", root, "status", &key]);
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["key"], serde_json::json!(key));
    assert_eq!(status["done"], serde_json::json!(false));

    assert!(tmp.path().join("rqp.db").is_file());
    assert!(tmp.path().join("results").is_dir());
}
