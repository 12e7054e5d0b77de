//! Build script for rqp-qr
//!
//! Exposes build identification to the binary, logged at startup:
//! `RQP_GIT_HASH`, `RQP_BUILD_TIMESTAMP` and `RQP_BUILD_PROFILE`.

use std::process::Command;

fn git_short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    let git_hash = git_short_hash().unwrap_or_else(|| "unknown".to_string());
    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=RQP_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=RQP_BUILD_TIMESTAMP={}", built_at);
    println!("cargo:rustc-env=RQP_BUILD_PROFILE={}", profile);
}
