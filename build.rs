//! Build script for always-active
//!
//! Embeds build-time information into the binary:
//! - Git commit hash, branch and dirty flag
//! - Build timestamp
//! - Target and host triples
//! - Rust version

use std::env;
use std::process::Command;

fn main() {
    // Rerun if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = run("git", &["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(unknown);
    let git_branch = run("git", &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(unknown);
    let git_dirty = match run("git", &["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };
    let rustc_version = run("rustc", &["--version"]).unwrap_or_else(unknown);

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| unknown());
    let profile = env::var("PROFILE").unwrap_or_else(|_| unknown());
    let host = env::var("HOST").unwrap_or_else(|_| unknown());

    let vars = [
        ("GIT_HASH", git_hash.as_str()),
        ("GIT_BRANCH", git_branch.as_str()),
        ("GIT_DIRTY", git_dirty),
        ("BUILD_TIMESTAMP", build_timestamp.as_str()),
        ("TARGET", target.as_str()),
        ("PROFILE", profile.as_str()),
        ("RUSTC_VERSION", rustc_version.as_str()),
        ("HOST", host.as_str()),
    ];
    for (name, value) in vars {
        println!("cargo:rustc-env=ALWAYS_ACTIVE_{}={}", name, value);
    }
}

/// Trimmed stdout of a successful command
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn unknown() -> String {
    "unknown".to_string()
}
