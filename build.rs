use std::process::Command;

// We'll use chrono to embed the build timestamp
use chrono::Utc;

fn main() {
    // Generate build-time metadata surfaced by the /status endpoint
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());
    println!("cargo:rustc-env=BUILD_TIME={}", Utc::now().to_rfc3339());

    // Re-run if the HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
