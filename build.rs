//! Build script for relnotify - embeds a human-readable version banner.
//!
//! `BUILD_INFO_HUMAN` is `<crate version> (<git describe>) <rustc version>`.
//! When the checkout carries no tags the git component falls back to
//! `<short sha>[+dirty]`, and it is omitted entirely outside a git checkout
//! (for example when building from a published crate).

use std::process::Command;

fn main() {
    ["src", "build.rs", "Cargo.toml", "Cargo.lock"]
        .iter()
        .for_each(|path| println!("cargo:rerun-if-changed={path}"));

    println!("cargo:rustc-env=BUILD_INFO_HUMAN={}", build_info());
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn git_description() -> Option<String> {
    if let Some(described) = run("git", &["describe", "--tags", "--dirty"]) {
        return Some(described);
    }

    let sha = run("git", &["rev-parse", "--short=12", "HEAD"])?;
    let dirty = run("git", &["status", "--porcelain"]).is_some();
    let stamp = chrono::Utc::now().format("%Y%m%d");

    Some(if dirty {
        format!("{sha}+dirty, built {stamp}")
    } else {
        sha
    })
}

fn build_info() -> String {
    [
        Some(env!("CARGO_PKG_VERSION").to_string()),
        git_description().map(|v| format!("({v})")),
        run("rustc", &["--version"]),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
}
