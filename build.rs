//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Build script; embeds the version string used in reports.
//!

use chrono::prelude::Utc;

fn main() {
    let output_dir = std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let version_path = std::path::Path::new(&output_dir).join("version");

    let version_str = format!(
        "{} {} (commit {}, {} {}, built on {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        get_commit_hash(),
        std::env::consts::OS, std::env::consts::ARCH,
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    );

    std::fs::write(version_path, version_str).expect("cannot write the version file");
}

/// Returns "unspecified" when not built from a git checkout (or git is not installed).
fn get_commit_hash() -> String {
    let output = std::process::Command::new("git")
        .arg("log").arg("-1")
        .arg("--pretty=format:%h")
        .arg("--abbrev=8")
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output();

    match output {
        Ok(output) if output.status.success() && !output.stdout.is_empty() =>
            String::from_utf8_lossy(&output.stdout).to_string(),
        _ => "unspecified".to_string()
    }
}
