// Reject lint-suppression attributes ("#[" + "allow" + ...) in adcore sources and tests.
// Findings are fixed at the source, never silenced.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CHECKED_PATHS: [&str; 2] = ["src", "tests"];
const IGNORED_DIRS: [&str; 3] = ["target", ".git", "vendor"];

fn main() {
    println!("cargo:rerun-if-env-changed=CHECK_NO_ALLOW");
    for relative in CHECKED_PATHS {
        println!("cargo:rerun-if-changed={relative}");
    }

    // CHECK_NO_ALLOW=0 turns the guard off for local experiments.
    if env::var("CHECK_NO_ALLOW").is_ok_and(|v| v == "0") {
        return;
    }

    let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR").map(PathBuf::from) else {
        return;
    };

    let mut violations = Vec::new();
    for relative in CHECKED_PATHS {
        let path = manifest_dir.join(relative);
        if path.exists() {
            scan_path(&path, &mut violations);
        }
    }

    if violations.is_empty() {
        return;
    }

    eprintln!("ERROR: lint suppression attributes found in adcore:");
    for (file, line, content) in &violations {
        eprintln!("  {}:{}: {}", file.display(), line, content.trim());
    }
    panic!("lint suppression attributes are forbidden in adcore");
}

fn scan_path(path: &Path, violations: &mut Vec<(PathBuf, usize, String)>) {
    if path.is_dir() {
        if IGNORED_DIRS.iter().any(|dir| path.ends_with(dir)) {
            return;
        }
        let Ok(entries) = fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            scan_path(&entry.path(), violations);
        }
        return;
    }

    if path.extension().map_or(true, |ext| ext != "rs") {
        return;
    }

    let needle = concat!("#[", "allow");
    let inner_needle = concat!("#![", "allow");
    if let Ok(content) = fs::read_to_string(path) {
        for (idx, line) in content.lines().enumerate() {
            if line.contains(needle) || line.contains(inner_needle) {
                violations.push((path.to_path_buf(), idx + 1, line.to_string()));
            }
        }
    }
}
