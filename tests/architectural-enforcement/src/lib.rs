//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the bridge crates:
//! - No blocking sleeps in production code
//! - No blocking file or socket I/O in production code
//! - No panicking shortcuts (`unwrap`, `expect`, `panic!`) in production code
//!
//! Production code is everything in a source file above its `#[cfg(test)]`
//! module. Comment lines are ignored.

use std::fs;
use std::path::{Path, PathBuf};

/// Source roots that hold production code
pub const PRODUCTION_ROOTS: &[&str] = &["bridge/core/src", "bridge/worker/src"];

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// One production line of a source file
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line belongs to
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text without trailing comment
    pub code: String,
}

/// All `.rs` files under the production roots
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Production lines of one file: up to its test module, comments stripped
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .map(|(idx, line)| SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code: line.split("//").next().unwrap_or(line).to_string(),
        })
        .collect()
}

/// Every production line containing one of `patterns`, formatted for a report
pub fn find_violations(patterns: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();
    for file in production_files() {
        for line in production_lines(&file) {
            if let Some(pattern) = patterns.iter().find(|p| line.code.contains(**p)) {
                violations.push(format!(
                    "{}:{} - {}: {}",
                    line.path.display(),
                    line.number,
                    pattern,
                    line.code.trim()
                ));
            }
        }
    }
    violations
}

/// Fail the calling test with a readable list of violations
pub fn assert_no_violations(rule: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}
