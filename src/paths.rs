use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Expand files and directories into a sorted, deduplicated list of files.
///
/// Directories are walked recursively. Inputs that do not exist are logged
/// and skipped; the caller decides whether an empty result is an error.
pub fn expand_paths<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>> {
    let exclude_set = build_globset(DEFAULT_EXCLUDES)?;
    let mut files = BTreeSet::new();

    for input in inputs {
        let input = input.as_ref();
        if !input.exists() {
            warn!(path = %input.display(), "Path does not exist, skipping");
            continue;
        }
        if input.is_file() {
            files.insert(canonical(input));
            continue;
        }

        for entry in WalkDir::new(input).follow_links(false) {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", input.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(input).unwrap_or(path);
            if exclude_set.is_match(relative) {
                continue;
            }
            files.insert(canonical(path));
        }
    }

    Ok(files.into_iter().collect())
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
