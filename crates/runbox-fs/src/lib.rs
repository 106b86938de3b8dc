//! File utilities for run directories and the local content bucket.
//!
//! - [`walk`]: list every regular file under a directory (relative paths)
//! - [`cache_to_local_bucket`]: copy a directory's files into a bucket slot
//!
//! Both are synchronous; async callers run them on the blocking pool.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// List all regular files under `dir`, relative to `dir`, sorted.
///
/// Symlinks are not followed and not reported, so a link planted by the
/// executed code cannot pull files from outside the run directory into the
/// bucket.
pub fn walk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{} is not under {}", entry.path().display(), dir.display()))?;
        files.push(rel.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Same as [`walk`] but collected into a set, for pre/post diffs.
pub fn walk_set(dir: &Path) -> Result<HashSet<PathBuf>> {
    Ok(walk(dir)?.into_iter().collect())
}

/// Copy every file under `src` into `dst`, preserving relative layout.
///
/// Files whose relative path is in `exclude` are skipped. `dst` is created
/// even when nothing is copied. Returns the destination paths written.
pub fn cache_to_local_bucket(
    src: &Path,
    dst: &Path,
    exclude: Option<&HashSet<PathBuf>>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create bucket dir {}", dst.display()))?;

    let mut written = Vec::new();
    for rel in walk(src)? {
        if exclude.is_some_and(|ex| ex.contains(&rel)) {
            continue;
        }
        let from = src.join(&rel);
        let to = dst.join(&rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::copy(&from, &to).with_context(|| {
            format!("Failed to copy {} -> {}", from.display(), to.display())
        })?;
        written.push(to);
    }
    tracing::debug!(src = %src.display(), dst = %dst.display(), files = written.len(), "Cached files to bucket");
    Ok(written)
}
