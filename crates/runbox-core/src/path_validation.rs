//! Path validation utilities.
//!
//! Keeps manifest, patch and artifact paths inside their root directory to
//! prevent path traversal.

use anyhow::Result;
use std::path::{Component, Path, PathBuf};

/// Join a caller-supplied relative path onto `root`, rejecting absolute
/// paths, empty paths and any `..` that would climb above `root`.
///
/// Works lexically, so the target does not have to exist yet.
pub fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let input = Path::new(relative);
    let mut normalized = PathBuf::new();
    for component in input.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    anyhow::bail!("Path escapes its root: {}", relative);
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                anyhow::bail!("Absolute paths are not allowed: {}", relative);
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        anyhow::bail!("Empty path: {:?}", relative);
    }
    Ok(root.join(normalized))
}

/// Resolve an existing path under `root` and confirm that, after symlinks
/// are followed, it still lives inside `root`.
pub fn validate_existing_under_root(root: &Path, relative: &str) -> Result<PathBuf> {
    let joined = resolve_relative(root, relative)?;
    let canonical_root = root
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Invalid root {}: {}", root.display(), e))?;
    let canonical = joined
        .canonicalize()
        .map_err(|_| anyhow::anyhow!("Path does not exist: {}", relative))?;
    if !canonical.starts_with(&canonical_root) {
        anyhow::bail!("Path escapes allowed root: {}", relative);
    }
    Ok(canonical)
}

/// Resolve a path that is about to be written or deleted under `root`.
///
/// Besides the lexical checks of [`resolve_relative`], every directory
/// between `root` and the target that already exists must be a real
/// directory, not a symlink. The target itself may be a symlink; callers
/// replace or unlink it and never touch what it points to.
pub fn resolve_writable_under_root(root: &Path, relative: &str) -> Result<PathBuf> {
    let target = resolve_relative(root, relative)?;
    let parents = target
        .strip_prefix(root)
        .ok()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut current = root.to_path_buf();
    for component in parents.components() {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                anyhow::bail!("Path passes through a symlink: {}", relative);
            }
            Ok(meta) if !meta.is_dir() => {
                anyhow::bail!("Parent is not a directory: {}", relative);
            }
            Ok(_) => {}
            // The rest of the chain is created fresh.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => anyhow::bail!("Cannot inspect {}: {}", current.display(), e),
        }
    }
    Ok(target)
}
