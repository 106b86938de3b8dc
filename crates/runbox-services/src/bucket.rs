//! Content bucket layout: `<bucket>/{invokes,executions}/<executionId>/...`.

use std::path::{Component, Path, PathBuf};

use runbox_core::path_validation::validate_existing_under_root;
use runbox_core::protocol::BucketKind;

use crate::error::{Result, ServiceError};

pub fn slot_dir(bucket_dir: &Path, kind: BucketKind, execution_id: &str) -> PathBuf {
    bucket_dir.join(kind.dir_name()).join(execution_id)
}

/// Resolve a cached artifact. Traversal attempts and missing files are
/// both reported as not found.
pub fn resolve_file(
    bucket_dir: &Path,
    kind: BucketKind,
    execution_id: &str,
    filename: &str,
) -> Result<PathBuf> {
    let not_found = || ServiceError::NotFound(format!("{}/{}", execution_id, filename));

    let mut components = Path::new(execution_id).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(not_found());
    }

    let slot = slot_dir(bucket_dir, kind, execution_id);
    let path = validate_existing_under_root(&slot, filename).map_err(|_| not_found())?;
    if !path.is_file() {
        return Err(not_found());
    }
    Ok(path)
}
