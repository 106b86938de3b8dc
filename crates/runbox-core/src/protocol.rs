//! Wire types shared between the services and their callers.

use serde::{Deserialize, Serialize};

/// One file to download when materializing a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Destination path, relative to the deployment directory
    pub path: String,
    /// Where to fetch the content from
    pub url: String,
}

/// Remote descriptor of a deployment: entrypoint plus constituent files.
///
/// `entry` is optional on the wire so that a missing entry surfaces as a
/// manifest error instead of a JSON decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

/// Incremental edit applied to a live deployment directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PatchChange {
    Add { path: String, url: String },
    Modify { path: String, url: String },
    Delete { path: String },
}

impl PatchChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Modify { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Which half of the content bucket a cached artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    /// Artifacts produced by deployment invocations
    Invokes,
    /// Snapshots of one-shot executions
    Executions,
}

impl BucketKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Invokes => "invokes",
            Self::Executions => "executions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_without_entry_still_parses() {
        let m: Manifest =
            serde_json::from_str(r#"{"files":[{"path":"main.py","url":"http://x/main.py"}]}"#)
                .unwrap();
        assert!(m.entry.is_none());
        assert_eq!(m.files.len(), 1);
    }

    #[test]
    fn test_patch_change_tagging() {
        let changes: Vec<PatchChange> = serde_json::from_str(
            r#"[
                {"type":"add","path":"a.py","url":"http://x/a.py"},
                {"type":"modify","path":"b.py","url":"http://x/b.py"},
                {"type":"delete","path":"c.py"}
            ]"#,
        )
        .unwrap();
        assert_eq!(changes[2], PatchChange::Delete { path: "c.py".into() });
        assert_eq!(changes[0].path(), "a.py");

        let missing_url = serde_json::from_str::<PatchChange>(r#"{"type":"add","path":"a.py"}"#);
        assert!(missing_url.is_err());
    }

    #[test]
    fn test_bucket_kind_dir_names() {
        assert_eq!(BucketKind::Invokes.dir_name(), "invokes");
        assert_eq!(BucketKind::Executions.dir_name(), "executions");
    }
}
