//! Filesystem path candidates

use std::path::Path;

use beacon_core::CandidateKind;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{AdaptError, Candidate, EntityRef};

/// Pre-computed metadata for a path, so adapting needs no further stat() calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMeta {
    pub is_dir: bool,
    pub size: u64,
}

impl PathMeta {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
        }
    }
}

pub(super) fn read_meta(entity: &EntityRef, path: &Path) -> Result<PathMeta, AdaptError> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(PathMeta::from_metadata(&metadata)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AdaptError::NotFound(entity.to_string()))
        }
        Err(e) => Err(AdaptError::malformed(entity, format!("unreadable metadata: {}", e))),
    }
}

pub(super) fn adapt(
    entity: &EntityRef,
    path: &Path,
    meta: &PathMeta,
    observed_at: DateTime<Utc>,
) -> Result<Candidate, AdaptError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AdaptError::malformed(entity, "path has no file name"))?;

    let mut aliases = vec![name.clone()];
    if !meta.is_dir {
        if let Some(stem) = path.file_stem() {
            aliases.push(stem.to_string_lossy().to_string());
        }
    }

    Ok(Candidate {
        id: entity.candidate_id(),
        display_name: name,
        aliases,
        kind: CandidateKind::File,
        launch: json!({
            "type": "file",
            "path": path.to_string_lossy(),
            "is_dir": meta.is_dir,
            "size": meta.size,
        }),
        last_valid: observed_at,
    })
}
