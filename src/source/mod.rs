//! Candidate source adapter
//!
//! Turns raw entity descriptions (desktop entries, filesystem paths,
//! configured actions) into uniform [`Candidate`] records. [`adapt`] is pure;
//! all reading of the filesystem happens in an [`EntityResolver`].

mod action;
mod desktop;
mod file;

pub use desktop::DesktopEntry;
pub use file::PathMeta;

use std::path::{Path, PathBuf};

use beacon_core::{CandidateKind, LaunchDescriptor};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{ActionConfig, Config, PathFilter};
use crate::error::CoreError;

/// One indexable thing
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Stable identifier, derived from the entity reference
    pub id: String,
    pub display_name: String,
    /// Searchable strings; never empty
    pub aliases: Vec<String>,
    pub kind: CandidateKind,
    pub launch: LaunchDescriptor,
    /// When the entity was last confirmed to exist
    pub last_valid: DateTime<Utc>,
}

/// Reference to an underlying entity, as carried by change notifications
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    DesktopEntry(PathBuf),
    Path(PathBuf),
    Action(String),
}

impl EntityRef {
    /// Identifier of the candidate this entity maps to.
    ///
    /// Depends only on the reference, so re-indexing an entity reuses its id.
    pub fn candidate_id(&self) -> String {
        match self {
            EntityRef::DesktopEntry(path) => {
                let file_id = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.to_string_lossy().to_string());
                format!("app:{}", file_id)
            }
            EntityRef::Path(path) => format!("file:{}", path.to_string_lossy()),
            EntityRef::Action(name) => format!("action:{}", name.trim().to_lowercase()),
        }
    }

    /// Classify a filesystem path seen by the watcher
    pub fn from_path(path: &Path) -> Self {
        if path.extension().is_some_and(|ext| ext == "desktop") {
            EntityRef::DesktopEntry(path.to_path_buf())
        } else {
            EntityRef::Path(path.to_path_buf())
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::DesktopEntry(path) | EntityRef::Path(path) => {
                write!(f, "{}", path.display())
            }
            EntityRef::Action(name) => write!(f, "action '{}'", name),
        }
    }
}

/// Raw description of an entity, already read from its source
#[derive(Debug, Clone)]
pub enum RawEntity {
    DesktopEntry { path: PathBuf, contents: String },
    Path { path: PathBuf, meta: PathMeta },
    Action(ActionConfig),
}

impl RawEntity {
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            RawEntity::DesktopEntry { path, .. } => EntityRef::DesktopEntry(path.clone()),
            RawEntity::Path { path, .. } => EntityRef::Path(path.clone()),
            RawEntity::Action(action) => EntityRef::Action(action.name.clone()),
        }
    }
}

/// Why an entity did not produce a candidate
#[derive(Error, Debug)]
pub enum AdaptError {
    /// Missing required fields or unreadable metadata
    #[error("malformed entity {entity}: {reason}")]
    Malformed { entity: String, reason: String },

    /// Exists but must not be offered (NoDisplay, excluded path, ...)
    #[error("{0} is hidden")]
    Hidden(String),

    #[error("{0} no longer exists")]
    NotFound(String),
}

impl AdaptError {
    pub(crate) fn malformed(entity: &EntityRef, reason: impl Into<String>) -> Self {
        AdaptError::Malformed {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    /// The entity should be absent from the index
    pub fn is_absent(&self) -> bool {
        matches!(self, AdaptError::Hidden(_) | AdaptError::NotFound(_))
    }

    /// Turn a malformed entity into the error callers log before skipping it.
    /// Hidden and missing entities are handed back unchanged.
    pub fn into_malformed(self) -> Result<CoreError, AdaptError> {
        match self {
            AdaptError::Malformed { entity, reason } => {
                Ok(CoreError::MalformedEntity { entity, reason })
            }
            absent => Err(absent),
        }
    }
}

/// Produce a candidate from a raw entity
pub fn adapt(raw: &RawEntity, observed_at: DateTime<Utc>) -> Result<Candidate, AdaptError> {
    let entity = raw.entity_ref();
    let mut candidate = match raw {
        RawEntity::DesktopEntry { path, contents } => {
            desktop::adapt(&entity, path, contents, observed_at)?
        }
        RawEntity::Path { path, meta } => file::adapt(&entity, path, meta, observed_at)?,
        RawEntity::Action(action) => action::adapt(&entity, action, observed_at)?,
    };
    dedup_aliases(&mut candidate.aliases);
    if candidate.aliases.is_empty() {
        return Err(AdaptError::malformed(&entity, "no searchable name"));
    }
    Ok(candidate)
}

/// Drop empty and case-insensitively repeated aliases, keeping first occurrences
fn dedup_aliases(aliases: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    aliases.retain(|alias| {
        let key = alias.trim().to_lowercase();
        !key.is_empty() && seen.insert(key)
    });
}

/// Reads an entity from its source. This is where adapter I/O lives.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, entity: &EntityRef) -> Result<RawEntity, AdaptError>;
}

/// Resolves entities from the local filesystem and the configured actions
pub struct FsResolver {
    application_dirs: Vec<PathBuf>,
    actions: Vec<ActionConfig>,
    filter: PathFilter,
    index_directories: bool,
}

impl FsResolver {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            application_dirs: config.application_dirs(),
            actions: config.actions.clone(),
            filter: config.path_filter()?,
            index_directories: config.indexing.index_directories,
        })
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// The copy of a desktop file that takes effect: the first application
    /// directory holding a file of that name wins over later ones.
    fn effective_desktop_file(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?;
        self.application_dirs
            .iter()
            .map(|dir| dir.join(name))
            .chain(std::iter::once(path.to_path_buf()))
            .find(|candidate| candidate.is_file())
    }
}

impl EntityResolver for FsResolver {
    fn resolve(&self, entity: &EntityRef) -> Result<RawEntity, AdaptError> {
        match entity {
            EntityRef::DesktopEntry(path) => {
                let Some(effective) = self.effective_desktop_file(path) else {
                    return Err(AdaptError::NotFound(entity.to_string()));
                };
                match std::fs::read_to_string(&effective) {
                    Ok(contents) => Ok(RawEntity::DesktopEntry {
                        path: effective,
                        contents,
                    }),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(AdaptError::NotFound(entity.to_string()))
                    }
                    Err(e) => Err(AdaptError::malformed(entity, e.to_string())),
                }
            }
            EntityRef::Path(path) => {
                if self.filter.should_exclude(path) {
                    return Err(AdaptError::Hidden(entity.to_string()));
                }
                let meta = file::read_meta(entity, path)?;
                if meta.is_dir && !self.index_directories {
                    return Err(AdaptError::Hidden(entity.to_string()));
                }
                Ok(RawEntity::Path {
                    path: path.clone(),
                    meta,
                })
            }
            EntityRef::Action(name) => self
                .actions
                .iter()
                .find(|action| {
                    EntityRef::Action(action.name.clone()).candidate_id()
                        == EntityRef::Action(name.clone()).candidate_id()
                })
                .cloned()
                .map(RawEntity::Action)
                .ok_or_else(|| AdaptError::NotFound(entity.to_string())),
        }
    }
}
