//! File system watcher feeding the change bridge

use anyhow::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::bridge::{ChangeEvent, ChangeKind};
use crate::config::{Config, PathFilter};
use crate::source::EntityRef;

/// Decides which filesystem paths are entities worth reporting
#[derive(Debug, Clone)]
pub struct WatchScope {
    application_dirs: Vec<PathBuf>,
    file_roots: Vec<PathBuf>,
    max_depth: usize,
    filter: PathFilter,
}

impl WatchScope {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            application_dirs: config.application_dirs(),
            file_roots: config.file_roots(),
            max_depth: config.indexing.max_depth,
            filter: config.path_filter()?,
        })
    }

    /// Map a path to the entity it represents, if it is in scope
    pub fn classify(&self, path: &Path) -> Option<EntityRef> {
        let is_desktop = path.extension().is_some_and(|ext| ext == "desktop");
        if is_desktop && self.application_dirs.iter().any(|dir| path.parent() == Some(dir.as_path())) {
            return Some(EntityRef::DesktopEntry(path.to_path_buf()));
        }

        for root in &self.file_roots {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let depth = relative.components().count();
            if depth == 0 || depth > self.max_depth {
                return None;
            }
            // An excluded ancestor hides everything below it
            let excluded = path
                .ancestors()
                .take(depth)
                .any(|p| self.filter.should_exclude(p));
            return (!excluded).then(|| EntityRef::Path(path.to_path_buf()));
        }

        None
    }
}

/// Translate a notify event into change events.
///
/// Renames become a removal of the old path and an addition of the new one.
pub fn translate(event: &Event) -> Vec<(ChangeKind, PathBuf)> {
    let all = |kind: ChangeKind| -> Vec<(ChangeKind, PathBuf)> {
        event.paths.iter().map(|p| (kind, p.clone())).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(ChangeKind::Added),
        EventKind::Remove(_) => all(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push((ChangeKind::Removed, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((ChangeKind::Added, to.clone()));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Added
                } else {
                    ChangeKind::Removed
                };
                (kind, p.clone())
            })
            .collect(),
        EventKind::Modify(_) => all(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other | EventKind::Any => Vec::new(),
    }
}

/// Start watching application directories and file roots.
///
/// The returned watcher must be kept alive for events to keep flowing.
pub fn start_watcher(
    config: &Config,
    events: UnboundedSender<ChangeEvent>,
    generations: Arc<AtomicU64>,
) -> Result<RecommendedWatcher> {
    let scope = WatchScope::new(config)?;

    let handler_scope = scope.clone();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                for (kind, path) in translate(&event) {
                    let Some(entity) = handler_scope.classify(&path) else {
                        continue;
                    };
                    let generation = generations.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("{:?}: {}", kind, entity);
                    if events.send(ChangeEvent::new(kind, entity, generation)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        },
    )?;

    let mut watched = 0;
    for dir in &scope.application_dirs {
        if !dir.is_dir() {
            continue;
        }
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(_) => watched += 1,
            Err(e) => warn!("Failed to watch {:?}: {}", dir, e),
        }
    }
    for root in &scope.file_roots {
        if !root.is_dir() {
            continue;
        }
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(_) => watched += 1,
            Err(e) => warn!("Failed to watch {:?}: {}", root, e),
        }
    }

    info!("File watcher started on {} directories", watched);
    Ok(watcher)
}
