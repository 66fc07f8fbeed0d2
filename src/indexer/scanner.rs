//! Full scan of every candidate source, used at startup and for rebuilds

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, PathFilter};
use crate::source::{adapt, AdaptError, Candidate, EntityRef, EntityResolver, PathMeta, RawEntity};

/// Collect candidates from actions, application directories and file roots.
///
/// Blocking; run it on a blocking thread.
pub fn scan_all(config: &Config, resolver: &dyn EntityResolver) -> Vec<Candidate> {
    let now = Utc::now();
    let mut candidates = Vec::new();

    for action in &config.actions {
        let entity = EntityRef::Action(action.name.clone());
        push_adapted(&mut candidates, resolver.resolve(&entity), now);
    }
    let actions = candidates.len();

    // Earlier directories shadow later ones with the same file name
    let mut seen = HashSet::new();
    for dir in config.application_dirs() {
        scan_application_dir(&dir, resolver, &mut seen, &mut candidates, now);
    }
    let applications = candidates.len() - actions;

    let filter = match config.path_filter() {
        Ok(filter) => filter,
        Err(e) => {
            warn!("Skipping file roots: {:#}", e);
            return candidates;
        }
    };
    for root in config.file_roots() {
        scan_file_root(&root, config, &filter, &mut candidates, now);
    }

    info!(
        "Scan complete: {} applications, {} actions, {} files",
        applications,
        actions,
        candidates.len() - actions - applications
    );
    candidates
}

fn push_adapted(
    candidates: &mut Vec<Candidate>,
    raw: Result<RawEntity, AdaptError>,
    now: DateTime<Utc>,
) {
    match raw.and_then(|raw| adapt(&raw, now)) {
        Ok(candidate) => candidates.push(candidate),
        Err(e) => match e.into_malformed() {
            Ok(malformed) => warn!("{}; skipping", malformed),
            Err(absent) => debug!("{}", absent),
        },
    }
}

fn scan_application_dir(
    dir: &Path,
    resolver: &dyn EntityResolver,
    seen: &mut HashSet<std::ffi::OsString>,
    candidates: &mut Vec<Candidate>,
    now: DateTime<Utc>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping application dir {:?}: {}", dir, e);
            return;
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "desktop"))
        .collect();
    paths.sort();

    for path in paths {
        let Some(name) = path.file_name() else {
            continue;
        };
        if !seen.insert(name.to_os_string()) {
            continue;
        }
        push_adapted(
            candidates,
            resolver.resolve(&EntityRef::DesktopEntry(path.clone())),
            now,
        );
    }
}

fn scan_file_root(
    root: &Path,
    config: &Config,
    filter: &PathFilter,
    candidates: &mut Vec<Candidate>,
    now: DateTime<Utc>,
) {
    if !root.is_dir() {
        debug!("File root {:?} does not exist", root);
        return;
    }

    let before = candidates.len();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .max_depth(config.indexing.max_depth)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !filter.should_exclude(e.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Walk error under {:?}: {}", root, e);
                continue;
            }
        };

        // Skip the root path itself
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_dir() && !config.indexing.index_directories {
            continue;
        }

        let raw = match entry.metadata() {
            Ok(metadata) => Ok(RawEntity::Path {
                path: entry.path().to_path_buf(),
                meta: PathMeta::from_metadata(&metadata),
            }),
            Err(e) => Err(AdaptError::Malformed {
                entity: entry.path().display().to_string(),
                reason: e.to_string(),
            }),
        };
        push_adapted(candidates, raw, now);
    }

    debug!("Scanned {:?}: {} entries", root, candidates.len() - before);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FsResolver;
    use beacon_core::CandidateKind;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let user_apps = dir.path().join("user-apps");
        let system_apps = dir.path().join("system-apps");
        let docs = dir.path().join("docs");
        for d in [&user_apps, &system_apps, &docs.join("deep/er/still")] {
            fs::create_dir_all(d).unwrap();
        }

        fs::write(
            user_apps.join("firefox.desktop"),
            "[Desktop Entry]\nType=Application\nName=Firefox Nightly\nExec=firefox-nightly %u\n",
        )
        .unwrap();
        fs::write(
            system_apps.join("firefox.desktop"),
            "[Desktop Entry]\nType=Application\nName=Firefox\nExec=firefox %u\n",
        )
        .unwrap();
        fs::write(
            system_apps.join("hidden.desktop"),
            "[Desktop Entry]\nType=Application\nName=Hidden\nExec=hidden\nNoDisplay=true\n",
        )
        .unwrap();
        fs::write(system_apps.join("broken.desktop"), "[Desktop Entry]\nName=Broken\n").unwrap();

        fs::write(docs.join("notes.txt"), "x").unwrap();
        fs::write(docs.join(".secret"), "x").unwrap();
        fs::write(docs.join("deep/er/still/too-deep.txt"), "x").unwrap();

        let mut config = Config::default();
        config.indexing.application_dirs = vec![
            user_apps.to_string_lossy().to_string(),
            system_apps.to_string_lossy().to_string(),
        ];
        config.indexing.file_roots = vec![docs.to_string_lossy().to_string()];
        config.indexing.max_depth = 3;
        (dir, config)
    }

    #[test]
    fn scan_collects_every_source() {
        let (_dir, config) = fixture();
        let resolver = FsResolver::new(&config).unwrap();

        let candidates = scan_all(&config, &resolver);
        let names: HashSet<&str> = candidates.iter().map(|c| c.display_name.as_str()).collect();

        assert!(names.contains("Firefox Nightly"));
        assert!(!names.contains("Firefox"));
        assert!(!names.contains("Hidden"));
        assert!(!names.contains("Broken"));
        assert!(names.contains("notes.txt"));
        assert!(names.contains("deep"));
        assert!(!names.contains(".secret"));
        assert!(!names.contains("too-deep.txt"));
        assert!(names.contains("Lock Screen"));

        let apps = candidates
            .iter()
            .filter(|c| c.kind == CandidateKind::Application)
            .count();
        assert_eq!(apps, 1);
    }

    #[test]
    fn directories_can_be_left_out() {
        let (_dir, mut config) = fixture();
        config.indexing.index_directories = false;
        let resolver = FsResolver::new(&config).unwrap();

        let candidates = scan_all(&config, &resolver);
        assert!(candidates.iter().all(|c| c.display_name != "deep"));
        assert!(candidates.iter().any(|c| c.display_name == "notes.txt"));
    }
}
