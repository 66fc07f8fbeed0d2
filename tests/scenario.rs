//! End-to-end behaviour of the launcher core: scan, watch, search, select

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use beacon::config::Config;
use beacon::coordinator::Coordinator;
use beacon::indexer::{ChangeBridge, ChangeEvent, ChangeKind, Mutation};
use beacon::source::{adapt, EntityRef, EntityResolver, FsResolver, RawEntity};
use beacon::CandidateKind;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

fn desktop_file(dir: &Path, file: &str, name: &str, exec: &str) {
    fs::write(
        dir.join(file),
        format!("[Desktop Entry]\nType=Application\nName={name}\nExec={exec}\n"),
    )
    .unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    docs: std::path::PathBuf,
    config: Config,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let apps = dir.path().join("applications");
    let docs = dir.path().join("docs");
    fs::create_dir_all(&apps).unwrap();
    fs::create_dir_all(&docs).unwrap();

    desktop_file(&apps, "firefox.desktop", "Firefox", "firefox %u");
    desktop_file(&apps, "nautilus.desktop", "Files", "nautilus --new-window");
    desktop_file(&apps, "xterm.desktop", "Terminal", "xterm");
    desktop_file(&apps, "thunderbird.desktop", "Thunderbird", "thunderbird %u");

    let mut config = Config::default();
    config.indexing.application_dirs = vec![apps.to_string_lossy().to_string()];
    config.indexing.file_roots = vec![docs.to_string_lossy().to_string()];
    config.actions = Vec::new();
    config.watcher.debounce_ms = 20;

    Fixture {
        _dir: dir,
        docs,
        config,
    }
}

async fn scanned(config: &Config) -> Arc<Coordinator> {
    let resolver = Arc::new(FsResolver::new(config).unwrap());
    let coordinator = Arc::new(Coordinator::new(config.clone(), resolver, None).unwrap());
    coordinator.rescan().await.unwrap();
    coordinator
}

fn at(hours: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000 + hours * 3600, 0).unwrap()
}

#[tokio::test]
async fn firefox_files_terminal() {
    let fixture = fixture();
    let coordinator = scanned(&fixture.config).await;
    assert_eq!(coordinator.status().applications, 4);

    let fir = coordinator.search_at("fir", 10, at(0));
    assert_eq!(fir.hits[0].display_name, "Firefox");
    assert!(fir.hits.iter().any(|h| h.display_name == "Files"));
    assert!(fir.hits[0].score > fir.hits[1].score);

    let term = coordinator.search_at("term", 10, at(0));
    assert_eq!(term.hits[0].display_name, "Terminal");

    let before = coordinator.search_at("t", 10, at(0));
    assert_eq!(before.hits[0].display_name, "Thunderbird");

    for _ in 0..10 {
        coordinator
            .record_selection_at("app:xterm.desktop", at(0))
            .unwrap();
    }

    let after = coordinator.search_at("t", 10, at(1));
    assert_eq!(after.hits[0].display_name, "Terminal");
    assert_eq!(after.hits[1].display_name, "Thunderbird");
}

#[tokio::test]
async fn ranking_does_not_depend_on_history() {
    let fixture = fixture();
    let resolver = FsResolver::new(&fixture.config).unwrap();
    let mut candidates: Vec<_> = ["firefox", "nautilus", "xterm", "thunderbird"]
        .iter()
        .map(|name| {
            let apps = Path::new(&fixture.config.indexing.application_dirs[0]);
            let path = apps.join(format!("{name}.desktop"));
            let raw = resolver.resolve(&EntityRef::DesktopEntry(path)).unwrap();
            adapt(&raw, at(0)).unwrap()
        })
        .collect();

    let coordinator = || {
        let resolver = Arc::new(FsResolver::new(&fixture.config).unwrap());
        Coordinator::new(fixture.config.clone(), resolver, None).unwrap()
    };

    let forward = coordinator();
    for candidate in &candidates {
        forward.submit_mutation(Mutation::Upsert(candidate.clone()));
    }

    // Reverse order, with a detour through removal and re-insertion
    candidates.reverse();
    let backward = coordinator();
    for candidate in &candidates {
        backward.submit_mutation(Mutation::Upsert(candidate.clone()));
    }
    backward.submit_mutation(Mutation::Remove("app:firefox.desktop".to_string()));
    let firefox = candidates
        .iter()
        .find(|c| c.id == "app:firefox.desktop")
        .unwrap()
        .clone();
    backward.submit_mutation(Mutation::Upsert(firefox));

    for coordinator in [&forward, &backward] {
        coordinator
            .record_selection_at("app:thunderbird.desktop", at(0))
            .unwrap();
    }

    for query in ["", "t", "fi", "fir", "thnder"] {
        let a = forward.search_at(query, 10, at(2)).hits;
        let b = backward.search_at(query, 10, at(2)).hits;
        assert_eq!(a, b, "query {:?}", query);
    }
}

#[tokio::test]
async fn burst_of_modifications_becomes_one_mutation() {
    let fixture = fixture();
    let coordinator = scanned(&fixture.config).await;
    let note = fixture.docs.join("meeting notes.txt");
    fs::write(&note, "agenda").unwrap();

    let resolver: Arc<dyn EntityResolver> = Arc::new(FsResolver::new(&fixture.config).unwrap());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sink_tx, mut sink_rx) = mpsc::channel(8);
    let bridge = ChangeBridge::new(&fixture.config.watcher, resolver, sink_tx);
    let bridge = tokio::spawn(bridge.run(events_rx));

    for generation in 1..=3 {
        events_tx
            .send(ChangeEvent::new(
                ChangeKind::Modified,
                EntityRef::Path(note.clone()),
                generation,
            ))
            .unwrap();
    }

    let batch = tokio::time::timeout(Duration::from_secs(2), sink_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    coordinator.apply_batch(batch);

    drop(events_tx);
    bridge.await.unwrap();
    assert!(sink_rx.recv().await.is_none());

    let hits = coordinator.search("meeting", 5).hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, CandidateKind::File);
}

#[tokio::test]
async fn stale_added_does_not_resurrect_removed_entity() {
    let fixture = fixture();
    let coordinator = scanned(&fixture.config).await;
    let report = fixture.docs.join("report.pdf");
    fs::write(&report, "%PDF").unwrap();

    let raw = RawEntity::Path {
        path: report.clone(),
        meta: beacon::source::PathMeta {
            is_dir: false,
            size: 4,
        },
    };
    coordinator.submit_mutation(Mutation::Upsert(adapt(&raw, Utc::now()).unwrap()));
    assert_eq!(coordinator.search("report", 5).hits.len(), 1);

    let resolver: Arc<dyn EntityResolver> = Arc::new(FsResolver::new(&fixture.config).unwrap());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sink_tx, sink_rx) = mpsc::channel(8);
    let bridge = ChangeBridge::new(&fixture.config.watcher, resolver, sink_tx);
    let bridge = tokio::spawn(bridge.run(events_rx));
    let consumer = tokio::spawn(Arc::clone(&coordinator).consume(sink_rx));

    let entity = EntityRef::Path(report.clone());
    events_tx
        .send(ChangeEvent::new(ChangeKind::Removed, entity.clone(), 7))
        .unwrap();
    events_tx
        .send(ChangeEvent::new(ChangeKind::Added, entity, 6))
        .unwrap();

    drop(events_tx);
    bridge.await.unwrap();
    consumer.await.unwrap();

    // The file is still on disk, but the newest notification said it is gone
    assert!(report.exists());
    assert!(coordinator.search("report", 5).hits.is_empty());
}
