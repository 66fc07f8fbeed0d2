//! Coordinator
//!
//! Owns the index store and the usage table and is the only place either is
//! mutated. Mutations take the index write lock one chunk at a time, so a
//! search sees the state before or after a chunk, never half of one.
//! Lock order is always index, then usage, then the scan journal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use anyhow::{Context, Result};
use beacon_core::{IndexStats, LaunchDescriptor, SearchResults};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::error::CoreError;
use crate::index::IndexStore;
use crate::indexer::{scan_all, Mutation};
use crate::ranking::{RankingModel, UsageTable};
use crate::search::{QueryEngine, SearchQuery};
use crate::source::{Candidate, EntityResolver};

pub struct Coordinator {
    index: RwLock<IndexStore>,
    usage: RwLock<UsageTable>,
    engine: QueryEngine,
    database: Option<Database>,
    resolver: Arc<dyn EntityResolver>,
    config: Config,
    is_scanning: AtomicBool,
    /// Mutations applied while a rescan runs, replayed onto its result
    journal: Mutex<Option<Vec<Mutation>>>,
    rebuilds: AtomicU64,
}

impl Coordinator {
    /// Create a coordinator, loading persisted usage from `database` if given
    pub fn new(
        config: Config,
        resolver: Arc<dyn EntityResolver>,
        database: Option<Database>,
    ) -> Result<Self> {
        let usage = match &database {
            Some(db) => {
                let records = db.load_usage().context("Failed to load usage table")?;
                info!("Loaded {} usage records", records.len());
                UsageTable::from_records(records)
            }
            None => UsageTable::new(),
        };

        Ok(Self {
            index: RwLock::new(IndexStore::from_config(&config.matching)),
            usage: RwLock::new(usage),
            engine: QueryEngine::new(RankingModel::from_config(&config.ranking), &config.search),
            database,
            resolver,
            config,
            is_scanning: AtomicBool::new(false),
            journal: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn read_index(&self) -> RwLockReadGuard<'_, IndexStore> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, IndexStore> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_usage(&self) -> RwLockReadGuard<'_, UsageTable> {
        self.usage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_usage(&self) -> RwLockWriteGuard<'_, UsageTable> {
        self.usage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_journal(&self) -> MutexGuard<'_, Option<Vec<Mutation>>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a single mutation
    pub fn submit_mutation(&self, mutation: Mutation) {
        self.apply_batch(vec![mutation]);
    }

    /// Apply mutations in order, taking the write lock once per chunk
    pub fn apply_batch(&self, mutations: Vec<Mutation>) {
        let now = Utc::now();
        let chunk_size = self.config.performance.batch_chunk_size.max(1);

        for chunk in mutations.chunks(chunk_size) {
            let mut index = self.write_index();
            let mut usage = self.write_usage();
            for mutation in chunk {
                apply(&mut index, &mut usage, mutation, now);
            }
            if let Some(journal) = self.lock_journal().as_mut() {
                journal.extend_from_slice(chunk);
            }
        }
    }

    /// Ranked results for `query` at the current time
    pub fn search(&self, query: &str, limit: usize) -> SearchResults {
        self.search_at(query, limit, Utc::now())
    }

    /// Ranked results for `query` as of `now`
    pub fn search_at(&self, query: &str, limit: usize, now: DateTime<Utc>) -> SearchResults {
        let index = self.read_index();
        let usage = self.read_usage();
        let outcome = self
            .engine
            .search(&index, &usage, &SearchQuery::new(query, limit), now);

        SearchResults {
            hits: outcome.results.iter().map(|scored| scored.to_hit()).collect(),
            query_time_ms: outcome.elapsed.as_millis() as u64,
            timed_out: outcome.timed_out,
        }
    }

    /// Count a selection of an indexed candidate
    pub fn record_selection(&self, id: &str) -> Result<(), CoreError> {
        self.record_selection_at(id, Utc::now())
    }

    pub fn record_selection_at(&self, id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let index = self.read_index();
        if !index.contains(id) {
            return Err(CoreError::UnknownCandidate(id.to_string()));
        }
        let mut usage = self.write_usage();
        let record = usage.record_selection(id, now);
        debug!("Selected {} ({} times)", id, record.count);
        Ok(())
    }

    /// Record a selection and hand back what the launcher needs to run it
    pub fn select(&self, id: &str) -> Result<LaunchDescriptor, CoreError> {
        let index = self.read_index();
        let launch = index
            .get(id)
            .map(|candidate| candidate.launch.clone())
            .ok_or_else(|| CoreError::UnknownCandidate(id.to_string()))?;
        self.write_usage().record_selection(id, Utc::now());
        Ok(launch)
    }

    /// Replace the whole index with `candidates`.
    ///
    /// The new store is built without holding any lock and swapped in at once.
    /// Mutations journaled since the scan began are replayed onto it first, so
    /// a removal seen while scanning is not undone by the swap. Every usage
    /// record is then marked present or absent against the new contents.
    pub fn rebuild(&self, candidates: Vec<Candidate>) {
        let now = Utc::now();
        let mut fresh = self.read_index().empty_like();
        for candidate in candidates {
            fresh.insert_or_update(candidate);
        }

        let mut index = self.write_index();
        let mut usage = self.write_usage();
        let journal = self.lock_journal().take().unwrap_or_default();
        if !journal.is_empty() {
            debug!("Replaying {} mutations from during the scan", journal.len());
        }
        for mutation in &journal {
            apply(&mut fresh, &mut usage, mutation, now);
        }
        usage.reconcile(|id| fresh.contains(id), now);
        *index = fresh;
        drop(usage);
        drop(index);

        let rebuilds = self.rebuilds.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Index rebuilt ({} total)", rebuilds);
    }

    /// Scan every source again and rebuild from the result
    pub async fn rescan(&self) -> Result<()> {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            info!("Scan already in progress");
            return Ok(());
        }

        // Start journaling before the scan reads anything
        *self.lock_journal() = Some(Vec::new());

        let config = self.config.clone();
        let resolver = Arc::clone(&self.resolver);
        let scanned =
            tokio::task::spawn_blocking(move || scan_all(&config, resolver.as_ref())).await;

        let result = match scanned {
            Ok(candidates) => {
                self.rebuild(candidates);
                Ok(())
            }
            Err(e) => {
                self.lock_journal().take();
                Err(anyhow::anyhow!("Scan task failed: {}", e))
            }
        };
        self.is_scanning.store(false, Ordering::SeqCst);
        result
    }

    /// Check the index invariants; rebuild from a fresh scan if they fail.
    ///
    /// Returns true when a rebuild was needed.
    pub async fn verify_or_rebuild(&self) -> Result<bool> {
        let verdict = self.read_index().verify();
        match verdict {
            Ok(()) => Ok(false),
            Err(e) => {
                error!("{}; rebuilding index", e);
                self.rescan().await?;
                Ok(true)
            }
        }
    }

    /// Persist usage changes since the last flush.
    ///
    /// On failure the changes stay pending and are retried by the next flush.
    pub fn flush_usage(&self) -> Result<(), CoreError> {
        let Some(db) = &self.database else {
            return Ok(());
        };

        let delta = {
            let mut usage = self.write_usage();
            let evict_after = chrono::Duration::days(self.config.usage.evict_after_days as i64);
            let evicted = usage.evict_absent(Utc::now(), evict_after);
            if !evicted.is_empty() {
                debug!("Evicting {} usage records", evicted.len());
            }
            usage.take_pending()
        };
        if delta.is_empty() {
            return Ok(());
        }

        match db.apply_usage_delta(&delta) {
            Ok(()) => {
                debug!(
                    "Flushed {} usage updates, {} deletions",
                    delta.upserts.len(),
                    delta.deletes.len()
                );
                Ok(())
            }
            Err(e) => {
                self.write_usage().restore_pending(delta);
                let err = CoreError::PersistenceWriteFailure(e);
                warn!("{}; retrying on next flush", err);
                Err(err)
            }
        }
    }

    pub fn status(&self) -> IndexStats {
        let mut stats = self.read_index().stats();
        stats.usage_records = self.read_usage().len() as u64;
        stats.is_scanning = self.is_scanning.load(Ordering::Relaxed);
        stats.rebuilds = self.rebuilds.load(Ordering::Relaxed);
        stats
    }

    /// Apply batches from the change bridge until it hangs up
    pub async fn consume(self: Arc<Self>, mut batches: mpsc::Receiver<Vec<Mutation>>) {
        while let Some(batch) = batches.recv().await {
            debug!("Applying {} mutations", batch.len());
            self.apply_batch(batch);
        }
        debug!("Mutation queue closed");
    }

    #[cfg(test)]
    pub(crate) fn corrupt_index_for_test(&self) {
        self.write_index().inject_dangling_posting("ghost", "file:/nowhere");
    }
}

fn apply(index: &mut IndexStore, usage: &mut UsageTable, mutation: &Mutation, now: DateTime<Utc>) {
    match mutation {
        Mutation::Upsert(candidate) => {
            usage.mark_present(&candidate.id);
            index.insert_or_update(candidate.clone());
        }
        Mutation::Remove(id) => {
            if index.remove(id).is_some() {
                usage.mark_absent(id, now);
            }
        }
        Mutation::RemoveTree(id) => {
            let below = format!("{}/", id);
            let doomed: Vec<String> = index
                .candidates()
                .filter(|c| c.id == *id || c.id.starts_with(&below))
                .map(|c| c.id.clone())
                .collect();
            for id in doomed {
                index.remove(&id);
                usage.mark_absent(&id, now);
            }
        }
    }
}
