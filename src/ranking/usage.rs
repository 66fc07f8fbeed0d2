//! Usage table: per-candidate selection count and recency
//!
//! Changes are buffered as dirty ids and handed to the database in batches,
//! so a selection never waits on disk.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

/// Selection history of one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub count: u64,
    pub last_selected: DateTime<Utc>,
    /// Set while the candidate is missing from the index
    pub absent_since: Option<DateTime<Utc>>,
}

/// Buffered changes awaiting a flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageDelta {
    pub upserts: Vec<(String, UsageRecord)>,
    pub deletes: Vec<String>,
}

impl UsageDelta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct UsageTable {
    records: HashMap<String, UsageRecord>,
    dirty: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table loaded from storage; nothing is dirty
    pub fn from_records(records: HashMap<String, UsageRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn get(&self, id: &str) -> Option<&UsageRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UsageRecord)> {
        self.records.iter()
    }

    /// Count one selection, creating the record on first use
    pub fn record_selection(&mut self, id: &str, now: DateTime<Utc>) -> &UsageRecord {
        self.deleted.remove(id);
        self.dirty.insert(id.to_string());
        let record = self
            .records
            .entry(id.to_string())
            .or_insert(UsageRecord {
                count: 0,
                last_selected: now,
                absent_since: None,
            });
        record.count += 1;
        record.last_selected = now;
        record.absent_since = None;
        record
    }

    /// The candidate left the index; start its eviction clock
    pub fn mark_absent(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(id) {
            if record.absent_since.is_none() {
                record.absent_since = Some(now);
                self.dirty.insert(id.to_string());
            }
        }
    }

    /// The candidate is back in the index
    pub fn mark_present(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            if record.absent_since.take().is_some() {
                self.dirty.insert(id.to_string());
            }
        }
    }

    /// Bring every record's absence mark in line with a freshly built index.
    ///
    /// Records loaded from disk may belong to candidates that disappeared
    /// while nothing was watching; they start their eviction clock here.
    pub fn reconcile(&mut self, is_indexed: impl Fn(&str) -> bool, now: DateTime<Utc>) {
        for (id, record) in self.records.iter_mut() {
            let changed = match (is_indexed(id), record.absent_since) {
                (true, Some(_)) => {
                    record.absent_since = None;
                    true
                }
                (false, None) => {
                    record.absent_since = Some(now);
                    true
                }
                _ => false,
            };
            if changed {
                self.dirty.insert(id.clone());
            }
        }
    }

    /// Drop records whose candidate has been absent for longer than `after`
    pub fn evict_absent(&mut self, now: DateTime<Utc>, after: Duration) -> Vec<String> {
        let cutoff = now - after;
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.absent_since.is_some_and(|since| since <= cutoff))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.records.remove(id);
            self.dirty.remove(id);
            self.deleted.insert(id.clone());
        }
        expired
    }

    /// Take everything changed since the last flush
    pub fn take_pending(&mut self) -> UsageDelta {
        let upserts = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|id| self.records.get(&id).cloned().map(|record| (id, record)))
            .collect();
        let deletes = std::mem::take(&mut self.deleted).into_iter().collect();
        UsageDelta { upserts, deletes }
    }

    /// Put back a delta whose write failed, so the next flush retries it
    pub fn restore_pending(&mut self, delta: UsageDelta) {
        for (id, _) in delta.upserts {
            if self.records.contains_key(&id) {
                self.dirty.insert(id);
            }
        }
        for id in delta.deletes {
            if !self.records.contains_key(&id) {
                self.deleted.insert(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + hours * 3600, 0).unwrap()
    }

    #[test]
    fn selection_creates_and_increments() {
        let mut table = UsageTable::new();
        table.record_selection("app:a", at(0));
        let record = table.record_selection("app:a", at(2)).clone();

        assert_eq!(record.count, 2);
        assert_eq!(record.last_selected, at(2));
        assert_eq!(table.take_pending().upserts.len(), 1);
        assert!(table.take_pending().is_empty());
    }

    #[test]
    fn absent_records_are_evicted_after_the_window() {
        let mut table = UsageTable::new();
        table.record_selection("file:/gone", at(0));
        table.record_selection("file:/kept", at(0));
        table.mark_absent("file:/gone", at(1));
        table.mark_absent("file:/kept", at(1));
        table.mark_present("file:/kept");
        table.take_pending();

        assert!(table.evict_absent(at(24), Duration::days(30)).is_empty());
        let evicted = table.evict_absent(at(1 + 30 * 24), Duration::days(30));

        assert_eq!(evicted, vec!["file:/gone".to_string()]);
        assert!(table.get("file:/gone").is_none());
        assert!(table.get("file:/kept").is_some());
        assert_eq!(table.take_pending().deletes, vec!["file:/gone".to_string()]);
    }

    #[test]
    fn reconcile_marks_records_missing_from_the_index() {
        let mut records = HashMap::new();
        for id in ["file:/gone", "file:/back", "file:/here"] {
            records.insert(
                id.to_string(),
                UsageRecord {
                    count: 1,
                    last_selected: at(0),
                    absent_since: (id == "file:/back").then(|| at(1)),
                },
            );
        }
        let mut table = UsageTable::from_records(records);

        table.reconcile(|id| id != "file:/gone", at(5));

        assert_eq!(table.get("file:/gone").unwrap().absent_since, Some(at(5)));
        assert_eq!(table.get("file:/back").unwrap().absent_since, None);
        assert_eq!(table.get("file:/here").unwrap().absent_since, None);
        let mut flushed: Vec<String> = table
            .take_pending()
            .upserts
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        flushed.sort();
        assert_eq!(flushed, vec!["file:/back".to_string(), "file:/gone".to_string()]);

        // an already absent record keeps its original timestamp
        table.reconcile(|_| false, at(9));
        assert_eq!(table.get("file:/gone").unwrap().absent_since, Some(at(5)));
    }

    #[test]
    fn failed_flush_is_retried() {
        let mut table = UsageTable::new();
        table.record_selection("app:a", at(0));

        let delta = table.take_pending();
        table.restore_pending(delta.clone());

        assert_eq!(table.take_pending(), delta);
    }
}
