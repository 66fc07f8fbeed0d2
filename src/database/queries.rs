//! Usage table queries

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Database;
use crate::ranking::{UsageDelta, UsageRecord};

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl Database {
    /// Load every usage record
    pub fn load_usage(&self) -> Result<HashMap<String, UsageRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT id, count, last_selected, absent_since FROM usage")?;

        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let last_selected: i64 = row.get(2)?;
            let absent_since: Option<i64> = row.get(3)?;
            Ok((
                id,
                UsageRecord {
                    count: count.max(0) as u64,
                    last_selected: from_millis(last_selected),
                    absent_since: absent_since.map(from_millis),
                },
            ))
        })?;

        let mut records = HashMap::new();
        for row in rows {
            let (id, record) = row.context("Failed to read usage row")?;
            records.insert(id, record);
        }
        Ok(records)
    }

    /// Write a batch of usage changes in one transaction
    pub fn apply_usage_delta(&self, delta: &UsageDelta) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO usage (id, count, last_selected, absent_since)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    count = excluded.count,
                    last_selected = excluded.last_selected,
                    absent_since = excluded.absent_since
                "#,
            )?;

            for (id, record) in &delta.upserts {
                upsert.execute(params![
                    id,
                    record.count as i64,
                    record.last_selected.timestamp_millis(),
                    record.absent_since.map(|t| t.timestamp_millis()),
                ])?;
            }

            let mut delete = tx.prepare("DELETE FROM usage WHERE id = ?1")?;
            for id in &delta.deletes {
                delete.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Number of stored usage records
    pub fn usage_count(&self) -> Result<u64> {
        let conn = self.connection();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM usage", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn usage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");

        let db = Database::open(&path).unwrap();
        db.apply_usage_delta(&UsageDelta {
            upserts: vec![
                (
                    "app:firefox.desktop".to_string(),
                    UsageRecord {
                        count: 3,
                        last_selected: at(10),
                        absent_since: None,
                    },
                ),
                (
                    "file:/tmp/x".to_string(),
                    UsageRecord {
                        count: 1,
                        last_selected: at(0),
                        absent_since: Some(at(5)),
                    },
                ),
            ],
            deletes: Vec::new(),
        })
        .unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        let records = db.load_usage().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records["app:firefox.desktop"].count, 3);
        assert_eq!(records["app:firefox.desktop"].last_selected, at(10));
        assert_eq!(records["file:/tmp/x"].absent_since, Some(at(5)));
    }

    #[test]
    fn deletes_remove_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("usage.db")).unwrap();
        let record = UsageRecord {
            count: 1,
            last_selected: at(0),
            absent_since: None,
        };

        db.apply_usage_delta(&UsageDelta {
            upserts: vec![("a".to_string(), record.clone()), ("b".to_string(), record)],
            deletes: Vec::new(),
        })
        .unwrap();
        db.apply_usage_delta(&UsageDelta {
            upserts: Vec::new(),
            deletes: vec!["a".to_string()],
        })
        .unwrap();

        assert_eq!(db.usage_count().unwrap(), 1);
    }
}
