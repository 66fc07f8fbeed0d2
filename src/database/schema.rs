//! Database schema and initialization

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Database wrapper around a single shared connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the usage database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.connection();
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        info!("Database schema initialized at {:?}", self.db_path);
        Ok(())
    }

    /// Get a connection handle
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

/// SQL schema for the database
/// Timestamps are unix milliseconds
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS usage (
    id TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0,
    last_selected INTEGER NOT NULL,
    absent_since INTEGER
);

CREATE INDEX IF NOT EXISTS idx_usage_absent ON usage(absent_since);
"#;
