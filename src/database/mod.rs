//! Database module for beacon
//!
//! Persists the usage table in SQLite.

mod queries;
mod schema;

pub use schema::Database;
