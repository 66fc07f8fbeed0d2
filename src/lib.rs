//! beacon - quick-launcher core
//!
//! Keeps an in-memory index of applications, files and user-defined actions,
//! answers ranked fuzzy queries within an interactive latency budget and
//! learns from what the user picks.

pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod index;
pub mod indexer;
pub mod ipc;
pub mod platform;
pub mod ranking;
pub mod search;
pub mod source;

pub use beacon_core::{CandidateKind, IndexStats, LaunchDescriptor, SearchHit, SearchResults};
pub use coordinator::Coordinator;
pub use error::CoreError;
