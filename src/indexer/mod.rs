//! Candidate discovery
//!
//! Handles the initial scan, file watching, and turning change
//! notifications into index mutations.

mod bridge;
mod scanner;
mod watcher;

pub use bridge::{resolve, ChangeBridge, ChangeEvent, ChangeKind, Debouncer, Mutation};
pub use scanner::scan_all;
pub use watcher::{start_watcher, translate, WatchScope};
