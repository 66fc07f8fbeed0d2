//! Shared types for beacon
//!
//! This crate contains types shared between the daemon and the clients
//! that talk to it over IPC (the CLI, a launcher window).

use serde::{Deserialize, Serialize};

/// Opaque payload handed back to the launch mechanism on selection.
///
/// The daemon builds it when an entity is indexed and never reads it again.
pub type LaunchDescriptor = serde_json::Value;

/// Closed set of things the launcher can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Application,
    File,
    Action,
}

impl CandidateKind {
    pub const ALL: [CandidateKind; 3] = [
        CandidateKind::Application,
        CandidateKind::Action,
        CandidateKind::File,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CandidateKind::Application => "application",
            CandidateKind::File => "file",
            CandidateKind::Action => "action",
        }
    }
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked search result as seen by the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub display_name: String,
    pub kind: CandidateKind,
    pub score: f64,
}

/// Search results returned by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub query_time_ms: u64,
    /// The latency budget ran out and `hits` holds the best found so far
    #[serde(default)]
    pub timed_out: bool,
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub applications: u64,
    pub files: u64,
    pub actions: u64,
    pub tokens: u64,
    pub usage_records: u64,
    pub is_scanning: bool,
    pub rebuilds: u64,
}

impl IndexStats {
    pub fn candidates(&self) -> u64 {
        self.applications + self.files + self.actions
    }
}
