//! IPC protocol definitions

use beacon_core::{IndexStats, LaunchDescriptor, SearchHit, SearchResults};
use serde::{Deserialize, Serialize};

/// Request message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ranked candidates for a query; an empty query browses by usage
    Search {
        query: String,
        limit: Option<usize>,
    },

    /// Record a selection and get the launch descriptor back
    Select { id: String },

    /// Get index status
    Status,

    /// Rescan every source and rebuild the index
    Reindex,
}

/// Response message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    SearchResult {
        hits: Vec<SearchHit>,
        query_time_ms: u64,
        #[serde(default)]
        timed_out: bool,
    },

    Selected { launch: LaunchDescriptor },

    Status { stats: IndexStats },

    /// Success response
    Ok { message: String },

    /// Error response
    Error { message: String },
}

impl Response {
    /// Create an OK response
    pub fn ok(message: impl Into<String>) -> Self {
        Response::Ok {
            message: message.into(),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Create a search result response
    pub fn search_result(results: SearchResults) -> Self {
        Response::SearchResult {
            hits: results.hits,
            query_time_ms: results.query_time_ms,
            timed_out: results.timed_out,
        }
    }
}
