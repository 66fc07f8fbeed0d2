//! Query engine
//!
//! Matches a query against the index store, scores each hit with the ranking
//! model and returns the best `limit` results. An empty query browses by
//! usage instead.

use std::time::{Duration, Instant};

use beacon_core::{CandidateKind, SearchHit};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::CoreError;
use crate::index::{query_tokens, IndexStore};
use crate::ranking::{RankingModel, UsageTable};
use crate::source::Candidate;

/// Search query parameters
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// The raw text typed by the user
    pub query: String,
    /// Maximum number of results to return
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
        }
    }
}

/// A candidate with its final score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
}

impl ScoredCandidate {
    pub fn to_hit(&self) -> SearchHit {
        SearchHit {
            id: self.candidate.id.clone(),
            display_name: self.candidate.display_name.clone(),
            kind: self.candidate.kind,
            score: self.score,
        }
    }
}

/// Ranked results with timing information
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<ScoredCandidate>,
    /// The latency budget ran out; `results` are the best found so far
    pub timed_out: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    ranking: RankingModel,
    budget: Duration,
}

impl QueryEngine {
    pub fn new(ranking: RankingModel, config: &SearchConfig) -> Self {
        Self {
            ranking,
            budget: Duration::from_millis(config.latency_budget_ms),
        }
    }

    pub fn ranking(&self) -> &RankingModel {
        &self.ranking
    }

    /// Run a query against a consistent snapshot of index and usage
    pub fn search(
        &self,
        index: &IndexStore,
        usage: &UsageTable,
        query: &SearchQuery,
        now: DateTime<Utc>,
    ) -> SearchOutcome {
        let start = Instant::now();
        let tokens = query_tokens(&query.query);

        let (results, timed_out) = if tokens.is_empty() {
            (self.browse(index, usage, query.limit, now), false)
        } else {
            self.matched(index, usage, &tokens, query.limit, start + self.budget, now)
        };

        let elapsed = start.elapsed();
        if timed_out {
            warn!(
                "{}; returning {} partial results for {:?}",
                CoreError::QueryTimeout {
                    budget_ms: self.budget.as_millis() as u64
                },
                results.len(),
                query.query
            );
        } else {
            debug!(
                "Search {:?} returned {} results in {:?}",
                query.query,
                results.len(),
                elapsed
            );
        }

        SearchOutcome {
            results,
            timed_out,
            elapsed,
        }
    }

    fn matched(
        &self,
        index: &IndexStore,
        usage: &UsageTable,
        tokens: &[String],
        limit: usize,
        deadline: Instant,
        now: DateTime<Utc>,
    ) -> (Vec<ScoredCandidate>, bool) {
        let lookup = index.lookup(tokens, Some(deadline));

        let scored: Vec<(f64, &Candidate)> = lookup
            .hits
            .iter()
            .filter_map(|hit| {
                let candidate = index.get(&hit.id)?;
                let score = self
                    .ranking
                    .score(&hit.qualities, usage.get(&hit.id), now);
                Some((score, candidate))
            })
            .collect();

        (self.top(scored, limit), lookup.timed_out)
    }

    /// Most used candidates first, padded with never-used ones
    fn browse(
        &self,
        index: &IndexStore,
        usage: &UsageTable,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let used: Vec<(f64, &Candidate)> = usage
            .iter()
            .filter_map(|(id, record)| {
                let candidate = index.get(id)?;
                Some((self.ranking.usage_score(Some(record), now), candidate))
            })
            .collect();

        let mut results = self.top(used, limit);
        if results.len() < limit {
            let unused: Vec<(f64, &Candidate)> = index
                .candidates()
                .filter(|candidate| usage.get(&candidate.id).is_none())
                .map(|candidate| (0.0, candidate))
                .collect();
            results.extend(self.top(unused, limit - results.len()));
        }
        results
    }

    /// Sort by score, kind priority and id, keeping the first `limit`
    fn top(&self, mut scored: Vec<(f64, &Candidate)>, limit: usize) -> Vec<ScoredCandidate> {
        if limit == 0 || scored.is_empty() {
            return Vec::new();
        }
        let order = |a: &(f64, &Candidate), b: &(f64, &Candidate)| {
            self.ranking.compare(key(a), key(b))
        };
        if scored.len() > limit {
            scored.select_nth_unstable_by(limit - 1, order);
            scored.truncate(limit);
        }
        scored.sort_by(order);

        scored
            .into_iter()
            .map(|(score, candidate)| ScoredCandidate {
                candidate: candidate.clone(),
                score,
            })
            .collect()
    }
}

fn key<'a>(entry: &(f64, &'a Candidate)) -> (f64, CandidateKind, &'a str) {
    (entry.0, entry.1.kind, entry.1.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn candidate(id: &str, name: &str, kind: CandidateKind) -> Candidate {
        Candidate {
            id: id.to_string(),
            display_name: name.to_string(),
            aliases: vec![name.to_string()],
            kind,
            launch: json!(null),
            last_valid: at(0),
        }
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(RankingModel::default(), &SearchConfig::default())
    }

    fn names(outcome: &SearchOutcome) -> Vec<&str> {
        outcome
            .results
            .iter()
            .map(|r| r.candidate.display_name.as_str())
            .collect()
    }

    #[test]
    fn empty_query_browses_by_usage() {
        let mut index = IndexStore::default();
        let mut usage = UsageTable::new();
        for n in 0..8 {
            index.insert_or_update(candidate(&format!("app:{n}"), &format!("App {n}"), CandidateKind::Application));
            for _ in 0..n {
                usage.record_selection(&format!("app:{n}"), at(0));
            }
        }

        let outcome = engine().search(&index, &usage, &SearchQuery::new("", 5), at(60));

        assert_eq!(names(&outcome), vec!["App 7", "App 6", "App 5", "App 4", "App 3"]);
        let scores: Vec<f64> = outcome.results.iter().map(|r| r.score).collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn browse_pads_with_unused_candidates() {
        let mut index = IndexStore::default();
        index.insert_or_update(candidate("file:/b", "b.txt", CandidateKind::File));
        index.insert_or_update(candidate("app:a", "Alpha", CandidateKind::Application));
        index.insert_or_update(candidate("action:c", "Charlie", CandidateKind::Action));
        let mut usage = UsageTable::new();
        usage.record_selection("file:/b", at(0));

        let outcome = engine().search(&index, &usage, &SearchQuery::new("   ", 3), at(1));

        assert_eq!(names(&outcome), vec!["b.txt", "Alpha", "Charlie"]);
    }

    #[test]
    fn equal_scores_break_by_kind_priority() {
        let mut index = IndexStore::default();
        index.insert_or_update(candidate("file:/tmp/term", "term", CandidateKind::File));
        index.insert_or_update(candidate("action:term", "term", CandidateKind::Action));
        index.insert_or_update(candidate("app:term", "term", CandidateKind::Application));

        let outcome = engine().search(&index, &UsageTable::new(), &SearchQuery::new("term", 10), at(0));

        let kinds: Vec<CandidateKind> = outcome.results.iter().map(|r| r.candidate.kind).collect();
        assert_eq!(
            kinds,
            vec![CandidateKind::Application, CandidateKind::Action, CandidateKind::File]
        );
    }

    #[test]
    fn limit_truncates_after_sorting() {
        let mut index = IndexStore::default();
        for n in 0..20 {
            index.insert_or_update(candidate(&format!("file:/{n:02}"), &format!("reports {n:02}"), CandidateKind::File));
        }
        index.insert_or_update(candidate("file:/exact", "report", CandidateKind::File));

        let outcome = engine().search(&index, &UsageTable::new(), &SearchQuery::new("report", 3), at(0));

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].candidate.id, "file:/exact");
    }
}
