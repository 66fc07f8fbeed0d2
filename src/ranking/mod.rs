//! Ranking model
//!
//! Scores combine textual match quality with usage frequency and recency:
//!
//! ```text
//! score = w_text * mean(quality weights)
//!       + w_freq * ln(1 + count)
//!       + w_recency * 2^(-age / half_life)
//! ```
//!
//! Every input, including the evaluation instant, is passed in explicitly,
//! so identical states always rank identically.

mod usage;

pub use usage::{UsageDelta, UsageRecord, UsageTable};

use std::cmp::Ordering;

use beacon_core::CandidateKind;
use chrono::{DateTime, Utc};

use crate::config::{QualityWeights, RankingConfig};
use crate::index::MatchQuality;

#[derive(Debug, Clone)]
pub struct RankingModel {
    text_weight: f64,
    frequency_weight: f64,
    recency_weight: f64,
    half_life_hours: f64,
    quality: QualityWeights,
    kind_priority: Vec<CandidateKind>,
}

impl Default for RankingModel {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl RankingModel {
    pub fn from_config(config: &RankingConfig) -> Self {
        Self {
            text_weight: config.text_weight,
            frequency_weight: config.frequency_weight,
            recency_weight: config.recency_weight,
            half_life_hours: config.recency_half_life_hours.max(f64::MIN_POSITIVE),
            quality: config.quality.clone(),
            kind_priority: config.kind_priority.clone(),
        }
    }

    pub fn quality_weight(&self, quality: MatchQuality) -> f64 {
        match quality {
            MatchQuality::Exact => self.quality.exact,
            MatchQuality::Prefix => self.quality.prefix,
            MatchQuality::Fuzzy => self.quality.fuzzy,
            MatchQuality::Substring => self.quality.substring,
        }
    }

    /// Mean quality weight over the query tokens
    pub fn text_score(&self, qualities: &[MatchQuality]) -> f64 {
        if qualities.is_empty() {
            return 0.0;
        }
        let total: f64 = qualities.iter().map(|q| self.quality_weight(*q)).sum();
        total / qualities.len() as f64
    }

    /// Diminishing-returns transform of the selection count
    pub fn frequency(count: u64) -> f64 {
        (count as f64).ln_1p()
    }

    /// Exponential decay since the last selection, 1.0 when just selected
    pub fn recency(&self, last_selected: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_ms = (now - last_selected).num_milliseconds().max(0) as f64;
        let age_hours = age_ms / 3_600_000.0;
        (-std::f64::consts::LN_2 * age_hours / self.half_life_hours).exp()
    }

    /// Usage-only component of the score
    pub fn usage_score(&self, usage: Option<&UsageRecord>, now: DateTime<Utc>) -> f64 {
        match usage {
            Some(record) => {
                self.frequency_weight * Self::frequency(record.count)
                    + self.recency_weight * self.recency(record.last_selected, now)
            }
            None => 0.0,
        }
    }

    /// Full score of a matched candidate
    pub fn score(
        &self,
        qualities: &[MatchQuality],
        usage: Option<&UsageRecord>,
        now: DateTime<Utc>,
    ) -> f64 {
        self.text_weight * self.text_score(qualities) + self.usage_score(usage, now)
    }

    /// Position of a kind in the tie-break order; unlisted kinds go last
    pub fn kind_rank(&self, kind: CandidateKind) -> usize {
        self.kind_priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.kind_priority.len())
    }

    /// Result order: score descending, then kind priority, then identifier
    pub fn compare(
        &self,
        a: (f64, CandidateKind, &str),
        b: (f64, CandidateKind, &str),
    ) -> Ordering {
        b.0.total_cmp(&a.0)
            .then_with(|| self.kind_rank(a.1).cmp(&self.kind_rank(b.1)))
            .then_with(|| a.2.cmp(b.2))
    }
}
