//! In-memory index store
//!
//! Postings map normalized tokens to candidate ids; a record table maps ids
//! to candidates. Both sides are updated together on every mutation so that
//! no posting dangles and no candidate token is missing from the postings.
//!
//! Tokens are also counted per head (their first few characters). The fuzzy
//! pass only walks the buckets whose head is close to the query, since the
//! postings keep each bucket contiguous.

mod fuzzy;
mod tokenize;

pub use fuzzy::{prefix_distance, FuzzyPolicy, PrefixMatcher};
pub use tokenize::{candidate_tokens, query_tokens, tokenize};

use std::collections::btree_map::Entry as MapEntry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use beacon_core::{CandidateKind, IndexStats};

use crate::config::MatchingConfig;
use crate::error::CoreError;
use crate::source::Candidate;

/// Vocabulary entries or heads scanned between deadline checks
const DEADLINE_CHECK_EVERY: usize = 256;

/// How well a query token matched a candidate token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchQuality {
    Substring,
    Fuzzy,
    Prefix,
    Exact,
}

impl MatchQuality {
    fn rank(self) -> u32 {
        match self {
            MatchQuality::Substring => 0,
            MatchQuality::Fuzzy => 1,
            MatchQuality::Prefix => 2,
            MatchQuality::Exact => 3,
        }
    }
}

/// A candidate matched by every query token
#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit {
    pub id: String,
    /// Best quality per query token, in query order
    pub qualities: Vec<MatchQuality>,
    seq: u64,
}

impl LookupHit {
    /// The weakest of the per-token qualities
    pub fn quality(&self) -> MatchQuality {
        self.qualities
            .iter()
            .copied()
            .min()
            .unwrap_or(MatchQuality::Substring)
    }

    fn rank_sum(&self) -> u32 {
        self.qualities.iter().map(|q| q.rank()).sum()
    }
}

/// Result of a lookup pass
#[derive(Debug, Clone, Default)]
pub struct Lookup {
    pub hits: Vec<LookupHit>,
    /// The deadline passed before every token was fully scanned
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    candidate: Candidate,
    tokens: BTreeSet<String>,
    /// Creation order, kept across updates
    seq: u64,
}

/// Token postings plus candidate records
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStore {
    postings: BTreeMap<String, BTreeSet<String>>,
    records: HashMap<String, Entry>,
    /// Number of posted tokens per head
    heads: BTreeMap<String, usize>,
    head_len: usize,
    next_seq: u64,
    policy: FuzzyPolicy,
    min_results: usize,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new(FuzzyPolicy::default(), 5)
    }
}

impl IndexStore {
    pub fn new(policy: FuzzyPolicy, min_results: usize) -> Self {
        Self {
            postings: BTreeMap::new(),
            records: HashMap::new(),
            heads: BTreeMap::new(),
            head_len: policy.head_len(),
            next_seq: 0,
            policy,
            min_results,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(FuzzyPolicy::from_config(config), config.min_results)
    }

    /// An empty store with the same matching settings
    pub fn empty_like(&self) -> Self {
        Self::new(self.policy, self.min_results)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Candidate> {
        self.records.get(id).map(|entry| &entry.candidate)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.records.values().map(|entry| &entry.candidate)
    }

    /// Add a candidate, or replace the one with the same id
    pub fn insert_or_update(&mut self, candidate: Candidate) {
        let tokens = candidate_tokens(&candidate);
        let id = candidate.id.clone();

        let seq = match self.records.remove(&id) {
            Some(old) => {
                for stale in old.tokens.difference(&tokens) {
                    self.unpost(stale, &id);
                }
                old.seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        for token in &tokens {
            match self.postings.entry(token.clone()) {
                MapEntry::Occupied(slot) => {
                    slot.into_mut().insert(id.clone());
                }
                MapEntry::Vacant(slot) => {
                    slot.insert(BTreeSet::from([id.clone()]));
                    *self
                        .heads
                        .entry(head(token, self.head_len).to_string())
                        .or_insert(0) += 1;
                }
            }
        }

        self.records.insert(
            id,
            Entry {
                candidate,
                tokens,
                seq,
            },
        );
    }

    /// Remove a candidate and all its postings. Absent ids are ignored.
    pub fn remove(&mut self, id: &str) -> Option<Candidate> {
        let entry = self.records.remove(id)?;
        for token in &entry.tokens {
            self.unpost(token, id);
        }
        Some(entry.candidate)
    }

    fn unpost(&mut self, token: &str, id: &str) {
        if let Some(ids) = self.postings.get_mut(token) {
            ids.remove(id);
            if ids.is_empty() {
                self.postings.remove(token);
                self.unhead(token);
            }
        }
    }

    fn unhead(&mut self, token: &str) {
        let key = head(token, self.head_len);
        if let Some(count) = self.heads.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.heads.remove(key);
            }
        }
    }

    /// Find candidates matched by every query token.
    ///
    /// Hits are ordered by match quality, then creation order.
    pub fn lookup(&self, query_tokens: &[String], deadline: Option<Instant>) -> Lookup {
        if query_tokens.is_empty() {
            return Lookup::default();
        }
        let mut timed_out = false;

        let mut per_token: Vec<HashMap<&str, MatchQuality>> = Vec::with_capacity(query_tokens.len());
        for token in query_tokens {
            let (matches, expired) = self.match_token(token, deadline);
            timed_out |= expired;
            per_token.push(matches);
        }

        let mut hits = self.intersect(&per_token);

        if hits.len() < self.min_results && !timed_out {
            for (token, matches) in query_tokens.iter().zip(per_token.iter_mut()) {
                timed_out |= self.match_substring(token, matches, deadline);
                // Nothing can survive the intersection
                if matches.is_empty() {
                    break;
                }
            }
            let known: BTreeSet<String> = hits.iter().map(|hit| hit.id.clone()).collect();
            hits.extend(
                self.intersect(&per_token)
                    .into_iter()
                    .filter(|hit| !known.contains(&hit.id)),
            );
        }

        hits.sort_by(|a, b| {
            b.quality()
                .cmp(&a.quality())
                .then_with(|| b.rank_sum().cmp(&a.rank_sum()))
                .then_with(|| a.seq.cmp(&b.seq))
        });

        Lookup { hits, timed_out }
    }

    /// Prefix matches through a range scan, then fuzzy matches over the vocabulary
    fn match_token<'a>(
        &'a self,
        token: &str,
        deadline: Option<Instant>,
    ) -> (HashMap<&'a str, MatchQuality>, bool) {
        let mut matches: HashMap<&str, MatchQuality> = HashMap::new();

        for (key, ids) in self.postings.range(token.to_string()..) {
            if !key.starts_with(token) {
                break;
            }
            let quality = if key == token {
                MatchQuality::Exact
            } else {
                MatchQuality::Prefix
            };
            for id in ids {
                upgrade(&mut matches, id, quality);
            }
        }

        let max = self.policy.allowed_distance(token.chars().count());
        if max == 0 {
            return (matches, false);
        }

        let mut matcher = PrefixMatcher::new(token, max);
        let mut scanned = 0usize;
        for (h, (bucket, _)) in self.heads.iter().enumerate() {
            if h % DEADLINE_CHECK_EVERY == 0 && past(deadline) {
                return (matches, true);
            }
            if !matcher.head_may_match(bucket) {
                continue;
            }

            // A head shorter than `head_len` is a whole token of its own
            let whole_token = bucket.chars().count() < self.head_len;
            for (key, ids) in self.postings.range(bucket.clone()..) {
                if !key.starts_with(bucket.as_str()) || (whole_token && key != bucket) {
                    break;
                }
                scanned += 1;
                if scanned % DEADLINE_CHECK_EVERY == 0 && past(deadline) {
                    return (matches, true);
                }
                if key.starts_with(token) || !matcher.matches(key) {
                    continue;
                }
                for id in ids {
                    upgrade(&mut matches, id, MatchQuality::Fuzzy);
                }
            }
        }

        (matches, false)
    }

    /// Add substring matches for `token` without downgrading existing ones.
    /// Returns whether the deadline passed.
    fn match_substring<'a>(
        &'a self,
        token: &str,
        matches: &mut HashMap<&'a str, MatchQuality>,
        deadline: Option<Instant>,
    ) -> bool {
        for (n, (key, ids)) in self.postings.iter().enumerate() {
            if n % DEADLINE_CHECK_EVERY == 0 && past(deadline) {
                return true;
            }
            if key.contains(token) {
                for id in ids {
                    upgrade(matches, id, MatchQuality::Substring);
                }
            }
        }
        false
    }

    fn intersect(&self, per_token: &[HashMap<&str, MatchQuality>]) -> Vec<LookupHit> {
        let Some(smallest) = per_token.iter().min_by_key(|matches| matches.len()) else {
            return Vec::new();
        };

        smallest
            .keys()
            .filter_map(|id| {
                let qualities = per_token
                    .iter()
                    .map(|matches| matches.get(id).copied())
                    .collect::<Option<Vec<_>>>()?;
                let seq = self.records.get(*id)?.seq;
                Some(LookupHit {
                    id: id.to_string(),
                    qualities,
                    seq,
                })
            })
            .collect()
    }

    /// Check both consistency invariants, reporting the first violation
    pub fn verify(&self) -> Result<(), CoreError> {
        for (token, ids) in &self.postings {
            if ids.is_empty() {
                return Err(CoreError::IndexCorruption(format!(
                    "empty postings for token '{}'",
                    token
                )));
            }
            for id in ids {
                match self.records.get(id) {
                    None => {
                        return Err(CoreError::IndexCorruption(format!(
                            "token '{}' points at missing candidate {}",
                            token, id
                        )));
                    }
                    Some(entry) if !entry.tokens.contains(token) => {
                        return Err(CoreError::IndexCorruption(format!(
                            "stale posting '{}' for candidate {}",
                            token, id
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        let mut heads: BTreeMap<String, usize> = BTreeMap::new();
        for token in self.postings.keys() {
            *heads.entry(head(token, self.head_len).to_string()).or_insert(0) += 1;
        }
        if heads != self.heads {
            return Err(CoreError::IndexCorruption(
                "head buckets disagree with postings".to_string(),
            ));
        }

        for (id, entry) in &self.records {
            if entry.candidate.id != *id {
                return Err(CoreError::IndexCorruption(format!(
                    "record {} holds candidate {}",
                    id, entry.candidate.id
                )));
            }
            if entry.tokens != candidate_tokens(&entry.candidate) {
                return Err(CoreError::IndexCorruption(format!(
                    "token set of {} is out of date",
                    id
                )));
            }
            for token in &entry.tokens {
                let posted = self
                    .postings
                    .get(token)
                    .is_some_and(|ids| ids.contains(id));
                if !posted {
                    return Err(CoreError::IndexCorruption(format!(
                        "candidate {} missing from postings of '{}'",
                        id, token
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            tokens: self.postings.len() as u64,
            ..IndexStats::default()
        };
        for entry in self.records.values() {
            match entry.candidate.kind {
                CandidateKind::Application => stats.applications += 1,
                CandidateKind::File => stats.files += 1,
                CandidateKind::Action => stats.actions += 1,
            }
        }
        stats
    }

    /// Leave a posting behind for an id that has no record
    #[cfg(test)]
    pub(crate) fn inject_dangling_posting(&mut self, token: &str, id: &str) {
        self.postings
            .entry(token.to_string())
            .or_default()
            .insert(id.to_string());
    }
}

fn upgrade<'a>(matches: &mut HashMap<&'a str, MatchQuality>, id: &'a str, quality: MatchQuality) {
    let slot = matches.entry(id).or_insert(quality);
    if quality > *slot {
        *slot = quality;
    }
}

/// The first `len` characters of `token`, or all of it if shorter
fn head(token: &str, len: usize) -> &str {
    match token.char_indices().nth(len) {
        Some((end, _)) => &token[..end],
        None => token,
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn app(id: &str, aliases: &[&str]) -> Candidate {
        Candidate {
            id: id.to_string(),
            display_name: aliases[0].to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            kind: CandidateKind::Application,
            launch: json!({ "exec": id }),
            last_valid: at(),
        }
    }

    fn ids(lookup: &Lookup) -> Vec<&str> {
        lookup.hits.iter().map(|hit| hit.id.as_str()).collect()
    }

    fn q(query: &str) -> Vec<String> {
        query_tokens(query)
    }

    #[test]
    fn update_drops_stale_tokens() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("a", &["Gedit", "Text Editor"]));
        store.insert_or_update(app("a", &["Gedit", "Notepad"]));

        store.verify().unwrap();
        assert!(store.lookup(&q("editor"), None).hits.is_empty());
        assert_eq!(ids(&store.lookup(&q("notepad"), None)), vec!["a"]);
    }

    enum Op {
        Upsert(Candidate),
        Remove(&'static str),
    }

    #[test]
    fn invariants_hold_after_every_operation() {
        let mut store = IndexStore::default();
        let ops = vec![
            Op::Upsert(app("a", &["Firefox", "Web Browser"])),
            Op::Upsert(app("b", &["Files", "Browser"])),
            Op::Remove("a"),
            Op::Upsert(app("b", &["Nautilus"])),
            Op::Remove("missing"),
            Op::Upsert(app("a", &["Firefox"])),
            Op::Remove("b"),
        ];

        for op in ops {
            match op {
                Op::Upsert(candidate) => store.insert_or_update(candidate),
                Op::Remove(id) => {
                    store.remove(id);
                }
            }
            store.verify().unwrap();
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_and_insert_are_idempotent() {
        let mut once = IndexStore::default();
        once.insert_or_update(app("a", &["Firefox"]));
        once.insert_or_update(app("b", &["Terminal"]));

        let mut twice = once.clone();
        twice.insert_or_update(app("a", &["Firefox"]));
        assert_eq!(once, twice);

        once.remove("b");
        twice.remove("b");
        twice.remove("b");
        assert_eq!(once, twice);
        assert!(twice.remove("b").is_none());
    }

    #[test]
    fn short_tokens_require_exact_prefix() {
        let mut store = IndexStore::new(FuzzyPolicy::default(), 0);
        store.insert_or_update(app("abacus", &["abacus"]));
        store.insert_or_update(app("xb", &["xb"]));

        assert_eq!(ids(&store.lookup(&q("ab"), None)), vec!["abacus"]);
    }

    #[test]
    fn long_tokens_tolerate_one_edit() {
        let mut store = IndexStore::new(FuzzyPolicy::default(), 0);
        store.insert_or_update(app("abcdf", &["abcdf"]));

        let lookup = store.lookup(&q("abcde"), None);
        assert_eq!(ids(&lookup), vec!["abcdf"]);
        assert_eq!(lookup.hits[0].quality(), MatchQuality::Fuzzy);
    }

    #[test]
    fn all_query_tokens_must_match_in_any_order() {
        let mut store = IndexStore::new(FuzzyPolicy::default(), 0);
        store.insert_or_update(app("code", &["Visual Studio Code"]));
        store.insert_or_update(app("studio", &["Android Studio"]));

        assert_eq!(ids(&store.lookup(&q("code visual"), None)), vec!["code"]);
        assert_eq!(store.lookup(&q("studio"), None).hits.len(), 2);
    }

    #[test]
    fn exact_and_prefix_rank_above_fuzzy() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("files", &["Files"]));
        store.insert_or_update(app("firefox", &["Firefox"]));

        let lookup = store.lookup(&q("fir"), None);
        assert_eq!(ids(&lookup), vec!["firefox", "files"]);
        assert_eq!(lookup.hits[0].quality(), MatchQuality::Prefix);
        assert_eq!(lookup.hits[1].quality(), MatchQuality::Fuzzy);
    }

    #[test]
    fn equal_quality_ties_follow_creation_order() {
        let mut store = IndexStore::new(FuzzyPolicy::default(), 0);
        store.insert_or_update(app("z-first", &["Tetris"]));
        store.insert_or_update(app("a-second", &["Terminal"]));
        // an update keeps the original creation slot
        store.insert_or_update(app("z-first", &["Tetris", "Game"]));

        assert_eq!(ids(&store.lookup(&q("te"), None)), vec!["z-first", "a-second"]);
    }

    #[test]
    fn substring_fallback_runs_when_results_are_scarce() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("calc", &["Calculator"]));
        store.insert_or_update(app("libre", &["LibreOffice Calc"]));

        let lookup = store.lookup(&q("ulat"), None);
        assert_eq!(ids(&lookup), vec!["calc"]);
        assert_eq!(lookup.hits[0].quality(), MatchQuality::Substring);
    }

    #[test]
    fn fallback_is_skipped_with_enough_primary_results() {
        let mut store = IndexStore::new(FuzzyPolicy::default(), 1);
        store.insert_or_update(app("note", &["Notes"]));
        store.insert_or_update(app("keep", &["Keynote"]));

        assert_eq!(ids(&store.lookup(&q("note"), None)), vec!["note"]);
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("firefox", &["Firefox"]));

        let lookup = store.lookup(&q("firefx"), Some(Instant::now()));
        assert!(lookup.timed_out);
    }

    /// Deterministic pseudo-random lowercase words
    fn words(count: usize, seed: u64) -> Vec<String> {
        let mut state = seed;
        (0..count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let mut bits = state;
                let len = 4 + (bits % 6) as usize;
                bits /= 6;
                (0..len)
                    .map(|_| {
                        let c = (b'a' + (bits % 26) as u8) as char;
                        bits /= 26;
                        c
                    })
                    .collect()
            })
            .collect()
    }

    /// Unoptimized builds get more room than the 50ms target
    fn budget() -> std::time::Duration {
        let ms = if cfg!(debug_assertions) { 500 } else { 50 };
        std::time::Duration::from_millis(ms)
    }

    #[test]
    fn typo_lookup_stays_within_budget_at_scale() {
        let mut store = IndexStore::default();
        let vocabulary = words(150_000, 0x9e37_79b9_7f4a_7c15);
        for (i, triple) in vocabulary.chunks(3).enumerate() {
            let mut file = app(&format!("file:{}", i), &[&triple.join(" ")]);
            file.kind = CandidateKind::File;
            store.insert_or_update(file);
        }
        store.insert_or_update(app("report", &["quarterly document"]));
        assert_eq!(store.len(), 50_001);

        for query in ["docment", "xocument", "terminl", "xqzvbn report"] {
            let started = Instant::now();
            let lookup = store.lookup(&q(query), Some(started + budget()));
            assert!(!lookup.timed_out, "{} timed out", query);
            if query.ends_with("ment") {
                assert!(ids(&lookup).contains(&"report"), "{} missed", query);
            }
        }
    }

    #[test]
    fn head_buckets_follow_postings() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("a", &["Firefox", "x"]));
        store.insert_or_update(app("b", &["Files"]));
        store.remove("a");

        store.verify().unwrap();
        assert_eq!(store.heads.keys().collect::<Vec<_>>(), vec!["fi"]);
        assert_eq!(store.heads["fi"], 1);
    }

    #[test]
    fn verify_detects_dangling_postings() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("a", &["Firefox"]));
        store.inject_dangling_posting("firefox", "ghost");

        assert!(matches!(store.verify(), Err(CoreError::IndexCorruption(_))));
    }

    #[test]
    fn stats_count_by_kind() {
        let mut store = IndexStore::default();
        store.insert_or_update(app("a", &["Firefox"]));
        let mut file = app("f", &["notes.txt"]);
        file.kind = CandidateKind::File;
        store.insert_or_update(file);

        let stats = store.stats();
        assert_eq!(stats.applications, 1);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.tokens, 3);
    }
}
