//! Bounded fuzzy matching of query tokens against index tokens

use crate::config::MatchingConfig;

/// Edit distance allowed for a query token, as a function of its length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuzzyPolicy {
    /// Tokens up to this many characters must match as an exact prefix
    pub prefix_only_max_len: usize,
    /// Distance allowed for longer tokens
    pub max_edit_distance: usize,
}

impl Default for FuzzyPolicy {
    fn default() -> Self {
        Self {
            prefix_only_max_len: 2,
            max_edit_distance: 1,
        }
    }
}

impl FuzzyPolicy {
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            prefix_only_max_len: config.prefix_only_max_len,
            max_edit_distance: config.max_edit_distance,
        }
    }

    pub fn allowed_distance(&self, query_len: usize) -> usize {
        if query_len <= self.prefix_only_max_len {
            0
        } else {
            self.max_edit_distance
        }
    }

    /// Length of the bucket head every fuzzy match must share with its query.
    ///
    /// A fuzzy query has more than `prefix_only_max_len` characters, so the
    /// prefix it matches has at least this many.
    pub fn head_len(&self) -> usize {
        (self.prefix_only_max_len + 1).saturating_sub(self.max_edit_distance)
    }

    /// Whether `token` fuzzily starts with `query` under this policy
    pub fn matches(&self, query: &str, token: &str) -> bool {
        let max = self.allowed_distance(query.chars().count());
        max > 0 && PrefixMatcher::new(query, max).matches(token)
    }
}

/// Matches one query token against many index tokens, reusing its buffers
#[derive(Debug)]
pub struct PrefixMatcher {
    query: Vec<char>,
    max: usize,
    other: Vec<char>,
    prev: Vec<usize>,
    curr: Vec<usize>,
}

impl PrefixMatcher {
    pub fn new(query: &str, max: usize) -> Self {
        Self {
            query: query.chars().collect(),
            max,
            other: Vec::new(),
            prev: Vec::new(),
            curr: Vec::new(),
        }
    }

    /// Whether some prefix of `token` is within the allowed distance
    pub fn matches(&mut self, token: &str) -> bool {
        // No prefix longer than this can be close enough
        let window = self.query.len() + self.max;
        self.other.clear();
        self.other.extend(token.chars().take(window));
        distance_within(&self.query, &self.other, self.max, &mut self.prev, &mut self.curr)
            .is_some()
    }

    /// Whether a token starting with `head` could match at all: the head
    /// itself must be close to some prefix of the query.
    pub fn head_may_match(&mut self, head: &str) -> bool {
        self.other.clear();
        self.other.extend(head.chars());
        distance_within(&self.other, &self.query, self.max, &mut self.prev, &mut self.curr)
            .is_some()
    }
}

/// Smallest Levenshtein distance between `query` and any prefix of `token`,
/// or `None` once it is certain to exceed `max`.
pub fn prefix_distance(query: &[char], token: &[char], max: usize) -> Option<usize> {
    distance_within(query, token, max, &mut Vec::new(), &mut Vec::new())
}

fn distance_within(
    query: &[char],
    token: &[char],
    max: usize,
    prev: &mut Vec<usize>,
    curr: &mut Vec<usize>,
) -> Option<usize> {
    if token.len() + max < query.len() {
        return None;
    }

    // prev[j] = distance(query[..i], token[..j])
    prev.clear();
    prev.extend(0..=token.len());
    curr.clear();
    curr.resize(token.len() + 1, 0);

    for (i, qc) in query.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, tc) in token.iter().enumerate() {
            let substitution = prev[j] + usize::from(qc != tc);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(prev, curr);
    }

    let best = prev.iter().copied().min()?;
    (best <= max).then_some(best)
}
