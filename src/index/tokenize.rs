//! Normalization shared by indexing and querying

use std::collections::BTreeSet;

use crate::source::Candidate;

/// Characters that split an alias into tokens, besides whitespace
const SEPARATORS: &[char] = &['-', '_', '.', '/', '\\', ':', ';', ',', '+', '(', ')', '[', ']'];

/// Split text into normalized tokens, in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokenize a query: same rules as indexing, repeated tokens dropped
pub fn query_tokens(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokenize(query)
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Every token a candidate contributes to the postings
pub fn candidate_tokens(candidate: &Candidate) -> BTreeSet<String> {
    candidate
        .aliases
        .iter()
        .flat_map(|alias| tokenize(alias))
        .collect()
}
