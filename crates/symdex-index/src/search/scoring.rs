//! Relevance scoring for the search strategies.

use std::cmp::Ordering;

use crate::symbol::Symbol;

/// Score of an exact qualified-name match.
pub const EXACT_FQN_SCORE: f32 = 1.0;
/// Score of an exact name match in exact mode.
pub const EXACT_NAME_SCORE: f32 = 0.9;
/// Flat score of a regular-expression match.
pub const REGEX_SCORE: f32 = 0.5;
/// Fuzzy hits must score above this.
pub const FUZZY_THRESHOLD: f32 = 0.1;

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

/// Score a trie candidate; `None` when nothing about it matches the query.
pub fn prefix_score(symbol: &Symbol, query: &str, case_sensitive: bool) -> Option<f32> {
    let query = fold(query, case_sensitive);
    let name = fold(&symbol.name, case_sensitive);
    if name == query {
        return Some(1.0);
    }
    if name.starts_with(&query) {
        return Some(0.9);
    }
    let segments: Vec<String> = symbol
        .fqn_segments()
        .into_iter()
        .map(|s| fold(s, case_sensitive))
        .collect();
    if segments.last().is_some_and(|last| last.starts_with(&query)) {
        return Some(0.8);
    }
    if segments.iter().any(|segment| segment.starts_with(&query)) {
        return Some(0.7);
    }
    None
}

/// Containment and edit-distance score; `None` at or below the threshold.
pub fn fuzzy_score(symbol: &Symbol, query: &str, case_sensitive: bool) -> Option<f32> {
    let query = fold(query, case_sensitive);
    let name = fold(&symbol.name, case_sensitive);

    let mut score = 0.0;
    if name.contains(&query) {
        score += 0.5;
    }
    if let Some(fqn) = &symbol.fully_qualified_name {
        if fold(fqn, case_sensitive).contains(&query) {
            score += 0.3;
        }
    }
    score += 0.2 * similarity(&name, &query);

    (score > FUZZY_THRESHOLD).then_some(score.min(1.0))
}

/// `1 - distance / longer length`, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Deterministic order among equally ranked symbols: shorter name, then
/// name, qualified name, file and position.
pub fn tie_break(a: &Symbol, b: &Symbol) -> Ordering {
    a.name
        .chars()
        .count()
        .cmp(&b.name.chars().count())
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.fully_qualified_name.cmp(&b.fully_qualified_name))
        .then_with(|| a.file_path.cmp(&b.file_path))
        .then_with(|| a.range.cmp(&b.range))
}
