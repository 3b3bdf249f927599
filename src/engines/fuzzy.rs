use super::sequence;
use super::{score_pairwise, Method, Prediction, Scorer, SourceMode};
use crate::error::Result;
use crate::reference::{Query, ReferenceEntry};

/// `1 - distance / longer length`, counted in chars.
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / longest as f64
}

/// Word order does not matter: both sides are split on whitespace, sorted
/// and rejoined before comparing.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    sequence::ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyMode {
    Levenshtein,
    TokenSort,
}

pub struct FuzzyEngine {
    mode: FuzzyMode,
    sources: SourceMode,
}

impl FuzzyEngine {
    pub fn new(mode: FuzzyMode, sources: SourceMode) -> Self {
        Self { mode, sources }
    }
}

impl Scorer for FuzzyEngine {
    fn method(&self) -> Method {
        match self.mode {
            FuzzyMode::Levenshtein => Method::Fuzzy,
            FuzzyMode::TokenSort => Method::TokenSort,
        }
    }

    fn score_all(&mut self, queries: &[Query], corpus: &[ReferenceEntry]) -> Result<Vec<Prediction>> {
        let predictions = match self.mode {
            FuzzyMode::Levenshtein => score_pairwise(queries, corpus, self.sources, levenshtein_ratio),
            FuzzyMode::TokenSort => score_pairwise(queries, corpus, self.sources, token_sort_ratio),
        };
        Ok(predictions)
    }
}
