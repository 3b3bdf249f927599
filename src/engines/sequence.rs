use std::collections::HashMap;

use super::{score_pairwise, Method, Prediction, Scorer, SourceMode};
use crate::error::Result;
use crate::reference::{Query, ReferenceEntry};

/// Ratcliff/Obershelp similarity: `2 * M / (len(a) + len(b))` where `M` is
/// the number of characters in the recursively found longest common blocks.
/// Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given windows. Ties go
/// to the block starting earliest in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }
    (best_i, best_j, best_k)
}

pub struct SequenceEngine {
    sources: SourceMode,
}

impl SequenceEngine {
    pub fn new(sources: SourceMode) -> Self {
        Self { sources }
    }
}

impl Scorer for SequenceEngine {
    fn method(&self) -> Method {
        Method::Sequence
    }

    fn score_all(&mut self, queries: &[Query], corpus: &[ReferenceEntry]) -> Result<Vec<Prediction>> {
        Ok(score_pairwise(queries, corpus, self.sources, ratio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::test_support::{corpus, query};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ratio_known_values() {
        assert!(close(ratio("abcd", "bcde"), 0.75));
        assert!(close(ratio("abxcd", "abcd"), 8.0 / 9.0));
        assert!(close(ratio("netflix", "netflix"), 1.0));
        assert!(close(ratio("abc", "xyz"), 0.0));
    }

    #[test]
    fn test_ratio_empty_inputs() {
        assert!(close(ratio("", ""), 1.0));
        assert!(close(ratio("abc", ""), 0.0));
    }

    #[test]
    fn test_ratio_is_symmetric_for_simple_cases() {
        assert!(close(ratio("rema oslo", "rema bergen"), ratio("rema bergen", "rema oslo")));
    }

    #[test]
    fn test_engine_finds_netflix() {
        let c = corpus();
        let mut engine = SequenceEngine::new(SourceMode::BestOf);
        let p = engine
            .score(&query(9, "NETFLIX.COM AMSTERDAM NL"), &c)
            .unwrap()
            .unwrap();
        assert_eq!(p.supplier_name, "Netflix");
        assert!(p.confidence.clears(0.7));
    }
}
