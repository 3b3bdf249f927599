use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::{pick_best, reference_text, source_texts, Method, Prediction, Scorer, SourceMode};
use crate::error::Result;
use crate::reference::{Query, ReferenceEntry};

fn word_pattern() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("invalid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Runs of two or more word characters; single letters are dropped.
    Word,
    /// Character n-grams over the whitespace-normalized text, spaces included.
    Char { min_n: usize, max_n: usize },
}

impl Analyzer {
    pub fn terms(&self, text: &str) -> Vec<String> {
        let text = text.to_lowercase();
        match *self {
            Analyzer::Word => word_pattern()
                .find_iter(&text)
                .map(|m| m.as_str().to_string())
                .collect(),
            Analyzer::Char { min_n, max_n } => {
                let chars: Vec<char> = text
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .chars()
                    .collect();
                let mut grams = Vec::new();
                for n in min_n.max(1)..=max_n {
                    if chars.len() < n {
                        break;
                    }
                    for window in chars.windows(n) {
                        grams.push(window.iter().collect());
                    }
                }
                grams
            }
        }
    }
}

/// Sparse row: `(term index, weight)` sorted by index.
pub type SparseVector = Vec<(usize, f64)>;

/// Term-frequency times smoothed inverse document frequency, L2 normalized.
/// The vocabulary is learned once by [`TfidfVectorizer::fit`]; terms never
/// seen while fitting are ignored when transforming.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    analyzer: Analyzer,
    min_df: usize,
    max_features: Option<usize>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer,
            min_df: 1,
            max_features: None,
            vocabulary: HashMap::new(),
            idf: Vec::new(),
        }
    }

    pub fn with_min_df(mut self, min_df: usize) -> Self {
        self.min_df = min_df.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features);
        self
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn fit(&mut self, documents: &[String]) {
        let mut df: HashMap<String, usize> = HashMap::new();
        let mut total: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let counts = count_terms(self.analyzer.terms(doc));
            for (term, count) in counts {
                *df.entry(term.clone()).or_default() += 1;
                *total.entry(term).or_default() += count;
            }
        }

        let mut kept: Vec<(String, usize)> = df
            .into_iter()
            .filter(|(_, d)| *d >= self.min_df)
            .collect();
        if let Some(max) = self.max_features {
            kept.sort_by(|(a, _), (b, _)| {
                total[b].cmp(&total[a]).then_with(|| a.cmp(b))
            });
            kept.truncate(max);
        }
        kept.sort_by(|(a, _), (b, _)| a.cmp(b));

        let n = documents.len() as f64;
        self.vocabulary = HashMap::with_capacity(kept.len());
        self.idf = Vec::with_capacity(kept.len());
        for (index, (term, d)) in kept.into_iter().enumerate() {
            self.vocabulary.insert(term, index);
            self.idf.push(((1.0 + n) / (1.0 + d as f64)).ln() + 1.0);
        }
    }

    pub fn transform(&self, text: &str) -> SparseVector {
        let mut weights: HashMap<usize, f64> = HashMap::new();
        for term in self.analyzer.terms(text) {
            if let Some(&index) = self.vocabulary.get(&term) {
                *weights.entry(index).or_default() += self.idf[index];
            }
        }
        let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
        let mut row: SparseVector = weights
            .into_iter()
            .map(|(i, w)| (i, if norm > 0.0 { w / norm } else { 0.0 }))
            .collect();
        row.sort_by_key(|(i, _)| *i);
        row
    }
}

fn count_terms(terms: Vec<String>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in terms {
        *counts.entry(term).or_default() += 1;
    }
    counts
}

/// Dot product of two L2-normalized sparse rows.
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot.clamp(0.0, 1.0)
}

pub struct TfidfEngine {
    method: Method,
    vectorizer: TfidfVectorizer,
    sources: SourceMode,
}

impl TfidfEngine {
    pub fn words(sources: SourceMode) -> Self {
        Self {
            method: Method::Tfidf,
            vectorizer: TfidfVectorizer::new(Analyzer::Word).with_max_features(5000),
            sources,
        }
    }

    pub fn char_ngrams(sources: SourceMode) -> Self {
        Self {
            method: Method::Ngram,
            vectorizer: TfidfVectorizer::new(Analyzer::Char { min_n: 3, max_n: 5 }),
            sources,
        }
    }

    pub fn with_min_df(mut self, min_df: usize) -> Self {
        self.vectorizer = self.vectorizer.with_min_df(min_df);
        self
    }
}

impl Scorer for TfidfEngine {
    fn method(&self) -> Method {
        self.method
    }

    fn score_all(&mut self, queries: &[Query], corpus: &[ReferenceEntry]) -> Result<Vec<Prediction>> {
        if corpus.is_empty() {
            return Ok(Vec::new());
        }
        let documents: Vec<String> = corpus.iter().map(|e| reference_text(e, self.sources)).collect();
        self.vectorizer.fit(&documents);
        tracing::debug!(
            "{}: fitted {} terms over {} references",
            self.method,
            self.vectorizer.vocabulary_len(),
            documents.len()
        );
        let rows: Vec<SparseVector> = documents.iter().map(|d| self.vectorizer.transform(d)).collect();

        Ok(queries
            .iter()
            .filter_map(|query| {
                let mut candidates = Vec::new();
                for (source, text) in source_texts(query, self.sources) {
                    let vector = self.vectorizer.transform(&text);
                    if vector.is_empty() {
                        continue;
                    }
                    for (index, row) in rows.iter().enumerate() {
                        candidates.push((source, index, cosine(&vector, row)));
                    }
                }
                pick_best(query.transaction_id, corpus, candidates)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::test_support::{corpus, query, reference};

    #[test]
    fn test_word_terms() {
        let terms = Analyzer::Word.terms("Rema-1000 grünerløkka_as");
        assert_eq!(terms, vec!["rema", "1000", "grünerløkka_as"]);
    }

    #[test]
    fn test_word_terms_skip_single_characters() {
        assert_eq!(
            Analyzer::Word.terms("spotify p stockholm"),
            vec!["spotify", "stockholm"]
        );
        assert!(Analyzer::Word.terms("a b c").is_empty());
    }

    #[test]
    fn test_char_terms() {
        let terms = Analyzer::Char { min_n: 3, max_n: 4 }.terms("ab  cd");
        assert_eq!(terms, vec!["ab ", "b c", " cd", "ab c", "b cd"]);
        assert!(Analyzer::Char { min_n: 3, max_n: 5 }.terms("ab").is_empty());
    }

    #[test]
    fn test_min_df_and_max_features() {
        let docs = vec!["aa bb".to_string(), "aa cc".to_string(), "aa bb dd".to_string()];
        let mut v = TfidfVectorizer::new(Analyzer::Word).with_min_df(2);
        v.fit(&docs);
        assert_eq!(v.vocabulary_len(), 2);

        let mut v = TfidfVectorizer::new(Analyzer::Word).with_max_features(1);
        v.fit(&docs);
        assert_eq!(v.vocabulary_len(), 1);
        assert!(!v.transform("aa").is_empty());
        assert!(v.transform("b").is_empty());
    }

    #[test]
    fn test_transform_is_normalized() {
        let docs = vec!["netflix amsterdam".to_string(), "spotify stockholm".to_string()];
        let mut v = TfidfVectorizer::new(Analyzer::Word);
        v.fit(&docs);
        let row = v.transform("netflix netflix spotify");
        let norm: f64 = row.iter().map(|(_, w)| w * w).sum();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!((cosine(&row, &row) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ngram_single_reference_scenario() {
        let c = vec![reference(1, 10, "Netflix", "NETFLIX.COM AMSTERDAM")];
        let mut engine = TfidfEngine::char_ngrams(SourceMode::Combined);

        let hit = engine
            .score(&query(2, "NETFLIX.COM AMSTERDAM NL"), &c)
            .unwrap()
            .unwrap();
        assert_eq!(hit.supplier_name, "Netflix");
        assert!(hit.confidence.ratio() > 0.7, "got {}", hit.confidence);

        let miss = engine.score(&query(3, "RANDOM UNRELATED TEXT 999"), &c).unwrap();
        assert!(miss.map_or(true, |p| p.confidence.ratio() < 0.7));
    }

    #[test]
    fn test_ngram_over_larger_corpus() {
        let c = corpus();
        let mut engine = TfidfEngine::char_ngrams(SourceMode::Combined);
        let predictions = engine
            .score_all(
                &[query(7, "REMA 1000 GRUNERLOKKA OSLO"), query(8, "telenor norge as")],
                &c,
            )
            .unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].supplier_name, "Rema 1000");
        assert_eq!(predictions[1].supplier_name, "Telenor");
    }

    #[test]
    fn test_word_engine_and_empty_corpus() {
        let mut engine = TfidfEngine::words(SourceMode::BestOf);
        assert!(engine.score_all(&[query(1, "netflix")], &[]).unwrap().is_empty());

        let c = corpus();
        let p = engine.score(&query(1, "spotify stockholm"), &c).unwrap().unwrap();
        assert_eq!(p.supplier_name, "Spotify");
        assert_eq!(engine.method(), Method::Tfidf);
    }

    #[test]
    fn test_min_df_two_drops_singletons() {
        let c = vec![reference(1, 10, "Netflix", "NETFLIX.COM AMSTERDAM")];
        let mut engine = TfidfEngine::char_ngrams(SourceMode::Combined).with_min_df(2);
        assert!(engine.score(&query(2, "NETFLIX.COM"), &c).unwrap().is_none());
    }
}
