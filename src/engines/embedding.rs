use std::collections::{HashMap, HashSet};

use super::{pick_best, reference_text, source_texts, Method, Prediction, Scorer, SourceMode};
use crate::cache::TtlCache;
use crate::error::{LedgerError, Result};
use crate::reference::{Query, ReferenceEntry};

/// Turns texts into dense vectors, one per input, in input order.
pub trait Embedder {
    fn model(&self) -> &str;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

pub struct EmbeddingEngine<E: Embedder> {
    embedder: E,
    cache: Option<Box<dyn TtlCache>>,
    batch_size: usize,
    sources: SourceMode,
}

impl<E: Embedder> EmbeddingEngine<E> {
    pub fn new(embedder: E, sources: SourceMode) -> Self {
        Self {
            embedder,
            cache: None,
            batch_size: 64,
            sources,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cache(mut self, cache: Box<dyn TtlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn cache_key(&self, text: &str) -> String {
        format!("embedding:{}:{text}", self.embedder.model())
    }

    /// Vectors for `texts`, answering from the cache where possible and
    /// sending each distinct miss to the embedder once.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut known: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for text in texts {
            if !seen.insert(text.as_str()) {
                continue;
            }
            let cached = self
                .cache
                .as_ref()
                .and_then(|c| c.get(&self.cache_key(text)))
                .and_then(|v| serde_json::from_value::<Vec<f32>>(v).ok());
            match cached {
                Some(vector) => {
                    known.insert(text.as_str(), vector);
                }
                None => missing.push(text.clone()),
            }
        }
        tracing::debug!(
            "embedding {} texts: {} cached, {} to fetch",
            texts.len(),
            known.len(),
            missing.len()
        );

        let mut fetched: HashMap<String, Vec<f32>> = HashMap::new();
        for chunk in missing.chunks(self.batch_size) {
            let vectors = self.embedder.embed(chunk)?;
            if vectors.len() != chunk.len() {
                return Err(LedgerError::Other(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            for (text, vector) in chunk.iter().zip(vectors) {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put(&self.cache_key(text), &serde_json::to_value(&vector)?) {
                        tracing::warn!("could not cache embedding: {e}");
                    }
                }
                fetched.insert(text.clone(), vector);
            }
        }

        Ok(texts
            .iter()
            .map(|t| {
                known
                    .get(t.as_str())
                    .or_else(|| fetched.get(t))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }
}

impl<E: Embedder> Scorer for EmbeddingEngine<E> {
    fn method(&self) -> Method {
        Method::Embedding
    }

    fn score_all(&mut self, queries: &[Query], corpus: &[ReferenceEntry]) -> Result<Vec<Prediction>> {
        if corpus.is_empty() || queries.is_empty() {
            return Ok(Vec::new());
        }
        let documents: Vec<String> = corpus.iter().map(|e| reference_text(e, self.sources)).collect();
        let reference_vectors = self.encode(&documents)?;

        let per_query: Vec<Vec<_>> = queries
            .iter()
            .map(|q| {
                source_texts(q, self.sources)
                    .into_iter()
                    .filter(|(_, text)| !text.is_empty())
                    .collect()
            })
            .collect();
        let query_texts: Vec<String> = per_query
            .iter()
            .flat_map(|sources| sources.iter().map(|(_, t)| t.clone()))
            .collect();
        let query_vectors = self.encode(&query_texts)?;

        let mut offset = 0;
        let mut predictions = Vec::new();
        for (query, sources) in queries.iter().zip(&per_query) {
            let mut candidates = Vec::new();
            for (k, (source, _)) in sources.iter().enumerate() {
                let vector = &query_vectors[offset + k];
                for (index, reference) in reference_vectors.iter().enumerate() {
                    candidates.push((*source, index, cosine_similarity(vector, reference)));
                }
            }
            offset += sources.len();
            if let Some(p) = pick_best(query.transaction_id, corpus, candidates) {
                predictions.push(p);
            }
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::engines::test_support::{corpus, query};

    /// Bag-of-letters vectors, enough to tell suppliers apart.
    struct LetterEmbedder {
        calls: RefCell<Vec<usize>>,
    }

    impl LetterEmbedder {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Embedder for LetterEmbedder {
        fn model(&self) -> &str {
            "letters"
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.borrow_mut().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for c in t.chars().filter(|c| c.is_ascii_lowercase()) {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_nearest_reference_wins() {
        let c = corpus();
        let mut engine = EmbeddingEngine::new(LetterEmbedder::new(), SourceMode::BestOf);
        let p = engine.score(&query(1, "netflix.com amsterdam"), &c).unwrap().unwrap();
        assert_eq!(p.supplier_name, "Netflix");
        assert!((p.confidence.ratio() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_batches_and_cache() {
        let c = corpus();
        let mut engine = EmbeddingEngine::new(LetterEmbedder::new(), SourceMode::MainOnly)
            .with_batch_size(3)
            .with_cache(Box::new(MemoryCache::new()));
        engine.score_all(&[query(1, "spotify")], &c).unwrap();
        assert_eq!(*engine.embedder.calls.borrow(), vec![3, 1, 1]);

        engine.score_all(&[query(1, "spotify")], &c).unwrap();
        assert_eq!(engine.embedder.calls.borrow().len(), 3, "second run should be fully cached");
    }

    #[test]
    fn test_duplicate_texts_embedded_once() {
        let engine = EmbeddingEngine::new(LetterEmbedder::new(), SourceMode::MainOnly);
        let texts = vec!["abc".to_string(), "abc".to_string(), "xyz".to_string()];
        let vectors = engine.encode(&texts).unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(*engine.embedder.calls.borrow(), vec![2]);
    }

    #[test]
    fn test_many_repeats_keep_first_seen_order() {
        let engine = EmbeddingEngine::new(LetterEmbedder::new(), SourceMode::MainOnly)
            .with_batch_size(2);
        let distinct = ["kiwi", "rema", "meny", "joker", "bunnpris"];
        let texts: Vec<String> = (0..500).map(|i| distinct[i % 5].to_string()).collect();
        let vectors = engine.encode(&texts).unwrap();
        assert_eq!(vectors.len(), 500);
        assert_eq!(vectors[3], vectors[498]);
        assert_eq!(*engine.embedder.calls.borrow(), vec![2, 2, 1]);
    }
}
