//! Supplier similarity engines.
//!
//! Every engine answers the same question: for each unmatched transaction,
//! which reference transaction (and therefore which supplier) is the closest,
//! and how confident is it. Engines differ only in how they measure
//! closeness.

pub mod embedding;
pub mod fuzzy;
pub mod llm;
#[cfg(feature = "openai")]
pub mod openai;
pub mod sequence;
pub mod tfidf;

use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, Result};
use crate::reference::{Described, Query, ReferenceEntry};
use crate::settings::{Credentials, Settings};

use embedding::EmbeddingEngine;
use fuzzy::{FuzzyEngine, FuzzyMode};
use llm::LlmEngine;
use sequence::SequenceEngine;
use tfidf::TfidfEngine;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confidence {
    /// Similarity on the 0..1 scale.
    Ratio(f64),
    /// Self-reported score on the 0..100 scale; not calibrated.
    Percent(u8),
}

impl Confidence {
    pub fn ratio(&self) -> f64 {
        match self {
            Confidence::Ratio(r) => r.clamp(0.0, 1.0),
            Confidence::Percent(p) => f64::from((*p).min(100)) / 100.0,
        }
    }

    pub fn clears(&self, threshold: f64) -> bool {
        self.ratio() >= threshold
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Ratio(r) => write!(f, "{r:.2}"),
            Confidence::Percent(p) => write!(f, "{p}%"),
        }
    }
}

/// Which text of the query produced the winning score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchSource {
    Main,
    Posting(usize),
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSource::Main => write!(f, "main_description"),
            MatchSource::Posting(j) => write!(f, "grouped_posting_{j}"),
        }
    }
}

/// How query and reference texts are put together before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Main descriptions only.
    MainOnly,
    /// Main and posting descriptions joined into one text on both sides.
    Combined,
    /// Main description and each posting description scored separately
    /// against reference main descriptions; the best one wins.
    BestOf,
}

impl FromStr for SourceMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "main" => Ok(SourceMode::MainOnly),
            "combined" => Ok(SourceMode::Combined),
            "best-of" | "best_of" => Ok(SourceMode::BestOf),
            other => Err(LedgerError::Other(format!(
                "Unknown source mode '{other}' (expected main, combined or best-of)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub transaction_id: i64,
    pub reference_index: usize,
    pub supplier_id: i64,
    pub supplier_name: String,
    pub confidence: Confidence,
    pub source: MatchSource,
}

pub trait Scorer {
    fn method(&self) -> Method;

    /// Best reference for each query. Queries without any usable candidate
    /// are left out of the result.
    fn score_all(&mut self, queries: &[Query], corpus: &[ReferenceEntry]) -> Result<Vec<Prediction>>;

    fn score(&mut self, query: &Query, corpus: &[ReferenceEntry]) -> Result<Option<Prediction>> {
        Ok(self
            .score_all(std::slice::from_ref(query), corpus)?
            .into_iter()
            .next())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Sequence,
    Tfidf,
    Ngram,
    Fuzzy,
    TokenSort,
    Embedding,
    Llm,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Sequence,
        Method::Tfidf,
        Method::Ngram,
        Method::Fuzzy,
        Method::TokenSort,
        Method::Embedding,
        Method::Llm,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Method::Sequence => "sequence",
            Method::Tfidf => "tfidf",
            Method::Ngram => "ngram",
            Method::Fuzzy => "fuzzy",
            Method::TokenSort => "token-sort",
            Method::Embedding => "embedding",
            Method::Llm => "llm",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Method::Sequence => "Sequence matcher ratio",
            Method::Tfidf => "TF-IDF word tokens + cosine",
            Method::Ngram => "TF-IDF character n-grams + cosine",
            Method::Fuzzy => "Levenshtein ratio",
            Method::TokenSort => "Token sort ratio",
            Method::Embedding => "Embedding nearest neighbour",
            Method::Llm => "LLM classifier",
        }
    }

    pub fn default_sources(&self) -> SourceMode {
        match self {
            Method::Ngram => SourceMode::Combined,
            _ => SourceMode::MainOnly,
        }
    }

    /// Parse a comma separated list such as `ngram,fuzzy`.
    pub fn parse_list(list: &str) -> Result<Vec<Method>> {
        let mut methods = Vec::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let method: Method = part.parse()?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        Ok(methods)
    }
}

impl FromStr for Method {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        Method::ALL
            .iter()
            .find(|m| m.key() == key || m.key().replace('-', "_") == key)
            .copied()
            .ok_or(LedgerError::UnknownMethod(key))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Shared scoring helpers
// ---------------------------------------------------------------------------

pub(crate) fn reference_text(entry: &ReferenceEntry, mode: SourceMode) -> String {
    match mode {
        SourceMode::Combined => entry.combined_text(),
        SourceMode::MainOnly | SourceMode::BestOf => entry.description.clone(),
    }
}

pub(crate) fn source_texts(query: &Query, mode: SourceMode) -> Vec<(MatchSource, String)> {
    match mode {
        SourceMode::MainOnly => vec![(MatchSource::Main, query.description.clone())],
        SourceMode::Combined => vec![(MatchSource::Main, query.combined_text())],
        SourceMode::BestOf => std::iter::once((MatchSource::Main, query.description.clone()))
            .chain(
                query
                    .aux_descriptions
                    .iter()
                    .enumerate()
                    .map(|(j, d)| (MatchSource::Posting(j), d.clone())),
            )
            .collect(),
    }
}

/// Arg-max over `(source, reference index, score)` candidates. The first
/// candidate wins ties and a zero score never produces a prediction.
pub(crate) fn pick_best(
    transaction_id: i64,
    corpus: &[ReferenceEntry],
    candidates: impl IntoIterator<Item = (MatchSource, usize, f64)>,
) -> Option<Prediction> {
    let mut best: Option<(MatchSource, usize, f64)> = None;
    for (source, index, score) in candidates {
        if !score.is_finite() || score <= 0.0 {
            continue;
        }
        if best.map_or(true, |(_, _, s)| score > s) {
            best = Some((source, index, score));
        }
    }
    let (source, index, score) = best?;
    let entry = corpus.get(index)?;
    Some(Prediction {
        transaction_id,
        reference_index: index,
        supplier_id: entry.supplier_id,
        supplier_name: entry.supplier_name.clone(),
        confidence: Confidence::Ratio(score.clamp(0.0, 1.0)),
        source,
    })
}

/// Score every query text against every reference text with `similarity`.
pub(crate) fn score_pairwise(
    queries: &[Query],
    corpus: &[ReferenceEntry],
    mode: SourceMode,
    similarity: impl Fn(&str, &str) -> f64,
) -> Vec<Prediction> {
    let references: Vec<String> = corpus.iter().map(|e| reference_text(e, mode)).collect();
    queries
        .iter()
        .filter_map(|query| {
            let mut candidates = Vec::new();
            for (source, text) in source_texts(query, mode) {
                if text.is_empty() {
                    continue;
                }
                for (index, reference) in references.iter().enumerate() {
                    if reference.is_empty() {
                        continue;
                    }
                    candidates.push((source, index, similarity(&text, reference)));
                }
            }
            pick_best(query.transaction_id, corpus, candidates)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

pub struct EngineContext<'a> {
    pub settings: &'a Settings,
    pub credentials: &'a Credentials,
    /// Overrides the method's default source mode.
    pub sources: Option<SourceMode>,
}

pub fn build_engine(method: Method, ctx: &EngineContext) -> Result<Box<dyn Scorer>> {
    let sources = ctx.sources.unwrap_or_else(|| method.default_sources());
    Ok(match method {
        Method::Sequence => Box::new(SequenceEngine::new(sources)),
        Method::Tfidf => Box::new(TfidfEngine::words(sources)),
        Method::Ngram => Box::new(
            TfidfEngine::char_ngrams(sources).with_min_df(ctx.settings.ngram_min_df),
        ),
        Method::Fuzzy => Box::new(FuzzyEngine::new(FuzzyMode::Levenshtein, sources)),
        Method::TokenSort => Box::new(FuzzyEngine::new(FuzzyMode::TokenSort, sources)),
        Method::Embedding => remote_embedding(ctx, sources)?,
        Method::Llm => remote_llm(ctx, sources)?,
    })
}

#[cfg(feature = "openai")]
fn openai_client(method: Method, ctx: &EngineContext) -> Result<openai::OpenAiClient> {
    let key = ctx
        .credentials
        .openai_api_key
        .clone()
        .ok_or_else(|| LedgerError::unavailable(method.key(), "OPENAI_API_KEY is not set"))?;
    openai::OpenAiClient::new(&ctx.settings.openai, key)
}

#[cfg(feature = "openai")]
fn remote_embedding(ctx: &EngineContext, sources: SourceMode) -> Result<Box<dyn Scorer>> {
    let client = openai_client(Method::Embedding, ctx)?;
    let cache = crate::cache::FileCache::new(ctx.settings.cache_dir(), ctx.settings.cache_ttl());
    Ok(Box::new(
        EmbeddingEngine::new(client, sources)
            .with_batch_size(ctx.settings.openai.embedding_batch_size)
            .with_cache(Box::new(cache)),
    ))
}

#[cfg(feature = "openai")]
fn remote_llm(ctx: &EngineContext, sources: SourceMode) -> Result<Box<dyn Scorer>> {
    let client = openai_client(Method::Llm, ctx)?;
    let openai = &ctx.settings.openai;
    Ok(Box::new(
        LlmEngine::new(client, sources)
            .with_batch_size(openai.llm_batch_size)
            .with_prompt_budget(openai.max_prompt_tokens)
            .with_max_profiles(openai.max_supplier_profiles),
    ))
}

#[cfg(not(feature = "openai"))]
fn remote_embedding(_ctx: &EngineContext, _sources: SourceMode) -> Result<Box<dyn Scorer>> {
    Err(LedgerError::unavailable(
        Method::Embedding.key(),
        "built without the `openai` feature",
    ))
}

#[cfg(not(feature = "openai"))]
fn remote_llm(_ctx: &EngineContext, _sources: SourceMode) -> Result<Box<dyn Scorer>> {
    Err(LedgerError::unavailable(
        Method::Llm.key(),
        "built without the `openai` feature",
    ))
}


#[cfg(test)]
mod tests {
    use super::test_support::{corpus, query};
    use super::*;

    #[test]
    fn test_confidence_scales() {
        assert_eq!(Confidence::Ratio(0.75).ratio(), 0.75);
        assert_eq!(Confidence::Percent(70).ratio(), 0.7);
        assert!(Confidence::Percent(70).clears(0.7));
        assert!(!Confidence::Ratio(0.69).clears(0.7));
        assert_eq!(Confidence::Ratio(1.7).ratio(), 1.0);
        assert_eq!(Confidence::Percent(85).to_string(), "85%");
        assert_eq!(Confidence::Ratio(0.5).to_string(), "0.50");
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("ngram".parse::<Method>().unwrap(), Method::Ngram);
        assert_eq!("Token-Sort".parse::<Method>().unwrap(), Method::TokenSort);
        assert_eq!("token_sort".parse::<Method>().unwrap(), Method::TokenSort);
        assert!(matches!("bogus".parse::<Method>(), Err(LedgerError::UnknownMethod(_))));
        assert_eq!(
            Method::parse_list("ngram, fuzzy,ngram,,llm").unwrap(),
            vec![Method::Ngram, Method::Fuzzy, Method::Llm]
        );
    }

    #[test]
    fn test_source_texts_best_of() {
        let mut q = query(1, "AVTALEGIRO 123");
        q.aux_descriptions = vec!["telenor".to_string(), "mobil".to_string()];
        let texts = source_texts(&q, SourceMode::BestOf);
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[2], (MatchSource::Posting(1), "mobil".to_string()));
        let combined = source_texts(&q, SourceMode::Combined);
        assert_eq!(combined, vec![(MatchSource::Main, "avtalegiro | telenor | mobil".to_string())]);
    }

    #[test]
    fn test_pick_best_first_wins_ties_and_ignores_zero() {
        let c = corpus();
        let best = pick_best(
            9,
            &c,
            vec![
                (MatchSource::Main, 0, 0.0),
                (MatchSource::Main, 1, 0.5),
                (MatchSource::Posting(0), 2, 0.5),
            ],
        )
        .unwrap();
        assert_eq!(best.supplier_name, "Spotify");
        assert_eq!(best.source, MatchSource::Main);
        assert!(pick_best(9, &c, vec![(MatchSource::Main, 0, 0.0)]).is_none());
    }

    #[test]
    fn test_pairwise_skips_empty_texts() {
        let c = corpus();
        let q = query(5, "12345");
        let predictions = score_pairwise(&[q], &c, SourceMode::MainOnly, |_, _| 1.0);
        assert!(predictions.is_empty());
    }

    #[test]
    fn test_build_local_engines() {
        let settings = Settings::default();
        let credentials = Credentials::default();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &credentials,
            sources: None,
        };
        for method in [Method::Sequence, Method::Tfidf, Method::Ngram, Method::Fuzzy, Method::TokenSort] {
            let engine = build_engine(method, &ctx).unwrap();
            assert_eq!(engine.method(), method);
        }
    }

    #[test]
    fn test_remote_engines_unavailable_without_key() {
        let settings = Settings::default();
        let credentials = Credentials::default();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &credentials,
            sources: None,
        };
        for method in [Method::Embedding, Method::Llm] {
            match build_engine(method, &ctx) {
                Err(LedgerError::EngineUnavailable { engine, .. }) => assert_eq!(engine, method.key()),
                Err(e) => panic!("unexpected error {e}"),
                Ok(_) => panic!("{method} should be unavailable"),
            }
        }
    }

    #[test]
    fn test_every_engine_stays_within_reference_set() {
        let settings = Settings::default();
        let credentials = Credentials::default();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &credentials,
            sources: None,
        };
        let c = corpus();
        let queries = vec![
            query(100, "NETFLIX.COM AMSTERDAM NL"),
            query(101, "spotify stockholm 99"),
            query(102, "REMA GRUNERLOKKA"),
            query(103, "zzzz"),
        ];
        for method in [Method::Sequence, Method::Tfidf, Method::Ngram, Method::Fuzzy, Method::TokenSort] {
            let mut engine = build_engine(method, &ctx).unwrap();
            for p in engine.score_all(&queries, &c).unwrap() {
                let r = p.confidence.ratio();
                assert!((0.0..=1.0).contains(&r), "{method}: confidence {r} out of range");
                let entry = &c[p.reference_index];
                assert_eq!(entry.supplier_id, p.supplier_id, "{method}");
                assert_eq!(entry.supplier_name, p.supplier_name, "{method}");
            }
        }
    }
}
