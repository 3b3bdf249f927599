use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::engines::{Method, Scorer};
use crate::error::{LedgerError, Result};
use crate::reference::{group_by_supplier, Query, ReferenceEntry};

pub const MIN_TRANSACTIONS_PER_SUPPLIER: usize = 2;
pub const MAX_TEST_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<ReferenceEntry>,
    pub test: Vec<ReferenceEntry>,
}

/// Hold out one transaction from each of up to `test_size` randomly chosen
/// suppliers that have at least two transactions.
pub fn holdout_split<R: Rng + ?Sized>(entries: &[ReferenceEntry], test_size: usize, rng: &mut R) -> Split {
    let eligible: Vec<Vec<&ReferenceEntry>> = group_by_supplier(entries)
        .into_iter()
        .filter(|(_, members)| members.len() >= MIN_TRANSACTIONS_PER_SUPPLIER)
        .map(|(_, members)| members)
        .collect();
    let n = test_size.min(MAX_TEST_SIZE).min(eligible.len());

    let mut test = Vec::with_capacity(n);
    for members in eligible.choose_multiple(rng, n) {
        let held_out = members[rng.gen_range(0..members.len())];
        test.push(held_out.clone());
    }
    let held: HashSet<i64> = test.iter().map(|e| e.transaction_id).collect();
    let train = entries
        .iter()
        .filter(|e| !held.contains(&e.transaction_id))
        .cloned()
        .collect();
    Split { train, test }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationDetail {
    pub transaction_id: i64,
    pub description: String,
    pub true_supplier: String,
    pub predicted_supplier: Option<String>,
    pub confidence: f64,
    pub correct: bool,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub method: String,
    pub label: String,
    pub accuracy: f64,
    pub mean_confidence: f64,
    pub elapsed_seconds: f64,
    pub correct: usize,
    pub test_size: usize,
    pub source_counts: BTreeMap<String, usize>,
    pub details: Vec<EvaluationDetail>,
}

/// Score the held-out set against the training corpus. A transaction the
/// engine has no answer for counts as wrong with zero confidence.
pub fn evaluate(engine: &mut dyn Scorer, train: &[ReferenceEntry], test: &[ReferenceEntry]) -> Result<EngineReport> {
    let method = engine.method();
    let queries: Vec<Query> = test.iter().map(Query::from).collect();

    let started = Instant::now();
    let predictions = engine.score_all(&queries, train)?;
    let elapsed = started.elapsed().as_secs_f64();

    let by_tx: HashMap<i64, _> = predictions.iter().map(|p| (p.transaction_id, p)).collect();
    let mut details = Vec::with_capacity(test.len());
    let mut source_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut correct = 0usize;
    let mut confidence_sum = 0.0;
    for entry in test {
        let prediction = by_tx.get(&entry.transaction_id);
        let is_correct = prediction.is_some_and(|p| p.supplier_name == entry.supplier_name);
        if is_correct {
            correct += 1;
        }
        let confidence = prediction.map_or(0.0, |p| p.confidence.ratio());
        confidence_sum += confidence;
        if let Some(p) = prediction {
            *source_counts.entry(p.source.to_string()).or_default() += 1;
        }
        details.push(EvaluationDetail {
            transaction_id: entry.transaction_id,
            description: entry.original_description.clone(),
            true_supplier: entry.supplier_name.clone(),
            predicted_supplier: prediction.map(|p| p.supplier_name.clone()),
            confidence,
            correct: is_correct,
            source: prediction.map(|p| p.source.to_string()),
        });
    }

    let n = test.len();
    let (accuracy, mean_confidence) = if n == 0 {
        (0.0, 0.0)
    } else {
        (correct as f64 / n as f64, confidence_sum / n as f64)
    };
    tracing::info!(
        "{method}: {correct}/{n} correct ({:.1}%) in {elapsed:.2}s",
        accuracy * 100.0
    );
    Ok(EngineReport {
        method: method.key().to_string(),
        label: method.label().to_string(),
        accuracy,
        mean_confidence,
        elapsed_seconds: elapsed,
        correct,
        test_size: n,
        source_counts,
        details,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEngine {
    pub method: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub generated_at: DateTime<Utc>,
    pub seed: Option<u64>,
    pub train_size: usize,
    pub test_size: usize,
    pub results: Vec<EngineReport>,
    pub skipped: Vec<SkippedEngine>,
    pub best: Option<String>,
}

impl ComparisonReport {
    pub fn best_report(&self) -> Option<&EngineReport> {
        let best = self.best.as_deref()?;
        self.results.iter().find(|r| r.method == best)
    }
}

/// Highest accuracy wins; equal accuracy goes to the faster engine.
pub fn pick_best(results: &[EngineReport]) -> Option<&EngineReport> {
    results.iter().fold(None, |best: Option<&EngineReport>, r| match best {
        None => Some(r),
        Some(b) if r.accuracy > b.accuracy => Some(r),
        Some(b) if r.accuracy == b.accuracy && r.elapsed_seconds < b.elapsed_seconds => Some(r),
        keep => keep,
    })
}

/// Run every method on the same split. Methods that cannot be built or that
/// fail while scoring are recorded as skipped.
pub fn compare(
    methods: &[Method],
    mut build: impl FnMut(Method) -> Result<Box<dyn Scorer>>,
    split: &Split,
    seed: Option<u64>,
) -> Result<ComparisonReport> {
    if split.test.is_empty() {
        return Err(LedgerError::Other(format!(
            "no supplier has at least {MIN_TRANSACTIONS_PER_SUPPLIER} transactions to hold out"
        )));
    }

    let mut results = Vec::new();
    let mut skipped = Vec::new();
    for &method in methods {
        let outcome = build(method).and_then(|mut engine| evaluate(engine.as_mut(), &split.train, &split.test));
        match outcome {
            Ok(report) => results.push(report),
            Err(e) => {
                tracing::warn!("skipping {method}: {e}");
                let reason = match e {
                    LedgerError::EngineUnavailable { reason, .. } => reason,
                    other => other.to_string(),
                };
                skipped.push(SkippedEngine {
                    method: method.key().to_string(),
                    reason,
                });
            }
        }
    }

    let best = pick_best(&results).map(|r| r.method.clone());
    Ok(ComparisonReport {
        generated_at: Utc::now(),
        seed,
        train_size: split.train.len(),
        test_size: split.test.len(),
        results,
        skipped,
        best,
    })
}

pub fn save_report(report: &ComparisonReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "comparison_{}.json",
        report.generated_at.format("%Y%m%d_%H%M%S")
    ));
    std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}
