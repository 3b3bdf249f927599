use rusqlite::{Connection, OptionalExtension};

use crate::engines::{Prediction, Scorer};
use crate::error::{LedgerError, Result};
use crate::propagate::propagate_category;
use crate::reference::{load_reference, load_unmatched, Query, UnmatchedFilter};

pub struct MatchRun {
    pub reference_size: usize,
    pub queries: Vec<Query>,
    pub predictions: Vec<Prediction>,
}

/// Score every unmatched transaction against the known-supplier corpus.
pub fn match_unmatched(
    conn: &Connection,
    engine: &mut dyn Scorer,
    filter: &UnmatchedFilter,
) -> Result<MatchRun> {
    let reference = load_reference(conn)?;
    if reference.is_empty() {
        return Err(LedgerError::EmptyReference);
    }
    let queries = load_unmatched(conn, filter)?;
    tracing::info!(
        "{}: scoring {} unmatched against {} reference transactions",
        engine.method(),
        queries.len(),
        reference.len()
    );
    let predictions = engine.score_all(&queries, &reference)?;
    Ok(MatchRun {
        reference_size: reference.len(),
        queries,
        predictions,
    })
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub threshold: f64,
    pub force: bool,
    pub dry_run: bool,
    pub propagate: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub low_confidence: usize,
    pub kept_existing: usize,
    pub errors: usize,
    pub categorized: usize,
}

/// Write confident predictions back to the database in one transaction.
/// Existing suppliers are left alone unless `force` is set; a missing
/// transaction or supplier is logged and counted without stopping the batch.
pub fn apply_predictions(
    conn: &Connection,
    predictions: &[Prediction],
    method: &str,
    options: &ApplyOptions,
) -> Result<ApplyReport> {
    let tx = conn.unchecked_transaction()?;
    let mut report = ApplyReport::default();

    for p in predictions {
        if !p.confidence.clears(options.threshold) {
            report.low_confidence += 1;
            continue;
        }

        let current: Option<Option<i64>> = tx
            .query_row(
                "SELECT supplier_id FROM transactions WHERE id = ?1",
                [p.transaction_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            tracing::warn!("transaction {} not found, skipping", p.transaction_id);
            report.errors += 1;
            continue;
        };
        let supplier_known: Option<i64> = tx
            .query_row("SELECT id FROM suppliers WHERE id = ?1", [p.supplier_id], |row| {
                row.get(0)
            })
            .optional()?;
        if supplier_known.is_none() {
            tracing::warn!(
                "supplier {} for transaction {} not found, skipping",
                p.supplier_id,
                p.transaction_id
            );
            report.errors += 1;
            continue;
        }
        if current.is_some() && !options.force {
            report.kept_existing += 1;
            continue;
        }

        tx.execute(
            "UPDATE transactions SET supplier_id = ?1, match_method = ?2, match_confidence = ?3 \
             WHERE id = ?4",
            rusqlite::params![p.supplier_id, method, p.confidence.ratio(), p.transaction_id],
        )?;
        report.applied += 1;
        tracing::debug!(
            "transaction {} -> {} ({})",
            p.transaction_id,
            p.supplier_name,
            p.confidence
        );

        if options.propagate {
            match propagate_category(&tx, p.transaction_id, p.supplier_id, options.force) {
                Ok(Some(_)) => report.categorized += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("category for transaction {}: {e}", p.transaction_id);
                    report.errors += 1;
                }
            }
        }
    }

    if options.dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok(report)
}
