use std::collections::HashMap;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::engines::{build_engine, EngineContext, Method, Prediction, SourceMode};
use crate::error::Result;
use crate::fmt::truncate;
use crate::matcher::{apply_predictions, match_unmatched, ApplyOptions};
use crate::reference::UnmatchedFilter;
use crate::settings::{load_settings, Credentials};

use super::{open_db, MatchArgs};

pub fn run(args: &MatchArgs) -> Result<()> {
    let method: Method = args.method.parse()?;
    let settings = load_settings();
    let credentials = Credentials::from_env();
    let conn = open_db(&settings)?;
    let threshold = args.threshold.unwrap_or(settings.threshold);

    let ctx = EngineContext {
        settings: &settings,
        credentials: &credentials,
        sources: args.posting_descriptions.then_some(SourceMode::BestOf),
    };
    let mut engine = build_engine(method, &ctx)?;

    let filter = UnmatchedFilter {
        limit: args.limit,
        include_excluded: args.include_excluded,
    };
    let run = match_unmatched(&conn, engine.as_mut(), &filter)?;
    if run.queries.is_empty() {
        println!("No unmatched transactions.");
        return Ok(());
    }

    println!(
        "{}: {} unmatched, {} reference transactions, {} predictions",
        method.label(),
        run.queries.len(),
        run.reference_size,
        run.predictions.len()
    );
    print_predictions(&run.predictions, &run.queries, threshold, args.display);

    let options = ApplyOptions {
        threshold,
        force: args.force,
        dry_run: !args.apply,
        propagate: !args.no_category,
    };
    let report = apply_predictions(&conn, &run.predictions, method.key(), &options)?;

    let verb = if args.apply { "Applied" } else { "Would apply" };
    println!(
        "{verb} {} matches ({} below threshold, {} already matched, {} errors)",
        report.applied, report.low_confidence, report.kept_existing, report.errors
    );
    if report.categorized > 0 {
        println!("{} transactions categorized from supplier history", report.categorized);
    }
    if !args.apply && report.applied > 0 {
        println!("Run again with --apply to save.");
    }
    Ok(())
}

/// The `limit` most confident predictions, best first.
pub fn top_predictions(predictions: &[Prediction], limit: usize) -> Vec<&Prediction> {
    let mut sorted: Vec<&Prediction> = predictions.iter().collect();
    sorted.sort_by(|a, b| b.confidence.ratio().total_cmp(&a.confidence.ratio()));
    sorted.truncate(limit);
    sorted
}

fn print_predictions(
    predictions: &[Prediction],
    queries: &[crate::reference::Query],
    threshold: f64,
    limit: usize,
) {
    if predictions.is_empty() || limit == 0 {
        return;
    }
    let descriptions: HashMap<i64, &str> = queries
        .iter()
        .map(|q| (q.transaction_id, q.original_description.as_str()))
        .collect();

    let mut table = Table::new();
    table.set_header(vec!["ID", "Description", "Supplier", "Confidence", "Source", ""]);
    for p in top_predictions(predictions, limit) {
        let status = if p.confidence.clears(threshold) {
            "match".green().to_string()
        } else {
            "low".yellow().to_string()
        };
        table.add_row(vec![
            Cell::new(p.transaction_id),
            Cell::new(truncate(descriptions.get(&p.transaction_id).copied().unwrap_or(""), 40)),
            Cell::new(&p.supplier_name),
            Cell::new(p.confidence.to_string()),
            Cell::new(p.source.to_string()),
            Cell::new(status),
        ]);
    }
    println!("Predictions\n{table}");
}
