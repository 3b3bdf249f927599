use comfy_table::{Cell, Table};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::engines::{build_engine, EngineContext, Method, SourceMode};
use crate::error::Result;
use crate::evaluate::{compare, holdout_split, save_report, ComparisonReport, MAX_TEST_SIZE};
use crate::fmt::percent;
use crate::reference::load_reference;
use crate::settings::{load_settings, Credentials};

use super::{open_db, CompareArgs};

pub fn run(args: &CompareArgs) -> Result<()> {
    let methods = match &args.methods {
        Some(list) => Method::parse_list(list)?,
        None => Method::ALL.to_vec(),
    };
    let settings = load_settings();
    let credentials = Credentials::from_env();
    let conn = open_db(&settings)?;

    let reference = load_reference(&conn)?;
    let test_size = args.test_size.min(MAX_TEST_SIZE);
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let split = holdout_split(&reference, test_size, &mut rng);
    println!(
        "Comparing {} methods on {} held-out transactions ({} reference)",
        methods.len(),
        split.test.len(),
        split.train.len()
    );

    let ctx = EngineContext {
        settings: &settings,
        credentials: &credentials,
        sources: args.posting_descriptions.then_some(SourceMode::BestOf),
    };
    let report = compare(&methods, |method| build_engine(method, &ctx), &split, args.seed)?;
    print_report(&report);

    if args.save {
        let path = save_report(&report, &settings.results_dir())?;
        println!("Saved report to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &ComparisonReport) {
    let mut table = Table::new();
    table.set_header(vec!["Method", "Accuracy", "Correct", "Mean confidence", "Time (s)"]);
    for r in &report.results {
        table.add_row(vec![
            Cell::new(&r.label),
            Cell::new(percent(r.accuracy)),
            Cell::new(format!("{}/{}", r.correct, r.test_size)),
            Cell::new(format!("{:.2}", r.mean_confidence)),
            Cell::new(format!("{:.2}", r.elapsed_seconds)),
        ]);
    }
    println!("Results\n{table}");

    for s in &report.skipped {
        println!("Skipped {}: {}", s.method, s.reason);
    }
    if let Some(best) = report.best_report() {
        println!("Best: {} ({})", best.label, percent(best.accuracy));
    }
}
