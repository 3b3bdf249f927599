use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::{money, percent};
use crate::reports::{spending_report, DateRange};
use crate::settings::load_settings;

use super::open_db;

pub fn run(from: Option<String>, to: Option<String>) -> Result<()> {
    let range = DateRange::from_args(from.as_deref(), to.as_deref())?;
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let data = spending_report(&conn, range)?;

    if data.categories.is_empty() {
        println!("No spending in range.");
        return Ok(());
    }
    if let Some(r) = data.range {
        println!(
            "Spending {} to {} ({} months)\n",
            r.from,
            r.to.pred_opt().unwrap_or(r.to),
            data.months
        );
    }

    let mut table = Table::new();
    table.set_header(vec!["Category", "Amount", "Monthly avg", "%", "Count", "Budget", "Used"]);
    for item in &data.categories {
        let used = match item.budget_used {
            Some(ratio) if ratio > 1.0 => Cell::new(percent(ratio).red()),
            Some(ratio) => Cell::new(percent(ratio).green()),
            None => Cell::new(""),
        };
        table.add_row(vec![
            Cell::new(&item.name),
            Cell::new(money(item.total)),
            Cell::new(money(item.monthly_average)),
            Cell::new(percent(item.share)),
            Cell::new(item.count),
            Cell::new(item.budget.map(money).unwrap_or_default()),
            used,
        ]);
    }
    table.add_row(vec![
        Cell::new("Total".bold()),
        Cell::new(money(data.total)),
        Cell::new(money(data.monthly_average)),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
    ]);
    println!("Spending by Category\n{table}");

    let mut atable = Table::new();
    atable.set_header(vec!["Bank account", "Amount", "%", "Count"]);
    for a in &data.accounts {
        atable.add_row(vec![
            Cell::new(&a.name),
            Cell::new(money(a.total)),
            Cell::new(percent(a.share)),
            Cell::new(a.count),
        ]);
    }
    println!("\nBy Bank Account\n{atable}");
    Ok(())
}
