use std::str::FromStr;

use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::get_connection;
use crate::error::Result;
use crate::fmt::{money, percent};
use crate::settings::load_settings;

#[derive(Debug, Default, PartialEq)]
pub struct MatchStats {
    pub transactions: i64,
    pub matched: i64,
    pub unmatched: i64,
    pub excluded: i64,
    pub categorized: i64,
    pub suppliers: i64,
    pub mapped_suppliers: i64,
    pub unmatched_spend: Decimal,
}

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());
    println!("Threshold:  {}", settings.threshold);

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `ledgermatch init` to set up.");
        return Ok(());
    }

    let conn = get_connection(&db_path)?;
    let stats = match_stats(&conn)?;
    let coverage = if stats.transactions > 0 {
        stats.matched as f64 / stats.transactions as f64
    } else {
        0.0
    };

    println!();
    println!("Transactions:   {}", stats.transactions);
    println!("Matched:        {} ({})", stats.matched, percent(coverage));
    println!("Unmatched:      {}", stats.unmatched);
    println!("Excluded:       {}", stats.excluded);
    println!("Categorized:    {}", stats.categorized);
    println!("Suppliers:      {} ({} mapped to a category)", stats.suppliers, stats.mapped_suppliers);
    println!("Unmatched spend: {}", money(stats.unmatched_spend));
    Ok(())
}

pub fn match_stats(conn: &Connection) -> Result<MatchStats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let excluded_clause = "(is_internal_transfer = 1 OR is_wage_transfer = 1 \
                           OR is_tax_transfer = 1 OR is_forbidden = 1)";

    let mut stmt = conn.prepare(&format!(
        "SELECT amount FROM transactions WHERE supplier_id IS NULL AND NOT {excluded_clause}"
    ))?;
    let amounts = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let unmatched_spend: Decimal = amounts
        .iter()
        .filter_map(|a| Decimal::from_str(a).ok())
        .filter(|a| a.is_sign_negative())
        .sum();

    Ok(MatchStats {
        transactions: count("SELECT count(*) FROM transactions")?,
        matched: count("SELECT count(*) FROM transactions WHERE supplier_id IS NOT NULL")?,
        unmatched: amounts.len() as i64,
        excluded: count(&format!("SELECT count(*) FROM transactions WHERE {excluded_clause}"))?,
        categorized: count("SELECT count(*) FROM transactions WHERE category_id IS NOT NULL")?,
        suppliers: count("SELECT count(*) FROM suppliers")?,
        mapped_suppliers: count("SELECT count(*) FROM category_supplier_map")?,
        unmatched_spend,
    })
}
