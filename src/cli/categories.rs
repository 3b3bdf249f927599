use std::str::FromStr;

use comfy_table::{Cell, Table};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::category_id_by_name;
use crate::error::{LedgerError, Result};
use crate::fmt::money;
use crate::importer::parse_amount;
use crate::models::Category;
use crate::propagate::set_supplier_category;
use crate::settings::load_settings;

use super::open_db;

pub fn add(name: &str, description: Option<&str>, budget: Option<&str>) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let budget = budget
        .map(|b| parse_amount(b).ok_or_else(|| LedgerError::Other(format!("Invalid budget: {b}"))))
        .transpose()?;
    add_category(&conn, name, description, budget)?;
    println!("Added category: {name}");
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let categories = list_categories(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Description", "Budget", "Suppliers", "Transactions"]);
    for (cat, suppliers, transactions) in categories {
        table.add_row(vec![
            Cell::new(cat.id),
            Cell::new(cat.name),
            Cell::new(cat.description.unwrap_or_default()),
            Cell::new(cat.budget.map(money).unwrap_or_default()),
            Cell::new(suppliers),
            Cell::new(transactions),
        ]);
    }
    println!("Categories\n{table}");
    Ok(())
}

pub fn set_for_supplier(category: &str, supplier: &str) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let updated = set_supplier_category(&conn, supplier, category)?;
    println!("{supplier} → {category} ({updated} transactions updated)");
    Ok(())
}

pub fn add_category(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    budget: Option<Decimal>,
) -> Result<i64> {
    if category_id_by_name(conn, name)?.is_some() {
        return Err(LedgerError::Other(format!("Category already exists: {name}")));
    }
    conn.execute(
        "INSERT INTO categories (name, description, budget) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, description, budget.map(|b| b.to_string())],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Categories with the number of mapped suppliers and categorised
/// transactions.
pub fn list_categories(conn: &Connection) -> Result<Vec<(Category, i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.description, c.budget, \
                (SELECT count(*) FROM category_supplier_map m WHERE m.category_id = c.id), \
                (SELECT count(*) FROM transactions t WHERE t.category_id = c.id) \
         FROM categories c ORDER BY c.name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let budget: Option<String> = row.get(3)?;
            Ok((
                Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    budget: budget.and_then(|b| Decimal::from_str(&b).ok()),
                },
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
