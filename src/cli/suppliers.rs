use std::path::PathBuf;

use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::error::Result;
use crate::importer::import_suppliers;
use crate::settings::load_settings;

use super::open_db;

#[derive(Debug, Clone)]
pub struct SupplierRow {
    pub id: i64,
    pub external_id: Option<String>,
    pub name: String,
    pub organization_number: Option<String>,
    pub transactions: i64,
    pub category: Option<String>,
}

pub fn import(file: &str) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let result = import_suppliers(&conn, &PathBuf::from(file))?;
    println!(
        "{} suppliers added, {} updated, {} skipped",
        result.imported, result.updated, result.skipped
    );
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let suppliers = list_suppliers(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "External ID", "Name", "Org. no.", "Transactions", "Category"]);
    for s in suppliers {
        table.add_row(vec![
            Cell::new(s.id),
            Cell::new(s.external_id.unwrap_or_default()),
            Cell::new(s.name),
            Cell::new(s.organization_number.unwrap_or_default()),
            Cell::new(s.transactions),
            Cell::new(s.category.unwrap_or_default()),
        ]);
    }
    println!("Suppliers\n{table}");
    Ok(())
}

pub fn list_suppliers(conn: &Connection) -> Result<Vec<SupplierRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.external_id, COALESCE(s.name, 'Supplier ' || s.external_id, 'Supplier ' || s.id), \
                s.organization_number, \
                (SELECT count(*) FROM transactions t WHERE t.supplier_id = s.id), c.name \
         FROM suppliers s \
         LEFT JOIN category_supplier_map m ON m.supplier_id = s.id \
         LEFT JOIN categories c ON c.id = m.category_id \
         ORDER BY s.name COLLATE NOCASE, s.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SupplierRow {
                id: row.get(0)?,
                external_id: row.get(1)?,
                name: row.get(2)?,
                organization_number: row.get(3)?,
                transactions: row.get(4)?,
                category: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_supplier, add_txn, category, test_db};
    use crate::propagate::set_supplier_category;

    #[test]
    fn test_list_suppliers_with_counts_and_category() {
        let (_dir, conn) = test_db();
        let netflix = add_supplier(&conn, "Netflix");
        add_supplier(&conn, "Aviant");
        add_txn(&conn, "NETFLIX", "2024-01-01", Some(netflix), Some(category(&conn, "Entertainment")));
        set_supplier_category(&conn, "Netflix", "Entertainment").unwrap();

        let rows = list_suppliers(&conn).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Aviant");
        assert_eq!(rows[1].transactions, 1);
        assert_eq!(rows[1].category.as_deref(), Some("Entertainment"));
    }
}
