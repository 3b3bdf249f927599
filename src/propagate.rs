use rusqlite::{Connection, OptionalExtension};

use crate::db::{category_id_by_name, supplier_id_by_name};
use crate::error::{LedgerError, Result};

/// Most common category among a supplier's categorised transactions,
/// optionally leaving one transaction out. Ties go to the category used
/// most recently, then to the lowest category id.
pub fn majority_category(
    conn: &Connection,
    supplier_id: i64,
    exclude_transaction: Option<i64>,
) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT category_id, COUNT(*) AS n, MAX(date) AS latest FROM transactions \
             WHERE supplier_id = ?1 AND category_id IS NOT NULL AND id != ?2 \
             GROUP BY category_id \
             ORDER BY n DESC, latest DESC, category_id ASC LIMIT 1",
            rusqlite::params![supplier_id, exclude_transaction.unwrap_or(-1)],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn mapped_category(conn: &Connection, supplier_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT category_id FROM category_supplier_map WHERE supplier_id = ?1",
            [supplier_id],
            |row| row.get(0),
        )
        .optional()?)
}

fn upsert_mapping(conn: &Connection, supplier_id: i64, category_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO category_supplier_map (supplier_id, category_id) VALUES (?1, ?2) \
         ON CONFLICT(supplier_id) DO UPDATE SET category_id = excluded.category_id, \
         updated_at = datetime('now')",
        rusqlite::params![supplier_id, category_id],
    )?;
    Ok(())
}

/// Give a freshly matched transaction its supplier's usual category and
/// remember the association. The usual category comes from the supplier's
/// other transactions; a category already on the row is kept unless
/// `force`. The map is then refreshed from all of the supplier's
/// categorised rows, this one included. Returns the category written, if any.
pub fn propagate_category(
    conn: &Connection,
    transaction_id: i64,
    supplier_id: i64,
    force: bool,
) -> Result<Option<i64>> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT category_id FROM transactions WHERE id = ?1",
            [transaction_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    let mut written = None;
    if current.is_none() || force {
        if let Some(category_id) = majority_category(conn, supplier_id, Some(transaction_id))? {
            let changed = conn.execute(
                "UPDATE transactions SET category_id = ?1 WHERE id = ?2",
                rusqlite::params![category_id, transaction_id],
            )?;
            if changed > 0 && current != Some(category_id) {
                written = Some(category_id);
            }
        }
    }

    if let Some(category_id) = majority_category(conn, supplier_id, None)? {
        upsert_mapping(conn, supplier_id, category_id)?;
    }
    Ok(written)
}

/// Recompute the supplier→category map from scratch. Returns how many
/// mappings were added, changed or removed.
pub fn rebuild_supplier_map(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT supplier_id FROM transactions \
         WHERE supplier_id IS NOT NULL AND category_id IS NOT NULL ORDER BY supplier_id",
    )?;
    let suppliers: Vec<i64> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut changed = 0usize;
    for supplier_id in &suppliers {
        let Some(category_id) = majority_category(conn, *supplier_id, None)? else {
            continue;
        };
        if mapped_category(conn, *supplier_id)? != Some(category_id) {
            upsert_mapping(conn, *supplier_id, category_id)?;
            changed += 1;
        }
    }

    changed += conn.execute(
        "DELETE FROM category_supplier_map WHERE supplier_id NOT IN \
         (SELECT DISTINCT supplier_id FROM transactions \
          WHERE supplier_id IS NOT NULL AND category_id IS NOT NULL)",
        [],
    )?;
    Ok(changed)
}

/// Categorise supplier-linked transactions that have no category yet from
/// the map. Returns the number of transactions updated.
pub fn fill_from_map(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE transactions SET category_id = \
           (SELECT m.category_id FROM category_supplier_map m WHERE m.supplier_id = transactions.supplier_id) \
         WHERE category_id IS NULL AND supplier_id IN (SELECT supplier_id FROM category_supplier_map)",
        [],
    )?)
}

/// Manual override: every transaction of the supplier gets the category
/// and the map is pinned to it.
pub fn set_supplier_category(conn: &Connection, supplier: &str, category: &str) -> Result<usize> {
    let supplier_id = supplier_id_by_name(conn, supplier)?
        .ok_or_else(|| LedgerError::UnknownSupplier(supplier.to_string()))?;
    let category_id = category_id_by_name(conn, category)?
        .ok_or_else(|| LedgerError::UnknownCategory(category.to_string()))?;

    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute(
        "UPDATE transactions SET category_id = ?1 WHERE supplier_id = ?2",
        rusqlite::params![category_id, supplier_id],
    )?;
    upsert_mapping(&tx, supplier_id, category_id)?;
    tx.commit()?;
    Ok(updated)
}
