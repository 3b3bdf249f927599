use rusqlite::Connection;

use crate::error::Result;
use crate::models::RawSource;
use crate::preprocess::preprocess_description;

/// A transaction whose supplier is known, ready to be matched against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub transaction_id: i64,
    pub supplier_id: i64,
    pub supplier_name: String,
    pub description: String,
    pub original_description: String,
    pub aux_descriptions: Vec<String>,
}

/// A transaction still looking for its supplier.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub transaction_id: i64,
    pub description: String,
    pub original_description: String,
    pub aux_descriptions: Vec<String>,
}

pub trait Described {
    fn description(&self) -> &str;
    fn aux_descriptions(&self) -> &[String];

    /// Main description followed by the posting descriptions, ` | ` separated.
    fn combined_text(&self) -> String {
        let mut parts = vec![self.description()];
        parts.extend(self.aux_descriptions().iter().map(String::as_str));
        parts.join(" | ")
    }
}

impl Described for ReferenceEntry {
    fn description(&self) -> &str {
        &self.description
    }
    fn aux_descriptions(&self) -> &[String] {
        &self.aux_descriptions
    }
}

impl Described for Query {
    fn description(&self) -> &str {
        &self.description
    }
    fn aux_descriptions(&self) -> &[String] {
        &self.aux_descriptions
    }
}

impl From<&ReferenceEntry> for Query {
    fn from(entry: &ReferenceEntry) -> Self {
        Self {
            transaction_id: entry.transaction_id,
            description: entry.description.clone(),
            original_description: entry.original_description.clone(),
            aux_descriptions: entry.aux_descriptions.clone(),
        }
    }
}

fn aux_from_raw(transaction_id: i64, raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str::<RawSource>(&raw) {
        Ok(source) => source
            .posting_descriptions()
            .into_iter()
            .map(preprocess_description)
            .filter(|d| !d.is_empty())
            .collect(),
        Err(e) => {
            tracing::warn!("transaction {transaction_id}: unreadable raw data ({e})");
            Vec::new()
        }
    }
}

pub fn load_reference(conn: &Connection) -> Result<Vec<ReferenceEntry>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.description, t.raw_data, s.id, \
                COALESCE(s.name, 'Supplier ' || s.external_id, 'Supplier ' || s.id) \
         FROM transactions t JOIN suppliers s ON t.supplier_id = s.id \
         ORDER BY t.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(id, description, raw, supplier_id, supplier_name)| ReferenceEntry {
            transaction_id: id,
            supplier_id,
            supplier_name,
            description: preprocess_description(&description),
            original_description: description,
            aux_descriptions: aux_from_raw(id, raw),
        })
        .collect())
}

#[derive(Debug, Clone, Default)]
pub struct UnmatchedFilter {
    /// Newest N only; `Some(0)` means no limit.
    pub limit: Option<usize>,
    pub include_excluded: bool,
}

pub fn load_unmatched(conn: &Connection, filter: &UnmatchedFilter) -> Result<Vec<Query>> {
    let mut sql = String::from(
        "SELECT id, description, raw_data FROM transactions WHERE supplier_id IS NULL",
    );
    if !filter.include_excluded {
        sql.push_str(
            " AND is_internal_transfer = 0 AND is_wage_transfer = 0 \
              AND is_tax_transfer = 0 AND is_forbidden = 0",
        );
    }
    sql.push_str(" ORDER BY date DESC, id DESC");
    if let Some(limit) = filter.limit.filter(|&n| n > 0) {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(id, description, raw)| Query {
            transaction_id: id,
            description: preprocess_description(&description),
            original_description: description,
            aux_descriptions: aux_from_raw(id, raw),
        })
        .collect())
}

/// Entries grouped per supplier id, suppliers in order of first appearance.
pub fn group_by_supplier(entries: &[ReferenceEntry]) -> Vec<(i64, Vec<&ReferenceEntry>)> {
    let mut groups: Vec<(i64, Vec<&ReferenceEntry>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(id, _)| *id == entry.supplier_id) {
            Some((_, members)) => members.push(entry),
            None => groups.push((entry.supplier_id, vec![entry])),
        }
    }
    groups
}
