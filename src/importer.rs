use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::category_id_by_name;
use crate::error::{LedgerError, Result};
use crate::models::{ParsedRow, RawSource, Supplier, TransactionFlags};
use crate::settings::Settings;

/// Posting description Tripletex uses for transfers between own accounts.
pub const INTERNAL_TRANSFER_POSTING: &str = "Intern overføring";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a signed amount. Accepts `-1,234.50`, `(1234.50)`, `1 234,50` and
/// `kr`/`$` decorations.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut s: String = raw
        .trim()
        .trim_start_matches("kr")
        .trim_end_matches("kr")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '"' && *c != '$' && *c != '\u{a0}')
        .collect();
    let negative = s.starts_with('(') && s.ends_with(')');
    if negative {
        s = s[1..s.len() - 1].to_string();
    }
    // The separator that comes last is the decimal point; the other groups thousands.
    s = match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s,
    };
    let value = Decimal::from_str(&s).ok()?;
    Some(if negative { -value.abs() } else { value })
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let raw = raw.get(..10).filter(|_| raw.len() > 10 && raw.as_bytes()[10] == b'T').unwrap_or(raw);
    ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Items of a Tripletex response body: `{"values": [...]}`,
/// `{"value": {...}}`, a bare array, or a single object with an `id`.
fn json_items(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            if let Some(Value::Array(items)) = map.remove("values") {
                return Ok(items);
            }
            if let Some(item @ Value::Object(_)) = map.remove("value") {
                return Ok(vec![item]);
            }
            if map.contains_key("id") {
                return Ok(vec![Value::Object(map)]);
            }
            Err(LedgerError::InvalidImport(
                "expected \"values\", \"value\" or an array".to_string(),
            ))
        }
        _ => Err(LedgerError::InvalidImport("expected a JSON object or array".to_string())),
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .map(|n| n.trim().to_lowercase())
        .any(|n| !n.is_empty() && haystack.contains(&n))
}

/// Flags that can be read off a plain description.
pub fn description_flags(description: &str, settings: &Settings) -> TransactionFlags {
    TransactionFlags {
        internal_transfer: contains_any(description, &settings.internal_transfer_keywords),
        forbidden: contains_any(description, &settings.forbidden_descriptions),
        ..TransactionFlags::default()
    }
}

pub fn tripletex_flags(raw: &RawSource, settings: &Settings) -> TransactionFlags {
    let internal_posting = raw.grouped_postings.iter().any(|p| {
        p.description
            .as_deref()
            .is_some_and(|d| d.trim().to_lowercase() == INTERNAL_TRANSFER_POSTING.to_lowercase())
    });
    let base = description_flags(&raw.description, settings);
    TransactionFlags {
        internal_transfer: internal_posting || base.internal_transfer,
        wage_transfer: raw.has_posting_match_type("WAGE"),
        tax_transfer: raw.has_posting_match_type("TAX"),
        forbidden: base.forbidden,
    }
}

/// Row id for `external_id` in one of the reference tables, creating a
/// placeholder row when it is not known yet.
fn ensure_stub(conn: &Connection, table: StubTable, external_id: i64) -> Result<i64> {
    let external_id = external_id.to_string();
    let insert = match table {
        StubTable::BankAccount => {
            "INSERT OR IGNORE INTO bank_accounts (external_id, name) VALUES (?1, 'Account ' || ?1)"
        }
        StubTable::LedgerAccount => "INSERT OR IGNORE INTO ledger_accounts (external_id) VALUES (?1)",
        StubTable::Supplier => "INSERT OR IGNORE INTO suppliers (external_id) VALUES (?1)",
        StubTable::CloseGroup => "INSERT OR IGNORE INTO close_groups (external_id) VALUES (?1)",
    };
    conn.execute(insert, [&external_id])?;
    let select = format!("SELECT id FROM {} WHERE external_id = ?1", table.name());
    Ok(conn.query_row(&select, [&external_id], |row| row.get(0))?)
}

#[derive(Debug, Clone, Copy)]
enum StubTable {
    BankAccount,
    LedgerAccount,
    Supplier,
    CloseGroup,
}

impl StubTable {
    fn name(&self) -> &'static str {
        match self {
            Self::BankAccount => "bank_accounts",
            Self::LedgerAccount => "ledger_accounts",
            Self::Supplier => "suppliers",
            Self::CloseGroup => "close_groups",
        }
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Tripletex,
    Csv,
}

impl ImportFormat {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Tripletex => "tripletex",
            Self::Csv => "csv",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "tripletex" | "json" => Some(Self::Tripletex),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn detect(file_path: &Path) -> Self {
        let is_json = file_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::Tripletex
        } else {
            Self::Csv
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub excluded: usize,
    pub duplicate_file: bool,
}

impl ImportResult {
    fn duplicate() -> Self {
        Self {
            duplicate_file: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// import_file
// ---------------------------------------------------------------------------

pub fn import_file(
    conn: &Connection,
    file_path: &Path,
    format: Option<ImportFormat>,
    settings: &Settings,
) -> Result<ImportResult> {
    let checksum = compute_checksum(file_path)?;
    if conn
        .prepare("SELECT 1 FROM imports WHERE checksum = ?1")?
        .exists([&checksum])?
    {
        return Ok(ImportResult::duplicate());
    }

    let format = format.unwrap_or_else(|| ImportFormat::detect(file_path));
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO imports (filename, checksum) VALUES (?1, ?2)",
        rusqlite::params![
            file_path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            checksum
        ],
    )?;
    let import_id = tx.last_insert_rowid();

    let (result, records) = match format {
        ImportFormat::Tripletex => import_tripletex(&tx, file_path, import_id, settings)?,
        ImportFormat::Csv => import_csv(&tx, file_path, import_id, settings)?,
    };
    tx.execute(
        "UPDATE imports SET record_count = ?1 WHERE id = ?2",
        rusqlite::params![records as i64, import_id],
    )?;
    tx.commit()?;

    tracing::info!(
        "{} ({}): {} new, {} updated, {} skipped, {} excluded from matching",
        file_path.display(),
        format.key(),
        result.imported,
        result.updated,
        result.skipped,
        result.excluded
    );
    Ok(result)
}

fn import_tripletex(
    conn: &Connection,
    file_path: &Path,
    import_id: i64,
    settings: &Settings,
) -> Result<(ImportResult, usize)> {
    let body: Value = serde_json::from_str(&std::fs::read_to_string(file_path)?)?;
    let items = json_items(body)?;
    let records = items.len();
    let mut result = ImportResult::default();

    for (n, item) in items.into_iter().enumerate() {
        let raw: RawSource = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("record {}: not a bank transaction ({e})", n + 1);
                result.skipped += 1;
                continue;
            }
        };
        let Some(date) = raw.date.as_deref().and_then(parse_date) else {
            tracing::warn!("record {}: missing or invalid date", n + 1);
            result.skipped += 1;
            continue;
        };
        let Some(amount) = raw.amount_currency else {
            tracing::warn!("record {}: missing amount", n + 1);
            result.skipped += 1;
            continue;
        };

        let flags = tripletex_flags(&raw, settings);
        if flags.excluded() {
            result.excluded += 1;
        }
        let bank_account_id = raw
            .account
            .map(|a| ensure_stub(conn, StubTable::BankAccount, a.id))
            .transpose()?;
        let ledger_account_id = raw
            .ledger_account_ref()
            .map(|id| ensure_stub(conn, StubTable::LedgerAccount, id))
            .transpose()?;
        let supplier_id = raw
            .supplier_ref()
            .map(|id| ensure_stub(conn, StubTable::Supplier, id))
            .transpose()?;
        let external_id = raw.id.map(|id| id.to_string());
        let raw_json = serde_json::to_string(&raw)?;

        let existing: Option<i64> = match &external_id {
            Some(ext) => conn
                .query_row("SELECT id FROM transactions WHERE external_id = ?1", [ext], |r| {
                    r.get(0)
                })
                .optional()?,
            None => None,
        };

        let transaction_id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE transactions SET description = ?1, amount = ?2, date = ?3, \
                     is_internal_transfer = ?4, is_wage_transfer = ?5, is_tax_transfer = ?6, \
                     is_forbidden = ?7, should_process = ?8, raw_data = ?9, \
                     bank_account_id = ?10, ledger_account_id = ?11, \
                     supplier_id = COALESCE(supplier_id, ?12) WHERE id = ?13",
                    rusqlite::params![
                        raw.description,
                        amount.to_string(),
                        date.format("%Y-%m-%d").to_string(),
                        flags.internal_transfer,
                        flags.wage_transfer,
                        flags.tax_transfer,
                        flags.forbidden,
                        flags.should_process(amount),
                        raw_json,
                        bank_account_id,
                        ledger_account_id,
                        supplier_id,
                        id,
                    ],
                )?;
                result.updated += 1;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO transactions (external_id, description, amount, date, \
                     is_internal_transfer, is_wage_transfer, is_tax_transfer, is_forbidden, \
                     should_process, raw_data, bank_account_id, ledger_account_id, supplier_id, import_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    rusqlite::params![
                        external_id,
                        raw.description,
                        amount.to_string(),
                        date.format("%Y-%m-%d").to_string(),
                        flags.internal_transfer,
                        flags.wage_transfer,
                        flags.tax_transfer,
                        flags.forbidden,
                        flags.should_process(amount),
                        raw_json,
                        bank_account_id,
                        ledger_account_id,
                        supplier_id,
                        import_id,
                    ],
                )?;
                result.imported += 1;
                conn.last_insert_rowid()
            }
        };
        store_postings(conn, transaction_id, &raw)?;
    }
    Ok((result, records))
}

fn store_postings(conn: &Connection, transaction_id: i64, raw: &RawSource) -> Result<()> {
    conn.execute(
        "DELETE FROM ledger_postings WHERE transaction_id = ?1",
        [transaction_id],
    )?;
    for posting in &raw.grouped_postings {
        let ledger_account_id = posting
            .account
            .map(|a| ensure_stub(conn, StubTable::LedgerAccount, a.id))
            .transpose()?;
        let close_group_id = posting
            .close_group
            .map(|g| ensure_stub(conn, StubTable::CloseGroup, g.id))
            .transpose()?;
        conn.execute(
            "INSERT INTO ledger_postings (external_id, transaction_id, description, amount, \
             ledger_account_id, voucher_external_id, posting_match_type, close_group_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                posting.id.map(|id| id.to_string()),
                transaction_id,
                posting.description,
                posting.amount.map(|a| a.to_string()),
                ledger_account_id,
                posting.voucher.map(|v| v.id.to_string()),
                posting.posting_match_type,
                close_group_id,
            ],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CsvRecord {
    date: String,
    description: String,
    amount: String,
    #[serde(default)]
    supplier: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

fn parse_csv(file_path: &Path) -> Result<(Vec<ParsedRow>, usize)> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(file_path)?;
    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (n, record) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("line {}: {e}", n + 2);
                skipped += 1;
                continue;
            }
        };
        let (Some(date), Some(amount)) = (parse_date(&record.date), parse_amount(&record.amount)) else {
            tracing::warn!("line {}: unreadable date or amount", n + 2);
            skipped += 1;
            continue;
        };
        if record.description.is_empty() {
            skipped += 1;
            continue;
        }
        rows.push(ParsedRow {
            date,
            description: record.description,
            amount,
            supplier: record.supplier.filter(|s| !s.is_empty()),
            category: record.category.filter(|c| !c.is_empty()),
        });
    }
    Ok((rows, skipped))
}

fn is_duplicate_row(conn: &Connection, row: &ParsedRow) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM transactions WHERE date = ?1 AND description = ?2 AND amount = ?3",
    )?;
    Ok(stmt.exists(rusqlite::params![
        row.date.format("%Y-%m-%d").to_string(),
        row.description,
        row.amount.to_string()
    ])?)
}

fn supplier_for_name(conn: &Connection, name: &str) -> Result<i64> {
    if let Some(id) = crate::db::supplier_id_by_name(conn, name)? {
        return Ok(id);
    }
    conn.execute("INSERT INTO suppliers (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

fn category_for_name(conn: &Connection, name: &str) -> Result<i64> {
    if let Some(id) = category_id_by_name(conn, name)? {
        return Ok(id);
    }
    conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

fn import_csv(
    conn: &Connection,
    file_path: &Path,
    import_id: i64,
    settings: &Settings,
) -> Result<(ImportResult, usize)> {
    let (rows, skipped) = parse_csv(file_path)?;
    let mut result = ImportResult {
        skipped,
        ..ImportResult::default()
    };
    for row in &rows {
        if is_duplicate_row(conn, row)? {
            result.skipped += 1;
            continue;
        }
        let flags = description_flags(&row.description, settings);
        if flags.excluded() {
            result.excluded += 1;
        }
        let supplier_id = row.supplier.as_deref().map(|s| supplier_for_name(conn, s)).transpose()?;
        let category_id = row.category.as_deref().map(|c| category_for_name(conn, c)).transpose()?;
        conn.execute(
            "INSERT INTO transactions (description, amount, date, is_internal_transfer, \
             is_forbidden, should_process, supplier_id, category_id, import_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                row.description,
                row.amount.to_string(),
                row.date.format("%Y-%m-%d").to_string(),
                flags.internal_transfer,
                flags.forbidden,
                flags.should_process(row.amount),
                supplier_id,
                category_id,
                import_id,
            ],
        )?;
        result.imported += 1;
    }
    Ok((result, rows.len() + skipped))
}

// ---------------------------------------------------------------------------
// Suppliers
// ---------------------------------------------------------------------------

/// Upsert suppliers from a Tripletex supplier export, keyed by their id.
pub fn import_suppliers(conn: &Connection, file_path: &Path) -> Result<ImportResult> {
    let body: Value = serde_json::from_str(&std::fs::read_to_string(file_path)?)?;
    let tx = conn.unchecked_transaction()?;
    let mut result = ImportResult::default();

    for (n, item) in json_items(body)?.into_iter().enumerate() {
        let supplier: Supplier = match serde_json::from_value(item) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("supplier {}: {e}", n + 1);
                result.skipped += 1;
                continue;
            }
        };
        let Some(id) = supplier.id else {
            tracing::warn!("supplier {}: no id", n + 1);
            result.skipped += 1;
            continue;
        };
        let external_id = id.to_string();
        let known = tx
            .prepare_cached("SELECT 1 FROM suppliers WHERE external_id = ?1")?
            .exists([&external_id])?;
        tx.execute(
            "INSERT INTO suppliers (external_id, name, organization_number, email, phone_number, address, url) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(external_id) DO UPDATE SET name = excluded.name, \
               organization_number = excluded.organization_number, email = excluded.email, \
               phone_number = excluded.phone_number, address = excluded.address, url = excluded.url",
            rusqlite::params![
                external_id,
                supplier.name,
                supplier.organization_number,
                supplier.email,
                supplier.phone_number,
                supplier.address,
                supplier.url,
            ],
        )?;
        if known {
            result.updated += 1;
        } else {
            result.imported += 1;
        }
    }
    tx.commit()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    fn settings() -> Settings {
        Settings {
            forbidden_descriptions: vec!["Kontantuttak".to_string()],
            ..Settings::default()
        }
    }

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const TRIPLETEX: &str = r#"{"values": [
        {"id": 501, "description": "NETFLIX.COM AMSTERDAM", "amountCurrency": -129.00,
         "date": "2024-03-02", "account": {"id": 9},
         "groupedPostings": [{"id": 1, "description": "Netflix", "amountDefault": -129.00,
             "postingMatchType": "SUPPLIER", "supplier": {"id": 77}, "account": {"id": 6540},
             "voucher": {"id": 3001}, "closeGroup": {"id": 42}}]},
        {"id": 502, "description": "Overføring", "amountCurrency": -5000,
         "date": "2024-03-03", "groupedPostings": [{"description": "Intern overføring"}]},
        {"id": 503, "description": "Lønn mars", "amountCurrency": -30000,
         "date": "2024-03-25", "groupedPostings": [{"postingMatchType": "WAGE"}]},
        {"id": 504, "description": "Kontantuttak Oslo S", "amountCurrency": -500,
         "date": "2024-03-26"},
        {"id": 505, "description": "Innbetaling kunde", "amountCurrency": 2000,
         "date": "2024-03-27"},
        {"id": 506, "description": "No date", "amountCurrency": -1}
    ]}"#;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("-1,234.50"), Decimal::from_str("-1234.50").ok());
        assert_eq!(parse_amount("(42.00)"), Decimal::from_str("-42.00").ok());
        assert_eq!(parse_amount("1 234,50"), Decimal::from_str("1234.50").ok());
        assert_eq!(parse_amount("$9.99"), Decimal::from_str("9.99").ok());
        assert_eq!(parse_amount("kr 100"), Decimal::from_str("100").ok());
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_parse_amount_thousand_separators() {
        assert_eq!(parse_amount("1.234,50"), Decimal::from_str("1234.50").ok());
        assert_eq!(parse_amount("-1.234.567,05"), Decimal::from_str("-1234567.05").ok());
        assert_eq!(parse_amount("1,234.50"), Decimal::from_str("1234.50").ok());
        assert_eq!(parse_amount("1 234,50"), Decimal::from_str("1234.50").ok());
        assert_eq!(parse_amount("kr 2.500,00"), Decimal::from_str("2500.00").ok());
    }

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 2);
        assert_eq!(parse_date("2024-03-02"), expected);
        assert_eq!(parse_date("02.03.2024"), expected);
        assert_eq!(parse_date("03/02/2024"), expected);
        assert_eq!(parse_date("2024-03-02T10:00:00"), expected);
        assert_eq!(parse_date("2024-13-40"), None);
    }

    #[test]
    fn test_json_items_shapes() {
        let one: Value = serde_json::json!({"value": {"id": 1}});
        assert_eq!(json_items(one).unwrap().len(), 1);
        let bare: Value = serde_json::json!({"id": 1, "description": "x"});
        assert_eq!(json_items(bare).unwrap().len(), 1);
        let array: Value = serde_json::json!([{"id": 1}, {"id": 2}]);
        assert_eq!(json_items(array).unwrap().len(), 2);
        assert!(json_items(serde_json::json!({"other": 1})).is_err());
        assert!(json_items(serde_json::json!(5)).is_err());
    }

    #[test]
    fn test_tripletex_import_flags_and_links() {
        let (dir, conn) = test_db();
        let path = write(&dir, "march.json", TRIPLETEX);
        let result = import_file(&conn, &path, None, &settings()).unwrap();
        assert_eq!(result.imported, 5);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.excluded, 3);

        let flags = |ext: &str| -> (bool, bool, bool, bool, bool) {
            conn.query_row(
                "SELECT is_internal_transfer, is_wage_transfer, is_tax_transfer, is_forbidden, should_process \
                 FROM transactions WHERE external_id = ?1",
                [ext],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap()
        };
        assert_eq!(flags("501"), (false, false, false, false, true));
        assert_eq!(flags("502"), (true, false, false, false, false));
        assert_eq!(flags("503"), (false, true, false, false, false));
        assert_eq!(flags("504"), (false, false, false, true, false));
        assert_eq!(flags("505"), (false, false, false, false, false));

        let (supplier_ext, amount): (String, String) = conn
            .query_row(
                "SELECT s.external_id, t.amount FROM transactions t JOIN suppliers s ON s.id = t.supplier_id \
                 WHERE t.external_id = '501'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(supplier_ext, "77");
        assert_eq!(Decimal::from_str(&amount).unwrap(), Decimal::from_str("-129").unwrap());

        let postings: i64 = conn
            .query_row(
                "SELECT count(*) FROM ledger_postings p JOIN close_groups g ON g.id = p.close_group_id \
                 WHERE p.voucher_external_id = '3001'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(postings, 1);

        let raw: String = conn
            .query_row("SELECT raw_data FROM transactions WHERE external_id = '501'", [], |r| r.get(0))
            .unwrap();
        let raw: RawSource = serde_json::from_str(&raw).unwrap();
        assert_eq!(raw.posting_descriptions(), vec!["Netflix"]);
    }

    #[test]
    fn test_duplicate_file_is_detected() {
        let (dir, conn) = test_db();
        let path = write(&dir, "march.json", TRIPLETEX);
        import_file(&conn, &path, None, &settings()).unwrap();
        let again = import_file(&conn, &path, None, &settings()).unwrap();
        assert!(again.duplicate_file);
        assert_eq!(again.imported, 0);
    }

    #[test]
    fn test_reimport_updates_without_losing_supplier() {
        let (dir, conn) = test_db();
        let first = write(&dir, "a.json", r#"[{"id": 9, "description": "KIWI", "amountCurrency": -10, "date": "2024-01-01"}]"#);
        import_file(&conn, &first, None, &settings()).unwrap();
        conn.execute("INSERT INTO suppliers (name) VALUES ('Kiwi')", []).unwrap();
        let kiwi = conn.last_insert_rowid();
        conn.execute("UPDATE transactions SET supplier_id = ?1 WHERE external_id = '9'", [kiwi])
            .unwrap();

        let second = write(&dir, "b.json", r#"[{"id": 9, "description": "KIWI 123", "amountCurrency": -10, "date": "2024-01-01"}]"#);
        let result = import_file(&conn, &second, None, &settings()).unwrap();
        assert_eq!(result.updated, 1);
        let (description, supplier): (String, i64) = conn
            .query_row(
                "SELECT description, supplier_id FROM transactions WHERE external_id = '9'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(description, "KIWI 123");
        assert_eq!(supplier, kiwi);
    }

    #[test]
    fn test_csv_import_links_and_dedupes() {
        let (dir, conn) = test_db();
        let csv = "date,description,amount,supplier,category\n\
                   2024-01-05,NETFLIX.COM AMSTERDAM,-129.00,Netflix,Entertainment\n\
                   2024-01-05,NETFLIX.COM AMSTERDAM,-129.00,Netflix,Entertainment\n\
                   2024-01-06,Intern overføring sparekonto,-1000,,\n\
                   not-a-date,BROKEN,-1,,\n\
                   2024-01-07,NEW CATEGORY SHOP,-50,Shop AS,Hobbies\n";
        let path = write(&dir, "bank.csv", csv);
        let result = import_file(&conn, &path, Some(ImportFormat::Csv), &settings()).unwrap();
        assert_eq!(result.imported, 3);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.excluded, 1);
        assert!(category_id_by_name(&conn, "Hobbies").unwrap().is_some());
        let linked: i64 = conn
            .query_row("SELECT count(*) FROM transactions WHERE supplier_id IS NOT NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(linked, 2);
        let record_count: i64 = conn
            .query_row("SELECT record_count FROM imports", [], |r| r.get(0))
            .unwrap();
        assert_eq!(record_count, 5);
    }

    #[test]
    fn test_import_suppliers_upserts() {
        let (dir, conn) = test_db();
        let path = write(
            &dir,
            "suppliers.json",
            r#"{"values": [{"id": 77, "name": "Netflix International B.V.", "organizationNumber": "NL123"},
                          {"name": "No id"}]}"#,
        );
        let result = import_suppliers(&conn, &path).unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);

        let path = write(&dir, "one.json", r#"{"value": {"id": 77, "name": "Netflix"}}"#);
        let result = import_suppliers(&conn, &path).unwrap();
        assert_eq!(result.updated, 1);
        let name: String = conn
            .query_row("SELECT name FROM suppliers WHERE external_id = '77'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Netflix");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ImportFormat::detect(Path::new("x.JSON")), ImportFormat::Tripletex);
        assert_eq!(ImportFormat::detect(Path::new("x.csv")), ImportFormat::Csv);
        assert_eq!(ImportFormat::from_key("tripletex"), Some(ImportFormat::Tripletex));
        assert_eq!(ImportFormat::from_key("xlsx"), None);
    }
}
