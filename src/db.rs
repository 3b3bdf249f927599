use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    budget TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS suppliers (
    id INTEGER PRIMARY KEY,
    external_id TEXT UNIQUE,
    name TEXT,
    organization_number TEXT,
    email TEXT,
    phone_number TEXT,
    address TEXT,
    url TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS bank_accounts (
    id INTEGER PRIMARY KEY,
    external_id TEXT UNIQUE,
    name TEXT NOT NULL,
    account_number TEXT,
    bank_name TEXT,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS ledger_accounts (
    id INTEGER PRIMARY KEY,
    external_id TEXT UNIQUE,
    account_number TEXT,
    name TEXT,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    import_date TEXT DEFAULT (datetime('now')),
    record_count INTEGER,
    checksum TEXT
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    external_id TEXT UNIQUE,
    description TEXT NOT NULL,
    amount TEXT NOT NULL,
    date TEXT NOT NULL,
    is_internal_transfer INTEGER DEFAULT 0,
    is_wage_transfer INTEGER DEFAULT 0,
    is_tax_transfer INTEGER DEFAULT 0,
    is_forbidden INTEGER DEFAULT 0,
    should_process INTEGER DEFAULT 1,
    category_id INTEGER,
    supplier_id INTEGER,
    ledger_account_id INTEGER,
    bank_account_id INTEGER,
    raw_data TEXT,
    match_method TEXT,
    match_confidence REAL,
    import_id INTEGER,
    imported_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL,
    FOREIGN KEY (supplier_id) REFERENCES suppliers(id) ON DELETE SET NULL,
    FOREIGN KEY (ledger_account_id) REFERENCES ledger_accounts(id) ON DELETE SET NULL,
    FOREIGN KEY (bank_account_id) REFERENCES bank_accounts(id) ON DELETE SET NULL,
    FOREIGN KEY (import_id) REFERENCES imports(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_supplier ON transactions(supplier_id);
CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);
CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);

CREATE TABLE IF NOT EXISTS category_supplier_map (
    id INTEGER PRIMARY KEY,
    supplier_id INTEGER NOT NULL UNIQUE,
    category_id INTEGER NOT NULL,
    updated_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (supplier_id) REFERENCES suppliers(id) ON DELETE CASCADE,
    FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS close_groups (
    id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS ledger_postings (
    id INTEGER PRIMARY KEY,
    external_id TEXT,
    transaction_id INTEGER NOT NULL,
    description TEXT,
    amount TEXT,
    ledger_account_id INTEGER,
    voucher_external_id TEXT,
    posting_match_type TEXT,
    close_group_id INTEGER,
    FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
    FOREIGN KEY (ledger_account_id) REFERENCES ledger_accounts(id) ON DELETE SET NULL,
    FOREIGN KEY (close_group_id) REFERENCES close_groups(id) ON DELETE SET NULL
);
";

// (name, description)
const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Food & Dining", "Restaurants, grocery stores, and food delivery"),
    ("Transportation", "Gas, public transport, and ride-sharing"),
    ("Shopping", "Retail purchases and online shopping"),
    ("Entertainment", "Movies, concerts, and other entertainment"),
    ("Housing", "Rent, mortgage, and home maintenance"),
    ("Utilities", "Electricity, water, internet, and phone bills"),
    ("Health & Fitness", "Medical expenses, gym memberships, and wellness"),
    ("Income", "Salary, interest, and other income"),
    ("Travel", "Flights, hotels, and vacation expenses"),
    ("Education", "Tuition, books, and courses"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for (name, description) in DEFAULT_CATEGORIES {
            conn.execute(
                "INSERT INTO categories (name, description) VALUES (?1, ?2)",
                rusqlite::params![name, description],
            )?;
        }
    }
    Ok(())
}

pub fn category_id_by_name(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM categories WHERE name = ?1", [name], |r| r.get(0))
        .optional()?)
}

pub fn supplier_id_by_name(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM suppliers WHERE name = ?1 ORDER BY id LIMIT 1",
            [name],
            |r| r.get(0),
        )
        .optional()?)
}


#[cfg(test)]
mod tests {
    use super::test_support::test_db;
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "categories",
            "suppliers",
            "bank_accounts",
            "ledger_accounts",
            "transactions",
            "category_supplier_map",
            "close_groups",
            "ledger_postings",
            "imports",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |r| r.get(0)).unwrap();
        assert_eq!(count, DEFAULT_CATEGORIES.len() as i64);
    }

    #[test]
    fn test_supplier_map_is_unique_per_supplier() {
        let (_dir, conn) = test_db();
        let supplier = super::test_support::add_supplier(&conn, "Netflix");
        conn.execute(
            "INSERT INTO category_supplier_map (supplier_id, category_id) VALUES (?1, 1)",
            [supplier],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO category_supplier_map (supplier_id, category_id) VALUES (?1, 2)",
            [supplier],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_lookup_helpers() {
        let (_dir, conn) = test_db();
        assert!(category_id_by_name(&conn, "Travel").unwrap().is_some());
        assert!(category_id_by_name(&conn, "Nope").unwrap().is_none());
        let id = super::test_support::add_supplier(&conn, "Spotify");
        assert_eq!(supplier_id_by_name(&conn, "Spotify").unwrap(), Some(id));
    }
}
