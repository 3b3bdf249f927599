use std::collections::HashMap;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

pub const UNCATEGORIZED: &str = "Uncategorized";

// ---------------------------------------------------------------------------
// Date range
// ---------------------------------------------------------------------------

/// Half-open `[from, to)` range of transaction dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if to <= from {
            return Err(LedgerError::Other(format!(
                "--to ({to}) must be after --from ({from})"
            )));
        }
        Ok(Self { from, to })
    }

    /// From `--from`/`--to` arguments; both or neither must be given.
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> Result<Option<Self>> {
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| LedgerError::Other(format!("Invalid date (expected YYYY-MM-DD): {raw}")))
        };
        match (from, to) {
            (Some(from), Some(to)) => Ok(Some(Self::new(parse(from)?, parse(to)?)?)),
            (Some(_), None) => Err(LedgerError::Other(
                "--from requires --to (both date boundaries must be specified)".to_string(),
            )),
            (None, Some(_)) => Err(LedgerError::Other(
                "--to requires --from (both date boundaries must be specified)".to_string(),
            )),
            (None, None) => Ok(None),
        }
    }

    /// Whole calendar months covering the dates seen, from the first day of
    /// the earliest month to the first day after the latest month.
    fn covering(first: NaiveDate, last: NaiveDate) -> Self {
        let from = first.with_day(1).unwrap_or(first);
        let (y, m) = if last.month() == 12 {
            (last.year() + 1, 1)
        } else {
            (last.year(), last.month() + 1)
        };
        let to = NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(last);
        Self { from, to }
    }

    /// Number of months averages are divided by, at least one.
    /// 2025-01-01..2025-04-01 is 3; a partial trailing month counts.
    pub fn months(&self) -> u32 {
        let span = (self.to.year() * 12 + self.to.month() as i32)
            - (self.from.year() * 12 + self.from.month() as i32);
        let partial = i32::from(self.to.day() > self.from.day());
        (span + partial).max(1) as u32
    }
}

// ---------------------------------------------------------------------------
// Spending report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CategorySpending {
    pub name: String,
    pub count: usize,
    pub total: Decimal,
    pub monthly_average: Decimal,
    /// Share of all outflows in the range, 0..1.
    pub share: f64,
    pub budget: Option<Decimal>,
    /// Monthly average over monthly budget.
    pub budget_used: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AccountSpending {
    pub name: String,
    pub count: usize,
    pub total: Decimal,
    pub share: f64,
}

#[derive(Debug, Clone)]
pub struct SpendingReport {
    pub range: Option<DateRange>,
    pub months: u32,
    pub total: Decimal,
    pub monthly_average: Decimal,
    pub categories: Vec<CategorySpending>,
    pub accounts: Vec<AccountSpending>,
}

struct Outflow {
    amount: Decimal,
    date: NaiveDate,
    category: Option<(String, Option<Decimal>)>,
    account: String,
}

fn load_outflows(conn: &Connection, range: Option<DateRange>) -> Result<Vec<Outflow>> {
    let mut sql = String::from(
        "SELECT t.id, t.amount, t.date, c.name, c.budget, \
                COALESCE(b.name, 'Account ' || b.external_id, 'Unknown') \
         FROM transactions t \
         LEFT JOIN categories c ON c.id = t.category_id \
         LEFT JOIN bank_accounts b ON b.id = t.bank_account_id \
         WHERE t.is_internal_transfer = 0",
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(r) = range {
        sql.push_str(" AND t.date >= ?1 AND t.date < ?2");
        params.push(r.from.format("%Y-%m-%d").to_string());
        params.push(r.to.format("%Y-%m-%d").to_string());
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut outflows = Vec::new();
    for (id, amount, date, category, budget, account) in rows {
        let (Ok(amount), Ok(date)) = (
            Decimal::from_str(&amount),
            NaiveDate::parse_from_str(&date, "%Y-%m-%d"),
        ) else {
            tracing::warn!("transaction {id}: unreadable amount or date, left out of report");
            continue;
        };
        if !amount.is_sign_negative() || amount.is_zero() {
            continue;
        }
        outflows.push(Outflow {
            amount: amount.abs(),
            date,
            category: category.map(|name| (name, budget.and_then(|b| Decimal::from_str(&b).ok()))),
            account,
        });
    }
    Ok(outflows)
}

fn share(part: Decimal, total: Decimal) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    (part / total).to_f64().unwrap_or(0.0)
}

/// Outflows per category and per bank account, internal transfers left
/// out. Amounts are positive. Without a range the report covers the whole
/// months spanned by the data.
pub fn spending_report(conn: &Connection, range: Option<DateRange>) -> Result<SpendingReport> {
    let outflows = load_outflows(conn, range)?;

    let range = range.or_else(|| {
        let first = outflows.iter().map(|o| o.date).min()?;
        let last = outflows.iter().map(|o| o.date).max()?;
        Some(DateRange::covering(first, last))
    });
    let months = range.map_or(1, |r| r.months());
    let per_month = Decimal::from(months);
    let total: Decimal = outflows.iter().map(|o| o.amount).sum();

    let mut by_category: HashMap<String, (usize, Decimal, Option<Decimal>)> = HashMap::new();
    let mut by_account: HashMap<String, (usize, Decimal)> = HashMap::new();
    for o in &outflows {
        let (name, budget) = match &o.category {
            Some((name, budget)) => (name.clone(), *budget),
            None => (UNCATEGORIZED.to_string(), None),
        };
        let entry = by_category.entry(name).or_insert((0, Decimal::ZERO, budget));
        entry.0 += 1;
        entry.1 += o.amount;

        let entry = by_account.entry(o.account.clone()).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += o.amount;
    }

    let mut categories: Vec<CategorySpending> = by_category
        .into_iter()
        .map(|(name, (count, cat_total, budget))| {
            let monthly_average = (cat_total / per_month).round_dp(2);
            CategorySpending {
                share: share(cat_total, total),
                budget_used: budget
                    .filter(|b| !b.is_zero())
                    .map(|b| share(monthly_average, b)),
                name,
                count,
                total: cat_total,
                monthly_average,
                budget,
            }
        })
        .collect();
    categories.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

    let mut accounts: Vec<AccountSpending> = by_account
        .into_iter()
        .map(|(name, (count, acc_total))| AccountSpending {
            share: share(acc_total, total),
            name,
            count,
            total: acc_total,
        })
        .collect();
    accounts.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

    Ok(SpendingReport {
        range,
        months,
        total,
        monthly_average: (total / per_month).round_dp(2),
        categories,
        accounts,
    })
}
