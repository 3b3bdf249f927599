use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFlags {
    pub internal_transfer: bool,
    pub wage_transfer: bool,
    pub tax_transfer: bool,
    pub forbidden: bool,
}

impl TransactionFlags {
    pub fn excluded(&self) -> bool {
        self.internal_transfer || self.wage_transfer || self.tax_transfer || self.forbidden
    }

    /// Only outgoing payments that are not transfers or blocked are worth matching.
    pub fn should_process(&self, amount: Decimal) -> bool {
        amount.is_sign_negative() && !amount.is_zero() && !self.excluded()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub organization_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub budget: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

/// Bank transaction as exported from Tripletex (`/bank/statement/transaction/{id}`).
/// Unknown fields are ignored; everything the matcher reads is named here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSource {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount_currency: Option<Decimal>,
    #[serde(default, alias = "postedDate")]
    pub date: Option<String>,
    #[serde(default)]
    pub account: Option<IdRef>,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub grouped_postings: Vec<GroupedPosting>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedPosting {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "amountDefault")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub posting_match_type: Option<String>,
    #[serde(default)]
    pub account: Option<IdRef>,
    #[serde(default)]
    pub voucher: Option<IdRef>,
    #[serde(default)]
    pub supplier: Option<IdRef>,
    #[serde(default)]
    pub close_group: Option<IdRef>,
}

impl RawSource {
    /// Non-empty posting descriptions, in posting order.
    pub fn posting_descriptions(&self) -> Vec<&str> {
        self.grouped_postings
            .iter()
            .filter_map(|p| p.description.as_deref())
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .collect()
    }

    pub fn has_posting_match_type(&self, match_type: &str) -> bool {
        self.grouped_postings
            .iter()
            .any(|p| p.posting_match_type.as_deref() == Some(match_type))
    }

    pub fn supplier_ref(&self) -> Option<i64> {
        self.grouped_postings
            .iter()
            .find_map(|p| p.supplier.map(|s| s.id))
    }

    pub fn ledger_account_ref(&self) -> Option<i64> {
        self.grouped_postings
            .iter()
            .find_map(|p| p.account.map(|a| a.id))
    }
}

/// Intermediate representation from a CSV row before DB insert.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub supplier: Option<String>,
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_raw_source_parses_tripletex_shape() {
        let json = r#"{
            "id": 991,
            "description": "VISA 4455 NETFLIX.COM",
            "amountCurrency": -129.0,
            "postedDate": "2024-03-02",
            "account": {"id": 12, "url": "https://tripletex.no/v2/bank/12"},
            "matchType": "ONE_TRANSACTION_TO_ONE_POSTING",
            "groupedPostings": [
                {"id": 1, "description": "Netflix abonnement", "amountDefault": -129.0,
                 "postingMatchType": "SUPPLIER", "supplier": {"id": 77},
                 "account": {"id": 6540}, "voucher": {"id": 5001}},
                {"id": 2, "description": "   ", "postingMatchType": "TAX"}
            ]
        }"#;
        let raw: RawSource = serde_json::from_str(json).unwrap();
        assert_eq!(raw.id, Some(991));
        assert_eq!(raw.date.as_deref(), Some("2024-03-02"));
        assert_eq!(raw.amount_currency, Some(Decimal::from_str("-129").unwrap()));
        assert_eq!(raw.posting_descriptions(), vec!["Netflix abonnement"]);
        assert!(raw.has_posting_match_type("TAX"));
        assert!(!raw.has_posting_match_type("WAGE"));
        assert_eq!(raw.supplier_ref(), Some(77));
        assert_eq!(raw.ledger_account_ref(), Some(6540));
    }

    #[test]
    fn test_raw_source_survives_storage() {
        let raw = RawSource {
            description: "Rema 1000".to_string(),
            amount_currency: Some(Decimal::from_str("-52.30").unwrap()),
            grouped_postings: vec![GroupedPosting {
                description: Some("Dagligvarer".to_string()),
                ..GroupedPosting::default()
            }],
            ..RawSource::default()
        };
        let stored = serde_json::to_string(&raw).unwrap();
        let back: RawSource = serde_json::from_str(&stored).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_flags_should_process() {
        let out = Decimal::from_str("-10").unwrap();
        let inflow = Decimal::from_str("10").unwrap();
        assert!(TransactionFlags::default().should_process(out));
        assert!(!TransactionFlags::default().should_process(inflow));
        assert!(!TransactionFlags::default().should_process(Decimal::ZERO));
        let wage = TransactionFlags {
            wage_transfer: true,
            ..TransactionFlags::default()
        };
        assert!(wage.excluded());
        assert!(!wage.should_process(out));
    }
}
