//! SHA-256 fingerprint over the immutable fields of an invoice (GoBD).
//!
//! The digest is taken over compact JSON with lexicographically sorted keys:
//! `{"amount":"119.00","invoice_date":"2025-01-15","recipient":"42","status":"draft"}`.
//! A stored `hash_sha256` that no longer matches the recomputed value means the
//! row was changed outside the invoice workflow.

use chrono::NaiveDate;
use db::models::invoice::{Invoice, InvoiceStatus};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHashData {
    /// ISO date, `YYYY-MM-DD`
    pub invoice_date: String,
    /// Gross amount with exactly two decimals
    pub amount: String,
    /// Customer id
    pub recipient: String,
    pub status: String,
}

impl InvoiceHashData {
    pub fn new(
        issue_date: NaiveDate,
        gross_amount: Decimal,
        customer_id: i64,
        status: InvoiceStatus,
    ) -> Self {
        Self {
            invoice_date: issue_date.format("%Y-%m-%d").to_string(),
            amount: format_amount(gross_amount),
            recipient: customer_id.to_string(),
            status: status.to_string(),
        }
    }

    pub fn from_invoice(invoice: &Invoice) -> Self {
        Self::with_status(invoice, invoice.status)
    }

    /// Hash input for `invoice` as it will look once moved to `status`.
    pub fn with_status(invoice: &Invoice, status: InvoiceStatus) -> Self {
        Self::new(invoice.issue_date, invoice.gross_amount.0, invoice.customer_id, status)
    }
}

/// Two fixed decimals, half away from zero.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Hex digest of any JSON value in canonical form.
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

pub fn calculate_invoice_hash(data: &InvoiceHashData) -> String {
    let value = serde_json::json!({
        "invoice_date": data.invoice_date,
        "amount": data.amount,
        "recipient": data.recipient,
        "status": data.status,
    });
    hash_canonical(&value)
}

pub fn verify_invoice_hash(data: &InvoiceHashData, expected_hash: &str) -> bool {
    calculate_invoice_hash(data) == expected_hash
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn sample() -> InvoiceHashData {
        InvoiceHashData {
            invoice_date: "2025-01-15".to_string(),
            amount: "119.00".to_string(),
            recipient: "42".to_string(),
            status: "draft".to_string(),
        }
    }

    #[test]
    fn test_golden_hash() {
        assert_eq!(
            calculate_invoice_hash(&sample()),
            "47b729813a75c7db12524817d511c74d690759a373f5fcfafb9c47618ffcd362"
        );
    }

    #[test]
    fn test_canonical_form_is_sorted_and_compact() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            canonical_json(&value),
            r#"{"amount":"119.00","invoice_date":"2025-01-15","recipient":"42","status":"draft"}"#
        );
    }

    #[test]
    fn test_verify_accepts_own_hash() {
        for status in InvoiceStatus::ALL {
            let mut data = sample();
            data.status = status.to_string();
            let hash = calculate_invoice_hash(&data);
            assert_eq!(hash.len(), 64);
            assert!(verify_invoice_hash(&data, &hash));
        }
    }

    #[test]
    fn test_verify_is_byte_exact() {
        let hash = calculate_invoice_hash(&sample());
        assert!(!verify_invoice_hash(&sample(), &hash.to_uppercase()));
        assert!(!verify_invoice_hash(&sample(), &format!("{hash} ")));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = serde_json::from_str::<Value>(
            r#"{"status":"sent","amount":"10.00","recipient":"7","invoice_date":"2025-03-01"}"#,
        )
        .unwrap();
        let b = serde_json::from_str::<Value>(
            r#"{"amount":"10.00","invoice_date":"2025-03-01","status":"sent","recipient":"7"}"#,
        )
        .unwrap();
        assert_eq!(hash_canonical(&a), hash_canonical(&b));

        let data = InvoiceHashData {
            invoice_date: "2025-03-01".to_string(),
            amount: "10.00".to_string(),
            recipient: "7".to_string(),
            status: "sent".to_string(),
        };
        assert_eq!(calculate_invoice_hash(&data), hash_canonical(&a));
    }

    #[test]
    fn test_any_field_change_changes_hash() {
        let base = calculate_invoice_hash(&sample());

        let mut amount = sample();
        amount.amount = "119.01".to_string();
        let mut date = sample();
        date.invoice_date = "2025-01-16".to_string();
        let mut recipient = sample();
        recipient.recipient = "43".to_string();
        let mut status = sample();
        status.status = "sent".to_string();

        for changed in [amount, date, recipient, status] {
            let hash = calculate_invoice_hash(&changed);
            assert_ne!(hash, base);
            assert!(!verify_invoice_hash(&changed, &base));
        }
        assert_eq!(
            calculate_invoice_hash(&InvoiceHashData {
                status: "sent".to_string(),
                ..sample()
            }),
            "b332c7306465a88c34b5683b11d3f0e9044dd838b894bd15167c1aff70007282"
        );
    }

    #[test]
    fn test_format_amount() {
        let cases = [
            ("119", "119.00"),
            ("119.5", "119.50"),
            ("0.005", "0.01"),
            ("10.004", "10.00"),
            ("-2.345", "-2.35"),
        ];
        for (input, expected) in cases {
            assert_eq!(format_amount(Decimal::from_str(input).unwrap()), expected);
        }
    }
}
