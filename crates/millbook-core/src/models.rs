//! Core data models for the ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::types::fields;

/// Read a decimal from a JSON number or numeric string
pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Decimal::from_str(trimmed).ok()
            }
        }
        _ => None,
    }
}

/// JSON number for a decimal; whole values are written as integers
pub fn decimal_to_value(amount: Decimal) -> Value {
    let normalized = amount.normalize();
    if normalized.scale() == 0 {
        if let Some(whole) = normalized.to_i64() {
            return Value::from(whole);
        }
    }
    normalized
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(normalized.to_string()))
}

/// Read an instant from epoch milliseconds, an RFC 3339 string or a
/// `YYYY-MM-DD` date (midnight UTC)
pub fn value_to_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(millbook_utils::millis_to_datetime),
        Value::String(s) => {
            if let Ok(millis) = s.trim().parse::<i64>() {
                return millbook_utils::millis_to_datetime(millis);
            }
            DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| {
                    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|naive| naive.and_utc())
                })
        }
        _ => None,
    }
}

/// A leaf record of a sub-collection, addressable by its remote key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Remote record identifier
    pub key: String,
    /// Stored fields, without `key`
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record from its key and fields
    pub fn new(key: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove(fields::KEY);
        Self {
            key: key.into(),
            fields,
        }
    }

    /// Build a record from a raw remote value; scalars land under `value`
    pub fn from_value(key: &str, value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::new(key, map.clone()),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                Self::new(key, map)
            }
        }
    }

    /// Get a raw field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field as decimal
    pub fn decimal(&self, field: &str) -> Option<Decimal> {
        self.get(field).and_then(value_to_decimal)
    }

    /// Get a field as string
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get a field as instant
    pub fn instant_field(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(value_to_instant)
    }

    /// The ordering instant: client creation time, else server write time,
    /// else a plain `date` field
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.instant_field(fields::CREATED_DATE)
            .or_else(|| self.instant_field(fields::TIMESTAMP))
            .or_else(|| self.instant_field(fields::DATE))
    }

    /// JSON object including the `key` field
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(fields::KEY.to_string(), Value::String(self.key.clone()));
        Value::Object(map)
    }
}

/// A ledger entry reduced to the quantities reconciliation needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: String,
    /// Nominal value; the payment amount for payment entries
    pub total: Decimal,
    pub initial_paid: Decimal,
    pub note: Option<String>,
    pub instant: Option<DateTime<Utc>>,
    /// Key of the principal a payment settles
    pub link_id: Option<String>,
}

impl LedgerEntry {
    /// Create an entry with the given key and total
    pub fn new(key: impl Into<String>, total: Decimal) -> Self {
        Self {
            key: key.into(),
            total,
            initial_paid: Decimal::ZERO,
            note: None,
            instant: None,
            link_id: None,
        }
    }

    pub fn with_initial_paid(mut self, initial_paid: Decimal) -> Self {
        self.initial_paid = initial_paid;
        self
    }

    pub fn with_link(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }

    pub fn at(mut self, instant: DateTime<Utc>) -> Self {
        self.instant = Some(instant);
        self
    }

    /// Payment amount (alias of `total` for payment entries)
    pub fn amount(&self) -> Decimal {
        self.total
    }

    /// Derive an entry from a stored record.
    ///
    /// Total precedence: explicit `total`, then the box order formula
    /// `fullQty × fullBoxPrice + halfQty × halfBoxPrice`, then `amount`.
    /// Missing numbers count as zero, and so does a box order total that
    /// overflows.
    pub fn from_record(record: &Record) -> Self {
        let total = record
            .decimal(fields::TOTAL)
            .or_else(|| box_order_total(record))
            .or_else(|| record.decimal(fields::AMOUNT))
            .unwrap_or(Decimal::ZERO);

        let link_id = record
            .str_field(fields::LINK_ID)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            key: record.key.clone(),
            total,
            initial_paid: record.decimal(fields::INITIAL_PAID).unwrap_or(Decimal::ZERO),
            note: record.str_field(fields::NOTE).map(str::to_string),
            instant: record.instant(),
            link_id,
        }
    }
}

fn box_order_total(record: &Record) -> Option<Decimal> {
    let full_qty = record.decimal(fields::FULL_QTY);
    let half_qty = record.decimal(fields::HALF_QTY);
    if full_qty.is_none() && half_qty.is_none() {
        return None;
    }
    let full = full_qty
        .unwrap_or(Decimal::ZERO)
        .checked_mul(record.decimal(fields::FULL_BOX_PRICE).unwrap_or(Decimal::ZERO));
    let half = half_qty
        .unwrap_or(Decimal::ZERO)
        .checked_mul(record.decimal(fields::HALF_BOX_PRICE).unwrap_or(Decimal::ZERO));
    match (full, half) {
        (Some(full), Some(half)) => full.checked_add(half).or_else(|| out_of_range(record)),
        _ => out_of_range(record),
    }
}

fn out_of_range(record: &Record) -> Option<Decimal> {
    log::warn!(
        target: "millbook::models",
        "Box order total of record {} is out of range; counting it as zero",
        record.key
    );
    Some(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_decimal() {
        assert_eq!(value_to_decimal(&json!(12.5)), Some(Decimal::from_str("12.5").unwrap()));
        assert_eq!(value_to_decimal(&json!(" 300 ")), Some(Decimal::from(300)));
        assert_eq!(value_to_decimal(&json!("abc")), None);
        assert_eq!(value_to_decimal(&json!("")), None);
        assert_eq!(value_to_decimal(&json!(null)), None);
    }

    #[test]
    fn test_decimal_to_value() {
        assert_eq!(decimal_to_value(Decimal::from(1250)), json!(1250));
        assert_eq!(decimal_to_value(Decimal::from_str("12.50").unwrap()), json!(12.5));
        assert_eq!(value_to_decimal(&decimal_to_value(Decimal::from_str("0.1").unwrap())), Some(Decimal::from_str("0.1").unwrap()));
    }

    #[test]
    fn test_value_to_instant() {
        let dt = value_to_instant(&json!(1_700_000_000_000_i64)).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_000);
        let dt = value_to_instant(&json!("2024-02-29T10:00:00Z")).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-02-29T10:00:00+00:00");
        assert!(value_to_instant(&json!({".sv": "timestamp"})).is_none());
        let dt = value_to_instant(&json!("2024-03-01")).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_record_key_overrides_stored_key() {
        let record = Record::from_value("-Nreal", &json!({"key": "stale", "amount": 5}));
        assert_eq!(record.key, "-Nreal");
        assert!(record.get("key").is_none());
        assert_eq!(record.to_value()["key"], "-Nreal");
    }

    #[test]
    fn test_scalar_record_value() {
        let record = Record::from_value("2024-01-02", &json!(true));
        assert_eq!(record.get("value"), Some(&json!(true)));
    }

    #[test]
    fn test_box_order_total() {
        let record = Record::from_value(
            "o1",
            &json!({"fullQty": 10, "halfQty": 5, "fullBoxPrice": 100, "halfBoxPrice": 50}),
        );
        let entry = LedgerEntry::from_record(&record);
        assert_eq!(entry.total, Decimal::from(1250));
        assert_eq!(entry.initial_paid, Decimal::ZERO);
    }

    #[test]
    fn test_oversized_box_order_counts_as_zero() {
        let record = Record::from_value("o1", &json!({"fullQty": 1e15, "fullBoxPrice": 1e15}));
        let entry = LedgerEntry::from_record(&record);
        assert_eq!(entry.total, Decimal::ZERO);
    }

    #[test]
    fn test_explicit_total_wins() {
        let record = Record::from_value(
            "o1",
            &json!({"total": "900", "fullQty": 10, "fullBoxPrice": 100, "initialPaid": 100}),
        );
        let entry = LedgerEntry::from_record(&record);
        assert_eq!(entry.total, Decimal::from(900));
        assert_eq!(entry.initial_paid, Decimal::from(100));
    }

    #[test]
    fn test_payment_entry_fields() {
        let record = Record::from_value(
            "p1",
            &json!({"amount": 500, "linkId": "o1", "timestamp": 1_700_000_000_000_i64, "note": "cash"}),
        );
        let entry = LedgerEntry::from_record(&record);
        assert_eq!(entry.amount(), Decimal::from(500));
        assert_eq!(entry.link_id.as_deref(), Some("o1"));
        assert_eq!(entry.note.as_deref(), Some("cash"));
        assert!(entry.instant.is_some());
    }

    #[test]
    fn test_created_date_preferred_over_timestamp() {
        let record = Record::from_value(
            "p1",
            &json!({"amount": 1, "createdDate": 1_000, "timestamp": 2_000}),
        );
        assert_eq!(record.instant().unwrap().timestamp_millis(), 1_000);
    }

    #[test]
    fn test_blank_link_id_is_unlinked() {
        let record = Record::from_value("p1", &json!({"amount": 1, "linkId": "  "}));
        assert!(LedgerEntry::from_record(&record).link_id.is_none());
    }
}
