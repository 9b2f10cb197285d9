//! Ledger reconciliation
//!
//! Pure computation over principals (orders, expenses, income) and payments.
//! Holds no state between calls; re-run it over the current filtered set
//! after every edit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::models::LedgerEntry;
use crate::time::DateFilter;

/// Derived state of one principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBalance {
    pub total: Decimal,
    /// `initialPaid` plus every payment linked to the entry
    pub paid: Decimal,
    /// `total − paid`; negative means the entry is in advance
    pub remaining: Decimal,
}

impl EntryBalance {
    pub fn is_advance(&self) -> bool {
        self.remaining.is_sign_negative() && !self.remaining.is_zero()
    }
}

/// Totals across a set of principals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub total: Decimal,
    pub paid: Decimal,
    /// Sum of per-entry remaining, each clamped at zero
    pub outstanding: Decimal,
    /// `total − paid`, unclamped
    pub net_balance: Decimal,
    /// Payments not linked to any principal in the set
    pub unlinked: Decimal,
}

impl Aggregate {
    /// Element-wise sum, saturating at the decimal bounds
    pub fn merge(&mut self, other: &Aggregate) {
        self.total = self.total.saturating_add(other.total);
        self.paid = self.paid.saturating_add(other.paid);
        self.outstanding = self.outstanding.saturating_add(other.outstanding);
        self.net_balance = self.net_balance.saturating_add(other.net_balance);
        self.unlinked = self.unlinked.saturating_add(other.unlinked);
    }
}

/// Result of reconciling principals against payments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub per_entry: HashMap<String, EntryBalance>,
    pub aggregate: Aggregate,
}

impl Reconciliation {
    pub fn entry(&self, key: &str) -> Option<&EntryBalance> {
        self.per_entry.get(key)
    }
}

/// Saturating sum; remote amounts near the decimal bounds must not panic
fn saturating_sum<I: IntoIterator<Item = Decimal>>(values: I) -> Decimal {
    values
        .into_iter()
        .fold(Decimal::ZERO, |acc, v| acc.saturating_add(v))
}

/// Sum of payment amounts linked to `key`
pub fn linked_paid(key: &str, payments: &[LedgerEntry]) -> Decimal {
    saturating_sum(
        payments
            .iter()
            .filter(|p| p.link_id.as_deref() == Some(key))
            .map(LedgerEntry::amount),
    )
}

/// Reconcile principals against payments
pub fn reconcile(principals: &[LedgerEntry], payments: &[LedgerEntry]) -> Reconciliation {
    let mut by_link: HashMap<&str, Vec<&LedgerEntry>> = HashMap::new();
    for payment in payments {
        if let Some(link) = payment.link_id.as_deref() {
            by_link.entry(link).or_default().push(payment);
        }
    }

    let mut per_entry = HashMap::with_capacity(principals.len());
    let mut aggregate = Aggregate::default();
    let mut principal_keys = HashSet::with_capacity(principals.len());

    for principal in principals {
        principal_keys.insert(principal.key.as_str());
        let linked: Decimal = by_link
            .get(principal.key.as_str())
            .map(|ps| saturating_sum(ps.iter().map(|p| p.amount())))
            .unwrap_or(Decimal::ZERO);
        let paid = principal.initial_paid.saturating_add(linked);
        let balance = EntryBalance {
            total: principal.total,
            paid,
            remaining: principal.total.saturating_sub(paid),
        };

        aggregate.total = aggregate.total.saturating_add(balance.total);
        aggregate.paid = aggregate.paid.saturating_add(balance.paid);
        aggregate.outstanding = aggregate
            .outstanding
            .saturating_add(balance.remaining.max(Decimal::ZERO));
        per_entry.insert(principal.key.clone(), balance);
    }

    aggregate.net_balance = aggregate.total.saturating_sub(aggregate.paid);
    aggregate.unlinked = saturating_sum(
        payments
            .iter()
            .filter(|p| match p.link_id.as_deref() {
                Some(link) => !principal_keys.contains(link),
                None => true,
            })
            .map(LedgerEntry::amount),
    );

    Reconciliation {
        per_entry,
        aggregate,
    }
}

/// Reconcile after filtering principals and payments by their own instants
pub fn reconcile_in_range(
    principals: &[LedgerEntry],
    payments: &[LedgerEntry],
    filter: &DateFilter,
) -> Reconciliation {
    let principals: Vec<LedgerEntry> = principals
        .iter()
        .filter(|e| filter.contains_instant(e.instant.as_ref()))
        .cloned()
        .collect();
    let payments: Vec<LedgerEntry> = payments
        .iter()
        .filter(|e| filter.contains_instant(e.instant.as_ref()))
        .cloned()
        .collect();
    reconcile(&principals, &payments)
}

// ==================== Validation ====================

/// Parse user input as a decimal amount
pub fn parse_amount(field: &str, input: &str) -> CoreResult<Decimal> {
    let trimmed = input.trim().replace(',', "");
    if trimmed.is_empty() {
        return Err(CoreError::validation(field, "is required"));
    }
    Decimal::from_str(&trimmed)
        .map_err(|_| CoreError::validation(field, format!("'{}' is not a number", input.trim())))
}

/// Check a new principal: `0 ≤ initialPaid ≤ total`
pub fn validate_principal(total: Decimal, initial_paid: Decimal) -> CoreResult<()> {
    if initial_paid.is_sign_negative() && !initial_paid.is_zero() {
        return Err(CoreError::validation("initialPaid", "cannot be negative"));
    }
    if initial_paid > total {
        return Err(CoreError::validation(
            "initialPaid",
            format!("{} exceeds total {}", initial_paid, total),
        ));
    }
    Ok(())
}

/// Soft check run before a payment linked to `principal` is written.
///
/// `replacing` names a payment being edited, which is left out of the sum.
/// Returns the projected balance when the payment fits.
pub fn check_payment(
    principal: &LedgerEntry,
    payments: &[LedgerEntry],
    amount: Decimal,
    replacing: Option<&str>,
) -> CoreResult<EntryBalance> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::validation("amount", "must be greater than zero"));
    }
    let others: Vec<LedgerEntry> = payments
        .iter()
        .filter(|p| Some(p.key.as_str()) != replacing)
        .cloned()
        .collect();
    let paid = principal
        .initial_paid
        .saturating_add(linked_paid(&principal.key, &others));
    let remaining = principal.total.saturating_sub(paid);
    if amount > remaining {
        return Err(CoreError::Overpayment {
            key: principal.key.clone(),
            remaining,
            amount,
        });
    }
    Ok(EntryBalance {
        total: principal.total,
        paid: paid.saturating_add(amount),
        remaining: remaining.saturating_sub(amount),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn payment(key: &str, amount: i64, link: Option<&str>) -> LedgerEntry {
        let entry = LedgerEntry::new(key, d(amount));
        match link {
            Some(l) => entry.with_link(l),
            None => entry,
        }
    }

    #[test]
    fn test_partial_payments() {
        let principals = vec![LedgerEntry::new("o1", d(1250))];
        let payments = vec![
            payment("p1", 500, Some("o1")),
            payment("p2", 300, Some("o1")),
        ];
        let result = reconcile(&principals, &payments);
        let o1 = result.entry("o1").unwrap();
        assert_eq!(o1.paid, d(800));
        assert_eq!(o1.remaining, d(450));
        assert_eq!(result.aggregate.outstanding, d(450));
        assert_eq!(result.aggregate.unlinked, Decimal::ZERO);
    }

    #[test]
    fn test_overpaid_entry_is_advance() {
        let principals = vec![LedgerEntry::new("e1", d(1000))];
        let payments = vec![payment("p1", 1200, Some("e1"))];
        let result = reconcile(&principals, &payments);

        let e1 = result.entry("e1").unwrap();
        assert_eq!(e1.remaining, d(-200));
        assert!(e1.is_advance());
        assert_eq!(result.aggregate.outstanding, Decimal::ZERO);
        assert_eq!(result.aggregate.net_balance, d(-200));
    }

    #[test]
    fn test_advance_does_not_cancel_owed() {
        let principals = vec![LedgerEntry::new("a", d(1000)), LedgerEntry::new("b", d(500))];
        let payments = vec![payment("p1", 1200, Some("a"))];
        let agg = reconcile(&principals, &payments).aggregate;
        assert_eq!(agg.outstanding, d(500));
        assert_eq!(agg.net_balance, d(300));
    }

    #[test]
    fn test_paid_additivity() {
        let principals = vec![
            LedgerEntry::new("a", d(100)).with_initial_paid(d(10)),
            LedgerEntry::new("b", d(200)).with_initial_paid(d(20)),
            LedgerEntry::new("c", d(300)),
        ];
        let payments = vec![
            payment("p1", 5, Some("a")),
            payment("p2", 7, Some("b")),
            payment("p3", 11, Some("b")),
            payment("p4", 13, Some("zzz")),
            payment("p5", 17, None),
        ];
        let result = reconcile(&principals, &payments);
        let sum_paid: Decimal = result.per_entry.values().map(|b| b.paid).sum();
        let initial: Decimal = principals.iter().map(|p| p.initial_paid).sum();
        assert_eq!(sum_paid, initial + d(5 + 7 + 11));
        assert_eq!(result.aggregate.paid, sum_paid);
        assert_eq!(result.aggregate.unlinked, d(13 + 17));
    }

    #[test]
    fn test_oversized_totals_saturate() {
        let huge = Decimal::from_scientific("7e28").unwrap();
        let principals = vec![LedgerEntry::new("a", huge), LedgerEntry::new("b", huge)];
        let payments = vec![payment("p1", 1, Some("a"))];
        let result = reconcile(&principals, &payments);
        assert_eq!(result.aggregate.total, Decimal::MAX);
        assert_eq!(result.entry("a").unwrap().paid, d(1));

        let mut merged = result.aggregate;
        merged.merge(&result.aggregate);
        assert_eq!(merged.total, Decimal::MAX);
    }

    #[test]
    fn test_empty_inputs() {
        let result = reconcile(&[], &[]);
        assert!(result.per_entry.is_empty());
        assert_eq!(result.aggregate, Aggregate::default());
    }

    #[test]
    fn test_reconcile_in_range_filters_payments_independently() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 5, 10, 0, 0).unwrap();
        let principals = vec![LedgerEntry::new("o1", d(1000)).at(jan)];
        let payments = vec![
            payment("p1", 400, Some("o1")).at(jan),
            payment("p2", 100, Some("o1")).at(feb),
        ];
        let filter = DateFilter::parse(Some("2024-01-01"), Some("2024-01-31"));
        let result = reconcile_in_range(&principals, &payments, &filter);
        assert_eq!(result.entry("o1").unwrap().paid, d(400));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("amount", " 1,250.50 ").unwrap(), Decimal::from_str("1250.50").unwrap());
        assert!(matches!(
            parse_amount("amount", "12a"),
            Err(CoreError::Validation { .. })
        ));
        assert!(parse_amount("amount", "   ").is_err());
    }

    #[test]
    fn test_validate_principal() {
        assert!(validate_principal(d(100), d(100)).is_ok());
        assert!(validate_principal(d(100), d(101)).is_err());
        assert!(validate_principal(d(100), d(-1)).is_err());
    }

    #[test]
    fn test_check_payment() {
        let principal = LedgerEntry::new("o1", d(1000)).with_initial_paid(d(100));
        let payments = vec![payment("p1", 500, Some("o1"))];

        let projected = check_payment(&principal, &payments, d(400), None).unwrap();
        assert_eq!(projected.remaining, Decimal::ZERO);

        let err = check_payment(&principal, &payments, d(401), None).unwrap_err();
        assert!(matches!(err, CoreError::Overpayment { remaining, .. } if remaining == d(400)));

        // Editing p1 frees its amount
        assert!(check_payment(&principal, &payments, d(900), Some("p1")).is_ok());
        assert!(check_payment(&principal, &payments, Decimal::ZERO, None).is_err());
    }
}
