//! Per-instance and per-entity-type ledger summaries

use millbook_config::{CurrencyConfig, SymbolPosition};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::normalize::{EntityInstance, NormalizedEntityType};
use crate::reconcile::{reconcile_in_range, Aggregate};
use crate::time::DateFilter;
use crate::types::EntityType;

/// Reconciled totals of one entity instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub key: String,
    pub name: String,
    pub principal_count: usize,
    pub payment_count: usize,
    /// Principals paid beyond their total
    pub advance_count: usize,
    pub totals: Aggregate,
}

/// Summaries of every instance of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeSummary {
    pub entity_type: EntityType,
    pub instances: Vec<EntitySummary>,
    pub totals: Aggregate,
}

/// Summarize one instance within a date filter
pub fn entity_summary(
    instance: &EntityInstance,
    principal_collection: &str,
    payment_collection: &str,
    filter: &DateFilter,
) -> EntitySummary {
    let principals = instance.entries(principal_collection);
    let payments = instance.entries(payment_collection);
    let reconciliation = reconcile_in_range(&principals, &payments, filter);

    let payment_count = payments
        .iter()
        .filter(|p| filter.contains_instant(p.instant.as_ref()))
        .count();

    EntitySummary {
        key: instance.key.clone(),
        name: instance.name().unwrap_or(&instance.key).to_string(),
        principal_count: reconciliation.per_entry.len(),
        payment_count,
        advance_count: reconciliation
            .per_entry
            .values()
            .filter(|b| b.is_advance())
            .count(),
        totals: reconciliation.aggregate,
    }
}

/// Summarize every instance of an entity type, sorted by name.
///
/// `None` for entity types without a ledger.
pub fn entity_type_summary(
    entity_type: EntityType,
    instances: &NormalizedEntityType,
    filter: &DateFilter,
) -> Option<EntityTypeSummary> {
    let (principal_collection, payment_collection) = entity_type.ledger_collections()?;

    let mut summaries: Vec<EntitySummary> = instances
        .values()
        .map(|i| entity_summary(i, principal_collection, payment_collection, filter))
        .collect();
    summaries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    let mut totals = Aggregate::default();
    for summary in &summaries {
        totals.merge(&summary.totals);
    }

    Some(EntityTypeSummary {
        entity_type,
        instances: summaries,
        totals,
    })
}

/// Render an amount with the configured currency settings
pub fn format_amount(amount: Decimal, currency: &CurrencyConfig) -> String {
    let formatted = millbook_utils::format_decimal(
        amount.abs(),
        currency.decimal_places,
        &currency.thousands_separator,
    );
    let sign = if amount.is_sign_negative() && !amount.round_dp(currency.decimal_places).is_zero() {
        "-"
    } else {
        ""
    };
    match currency.symbol_position {
        SymbolPosition::Before => format!("{}{}{}", sign, currency.symbol, formatted),
        SymbolPosition::After => format!("{}{} {}", sign, formatted, currency.symbol),
    }
}
