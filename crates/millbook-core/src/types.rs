//! Basic types for the ledger snapshot

use serde::{Deserialize, Serialize};

/// Sub-collection names used under entity instances
pub mod collections {
    pub const DATA: &str = "Data";
    pub const PAYMENTS: &str = "Payments";
    pub const EXPENSE: &str = "Expense";
    pub const INCOME: &str = "Income";
    pub const SHIPPED: &str = "Shipped";
    pub const ORDERED: &str = "Ordered";
    pub const ATTENDANCE: &str = "attendance";
}

/// Record field names as stored remotely
pub mod fields {
    pub const KEY: &str = "key";
    pub const NAME: &str = "name";
    pub const TOTAL: &str = "total";
    pub const AMOUNT: &str = "amount";
    pub const INITIAL_PAID: &str = "initialPaid";
    pub const LINK_ID: &str = "linkId";
    pub const NOTE: &str = "note";
    pub const TIMESTAMP: &str = "timestamp";
    pub const CREATED_DATE: &str = "createdDate";
    pub const DATE: &str = "date";
    pub const FULL_QTY: &str = "fullQty";
    pub const HALF_QTY: &str = "halfQty";
    pub const FULL_BOX_PRICE: &str = "fullBoxPrice";
    pub const HALF_BOX_PRICE: &str = "halfBoxPrice";
}

/// Category of tracked business object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Workers,
    BoxMakers,
    BoxBuyers,
    Transporters,
    WoodCutter,
    OtherExpenses,
    OtherIncome,
    LogCalculations,
    FlatLogCalculations,
}

impl EntityType {
    /// Every entity type, in display order
    pub const ALL: [EntityType; 9] = [
        EntityType::Workers,
        EntityType::BoxMakers,
        EntityType::BoxBuyers,
        EntityType::Transporters,
        EntityType::WoodCutter,
        EntityType::OtherExpenses,
        EntityType::OtherIncome,
        EntityType::LogCalculations,
        EntityType::FlatLogCalculations,
    ];

    /// Remote path segment for this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Workers => "Workers",
            EntityType::BoxMakers => "BoxMakers",
            EntityType::BoxBuyers => "BoxBuyers",
            EntityType::Transporters => "Transporters",
            EntityType::WoodCutter => "WoodCutter",
            EntityType::OtherExpenses => "OtherExpenses",
            EntityType::OtherIncome => "OtherIncome",
            EntityType::LogCalculations => "LogCalculations",
            EntityType::FlatLogCalculations => "FlatLogCalculations",
        }
    }

    /// Principal and payment sub-collections reconciled for this type.
    ///
    /// Log calculators keep measurements only and have no ledger.
    pub fn ledger_collections(&self) -> Option<(&'static str, &'static str)> {
        use collections::*;
        match self {
            EntityType::Workers
            | EntityType::BoxMakers
            | EntityType::Transporters
            | EntityType::WoodCutter => Some((DATA, PAYMENTS)),
            EntityType::BoxBuyers => Some((ORDERED, PAYMENTS)),
            EntityType::OtherExpenses => Some((EXPENSE, PAYMENTS)),
            EntityType::OtherIncome => Some((INCOME, PAYMENTS)),
            EntityType::LogCalculations | EntityType::FlatLogCalculations => None,
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Invalid entity type: {}", s))
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_from_str() {
        assert_eq!("BoxBuyers".parse::<EntityType>().unwrap(), EntityType::BoxBuyers);
        assert_eq!("workers".parse::<EntityType>().unwrap(), EntityType::Workers);
        assert!("Sawyers".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_display_matches_path_segment() {
        for t in EntityType::ALL {
            assert_eq!(t.to_string(), t.as_str());
            assert_eq!(t.to_string().parse::<EntityType>().unwrap(), t);
        }
    }

    #[test]
    fn test_ledger_collections() {
        assert_eq!(
            EntityType::BoxBuyers.ledger_collections(),
            Some(("Ordered", "Payments"))
        );
        assert!(EntityType::LogCalculations.ledger_collections().is_none());
    }
}
