//! Entity snapshot normalization
//!
//! Turns the raw remote tree of one entity type
//! (`instance → sub-collection → record`) into typed maps where every leaf
//! record carries its remote key. Malformed branches normalize to empty
//! rather than failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::{LedgerEntry, Record};
use crate::types::fields;

/// Records of one sub-collection keyed by record key
pub type Collection = BTreeMap<String, Record>;

/// Normalized sub-tree of one entity type keyed by instance key
pub type NormalizedEntityType = BTreeMap<String, EntityInstance>;

/// One entity instance (a worker, a buyer, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityInstance {
    pub key: String,
    /// Scalar members such as `name`, passed through unchanged
    pub fields: Map<String, Value>,
    /// Object-shaped members keyed by sub-collection name
    pub collections: BTreeMap<String, Collection>,
}

impl EntityInstance {
    /// Display name
    pub fn name(&self) -> Option<&str> {
        self.fields.get(fields::NAME).and_then(Value::as_str)
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Records of a sub-collection ordered by instant, undated last
    pub fn records(&self, name: &str) -> Vec<&Record> {
        let mut records: Vec<&Record> = self
            .collection(name)
            .map(|c| c.values().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| match (a.instant(), b.instant()) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.key.cmp(&b.key)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.key.cmp(&b.key),
        });
        records
    }

    /// Ledger entries of a sub-collection; empty when it is missing
    pub fn entries(&self, name: &str) -> Vec<LedgerEntry> {
        self.records(name)
            .into_iter()
            .map(LedgerEntry::from_record)
            .collect()
    }
}

/// Normalize one entity instance value
pub fn normalize_instance(key: &str, value: &Value) -> Option<EntityInstance> {
    let members = value.as_object()?;
    let mut instance = EntityInstance {
        key: key.to_string(),
        ..Default::default()
    };

    for (member_key, member) in members {
        match member {
            Value::Object(records) => {
                let collection = records
                    .iter()
                    .map(|(record_key, raw)| (record_key.clone(), Record::from_value(record_key, raw)))
                    .collect();
                instance.collections.insert(member_key.clone(), collection);
            }
            Value::Null => {}
            scalar => {
                instance.fields.insert(member_key.clone(), scalar.clone());
            }
        }
    }

    Some(instance)
}

/// Normalize the whole raw tree of one entity type
pub fn normalize(raw: &Value) -> NormalizedEntityType {
    let Some(instances) = raw.as_object() else {
        if !raw.is_null() {
            log::warn!(
                target: "millbook::normalize",
                "Entity tree is not an object; treating as empty"
            );
        }
        return NormalizedEntityType::new();
    };

    instances
        .iter()
        .filter_map(|(key, value)| {
            let instance = normalize_instance(key, value);
            if instance.is_none() {
                log::warn!(
                    target: "millbook::normalize",
                    "Skipping malformed entity instance {}",
                    key
                );
            }
            instance.map(|i| (key.clone(), i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_tree() -> Value {
        json!({
            "buyer1": {
                "name": "Sharma Traders",
                "phone": 98765,
                "Ordered": {
                    "-Nord1": {"fullQty": 10, "halfQty": 5, "fullBoxPrice": 100, "halfBoxPrice": 50, "createdDate": 1_000}
                },
                "Payments": {
                    "-Npay1": {"amount": 500, "linkId": "-Nord1", "createdDate": 2_000},
                    "-Npay2": {"amount": 300, "linkId": "-Nord1", "createdDate": 3_000}
                }
            },
            "broken": 42
        })
    }

    #[test]
    fn test_keys_attached_to_every_record() {
        let normalized = normalize(&raw_tree());
        let buyer = &normalized["buyer1"];
        for (name, collection) in &buyer.collections {
            for (key, record) in collection {
                assert_eq!(&record.key, key, "collection {}", name);
            }
        }
        assert_eq!(buyer.collection("Payments").unwrap().len(), 2);
    }

    #[test]
    fn test_scalars_pass_through() {
        let normalized = normalize(&raw_tree());
        let buyer = &normalized["buyer1"];
        assert_eq!(buyer.name(), Some("Sharma Traders"));
        assert_eq!(buyer.fields["phone"], json!(98765));
        assert!(!buyer.collections.contains_key("name"));
    }

    #[test]
    fn test_idempotent() {
        let raw = raw_tree();
        assert_eq!(normalize(&raw), normalize(&raw));
    }

    #[test]
    fn test_malformed_inputs_normalize_to_empty() {
        assert!(normalize(&json!(null)).is_empty());
        assert!(normalize(&json!([1, 2, 3])).is_empty());
        let normalized = normalize(&raw_tree());
        assert!(!normalized.contains_key("broken"));
        assert!(normalized["buyer1"].entries("Shipped").is_empty());
    }

    #[test]
    fn test_records_sorted_by_instant() {
        let normalized = normalize(&raw_tree());
        let keys: Vec<&str> = normalized["buyer1"]
            .records("Payments")
            .iter()
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(keys, vec!["-Npay1", "-Npay2"]);
    }

    #[test]
    fn test_deleted_records_disappear() {
        let mut raw = raw_tree();
        let first = normalize(&raw);
        assert!(first["buyer1"].collection("Payments").unwrap().contains_key("-Npay2"));

        raw["buyer1"]["Payments"]
            .as_object_mut()
            .unwrap()
            .remove("-Npay2");
        let second = normalize(&raw);
        assert!(!second["buyer1"].collection("Payments").unwrap().contains_key("-Npay2"));
    }
}
