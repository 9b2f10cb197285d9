//! Read-only queries over the normalized snapshot
//!
//! Pure and synchronous; nothing here touches the remote store.

use std::collections::BTreeMap;

use crate::models::{LedgerEntry, Record};
use crate::normalize::{EntityInstance, NormalizedEntityType};
use crate::snapshot::{NormalizedSnapshot, OptimisticOverlay, SnapshotStore};
use crate::types::EntityType;

/// All instances of an entity type (empty when not subscribed)
pub fn select_entity_type<'a>(
    snapshot: &'a NormalizedSnapshot,
    tenant: &str,
    entity_type: EntityType,
) -> Option<&'a NormalizedEntityType> {
    snapshot.entity_type(tenant, entity_type)
}

pub fn select_entity_instance<'a>(
    snapshot: &'a NormalizedSnapshot,
    tenant: &str,
    entity_type: EntityType,
    instance_key: &str,
) -> Option<&'a EntityInstance> {
    snapshot.instance(tenant, entity_type, instance_key)
}

/// Records of one sub-collection, ordered by instant
pub fn select_collection(
    snapshot: &NormalizedSnapshot,
    tenant: &str,
    entity_type: EntityType,
    instance_key: &str,
    collection: &str,
) -> Vec<Record> {
    snapshot
        .instance(tenant, entity_type, instance_key)
        .map(|i| i.records(collection).into_iter().cloned().collect())
        .unwrap_or_default()
}

/// Ledger entries of one sub-collection
pub fn select_entries(
    snapshot: &NormalizedSnapshot,
    tenant: &str,
    entity_type: EntityType,
    instance_key: &str,
    collection: &str,
) -> Vec<LedgerEntry> {
    snapshot
        .instance(tenant, entity_type, instance_key)
        .map(|i| i.entries(collection))
        .unwrap_or_default()
}

/// Instance keys with display names, sorted by name
pub fn select_instance_names(
    snapshot: &NormalizedSnapshot,
    tenant: &str,
    entity_type: EntityType,
) -> Vec<(String, String)> {
    let mut names: Vec<(String, String)> = snapshot
        .entity_type(tenant, entity_type)
        .map(|instances| {
            instances
                .values()
                .map(|i| (i.key.clone(), i.name().unwrap_or(&i.key).to_string()))
                .collect()
        })
        .unwrap_or_default();
    names.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
    names
}

/// Snapshot records with live overlay records laid on top.
///
/// Overlay fields replace snapshot fields of the same record; overlay-only
/// records are appended.
pub fn select_collection_with_overlay(
    snapshot: &NormalizedSnapshot,
    overlay: &OptimisticOverlay,
    tenant: &str,
    entity_type: EntityType,
    instance_key: &str,
    collection: &str,
) -> Vec<Record> {
    let mut records = select_collection(snapshot, tenant, entity_type, instance_key, collection);
    let mut pending: BTreeMap<String, Record> = overlay
        .records(entity_type, instance_key, collection)
        .into_iter()
        .map(|r| (r.key.clone(), r))
        .collect();

    for record in records.iter_mut() {
        if let Some(local) = pending.remove(&record.key) {
            record.fields.extend(local.fields);
        }
    }
    records.extend(pending.into_values());
    records
}

impl SnapshotStore {
    /// Owned copy of one entity type
    pub fn select_entity_type(&self, tenant: &str, entity_type: EntityType) -> NormalizedEntityType {
        self.read(|s| select_entity_type(s, tenant, entity_type).cloned().unwrap_or_default())
    }

    /// Owned copy of one instance
    pub fn select_entity_instance(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
    ) -> Option<EntityInstance> {
        self.read(|s| select_entity_instance(s, tenant, entity_type, instance_key).cloned())
    }

    pub fn select_entries(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        collection: &str,
    ) -> Vec<LedgerEntry> {
        self.read(|s| select_entries(s, tenant, entity_type, instance_key, collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;
    use std::time::Duration;

    fn snapshot() -> NormalizedSnapshot {
        let store = SnapshotStore::new();
        store.replace(
            "mill",
            EntityType::Workers,
            normalize(&json!({
                "w2": {"name": "anil", "Data": {"d1": {"total": 10, "createdDate": 2}, "d0": {"total": 5, "createdDate": 1}}},
                "w1": {"name": "Bala"}
            })),
        );
        store.current()
    }

    #[test]
    fn test_select_entity_type_and_instance() {
        let snapshot = snapshot();
        assert_eq!(select_entity_type(&snapshot, "mill", EntityType::Workers).unwrap().len(), 2);
        assert!(select_entity_type(&snapshot, "mill", EntityType::BoxBuyers).is_none());
        assert!(select_entity_type(&snapshot, "other", EntityType::Workers).is_none());
        assert_eq!(
            select_entity_instance(&snapshot, "mill", EntityType::Workers, "w1")
                .and_then(EntityInstance::name),
            Some("Bala")
        );
        assert!(select_entity_instance(&snapshot, "mill", EntityType::Workers, "nope").is_none());
    }

    #[test]
    fn test_select_collection_ordering() {
        let snapshot = snapshot();
        let keys: Vec<String> = select_collection(&snapshot, "mill", EntityType::Workers, "w2", "Data")
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["d0".to_string(), "d1".to_string()]);
        assert!(select_entries(&snapshot, "mill", EntityType::Workers, "w1", "Data").is_empty());
    }

    #[test]
    fn test_oversized_order_reads_as_zero() {
        let store = SnapshotStore::new();
        store.replace(
            "mill",
            EntityType::BoxBuyers,
            normalize(&json!({
                "b1": {"name": "Arun", "Ordered": {"o1": {"fullQty": 1e15, "fullBoxPrice": 1e15}}}
            })),
        );
        let entries = store.select_entries("mill", EntityType::BoxBuyers, "b1", "Ordered");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].total.is_zero());
    }

    #[test]
    fn test_instance_names_sorted_case_insensitively() {
        let names = select_instance_names(&snapshot(), "mill", EntityType::Workers);
        assert_eq!(names[0].1, "anil");
        assert_eq!(names[1].1, "Bala");
    }

    #[test]
    fn test_overlay_merge() {
        let snapshot = snapshot();
        let overlay = OptimisticOverlay::new(Duration::from_secs(60));
        overlay.insert(
            EntityType::Workers,
            "w2",
            "Data",
            Record::from_value("d1", &json!({"total": 12})),
        );
        overlay.insert(
            EntityType::Workers,
            "w2",
            "Data",
            Record::from_value("-Nlocal", &json!({"total": 3})),
        );

        let records = select_collection_with_overlay(
            &snapshot,
            &overlay,
            "mill",
            EntityType::Workers,
            "w2",
            "Data",
        );
        assert_eq!(records.len(), 3);
        let d1 = records.iter().find(|r| r.key == "d1").unwrap();
        assert_eq!(d1.get("total"), Some(&json!(12)));
        assert_eq!(d1.get("createdDate"), Some(&json!(2)));

        // Authoritative snapshot is untouched
        assert_eq!(
            select_collection(&snapshot, "mill", EntityType::Workers, "w2", "Data").len(),
            2
        );
    }
}
