//! Normalized snapshot of remote data
//!
//! `tenant → entity type → instance → sub-collection → record`. Only the
//! subscription manager writes it, always by replacing a whole entity-type
//! sub-tree. Readers take short read locks and never trigger I/O.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::models::Record;
use crate::normalize::{EntityInstance, NormalizedEntityType};
use crate::types::EntityType;

/// In-memory mirror of the subscribed remote data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    tenants: BTreeMap<String, BTreeMap<EntityType, NormalizedEntityType>>,
}

impl NormalizedSnapshot {
    pub fn entity_type(&self, tenant: &str, entity_type: EntityType) -> Option<&NormalizedEntityType> {
        self.tenants.get(tenant)?.get(&entity_type)
    }

    pub fn instance(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
    ) -> Option<&EntityInstance> {
        self.entity_type(tenant, entity_type)?.get(instance_key)
    }

    /// Entity types currently held for a tenant
    pub fn entity_types(&self, tenant: &str) -> Vec<EntityType> {
        self.tenants
            .get(tenant)
            .map(|types| types.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Records held, expired ones not yet evicted included
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    fn replace(&mut self, tenant: &str, entity_type: EntityType, data: NormalizedEntityType) {
        self.tenants
            .entry(tenant.to_string())
            .or_default()
            .insert(entity_type, data);
    }

    fn remove(&mut self, tenant: &str, entity_type: EntityType) {
        if let Some(types) = self.tenants.get_mut(tenant) {
            types.remove(&entity_type);
            if types.is_empty() {
                self.tenants.remove(tenant);
            }
        }
    }
}

/// Shared holder of the snapshot with a revision feed
pub struct SnapshotStore {
    inner: RwLock<NormalizedSnapshot>,
    revision: watch::Sender<u64>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: RwLock::new(NormalizedSnapshot::default()),
            revision,
        }
    }

    /// Run a read-only query against the current snapshot
    pub fn read<R>(&self, query: impl FnOnce(&NormalizedSnapshot) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        query(&guard)
    }

    /// Copy of the current snapshot
    pub fn current(&self) -> NormalizedSnapshot {
        self.read(Clone::clone)
    }

    /// Number of publishes so far
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver notified after every publish or reset
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub(crate) fn replace(&self, tenant: &str, entity_type: EntityType, data: NormalizedEntityType) {
        {
            let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
            guard.replace(tenant, entity_type, data);
        }
        self.bump();
    }

    pub(crate) fn remove(&self, tenant: &str, entity_type: EntityType) {
        {
            let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
            guard.remove(tenant, entity_type);
        }
        self.bump();
    }

    pub(crate) fn reset(&self) {
        {
            let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
            *guard = NormalizedSnapshot::default();
        }
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

// ==================== Optimistic overlay ====================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OverlayKey {
    entity_type: EntityType,
    instance: String,
    collection: String,
}

/// Locally written records shown until the next real snapshot.
///
/// Entries expire after a TTL and are dropped for an entity type whenever a
/// snapshot for that type is published. Never merged into the snapshot.
pub struct OptimisticOverlay {
    entries: RwLock<HashMap<OverlayKey, BTreeMap<String, (Record, Instant)>>>,
    ttl: Duration,
}

impl Default for OptimisticOverlay {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl OptimisticOverlay {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn insert(&self, entity_type: EntityType, instance: &str, collection: &str, record: Record) {
        let key = OverlayKey {
            entity_type,
            instance: instance.to_string(),
            collection: collection.to_string(),
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Evict expired records
        let ttl = self.ttl;
        entries.retain(|_, records| {
            records.retain(|_, (_, written)| written.elapsed() < ttl);
            !records.is_empty()
        });
        // Later edits of the same record extend the earlier local fields
        let records = entries.entry(key).or_default();
        let merged = match records.remove(&record.key) {
            Some((mut earlier, _)) => {
                earlier.fields.extend(record.fields);
                earlier
            }
            None => record,
        };
        records.insert(merged.key.clone(), (merged, Instant::now()));
    }

    /// Withdraw one record, e.g. after its write failed
    pub fn remove(&self, entity_type: EntityType, instance: &str, collection: &str, key: &str) {
        let overlay_key = OverlayKey {
            entity_type,
            instance: instance.to_string(),
            collection: collection.to_string(),
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(records) = entries.get_mut(&overlay_key) {
            records.remove(key);
            if records.is_empty() {
                entries.remove(&overlay_key);
            }
        }
    }

    /// Live overlay records for one sub-collection
    pub fn records(&self, entity_type: EntityType, instance: &str, collection: &str) -> Vec<Record> {
        let key = OverlayKey {
            entity_type,
            instance: instance.to_string(),
            collection: collection.to_string(),
        };
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&key)
            .map(|records| {
                records
                    .values()
                    .filter(|(_, written)| written.elapsed() < self.ttl)
                    .map(|(record, _)| record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop everything for an entity type
    pub fn discard_entity_type(&self, entity_type: EntityType) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|key, _| key.entity_type != entity_type);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Records held, expired ones not yet evicted included
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().all(BTreeMap::is_empty)
    }
}
