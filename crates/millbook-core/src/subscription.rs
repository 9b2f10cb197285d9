//! Live subscription lifecycle
//!
//! One registration per entity type for the active tenant:
//! `Unsubscribed → Subscribing → Active → Unsubscribed`. Every delivered
//! value is normalized and replaces that entity type's sub-tree in the
//! [`SnapshotStore`]. Callbacks carry the generation they were attached
//! with and are discarded once a newer registration (or none) exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::{CoreError, CoreResult};
use crate::normalize::normalize;
use crate::snapshot::{OptimisticOverlay, SnapshotStore};
use crate::store::{entity_path, ListenerCallback, ListenerToken, StoreEvent, StoreRef};
use crate::types::EntityType;

/// Lifecycle state of one entity type's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Unsubscribed,
    /// Attached (or attaching), no value delivered yet
    Subscribing,
    Active,
}

struct Registration {
    generation: u64,
    token: Option<ListenerToken>,
    state: SubscriptionState,
    leases: usize,
}

#[derive(Default)]
struct Registry {
    tenant: Option<String>,
    next_generation: u64,
    registrations: HashMap<EntityType, Registration>,
    last_errors: HashMap<EntityType, String>,
}

impl Registry {
    fn is_current(&self, entity_type: EntityType, generation: u64) -> bool {
        self.registrations
            .get(&entity_type)
            .map(|r| r.generation == generation)
            .unwrap_or(false)
    }
}

struct Shared {
    registry: Mutex<Registry>,
    snapshot: Arc<SnapshotStore>,
    overlay: Arc<OptimisticOverlay>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns every live listener of one session
pub struct SubscriptionManager {
    store: StoreRef,
    shared: Arc<Shared>,
}

impl SubscriptionManager {
    pub fn new(store: StoreRef) -> Self {
        Self::with_snapshot(
            store,
            Arc::new(SnapshotStore::new()),
            Arc::new(OptimisticOverlay::default()),
        )
    }

    /// Manager publishing into existing snapshot and overlay holders
    pub fn with_snapshot(
        store: StoreRef,
        snapshot: Arc<SnapshotStore>,
        overlay: Arc<OptimisticOverlay>,
    ) -> Self {
        Self {
            store,
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                snapshot,
                overlay,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<SnapshotStore> {
        self.shared.snapshot.clone()
    }

    pub fn overlay(&self) -> Arc<OptimisticOverlay> {
        self.shared.overlay.clone()
    }

    /// Tenant the registrations belong to
    pub fn tenant(&self) -> Option<String> {
        self.shared.lock().tenant.clone()
    }

    pub fn state(&self, entity_type: EntityType) -> SubscriptionState {
        self.shared
            .lock()
            .registrations
            .get(&entity_type)
            .map(|r| r.state)
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    /// Number of registered entity types
    pub fn active_count(&self) -> usize {
        self.shared.lock().registrations.len()
    }

    /// Last listener or subscribe failure for an entity type
    pub fn last_error(&self, entity_type: EntityType) -> Option<String> {
        self.shared.lock().last_errors.get(&entity_type).cloned()
    }

    /// Tear down everything and make `tenant` the active tenant
    pub async fn switch_tenant(&self, tenant: &str) -> CoreResult<()> {
        // Validates the tenant key before anything is torn down
        entity_path(tenant, EntityType::Workers)?;
        self.unsubscribe_all().await;
        self.shared.lock().tenant = Some(tenant.to_string());
        log::info!(target: "millbook::subscription", "Active tenant is now {}", tenant);
        Ok(())
    }

    /// Attach the listener for `entity_type`, replacing any existing one
    pub async fn subscribe(&self, tenant: &str, entity_type: EntityType) -> CoreResult<()> {
        let path = entity_path(tenant, entity_type)?;
        if self.tenant().as_deref() != Some(tenant) {
            self.switch_tenant(tenant).await?;
        }

        let (previous, generation) = {
            let mut registry = self.shared.lock();
            let previous = registry.registrations.remove(&entity_type);
            registry.next_generation += 1;
            let generation = registry.next_generation;
            registry.registrations.insert(
                entity_type,
                Registration {
                    generation,
                    token: None,
                    state: SubscriptionState::Subscribing,
                    leases: previous.as_ref().map(|p| p.leases).unwrap_or(0).max(1),
                },
            );
            (previous, generation)
        };

        if let Some(token) = previous.and_then(|p| p.token) {
            log::debug!(
                target: "millbook::subscription",
                "Detaching previous {} listener before re-subscribing",
                entity_type
            );
            self.detach(token).await;
        }

        let callback = self.callback(tenant, entity_type, generation);
        log::info!(target: "millbook::subscription", "Subscribing to {}", path);

        match self.store.subscribe(&path, callback).await {
            Ok(token) => {
                let superseded = {
                    let mut registry = self.shared.lock();
                    match registry.registrations.get_mut(&entity_type) {
                        Some(reg) if reg.generation == generation => {
                            reg.token = Some(token);
                            false
                        }
                        _ => true,
                    }
                };
                if superseded {
                    log::debug!(
                        target: "millbook::subscription",
                        "{} registration replaced while attaching; detaching orphan",
                        entity_type
                    );
                    self.detach(token).await;
                }
                Ok(())
            }
            Err(err) => {
                {
                    let mut registry = self.shared.lock();
                    if registry.is_current(entity_type, generation) {
                        registry.registrations.remove(&entity_type);
                    }
                    registry.last_errors.insert(entity_type, err.to_string());
                }
                log::error!(
                    target: "millbook::subscription",
                    "Subscribe to {} failed: {}",
                    path,
                    err
                );
                Err(CoreError::from(err))
            }
        }
    }

    /// Detach the listener and drop that entity type's sub-tree.
    ///
    /// No-op when nothing is registered for the pair.
    pub async fn unsubscribe(&self, tenant: &str, entity_type: EntityType) -> CoreResult<()> {
        let removed = {
            let mut registry = self.shared.lock();
            if registry.tenant.as_deref() != Some(tenant) {
                None
            } else {
                registry.registrations.remove(&entity_type)
            }
        };
        let Some(registration) = removed else {
            return Ok(());
        };

        self.shared.snapshot.remove(tenant, entity_type);
        self.shared.overlay.discard_entity_type(entity_type);
        log::info!(target: "millbook::subscription", "Unsubscribed {}/{}", tenant, entity_type);

        match registration.token {
            Some(token) => self.store.unsubscribe(token).await.map_err(CoreError::from),
            None => Ok(()),
        }
    }

    /// Detach every listener and reset the snapshot
    pub async fn unsubscribe_all(&self) {
        let tokens: Vec<ListenerToken> = {
            let mut registry = self.shared.lock();
            registry.last_errors.clear();
            registry
                .registrations
                .drain()
                .filter_map(|(_, r)| r.token)
                .collect()
        };
        self.shared.snapshot.reset();
        self.shared.overlay.clear();
        for token in tokens {
            self.detach(token).await;
        }
    }

    /// Forget the tenant entirely (logout)
    pub async fn clear(&self) {
        self.unsubscribe_all().await;
        self.shared.lock().tenant = None;
    }

    /// Take a lease on the shared listener, attaching it when none exists
    pub async fn acquire(&self, tenant: &str, entity_type: EntityType) -> CoreResult<()> {
        {
            let mut registry = self.shared.lock();
            if registry.tenant.as_deref() == Some(tenant) {
                if let Some(reg) = registry.registrations.get_mut(&entity_type) {
                    reg.leases += 1;
                    return Ok(());
                }
            }
        }
        self.subscribe(tenant, entity_type).await
    }

    /// Return a lease; the last one detaches the listener
    pub async fn release(&self, tenant: &str, entity_type: EntityType) -> CoreResult<()> {
        let last = {
            let mut registry = self.shared.lock();
            if registry.tenant.as_deref() != Some(tenant) {
                return Ok(());
            }
            match registry.registrations.get_mut(&entity_type) {
                Some(reg) => {
                    reg.leases = reg.leases.saturating_sub(1);
                    reg.leases == 0
                }
                None => false,
            }
        };
        if last {
            self.unsubscribe(tenant, entity_type).await
        } else {
            Ok(())
        }
    }

    async fn detach(&self, token: ListenerToken) {
        if let Err(err) = self.store.unsubscribe(token).await {
            log::warn!(
                target: "millbook::subscription",
                "Detaching listener {} failed: {}",
                token.0,
                err
            );
        }
    }

    fn callback(&self, tenant: &str, entity_type: EntityType, generation: u64) -> ListenerCallback {
        let shared = Arc::downgrade(&self.shared);
        let tenant = tenant.to_string();
        Arc::new(move |event: StoreEvent| {
            deliver(&shared, &tenant, entity_type, generation, event);
        })
    }
}

fn deliver(
    shared: &Weak<Shared>,
    tenant: &str,
    entity_type: EntityType,
    generation: u64,
    event: StoreEvent,
) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    match event {
        StoreEvent::Value(raw) => {
            let normalized = normalize(&raw);
            let mut registry = shared.lock();
            if !registry.is_current(entity_type, generation) {
                log::debug!(
                    target: "millbook::subscription",
                    "Discarding stale {} snapshot (generation {})",
                    entity_type,
                    generation
                );
                return;
            }
            if let Some(reg) = registry.registrations.get_mut(&entity_type) {
                reg.state = SubscriptionState::Active;
            }
            registry.last_errors.remove(&entity_type);
            shared.snapshot.replace(tenant, entity_type, normalized);
            shared.overlay.discard_entity_type(entity_type);
            log::debug!(
                target: "millbook::subscription",
                "Published {}/{} snapshot",
                tenant,
                entity_type
            );
        }
        StoreEvent::Error(message) => {
            let mut registry = shared.lock();
            if !registry.is_current(entity_type, generation) {
                log::debug!(
                    target: "millbook::subscription",
                    "Discarding stale {} listener error",
                    entity_type
                );
                return;
            }
            log::warn!(
                target: "millbook::subscription",
                "Listener error on {}/{}: {}",
                tenant,
                entity_type,
                message
            );
            registry.last_errors.insert(entity_type, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RemoteStore, StoreError, StorePath};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    /// Store that hands out tokens but delivers nothing on its own
    #[derive(Default)]
    struct ManualStore {
        listeners: Mutex<Vec<(ListenerToken, StorePath, ListenerCallback)>>,
        detached: Mutex<Vec<ListenerToken>>,
    }

    impl ManualStore {
        fn callback(&self, index: usize) -> ListenerCallback {
            self.listeners.lock().unwrap()[index].2.clone()
        }
    }

    #[async_trait]
    impl RemoteStore for ManualStore {
        async fn get(&self, _path: &StorePath) -> Result<Value, StoreError> {
            Ok(Value::Null)
        }

        async fn subscribe(
            &self,
            path: &StorePath,
            callback: ListenerCallback,
        ) -> Result<ListenerToken, StoreError> {
            let mut listeners = self.listeners.lock().unwrap();
            let token = ListenerToken(listeners.len() as u64 + 1);
            listeners.push((token, path.clone(), callback));
            Ok(token)
        }

        async fn unsubscribe(&self, token: ListenerToken) -> Result<(), StoreError> {
            self.detached.lock().unwrap().push(token);
            Ok(())
        }

        async fn push(&self, _path: &StorePath) -> Result<String, StoreError> {
            Ok("-Nkey".to_string())
        }

        async fn set(&self, _path: &StorePath, _value: Value) -> Result<(), StoreError> {
            Ok(())
        }

        async fn update(&self, _path: &StorePath, _partial: Map<String, Value>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn worker_names(manager: &SubscriptionManager) -> Vec<String> {
        manager.snapshot().read(|s| {
            s.entity_type("mill", EntityType::Workers)
                .map(|t| t.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    #[tokio::test]
    async fn test_state_machine() {
        let store = Arc::new(ManualStore::default());
        let manager = SubscriptionManager::new(store.clone());
        assert_eq!(manager.state(EntityType::Workers), SubscriptionState::Unsubscribed);

        manager.subscribe("mill", EntityType::Workers).await.unwrap();
        assert_eq!(manager.state(EntityType::Workers), SubscriptionState::Subscribing);

        (store.callback(0))(StoreEvent::Value(json!({"w1": {"name": "Ravi"}})));
        assert_eq!(manager.state(EntityType::Workers), SubscriptionState::Active);
        assert_eq!(worker_names(&manager), vec!["w1".to_string()]);

        manager.unsubscribe("mill", EntityType::Workers).await.unwrap();
        assert_eq!(manager.state(EntityType::Workers), SubscriptionState::Unsubscribed);
        assert!(worker_names(&manager).is_empty());
        assert_eq!(store.detached.lock().unwrap().as_slice(), &[ListenerToken(1)]);
    }

    #[tokio::test]
    async fn test_stale_callback_is_discarded() {
        let store = Arc::new(ManualStore::default());
        let manager = SubscriptionManager::new(store.clone());

        manager.subscribe("mill", EntityType::Workers).await.unwrap();
        manager.subscribe("mill", EntityType::Workers).await.unwrap();
        assert_eq!(store.detached.lock().unwrap().as_slice(), &[ListenerToken(1)]);

        let revision = manager.snapshot().revision();
        (store.callback(0))(StoreEvent::Value(json!({"old": {}})));
        assert_eq!(manager.snapshot().revision(), revision);
        assert!(worker_names(&manager).is_empty());

        (store.callback(1))(StoreEvent::Value(json!({"new": {}})));
        assert_eq!(worker_names(&manager), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_callback_after_unsubscribe_is_discarded() {
        let store = Arc::new(ManualStore::default());
        let manager = SubscriptionManager::new(store.clone());
        manager.subscribe("mill", EntityType::Workers).await.unwrap();
        manager.unsubscribe("mill", EntityType::Workers).await.unwrap();

        (store.callback(0))(StoreEvent::Value(json!({"w1": {}})));
        (store.callback(0))(StoreEvent::Error("permission denied".to_string()));
        assert!(worker_names(&manager).is_empty());
        assert!(manager.last_error(EntityType::Workers).is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_without_registration_is_noop() {
        let manager = SubscriptionManager::new(Arc::new(ManualStore::default()));
        assert!(manager.unsubscribe("mill", EntityType::Workers).await.is_ok());
    }

    #[tokio::test]
    async fn test_listener_error_recorded() {
        let store = Arc::new(ManualStore::default());
        let manager = SubscriptionManager::new(store.clone());
        manager.subscribe("mill", EntityType::Workers).await.unwrap();
        (store.callback(0))(StoreEvent::Error("permission denied".to_string()));
        assert_eq!(
            manager.last_error(EntityType::Workers).as_deref(),
            Some("permission denied")
        );
    }

    #[tokio::test]
    async fn test_leases_share_one_listener() {
        let store = Arc::new(ManualStore::default());
        let manager = SubscriptionManager::new(store.clone());

        manager.acquire("mill", EntityType::BoxBuyers).await.unwrap();
        manager.acquire("mill", EntityType::BoxBuyers).await.unwrap();
        assert_eq!(store.listeners.lock().unwrap().len(), 1);

        manager.release("mill", EntityType::BoxBuyers).await.unwrap();
        assert_eq!(manager.state(EntityType::BoxBuyers), SubscriptionState::Subscribing);
        manager.release("mill", EntityType::BoxBuyers).await.unwrap();
        assert_eq!(manager.state(EntityType::BoxBuyers), SubscriptionState::Unsubscribed);
        assert_eq!(store.detached.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tenant_switch_tears_down() {
        let store = Arc::new(ManualStore::default());
        let manager = SubscriptionManager::new(store.clone());
        manager.subscribe("mill", EntityType::Workers).await.unwrap();
        manager.subscribe("mill", EntityType::BoxBuyers).await.unwrap();
        (store.callback(0))(StoreEvent::Value(json!({"w1": {}})));

        manager.subscribe("other", EntityType::Workers).await.unwrap();
        assert_eq!(manager.tenant().as_deref(), Some("other"));
        assert_eq!(manager.active_count(), 1);
        assert_eq!(store.detached.lock().unwrap().len(), 2);
        assert!(manager.snapshot().current().entity_types("mill").is_empty());

        // Old tenant's listener can no longer publish
        (store.callback(0))(StoreEvent::Value(json!({"w2": {}})));
        assert!(manager.snapshot().current().entity_types("mill").is_empty());
    }

    #[tokio::test]
    async fn test_missing_tenant_rejected() {
        let manager = SubscriptionManager::new(Arc::new(ManualStore::default()));
        let err = manager.subscribe("", EntityType::Workers).await.unwrap_err();
        assert!(matches!(err, CoreError::MissingTenant));
        assert_eq!(manager.active_count(), 0);
    }
}
