//! Core ledger synchronization and reconciliation

pub mod error;
pub mod identity;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod reports;
pub mod selectors;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod time;
pub mod types;
pub mod writer;

use millbook_config::{Config, TimeRange};
use std::sync::Arc;

pub use error::{CoreError, CoreResult, ErrorSeverity};
pub use memory::MemoryStore;
pub use models::{LedgerEntry, Record};
pub use normalize::{normalize, EntityInstance, NormalizedEntityType};
pub use reconcile::{reconcile, reconcile_in_range, Aggregate, EntryBalance, Reconciliation};
pub use reports::{EntitySummary, EntityTypeSummary};
pub use snapshot::{NormalizedSnapshot, OptimisticOverlay, SnapshotStore};
pub use store::{RemoteStore, StoreError, StorePath, StoreRef};
pub use subscription::{SubscriptionManager, SubscriptionState};
pub use time::{Calendar, DateFilter, DateRange};
pub use types::EntityType;
pub use writer::{LedgerDraft, PaymentDraft, WriteCoordinator};

/// One signed-in session bound to a tenant
pub struct Session {
    config: Config,
    tenant: String,
    calendar: Calendar,
    subscriptions: SubscriptionManager,
    writer: WriteCoordinator,
}

impl Session {
    /// Resolve the tenant and prepare the subscription and write paths
    pub async fn open(config: Config, store: StoreRef) -> CoreResult<Self> {
        let tenant = identity::resolve_tenant(&config.tenant)?;
        let calendar = Calendar::from_config(&config.time_range);

        let subscriptions = SubscriptionManager::new(store.clone());
        subscriptions.switch_tenant(&tenant).await?;
        let writer = WriteCoordinator::new(store, subscriptions.snapshot(), subscriptions.overlay());

        log::info!(target: "millbook::session", "Session opened for tenant {}", tenant);
        Ok(Self {
            config,
            tenant,
            calendar,
            subscriptions,
            writer,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn writer(&self) -> &WriteCoordinator {
        &self.writer
    }

    pub fn snapshot(&self) -> Arc<SnapshotStore> {
        self.subscriptions.snapshot()
    }

    /// Take a lease on an entity type's listener
    pub async fn watch(&self, entity_type: EntityType) -> CoreResult<()> {
        self.subscriptions.acquire(&self.tenant, entity_type).await
    }

    /// Return a lease taken with [`Session::watch`]
    pub async fn unwatch(&self, entity_type: EntityType) -> CoreResult<()> {
        self.subscriptions.release(&self.tenant, entity_type).await
    }

    /// Resolve a quick range against the local clock
    pub fn range(&self, range: TimeRange) -> Option<DateRange> {
        time::resolve(range, self.calendar.now())
    }

    /// The configured default range
    pub fn default_range(&self) -> Option<DateRange> {
        self.range(self.config.time_range.default_range)
    }

    /// Years offered for drill-down, current year first
    pub fn recent_years(&self) -> Vec<i32> {
        time::recent_years(self.calendar.now().date(), self.config.time_range.recent_years)
    }

    /// Filter for a range in the mill's local calendar; `None` matches all
    pub fn filter(&self, range: Option<&DateRange>) -> DateFilter {
        self.calendar.filter(range)
    }

    /// Reconciled summary of an entity type from the current snapshot
    pub fn summary(&self, entity_type: EntityType, filter: &DateFilter) -> Option<EntityTypeSummary> {
        self.snapshot().read(|snapshot| {
            let instances = selectors::select_entity_type(snapshot, &self.tenant, entity_type)
                .cloned()
                .unwrap_or_default();
            reports::entity_type_summary(entity_type, &instances, filter)
        })
    }

    /// Detach everything and forget the tenant
    pub async fn close(&self) {
        self.subscriptions.clear().await;
        log::info!(target: "millbook::session", "Session closed for tenant {}", self.tenant);
    }
}
