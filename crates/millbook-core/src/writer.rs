//! Ledger writes against the remote store
//!
//! Create vs update is decided by the presence of a record key. Creates
//! allocate a key with `push`, stamp `createdDate` locally and `timestamp`
//! with the server sentinel; updates touch only the supplied fields and
//! refresh `timestamp`. Failures are returned, never retried here.

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, DefaultErrorLogger, ErrorContext, ErrorLogger};
use crate::models::{decimal_to_value, value_to_decimal, LedgerEntry, Record};
use crate::reconcile::{check_payment, validate_principal};
use crate::selectors::select_collection_with_overlay;
use crate::snapshot::{OptimisticOverlay, SnapshotStore};
use crate::store::{check_segment, entity_path, StorePath, StoreRef};
use crate::types::{fields, EntityType};

/// New principal entry (order, expense, income, work record)
#[derive(Debug, Clone, Default)]
pub struct LedgerDraft {
    pub total: Decimal,
    pub initial_paid: Decimal,
    pub note: Option<String>,
    /// Extra fields stored as given (quantities, prices, ...)
    pub extra: Map<String, Value>,
}

/// New or edited payment
#[derive(Debug, Clone, Default)]
pub struct PaymentDraft {
    pub amount: Decimal,
    /// Principal the payment settles; `None` records an advance
    pub link_id: Option<String>,
    pub note: Option<String>,
    /// Key of the payment being edited
    pub existing_key: Option<String>,
}

pub struct WriteCoordinator {
    store: StoreRef,
    snapshot: Arc<SnapshotStore>,
    overlay: Arc<OptimisticOverlay>,
    logger: Arc<dyn ErrorLogger>,
}

impl WriteCoordinator {
    pub fn new(store: StoreRef, snapshot: Arc<SnapshotStore>, overlay: Arc<OptimisticOverlay>) -> Self {
        Self {
            store,
            snapshot,
            overlay,
            logger: Arc::new(DefaultErrorLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Create or update one record.
    ///
    /// Returns the written record with its key. The server `timestamp` is
    /// not known yet and is left out of the result. The record is shown
    /// through the overlay from before the write until the next snapshot.
    /// An update touching a principal's `total` or `initialPaid` is checked
    /// against the locally known record first.
    pub async fn write(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        collection: &str,
        mut record: Map<String, Value>,
        existing_key: Option<&str>,
    ) -> CoreResult<Record> {
        let collection_path = collection_path(tenant, entity_type, instance_key, collection)?;
        record.remove(fields::KEY);
        record.remove(fields::TIMESTAMP);

        let (written, result) = match existing_key {
            Some(key) => {
                check_segment("key", key)?;
                self.revalidate_principal(tenant, entity_type, instance_key, collection, key, &record)?;
                let written = Record::new(key, record);
                self.overlay
                    .insert(entity_type, instance_key, collection, written.clone());
                let result = self
                    .store
                    .update(&collection_path.child(key), self.stamped(&written))
                    .await;
                (written, result)
            }
            None => {
                let key = match self.store.push(&collection_path).await {
                    Ok(key) => key,
                    Err(err) => return Err(self.failed(err.into(), "create_record", tenant, &collection_path)),
                };
                record.insert(
                    fields::CREATED_DATE.to_string(),
                    Value::from(millbook_utils::now_millis()),
                );
                let written = Record::new(key, record);
                self.overlay
                    .insert(entity_type, instance_key, collection, written.clone());
                let result = self
                    .store
                    .set(
                        &collection_path.child(&written.key),
                        Value::Object(self.stamped(&written)),
                    )
                    .await;
                (written, result)
            }
        };

        if let Err(err) = result {
            self.overlay
                .remove(entity_type, instance_key, collection, &written.key);
            let operation = if existing_key.is_some() {
                "update_record"
            } else {
                "create_record"
            };
            return Err(self.failed(err.into(), operation, tenant, &collection_path));
        }

        log::debug!(
            target: "millbook::writer",
            "{} {}/{}",
            if existing_key.is_some() { "Updated" } else { "Created" },
            collection_path,
            written.key
        );
        Ok(written)
    }

    /// Re-check `0 ≤ initialPaid ≤ total` for an edit merged over the record
    /// as currently seen through the snapshot and overlay
    fn revalidate_principal(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        collection: &str,
        key: &str,
        edit: &Map<String, Value>,
    ) -> CoreResult<()> {
        let is_principal = entity_type
            .ledger_collections()
            .map(|(principals, _)| principals == collection)
            .unwrap_or(false);
        if !is_principal {
            return Ok(());
        }

        let mut touched = false;
        for field in [fields::TOTAL, fields::INITIAL_PAID] {
            if let Some(value) = edit.get(field) {
                if value_to_decimal(value).is_none() {
                    return Err(CoreError::validation(field, "is not a number"));
                }
                touched = true;
            }
        }
        if !touched {
            return Ok(());
        }

        let stored = self.snapshot.read(|snapshot| {
            select_collection_with_overlay(
                snapshot,
                &self.overlay,
                tenant,
                entity_type,
                instance_key,
                collection,
            )
            .into_iter()
            .find(|r| r.key == key)
        });
        let mut merged = stored.map(|r| r.fields).unwrap_or_default();
        merged.extend(edit.clone());
        let entry = LedgerEntry::from_record(&Record::new(key, merged));
        validate_principal(entry.total, entry.initial_paid)
    }

    /// Fields as sent: the record plus the server timestamp sentinel
    fn stamped(&self, record: &Record) -> Map<String, Value> {
        let mut stored = record.fields.clone();
        stored.insert(fields::TIMESTAMP.to_string(), self.store.server_timestamp());
        stored
    }

    fn failed(&self, err: CoreError, operation: &str, tenant: &str, path: &StorePath) -> CoreError {
        let context = ErrorContext::new(operation)
            .with_tenant(tenant)
            .with_data("path", Value::String(path.to_string()));
        self.logger.log_error(&err, &context);
        err
    }

    /// Delete one record
    pub async fn remove(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        collection: &str,
        key: &str,
    ) -> CoreResult<()> {
        check_segment("key", key)?;
        let path = collection_path(tenant, entity_type, instance_key, collection)?.child(key);
        if let Err(err) = self.store.set(&path, Value::Null).await {
            return Err(self.failed(err.into(), "remove_record", tenant, &path));
        }
        log::debug!(target: "millbook::writer", "Removed {}", path);
        Ok(())
    }

    /// Create a named entity instance and return its key
    pub async fn create_instance(
        &self,
        tenant: &str,
        entity_type: EntityType,
        name: &str,
    ) -> CoreResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::validation(fields::NAME, "is required"));
        }
        let path = entity_path(tenant, entity_type)?;
        let key = self.store.push(&path).await?;

        let mut value = Map::new();
        value.insert(fields::NAME.to_string(), Value::String(name.to_string()));
        value.insert(
            fields::CREATED_DATE.to_string(),
            Value::from(millbook_utils::now_millis()),
        );
        value.insert(fields::TIMESTAMP.to_string(), self.store.server_timestamp());
        self.store.set(&path.child(&key), Value::Object(value)).await?;

        log::info!(target: "millbook::writer", "Created {} instance {} ({})", entity_type, key, name);
        Ok(key)
    }

    /// Validate and create a principal entry
    pub async fn add_entry(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        draft: LedgerDraft,
    ) -> CoreResult<Record> {
        let (principals, _) = ledger_of(entity_type)?;
        validate_principal(draft.total, draft.initial_paid)?;

        let mut record = draft.extra;
        record.insert(fields::TOTAL.to_string(), decimal_to_value(draft.total));
        record.insert(fields::INITIAL_PAID.to_string(), decimal_to_value(draft.initial_paid));
        if let Some(note) = draft.note {
            record.insert(fields::NOTE.to_string(), Value::String(note));
        }
        self.write(tenant, entity_type, instance_key, principals, record, None)
            .await
    }

    /// Validate and apply an edit to an existing principal entry
    pub async fn update_entry(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        key: &str,
        draft: LedgerDraft,
    ) -> CoreResult<Record> {
        let (principals, _) = ledger_of(entity_type)?;
        validate_principal(draft.total, draft.initial_paid)?;

        let mut record = draft.extra;
        record.insert(fields::TOTAL.to_string(), decimal_to_value(draft.total));
        record.insert(fields::INITIAL_PAID.to_string(), decimal_to_value(draft.initial_paid));
        if let Some(note) = draft.note {
            record.insert(fields::NOTE.to_string(), Value::String(note));
        }
        self.write(tenant, entity_type, instance_key, principals, record, Some(key))
            .await
    }

    /// Validate and write a payment.
    ///
    /// A linked payment is checked against the principal's remaining balance
    /// in the current snapshot before anything is sent.
    pub async fn record_payment(
        &self,
        tenant: &str,
        entity_type: EntityType,
        instance_key: &str,
        draft: PaymentDraft,
    ) -> CoreResult<Record> {
        let (principals, payments) = ledger_of(entity_type)?;

        match draft.link_id.as_deref() {
            Some(link) => {
                let (principal, existing) = self.snapshot.read(|snapshot| {
                    let instance = snapshot.instance(tenant, entity_type, instance_key);
                    let principal = instance
                        .and_then(|i| i.collection(principals))
                        .and_then(|c| c.get(link))
                        .map(LedgerEntry::from_record);
                    let existing = instance.map(|i| i.entries(payments)).unwrap_or_default();
                    (principal, existing)
                });
                let principal = principal.ok_or_else(|| CoreError::NotFound {
                    path: format!("{}/{}/{}/{}/{}", tenant, entity_type, instance_key, principals, link),
                })?;
                check_payment(&principal, &existing, draft.amount, draft.existing_key.as_deref())?;
            }
            None => {
                if draft.amount <= Decimal::ZERO {
                    return Err(CoreError::validation(fields::AMOUNT, "must be greater than zero"));
                }
            }
        }

        let mut record = Map::new();
        record.insert(fields::AMOUNT.to_string(), decimal_to_value(draft.amount));
        if let Some(link) = draft.link_id {
            record.insert(fields::LINK_ID.to_string(), Value::String(link));
        }
        if let Some(note) = draft.note {
            record.insert(fields::NOTE.to_string(), Value::String(note));
        }
        self.write(
            tenant,
            entity_type,
            instance_key,
            payments,
            record,
            draft.existing_key.as_deref(),
        )
        .await
    }
}

fn collection_path(
    tenant: &str,
    entity_type: EntityType,
    instance_key: &str,
    collection: &str,
) -> CoreResult<StorePath> {
    check_segment("instance", instance_key)?;
    check_segment("collection", collection)?;
    Ok(entity_path(tenant, entity_type)?
        .child(instance_key)
        .child(collection))
}

fn ledger_of(entity_type: EntityType) -> CoreResult<(&'static str, &'static str)> {
    entity_type.ledger_collections().ok_or_else(|| {
        CoreError::validation(
            "entity_type",
            format!("{} does not keep a ledger", entity_type),
        )
    })
}
