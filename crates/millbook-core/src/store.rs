//! Remote hierarchical store capability
//!
//! The core only talks to the backend through [`RemoteStore`]: key-path
//! reads, value listeners, child-key allocation and writes. Listener
//! callbacks may fire at any time, including before `subscribe` returns.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::error::{CoreError, CoreResult};
use crate::types::EntityType;

/// Characters the backend refuses inside a key
const RESERVED: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Store failures, surfaced verbatim to callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Permission denied at {path}")]
    PermissionDenied { path: String },

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Write rejected: {message}")]
    WriteRejected { message: String },

    #[error("Unknown listener token {token}")]
    UnknownListener { token: u64 },
}

/// A `/`-separated key path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path, ignoring empty segments
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Append a child segment (which may itself contain `/`)
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            segment
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether `self` equals `other` or lies above it
    pub fn is_ancestor_or_self(&self, other: &StorePath) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Whether two paths lie on one branch (either contains the other)
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_ancestor_or_self(other) || other.is_ancestor_or_self(self)
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Check one user-supplied path segment
pub fn check_segment(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, "is required"));
    }
    if value.contains(RESERVED) {
        return Err(CoreError::validation(
            field,
            format!("'{}' contains a reserved character", value),
        ));
    }
    Ok(())
}

/// Path of one entity type under a tenant
pub fn entity_path(tenant: &str, entity_type: EntityType) -> CoreResult<StorePath> {
    if tenant.trim().is_empty() {
        return Err(CoreError::MissingTenant);
    }
    check_segment("tenant", tenant)?;
    Ok(StorePath::root().child(tenant).child(entity_type.as_str()))
}

/// Delivery to a value listener
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Full current value at the listened path (`Null` when absent)
    Value(Value),
    /// Listener failure reported by the backend
    Error(String),
}

/// Value listener callback
pub type ListenerCallback = Arc<dyn Fn(StoreEvent) + Send + Sync>;

/// Handle used to detach a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// Sentinel the backend replaces with its own clock at write time
pub fn server_timestamp_sentinel() -> Value {
    serde_json::json!({ ".sv": "timestamp" })
}

/// Whether a value is the server timestamp sentinel
pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .map(|m| m.len() == 1 && m.get(".sv").and_then(Value::as_str) == Some("timestamp"))
        .unwrap_or(false)
}

/// Capability consumed from the hierarchical backend
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One-shot read
    async fn get(&self, path: &StorePath) -> Result<Value, StoreError>;

    /// Attach a value listener
    async fn subscribe(
        &self,
        path: &StorePath,
        callback: ListenerCallback,
    ) -> Result<ListenerToken, StoreError>;

    /// Detach a listener
    async fn unsubscribe(&self, token: ListenerToken) -> Result<(), StoreError>;

    /// Allocate a child key without writing
    async fn push(&self, path: &StorePath) -> Result<String, StoreError>;

    /// Replace the value at a path; `Null` removes it
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Overwrite only the given children of a path
    async fn update(&self, path: &StorePath, partial: Map<String, Value>) -> Result<(), StoreError>;

    /// Server-side timestamp placeholder for writes
    fn server_timestamp(&self) -> Value {
        server_timestamp_sentinel()
    }
}

/// Shared store reference
pub type StoreRef = Arc<dyn RemoteStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parse_and_display() {
        let path = StorePath::parse("/mill1//Workers/w1/");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "/mill1/Workers/w1");
        assert_eq!(StorePath::root().to_string(), "/");
    }

    #[test]
    fn test_path_relations() {
        let tenant = StorePath::parse("mill1");
        let workers = tenant.child("Workers");
        let record = workers.child("w1/Payments/p1");
        assert!(tenant.is_ancestor_or_self(&record));
        assert!(workers.overlaps(&record));
        assert!(record.overlaps(&workers));
        assert!(!workers.overlaps(&tenant.child("BoxBuyers")));
        assert_eq!(record.key(), Some("p1"));
    }

    #[test]
    fn test_entity_path() {
        let path = entity_path("mill1", EntityType::BoxBuyers).unwrap();
        assert_eq!(path.to_string(), "/mill1/BoxBuyers");
        assert!(matches!(entity_path(" ", EntityType::Workers), Err(CoreError::MissingTenant)));
        assert!(entity_path("a/b", EntityType::Workers).is_err());
        assert!(check_segment("instance", "-Nabc_1").is_ok());
        assert!(check_segment("instance", "x.y").is_err());
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_server_timestamp(&server_timestamp_sentinel()));
        assert!(!is_server_timestamp(&serde_json::json!(1_000)));
    }
}
