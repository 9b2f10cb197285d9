//! In-process remote store
//!
//! A complete [`RemoteStore`] over a JSON tree. Listeners receive their
//! current value on attach and again after every write on their branch.
//! Used by the CLI (seeded from an export) and by tests, which can inject
//! write and subscribe failures.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::store::{
    is_server_timestamp, ListenerCallback, ListenerToken, RemoteStore, StoreError, StoreEvent,
    StorePath,
};

struct Listener {
    path: StorePath,
    callback: ListenerCallback,
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    listeners: BTreeMap<u64, Listener>,
}

/// JSON-tree store living in this process
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    next_token: AtomicU64,
    fail_next_write: Mutex<Option<String>>,
    fail_subscriptions: AtomicBool,
}

fn value_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Replace sentinels with `now` and drop null members
fn resolve_value(value: Value, now: i64) -> Value {
    if is_server_timestamp(&value) {
        return Value::from(now);
    }
    match value {
        Value::Object(map) => {
            let resolved: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, resolve_value(v, now)))
                .filter(|(_, v)| !v.is_null() && !is_empty_object(v))
                .collect();
            Value::Object(resolved)
        }
        other => other,
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().map(Map::is_empty).unwrap_or(false)
}

/// Write `value` at `segments` below `node`, pruning emptied parents
fn write_node(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };
    let child = map.entry(head.clone()).or_insert(Value::Null);
    write_node(child, rest, value);
    if child.is_null() || is_empty_object(child) {
        map.remove(head);
    }
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial tree
    pub fn with_data(root: Value) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.write() {
            state.root = resolve_value(root, millbook_utils::now_millis());
        }
        store
    }

    /// Copy of the whole tree
    pub fn dump(&self) -> Value {
        self.state
            .read()
            .map(|s| s.root.clone())
            .unwrap_or(Value::Null)
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.state.read().map(|s| s.listeners.len()).unwrap_or(0)
    }

    /// Number of listeners attached exactly at `path`
    pub fn listener_count_at(&self, path: &StorePath) -> usize {
        self.state
            .read()
            .map(|s| s.listeners.values().filter(|l| &l.path == path).count())
            .unwrap_or(0)
    }

    /// Make the next write fail with `message`
    pub fn fail_next_write(&self, message: &str) {
        if let Ok(mut slot) = self.fail_next_write.lock() {
            *slot = Some(message.to_string());
        }
    }

    /// Make subscribe calls fail until reset
    pub fn set_subscriptions_failing(&self, failing: bool) {
        self.fail_subscriptions.store(failing, Ordering::SeqCst);
    }

    /// Deliver a listener error to every listener on `path`'s branch
    pub fn emit_error(&self, path: &StorePath, message: &str) {
        let callbacks: Vec<ListenerCallback> = match self.state.read() {
            Ok(state) => state
                .listeners
                .values()
                .filter(|l| l.path.overlaps(path))
                .map(|l| l.callback.clone())
                .collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(StoreEvent::Error(message.to_string()));
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable {
            message: "memory store lock poisoned".to_string(),
        }
    }

    fn take_write_failure(&self) -> Option<String> {
        self.fail_next_write.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Apply writes, then notify every listener on an affected branch.
    ///
    /// Callbacks run after the lock is released so they may call back in.
    fn apply(&self, changed: &StorePath, writes: Vec<(StorePath, Value)>) -> Result<(), StoreError> {
        if let Some(message) = self.take_write_failure() {
            return Err(StoreError::WriteRejected { message });
        }
        let now = millbook_utils::now_millis();
        let deliveries: Vec<(ListenerCallback, Value)> = {
            let mut state = self.state.write().map_err(|_| Self::poisoned())?;
            for (path, value) in writes {
                let value = resolve_value(value, now);
                write_node(&mut state.root, path.segments(), value);
            }
            state
                .listeners
                .values()
                .filter(|l| l.path.overlaps(changed))
                .map(|l| {
                    let value = value_at(&state.root, &l.path).cloned().unwrap_or(Value::Null);
                    (l.callback.clone(), value)
                })
                .collect()
        };
        log::debug!(
            target: "millbook::memory",
            "write at {} notifies {} listener(s)",
            changed,
            deliveries.len()
        );
        for (callback, value) in deliveries {
            callback(StoreEvent::Value(value));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Value, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(value_at(&state.root, path).cloned().unwrap_or(Value::Null))
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        callback: ListenerCallback,
    ) -> Result<ListenerToken, StoreError> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: format!("cannot listen at {}", path),
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let initial = {
            let mut state = self.state.write().map_err(|_| Self::poisoned())?;
            state.listeners.insert(
                token,
                Listener {
                    path: path.clone(),
                    callback: callback.clone(),
                },
            );
            value_at(&state.root, path).cloned().unwrap_or(Value::Null)
        };
        callback(StoreEvent::Value(initial));
        Ok(ListenerToken(token))
    }

    async fn unsubscribe(&self, token: ListenerToken) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        state
            .listeners
            .remove(&token.0)
            .map(|_| ())
            .ok_or(StoreError::UnknownListener { token: token.0 })
    }

    async fn push(&self, path: &StorePath) -> Result<String, StoreError> {
        if path.is_root() {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(millbook_utils::generate_push_id(millbook_utils::now_millis()))
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.apply(path, vec![(path.clone(), value)])
    }

    async fn update(&self, path: &StorePath, partial: Map<String, Value>) -> Result<(), StoreError> {
        let writes = partial
            .into_iter()
            .map(|(child, value)| (path.child(&child), value))
            .collect();
        self.apply(path, writes)
    }
}
