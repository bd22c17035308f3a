use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use shared::{domain::StorePath, error::StoreError};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::{tree, PushItem, PushStream, RemoteStore};

/// A write accepted by a [`MemoryStore`] from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
    Set { path: StorePath, value: Value },
    Update(BTreeMap<StorePath, Value>),
    Remove { path: StorePath },
}

struct Subscriber {
    path: StorePath,
    tx: mpsc::UnboundedSender<PushItem>,
    last: Option<Value>,
}

struct MemoryState {
    tree: Value,
    online: bool,
    subscribers: Vec<Subscriber>,
    pending_failures: VecDeque<StoreError>,
    denied: Vec<StorePath>,
    write_log: Vec<WriteRecord>,
}

/// In-process realtime tree with push subscriptions.
///
/// Used as an offline backend and as the test double for the synchronizer:
/// device-side changes are simulated with [`MemoryStore::push`], and write
/// failures or permission denials can be injected.
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tree(Value::Object(Map::new()))
    }

    pub fn with_tree(tree: Value) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                tree: tree::normalize(tree).unwrap_or_else(|| Value::Object(Map::new())),
                online: true,
                subscribers: Vec::new(),
                pending_failures: VecDeque::new(),
                denied: Vec::new(),
                write_log: Vec::new(),
            }),
        }
    }

    /// Writes as if a device or another client changed the tree. Not logged
    /// and never subject to injected failures.
    pub async fn push(&self, path: &StorePath, value: Value) {
        let mut guard = self.inner.lock().await;
        let segments: Vec<&str> = path.segments().collect();
        tree::write_at(&mut guard.tree, &segments, value);
        notify(&mut guard);
    }

    pub async fn set_online(&self, online: bool) {
        let mut guard = self.inner.lock().await;
        if guard.online == online {
            return;
        }
        guard.online = online;
        debug!(online, "memory store connectivity changed");
        notify(&mut guard);
    }

    /// The next `count` client writes fail with `error`.
    pub async fn fail_next_writes(&self, count: usize, error: StoreError) {
        let mut guard = self.inner.lock().await;
        for _ in 0..count {
            guard.pending_failures.push_back(error.clone());
        }
    }

    /// Reads, writes and subscriptions at or below `path` are refused.
    pub async fn deny_path(&self, path: StorePath) {
        self.inner.lock().await.denied.push(path);
    }

    pub async fn write_log(&self) -> Vec<WriteRecord> {
        self.inner.lock().await.write_log.clone()
    }

    pub async fn clear_write_log(&self) {
        self.inner.lock().await.write_log.clear();
    }

    pub async fn snapshot(&self) -> Value {
        self.inner.lock().await.tree.clone()
    }

    /// Live subscriptions; streams that were dropped are not counted.
    pub async fn subscriber_count(&self) -> usize {
        let mut guard = self.inner.lock().await;
        guard.subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        guard.subscribers.len()
    }

    fn check_write(state: &mut MemoryState, paths: &[&StorePath]) -> Result<(), StoreError> {
        for path in paths {
            if path.is_reserved() {
                return Err(StoreError::Rejected {
                    path: path.to_string(),
                    reason: "reserved path is read-only".into(),
                });
            }
            ensure_allowed(state, path)?;
        }
        if !state.online {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        if let Some(error) = state.pending_failures.pop_front() {
            warn!(%error, "memory store failing write on request");
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe(&self, path: &StorePath) -> Result<PushStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.lock().await;

        // Denials surface on the stream, the way realtime backends cancel a
        // listener after registration.
        if let Err(error) = ensure_allowed(&guard, path) {
            let _ = tx.send(Err(error));
            return Ok(UnboundedReceiverStream::new(rx).boxed());
        }

        let current = current_value(&guard, path);
        let _ = tx.send(Ok(current.clone()));
        guard.subscribers.push(Subscriber {
            path: path.clone(),
            tx,
            last: current,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let guard = self.inner.lock().await;
        ensure_allowed(&guard, path)?;
        if !guard.online && !path.is_reserved() {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(current_value(&guard, path))
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        Self::check_write(&mut guard, &[path])?;
        let segments: Vec<&str> = path.segments().collect();
        tree::write_at(&mut guard.tree, &segments, value.clone());
        guard.write_log.push(WriteRecord::Set {
            path: path.clone(),
            value,
        });
        notify(&mut guard);
        Ok(())
    }

    async fn update(&self, updates: &BTreeMap<StorePath, Value>) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let paths: Vec<&StorePath> = updates.keys().collect();
        Self::check_write(&mut guard, &paths)?;
        for (path, value) in updates {
            let segments: Vec<&str> = path.segments().collect();
            tree::write_at(&mut guard.tree, &segments, value.clone());
        }
        guard.write_log.push(WriteRecord::Update(updates.clone()));
        notify(&mut guard);
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        Self::check_write(&mut guard, &[path])?;
        let segments: Vec<&str> = path.segments().collect();
        tree::write_at(&mut guard.tree, &segments, Value::Null);
        guard
            .write_log
            .push(WriteRecord::Remove { path: path.clone() });
        notify(&mut guard);
        Ok(())
    }
}

fn ensure_allowed(state: &MemoryState, path: &StorePath) -> Result<(), StoreError> {
    if state.denied.iter().any(|denied| denied.contains(path)) {
        return Err(StoreError::PermissionDenied {
            path: path.to_string(),
        });
    }
    Ok(())
}

fn current_value(state: &MemoryState, path: &StorePath) -> Option<Value> {
    if path.is_reserved() {
        return (path == &StorePath::connectivity()).then_some(Value::Bool(state.online));
    }
    let segments: Vec<&str> = path.segments().collect();
    tree::value_at(&state.tree, &segments).cloned()
}

/// Sends every subscriber whose value changed its new value.
fn notify(state: &mut MemoryState) {
    let mut subscribers = std::mem::take(&mut state.subscribers);
    subscribers.retain_mut(|subscriber| {
        let current = current_value(state, &subscriber.path);
        if current == subscriber.last {
            return !subscriber.tx.is_closed();
        }
        subscriber.last = current.clone();
        subscriber.tx.send(Ok(current)).is_ok()
    });
    state.subscribers = subscribers;
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
