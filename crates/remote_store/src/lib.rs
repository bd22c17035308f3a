use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use shared::{domain::StorePath, error::StoreError};

mod memory;
pub mod tree;

pub use memory::{MemoryStore, WriteRecord};

/// One delivery on a subscribed path: the whole current value, `None` when the
/// path holds nothing.
pub type PushItem = Result<Option<Value>, StoreError>;

/// Push stream for one subscription. The first item is the value at subscribe
/// time; each later item is a change. Dropping the stream detaches it.
pub type PushStream = BoxStream<'static, PushItem>;

/// Path-addressed realtime key-value store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn subscribe(&self, path: &StorePath) -> Result<PushStream, StoreError>;
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;
    /// Applies every entry or none of them.
    async fn update(&self, updates: &BTreeMap<StorePath, Value>) -> Result<(), StoreError>;
    async fn remove(&self, path: &StorePath) -> Result<(), StoreError>;
}
