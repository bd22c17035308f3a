use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
};

use futures::StreamExt;
use remote_store::{PushStream, RemoteStore};
use serde_json::Value;
use shared::{domain::StorePath, protocol::Notice};
use tokio::{
    sync::{broadcast, Mutex},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, error, info, warn};

use crate::{
    codec::{FieldCodec, SyncValue},
    error::SyncError,
};

const NOTICE_CAPACITY: usize = 256;

type ChangeCallback = Arc<dyn Fn(Option<SyncValue>) + Send + Sync>;

/// Identifies one registration made with [`Synchronizer::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    path: StorePath,
}

impl SubscriptionHandle {
    pub fn path(&self) -> &StorePath {
        &self.path
    }
}

/// An optimistic write that has been applied locally but not yet
/// acknowledged by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub path: StorePath,
    /// Last value confirmed by the store before the write; the rollback target.
    pub previous: Option<SyncValue>,
    pub value: SyncValue,
    /// Last value pushed by the store while the write was in flight.
    pub latest_remote: Option<Option<SyncValue>>,
    generation: u64,
}

struct ActiveSubscription {
    id: u64,
    on_change: ChangeCallback,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SyncState {
    mirror: HashMap<StorePath, Option<SyncValue>>,
    subscriptions: HashMap<StorePath, ActiveSubscription>,
    pending: HashMap<StorePath, PendingWrite>,
    next_generation: u64,
}

impl SyncState {
    fn is_current(&self, handle: &SubscriptionHandle) -> bool {
        self.subscriptions
            .get(&handle.path)
            .is_some_and(|active| active.id == handle.id)
    }

    /// Reconciles a pushed value against the mirror and any in-flight write.
    fn reconcile(&mut self, path: &StorePath, value: Option<SyncValue>) {
        if let Some(pending) = self.pending.get_mut(path) {
            debug!(%path, "push during pending write held back");
            pending.latest_remote = Some(value);
            return;
        }
        self.deliver(path, value);
    }

    fn deliver(&mut self, path: &StorePath, value: Option<SyncValue>) {
        if self.mirror.get(path) == Some(&value) {
            debug!(%path, "value unchanged, skipping render");
            return;
        }
        self.mirror.insert(path.clone(), value.clone());
        if let Some(active) = self.subscriptions.get(path) {
            (active.on_change)(value);
        }
    }

    fn begin_write(&mut self, path: &StorePath, value: &SyncValue, generation: u64) {
        let (previous, latest_remote) = match self.pending.remove(path) {
            Some(superseded) => (superseded.previous, superseded.latest_remote),
            None => (self.mirror.get(path).cloned().flatten(), None),
        };
        self.mirror.insert(path.clone(), Some(value.clone()));
        self.pending.insert(
            path.clone(),
            PendingWrite {
                path: path.clone(),
                previous,
                value: value.clone(),
                latest_remote,
                generation,
            },
        );
    }

    fn take_owned(&mut self, path: &StorePath, generation: u64) -> Option<PendingWrite> {
        let owned = self
            .pending
            .get(path)
            .is_some_and(|pending| pending.generation == generation);
        if !owned {
            return None;
        }
        self.pending.remove(path)
    }

    /// Closes the window of a successful write. A value the store pushed
    /// during the window that differs from ours is delivered now.
    fn confirm(&mut self, path: &StorePath, generation: u64) {
        let Some(pending) = self.take_owned(path, generation) else {
            return;
        };
        if let Some(remote) = pending.latest_remote {
            if remote.as_ref() != Some(&pending.value) {
                self.deliver(path, remote);
            }
        }
    }

    /// Closes the window of a failed write and returns the value to revert to,
    /// or `None` when a newer write owns the path.
    fn abandon(&mut self, path: &StorePath, generation: u64) -> Option<Option<SyncValue>> {
        let pending = self.take_owned(path, generation)?;
        let target = pending.latest_remote.unwrap_or(pending.previous);
        self.mirror.insert(path.clone(), target.clone());
        Some(target)
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn detach(&mut self, path: &StorePath) {
        if let Some(active) = self.subscriptions.remove(path) {
            active.task.abort();
        }
        self.mirror.remove(path);
    }
}

/// Keeps a set of subscribed store paths and the UI bound to them consistent.
///
/// One instance belongs to one view. It owns the mirror of last delivered
/// values, at most one subscription per path, and the pending optimistic
/// writes. Every render callback, local apply and rollback runs while the
/// instance's state lock is held, so UI mutations for one view never
/// interleave.
pub struct Synchronizer {
    store: Arc<dyn RemoteStore>,
    inner: Arc<Mutex<SyncState>>,
    /// Listener tasks by subscription id. Kept outside `inner` so dropping the
    /// instance can stop them while a listener holds the state lock.
    listeners: StdMutex<HashMap<u64, AbortHandle>>,
    notices: broadcast::Sender<Notice>,
    next_id: AtomicU64,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            store,
            inner: Arc::new(Mutex::new(SyncState::default())),
            listeners: StdMutex::new(HashMap::new()),
            notices,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Transient notifications for every error caught by this instance.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    pub fn report(&self, err: &SyncError) {
        report(&self.notices, err);
    }

    /// Listens on `path`, replacing any existing registration for the same
    /// path. `on_change` receives each decoded value that differs from the
    /// last one delivered.
    pub async fn subscribe<F>(
        &self,
        path: StorePath,
        codec: FieldCodec,
        on_change: F,
    ) -> Result<SubscriptionHandle, SyncError>
    where
        F: Fn(Option<SyncValue>) + Send + Sync + 'static,
    {
        let stream = match self.store.subscribe(&path).await {
            Ok(stream) => stream,
            Err(source) => {
                let err = SyncError::Subscription { path, source };
                self.report(&err);
                return Err(err);
            }
        };

        let handle = SubscriptionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            path: path.clone(),
        };

        let mut guard = self.inner.lock().await;
        // The task blocks on the lock until the registration below is in place.
        let task = tokio::spawn(run_subscription(
            Arc::clone(&self.inner),
            self.notices.clone(),
            handle.clone(),
            codec,
            stream,
        ));
        {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|_, listener| !listener.is_finished());
            listeners.insert(handle.id, task.abort_handle());
        }
        let replaced = guard.subscriptions.insert(
            path.clone(),
            ActiveSubscription {
                id: handle.id,
                on_change: Arc::new(on_change),
                task,
            },
        );
        if let Some(replaced) = replaced {
            replaced.task.abort();
            debug!(%path, "replaced existing subscription");
        }
        guard.mirror.remove(&path);

        Ok(handle)
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.unsubscribe_all(std::slice::from_ref(handle)).await;
    }

    /// Detaches every handle that is still registered. Handles that were
    /// already detached or replaced are ignored.
    pub async fn unsubscribe_all(&self, handles: &[SubscriptionHandle]) {
        let mut guard = self.inner.lock().await;
        for handle in handles {
            if guard.is_current(handle) {
                guard.detach(&handle.path);
                debug!(path = %handle.path, "unsubscribed");
            }
        }
    }

    /// Detaches every registration this instance holds.
    pub async fn detach_all(&self) {
        let mut guard = self.inner.lock().await;
        let paths: Vec<StorePath> = guard.subscriptions.keys().cloned().collect();
        for path in &paths {
            guard.detach(path);
        }
        if !paths.is_empty() {
            info!(count = paths.len(), "detached all subscriptions");
        }
    }

    pub async fn active_subscriptions(&self) -> usize {
        self.inner.lock().await.subscriptions.len()
    }

    /// Last value delivered for `path`; `None` when nothing was delivered yet.
    pub async fn mirrored(&self, path: &StorePath) -> Option<Option<SyncValue>> {
        self.inner.lock().await.mirror.get(path).cloned()
    }

    pub async fn pending_writes(&self) -> Vec<PendingWrite> {
        self.inner.lock().await.pending.values().cloned().collect()
    }

    /// One-shot read through `codec`.
    pub async fn get(
        &self,
        path: &StorePath,
        codec: FieldCodec,
    ) -> Result<Option<SyncValue>, SyncError> {
        let raw = self
            .store
            .get(path)
            .await
            .map_err(|source| SyncError::Read {
                path: path.clone(),
                source,
            });
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };
        Ok(decode_or_fallback(&self.notices, path, codec, raw.as_ref()))
    }

    /// Applies `value` locally, then writes it. On failure the local state is
    /// reverted with the last value the store confirmed and the error is
    /// returned.
    pub async fn write_optimistic<A, R>(
        &self,
        path: &StorePath,
        value: SyncValue,
        apply_locally: A,
        revert_locally: R,
    ) -> Result<(), SyncError>
    where
        A: FnOnce(&SyncValue) + Send,
        R: FnOnce(Option<SyncValue>) + Send,
    {
        let generation = {
            let mut guard = self.inner.lock().await;
            let generation = guard.next_generation();
            guard.begin_write(path, &value, generation);
            apply_locally(&value);
            generation
        };

        let result = self.store.set(path, value.to_wire()).await;

        let mut guard = self.inner.lock().await;
        match result {
            Ok(()) => {
                guard.confirm(path, generation);
                Ok(())
            }
            Err(source) => {
                match guard.abandon(path, generation) {
                    Some(target) => revert_locally(target),
                    None => debug!(%path, "failed write superseded, not reverting"),
                }
                drop(guard);

                let err = SyncError::Write {
                    path: path.clone(),
                    source,
                };
                warn!(%err, "optimistic write rolled back");
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Applies every value locally, then writes them as one atomic update.
    /// On failure every path still owned by this batch is reverted.
    pub async fn batch_write<A, R>(
        &self,
        writes: BTreeMap<StorePath, SyncValue>,
        apply_locally: A,
        revert_locally: R,
    ) -> Result<(), SyncError>
    where
        A: FnOnce(&BTreeMap<StorePath, SyncValue>) + Send,
        R: FnOnce(Vec<(StorePath, Option<SyncValue>)>) + Send,
    {
        if writes.is_empty() {
            return Ok(());
        }

        let generation = {
            let mut guard = self.inner.lock().await;
            let generation = guard.next_generation();
            for (path, value) in &writes {
                guard.begin_write(path, value, generation);
            }
            apply_locally(&writes);
            generation
        };

        let wire: BTreeMap<StorePath, Value> = writes
            .iter()
            .map(|(path, value)| (path.clone(), value.to_wire()))
            .collect();
        let result = self.store.update(&wire).await;

        let mut guard = self.inner.lock().await;
        match result {
            Ok(()) => {
                for path in writes.keys() {
                    guard.confirm(path, generation);
                }
                Ok(())
            }
            Err(source) => {
                let targets: Vec<(StorePath, Option<SyncValue>)> = writes
                    .keys()
                    .filter_map(|path| {
                        guard
                            .abandon(path, generation)
                            .map(|target| (path.clone(), target))
                    })
                    .collect();
                if !targets.is_empty() {
                    revert_locally(targets);
                }
                drop(guard);

                let err = SyncError::BatchWrite {
                    count: writes.len(),
                    source,
                };
                warn!(%err, "batch write rolled back");
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Plain write with no local state attached.
    pub async fn write(&self, path: &StorePath, value: Value) -> Result<(), SyncError> {
        self.store.set(path, value).await.map_err(|source| {
            let err = SyncError::Write {
                path: path.clone(),
                source,
            };
            self.report(&err);
            err
        })
    }

    pub async fn remove(&self, path: &StorePath) -> Result<(), SyncError> {
        self.store.remove(path).await.map_err(|source| {
            let err = SyncError::Write {
                path: path.clone(),
                source,
            };
            self.report(&err);
            err
        })
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        let listeners = self
            .listeners
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, listener) in listeners.drain() {
            listener.abort();
        }
    }
}

async fn run_subscription(
    inner: Arc<Mutex<SyncState>>,
    notices: broadcast::Sender<Notice>,
    handle: SubscriptionHandle,
    codec: FieldCodec,
    mut stream: PushStream,
) {
    let path = handle.path.clone();
    while let Some(item) = stream.next().await {
        let mut guard = inner.lock().await;
        if !guard.is_current(&handle) {
            return;
        }

        match item {
            Ok(raw) => {
                let value = decode_or_fallback(&notices, &path, codec, raw.as_ref());
                guard.reconcile(&path, value);
            }
            Err(source) => {
                guard.subscriptions.remove(&path);
                guard.mirror.remove(&path);
                drop(guard);
                report(&notices, &SyncError::Subscription { path, source });
                return;
            }
        }
    }

    let mut guard = inner.lock().await;
    if guard.is_current(&handle) {
        guard.subscriptions.remove(&path);
        guard.mirror.remove(&path);
        debug!(%path, "push stream closed");
    }
}

fn decode_or_fallback(
    notices: &broadcast::Sender<Notice>,
    path: &StorePath,
    codec: FieldCodec,
    raw: Option<&Value>,
) -> Option<SyncValue> {
    match codec.decode(raw) {
        Ok(value) => value,
        Err(source) => {
            report(
                notices,
                &SyncError::Decode {
                    path: path.clone(),
                    source,
                },
            );
            codec.fallback()
        }
    }
}

fn report(notices: &broadcast::Sender<Notice>, err: &SyncError) {
    match err {
        SyncError::Subscription { .. } => error!(%err, "subscription failed"),
        SyncError::Decode { .. } => warn!(%err, "treating undecodable value as missing"),
        _ => warn!(%err, "sync error"),
    }
    let _ = notices.send(err.to_notice());
}

#[cfg(test)]
#[path = "tests/synchronizer_tests.rs"]
mod tests;
