//! The synchronization engine.
//!
//! [`ItemStore`] owns the cached snapshot and its durable storage. Reads are
//! served from memory; remote data is merged in by [`ItemStore::sync`]; user
//! changes are applied optimistically by [`ItemStore::dispatch`] and confirmed
//! by a background task that commits or rolls back.
//!
//! Lock order: `tasks` → `delivery` → `state`. The state lock is never held
//! across an await point.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::{PocketSyncError, Result};
use crate::config::SyncConfig;
use crate::domain::{Credential, Item, MutationOp, PendingOp, SyncState};
use crate::remote::{ApiError, Cursor, ItemPage, RemoteApi};
use crate::store::observer::{Notice, Observer, SubscriptionId};
use crate::store::snapshot::{Changes, Entry, MergeStats, PendingChange, Snapshot};
use crate::store::SnapshotStore;

/// Automatic retries for a failed mutation before it is rolled back.
pub const MAX_MUTATION_RETRIES: u32 = 1;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub retry_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_pending: usize,
    pub removed: usize,
}

impl SyncReport {
    fn absorb(&mut self, stats: MergeStats) {
        self.added += stats.added;
        self.updated += stats.updated;
        self.unchanged += stats.unchanged;
        self.skipped_pending += stats.skipped_pending;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} updated, {} removed, {} unchanged, {} pending kept ({} pages)",
            self.added,
            self.updated,
            self.removed,
            self.unchanged,
            self.skipped_pending,
            self.pages
        )
    }
}

struct State {
    snapshot: Snapshot,
    /// What `list` hands out; rebuilt on every change.
    view: Arc<[Item]>,
    storage: Option<Box<dyn SnapshotStore>>,
    /// A write-through failed; the next close rewrites everything.
    dirty: bool,
    /// Ids with a confirmation task running.
    in_flight: HashSet<String>,
    notices: Vec<Notice>,
}

struct Inner {
    remote: Arc<dyn RemoteApi>,
    options: StoreOptions,
    state: Mutex<State>,
    delivery: Mutex<()>,
    observers: Mutex<BTreeMap<SubscriptionId, Arc<dyn Observer>>>,
    next_subscription: AtomicU64,
    sync_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct ItemStore {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ItemStore {
    /// Load the persisted snapshot. Reads are served only after this returns.
    pub fn open(
        storage: Box<dyn SnapshotStore>,
        remote: Arc<dyn RemoteApi>,
        options: StoreOptions,
    ) -> Result<Self> {
        let snapshot = Snapshot::from_entries(storage.load_entries()?);
        info!(
            "Opened item store with {} items ({} pending)",
            snapshot.len(),
            snapshot.pending_count()
        );

        let view = snapshot.visible_items().into();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                options,
                state: Mutex::new(State {
                    snapshot,
                    view,
                    storage: Some(storage),
                    dirty: false,
                    in_flight: HashSet::new(),
                    notices: Vec::new(),
                }),
                delivery: Mutex::new(()),
                observers: Mutex::new(BTreeMap::new()),
                next_subscription: AtomicU64::new(1),
                sync_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(JoinSet::new()),
                closed: AtomicBool::new(false),
                shutdown,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PocketSyncError::StoreClosed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Visible items in list order. Valid until the next change notification.
    pub fn list(&self) -> Arc<[Item]> {
        self.state().view.clone()
    }

    /// Any cached item, including ones awaiting deletion.
    pub fn get(&self, id: &str) -> Option<Item> {
        self.state().snapshot.get(id).map(|e| e.item.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.state().snapshot.pending_count()
    }

    /// Drain notices recorded since the last call.
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state().notices)
    }

    /// Flips to `true` when the store starts closing.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Register an observer. It immediately receives the current items.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        let _delivery = lock(&self.inner.delivery);
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.observers).insert(id, observer.clone());
        observer.on_change(self.list());
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.observers).remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }

    /// Apply a change to the snapshot, write it through, and notify observers
    /// before returning.
    fn commit<R>(&self, f: impl FnOnce(&mut State) -> Result<(R, Changes)>) -> Result<R> {
        let _delivery = lock(&self.inner.delivery);
        let (result, items) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let (result, changes) = f(state)?;
            if !changes.is_empty() {
                Self::persist(state, &changes);
                state.view = state.snapshot.visible_items().into();
            }
            (result, state.view.clone())
        };

        let observers: Vec<_> = lock(&self.inner.observers).values().cloned().collect();
        for observer in observers {
            observer.on_change(items.clone());
        }
        Ok(result)
    }

    fn persist(state: &mut State, changes: &Changes) {
        let Some(storage) = state.storage.as_ref() else {
            return;
        };

        let entries: Vec<&Entry> = changes
            .upserted
            .iter()
            .filter_map(|id| state.snapshot.get(id))
            .collect();

        let result = storage.upsert(&entries).and_then(|()| {
            if changes.removed.is_empty() {
                Ok(())
            } else {
                storage.remove(&changes.removed)
            }
        });

        if let Err(e) = result {
            error!("Failed to persist item changes: {}", e);
            state.dirty = true;
        }
    }

    fn record(&self, notice: Notice) {
        let _delivery = lock(&self.inner.delivery);
        self.state().notices.push(notice.clone());
        let observers: Vec<_> = lock(&self.inner.observers).values().cloned().collect();
        for observer in observers {
            observer.on_notice(&notice);
        }
    }

    fn record_sync_failure(&self, e: &ApiError) {
        if *e == ApiError::Unauthorized {
            self.record(Notice::ReauthRequired);
        } else {
            self.record(Notice::SyncFailed {
                reason: e.to_string(),
            });
        }
    }

    /// Page through the remote listing and merge every page.
    ///
    /// A failed page aborts the cycle; pages merged before it are kept and no
    /// tombstoning happens. Concurrent calls run one after another.
    pub async fn sync(&self, credential: &Credential) -> Result<SyncReport> {
        let _running = self.inner.sync_lock.lock().await;

        let mut report = SyncReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<Cursor> = None;

        loop {
            self.ensure_open()?;

            let ItemPage { items, next_cursor } =
                match self.inner.remote.fetch_items(credential, cursor).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Sync aborted after {} pages: {}", report.pages, e);
                        self.record_sync_failure(&e);
                        return Err(e.into());
                    }
                };

            report.pages += 1;
            seen.extend(items.iter().map(|i| i.id.clone()));
            let stats = self.commit(|state| Ok(state.snapshot.merge_page(items)))?;
            debug!("Merged page {}: {:?}", report.pages, stats);
            report.absorb(stats);

            match next_cursor {
                None => break,
                Some(next) if cursor.map_or(true, |current| next > current) => {
                    cursor = Some(next)
                }
                Some(next) => {
                    let e = ApiError::MalformedResponse(format!(
                        "listing cursor did not advance past {}",
                        next
                    ));
                    self.record_sync_failure(&e);
                    return Err(e.into());
                }
            }
        }

        report.removed = self.commit(|state| {
            let changes = state.snapshot.tombstone(&seen);
            Ok((changes.removed.len(), changes))
        })?;

        info!("Sync complete: {}", report.summary());
        Ok(report)
    }

    /// Apply `op` to an item now and confirm it with the remote service in the
    /// background. Fails with `ItemPending` if the item already has a change
    /// in flight.
    pub fn dispatch(&self, credential: &Credential, item_id: &str, op: MutationOp) -> Result<()> {
        let mut tasks = lock(&self.inner.tasks);
        self.ensure_open()?;

        self.commit(|state| {
            let entry = state
                .snapshot
                .get_mut(item_id)
                .ok_or_else(|| PocketSyncError::ItemNotFound(item_id.to_string()))?;
            if entry.is_pending() {
                return Err(PocketSyncError::ItemPending(item_id.to_string()));
            }

            let base = entry.item.clone();
            op.apply(&mut entry.item);
            entry.pending = Some(PendingChange {
                op: PendingOp::Mutate(op),
                base: Some(base),
            });
            state.in_flight.insert(item_id.to_string());
            Ok(((), Changes::upsert(item_id)))
        })?;

        debug!("Queued {} of item {}", op, item_id);
        self.spawn_confirmation(&mut tasks, credential.clone(), item_id.to_string());
        Ok(())
    }

    /// Save a new URL. The item shows up at once under a local id and takes
    /// the remote id once the service confirms.
    pub fn add(&self, credential: &Credential, url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;
        let item = Item::local(parsed.as_str());
        let id = item.id.clone();

        let mut tasks = lock(&self.inner.tasks);
        self.ensure_open()?;

        self.commit(|state| {
            if state.snapshot.get(&id).is_some() {
                return Err(PocketSyncError::ItemPending(id.clone()));
            }
            state.snapshot.push(
                item,
                Some(PendingChange {
                    op: PendingOp::Add,
                    base: None,
                }),
            );
            state.in_flight.insert(id.clone());
            Ok(((), Changes::upsert(id.as_str())))
        })?;

        debug!("Queued add of {}", parsed);
        self.spawn_confirmation(&mut tasks, credential.clone(), id.clone());
        Ok(id)
    }

    /// Re-send operations that were still pending when the store was last
    /// closed. Returns how many were queued.
    pub fn resume_pending(&self, credential: &Credential) -> Result<usize> {
        let mut tasks = lock(&self.inner.tasks);
        self.ensure_open()?;

        let ids: Vec<String> = {
            let mut state = self.state();
            let ids: Vec<String> = state
                .snapshot
                .entries()
                .iter()
                .filter(|e| e.is_pending() && !state.in_flight.contains(&e.item.id))
                .map(|e| e.item.id.clone())
                .collect();
            state.in_flight.extend(ids.iter().cloned());
            ids
        };

        for id in &ids {
            self.spawn_confirmation(&mut tasks, credential.clone(), id.clone());
        }
        if !ids.is_empty() {
            info!("Resumed {} pending changes", ids.len());
        }
        Ok(ids.len())
    }

    fn spawn_confirmation(&self, tasks: &mut JoinSet<()>, credential: Credential, id: String) {
        while tasks.try_join_next().is_some() {}
        let store = self.clone();
        tasks.spawn(async move { store.confirm(credential, id).await });
    }

    async fn confirm(&self, credential: Credential, id: String) {
        let queued = {
            let state = self.state();
            state
                .snapshot
                .get(&id)
                .and_then(|e| e.pending.as_ref().map(|p| (p.op, e.item.url.clone())))
        };
        let Some((op, url)) = queued else {
            self.state().in_flight.remove(&id);
            return;
        };

        let mut retries = 0;
        let outcome = loop {
            let result = match op {
                PendingOp::Add => self.inner.remote.add(&credential, &url).await.map(Some),
                PendingOp::Mutate(m) => self
                    .inner
                    .remote
                    .mutate(&credential, &id, m)
                    .await
                    .map(|()| None),
            };

            match result {
                Err(e) if e.is_transient() && retries < MAX_MUTATION_RETRIES => {
                    retries += 1;
                    warn!(
                        "{} of item {} failed ({}); retrying in {:?}",
                        op, id, e, self.inner.options.retry_delay
                    );
                    tokio::time::sleep(self.inner.options.retry_delay).await;
                }
                other => break other,
            }
        };

        let result = match outcome {
            Ok(created) => self.settle(&id, op, created),
            Err(e) => self.roll_back(&id, op, e),
        };
        if let Err(e) = result {
            error!("Failed to finish {} of item {}: {}", op, id, e);
        }
    }

    fn settle(&self, id: &str, op: PendingOp, created: Option<Item>) -> Result<()> {
        self.commit(|state| {
            state.in_flight.remove(id);
            let changes = match (op, created) {
                (PendingOp::Add, Some(item)) => {
                    let new_id = item.id.clone();
                    state.snapshot.rekey(id, item);
                    Changes {
                        upserted: vec![new_id],
                        removed: vec![id.to_string()],
                    }
                }
                (PendingOp::Mutate(MutationOp::Delete), _) => {
                    state.snapshot.remove(id);
                    Changes::remove(id)
                }
                _ => match state.snapshot.get_mut(id) {
                    Some(entry) => {
                        entry.item.sync_state = SyncState::Synced;
                        entry.pending = None;
                        Changes::upsert(id)
                    }
                    None => Changes::default(),
                },
            };
            Ok(((), changes))
        })?;
        debug!("Confirmed {} of item {}", op, id);
        Ok(())
    }

    fn roll_back(&self, id: &str, op: PendingOp, err: ApiError) -> Result<()> {
        let title = self.commit(|state| {
            state.in_flight.remove(id);
            let Some(entry) = state.snapshot.get_mut(id) else {
                return Ok((None, Changes::default()));
            };
            let title = entry.item.display_title().to_string();

            match entry.pending.take().and_then(|change| change.base) {
                Some(mut base) => {
                    base.sync_state = SyncState::Synced;
                    entry.item = base;
                    Ok((Some(title), Changes::upsert(id)))
                }
                None => {
                    state.snapshot.remove(id);
                    Ok((Some(title), Changes::remove(id)))
                }
            }
        })?;

        warn!("Rolled back {} of item {}: {}", op, id, err);
        if err == ApiError::Unauthorized {
            self.record(Notice::ReauthRequired);
        }
        self.record(Notice::MutationFailed {
            item_id: id.to_string(),
            title: title.unwrap_or_else(|| id.to_string()),
            op,
            reason: err.to_string(),
        });
        Ok(())
    }

    /// Wait for every confirmation task started so far. Must be awaited to
    /// completion; dropping it early aborts the tasks it collected.
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.inner.tasks));
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Confirmation task failed: {}", e);
                }
            }
        }
    }

    /// Drop every cached item, e.g. on logout. Pending changes are waited for
    /// first.
    pub async fn purge(&self) -> Result<()> {
        self.ensure_open()?;
        self.wait_idle().await;
        self.commit(|state| {
            let removed = state.snapshot.clear();
            Ok((
                (),
                Changes {
                    upserted: Vec::new(),
                    removed,
                },
            ))
        })?;
        info!("Purged local item cache");
        Ok(())
    }

    /// Stop scheduled syncs, let in-flight confirmations finish, flush, and
    /// release storage. Idempotent.
    pub async fn close(&self) -> Result<()> {
        {
            let _tasks = lock(&self.inner.tasks);
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }
        self.inner.shutdown.send_replace(true);
        info!("Closing item store");

        self.wait_idle().await;
        let _running = self.inner.sync_lock.lock().await;

        let (storage, dirty, entries) = {
            let mut state = self.state();
            let entries = state.snapshot.entries().to_vec();
            (state.storage.take(), state.dirty, entries)
        };

        if let Some(storage) = storage {
            if dirty {
                storage.replace_all(&entries)?;
            }
        }

        lock(&self.inner.observers).clear();
        info!("Item store closed");
        Ok(())
    }
}
