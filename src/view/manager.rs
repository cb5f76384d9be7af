use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::app::{PocketSyncError, Result};
use crate::store::{ItemStore, Observer, SubscriptionId};
use crate::view::View;

/// Proof of registration; pass it back to [`ViewManager::unregister_view`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    slot: String,
}

impl SubscriptionHandle {
    pub fn slot(&self) -> &str {
        &self.slot
    }
}

/// Keeps the set of live views and their store subscriptions in step.
pub struct ViewManager {
    store: ItemStore,
    views: Mutex<BTreeMap<SubscriptionId, Arc<dyn View>>>,
}

impl ViewManager {
    pub fn new(store: ItemStore) -> Self {
        Self {
            store,
            views: Mutex::new(BTreeMap::new()),
        }
    }

    fn views_lock(&self) -> MutexGuard<'_, BTreeMap<SubscriptionId, Arc<dyn View>>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `view` to the store. It renders the current items right away.
    pub fn register_view<V: View + 'static>(&self, view: Arc<V>) -> Result<SubscriptionHandle> {
        let mut views = self.views_lock();
        let slot = view.slot().to_string();
        if views.values().any(|v| v.slot() == slot) {
            return Err(PocketSyncError::ViewAlreadyRegistered(slot));
        }

        let observer: Arc<dyn Observer> = view.clone();
        let id = self.store.subscribe(observer);
        views.insert(id, view);

        info!("Registered view in slot {}", slot);
        Ok(SubscriptionHandle { id, slot })
    }

    /// Unsubscribe and unload one view. Returns false if it was already gone.
    pub fn unregister_view(&self, handle: &SubscriptionHandle) -> bool {
        let Some(view) = self.views_lock().remove(&handle.id) else {
            return false;
        };
        self.store.unsubscribe(handle.id);
        view.unload();
        debug!("Unloaded view in slot {}", handle.slot);
        true
    }

    /// Tear down every registered view. Returns how many were unloaded.
    pub fn clear_views(&self) -> usize {
        let views = std::mem::take(&mut *self.views_lock());
        for (id, view) in &views {
            self.store.unsubscribe(*id);
            view.unload();
        }
        if !views.is_empty() {
            info!("Unloaded {} views", views.len());
        }
        views.len()
    }

    pub fn views(&self) -> Vec<Arc<dyn View>> {
        self.views_lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views_lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credential, Item, MutationOp};
    use crate::store::{SqliteStore, StoreOptions};
    use crate::testing::FakeRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingView {
        slot: String,
        renders: AtomicUsize,
        unloads: AtomicUsize,
        last_len: AtomicUsize,
    }

    impl CountingView {
        fn in_slot(slot: &str) -> Arc<Self> {
            Arc::new(Self {
                slot: slot.into(),
                ..Default::default()
            })
        }
    }

    impl Observer for CountingView {
        fn on_change(&self, items: Arc<[Item]>) {
            self.renders.fetch_add(1, Ordering::SeqCst);
            self.last_len.store(items.len(), Ordering::SeqCst);
        }
    }

    impl View for CountingView {
        fn slot(&self) -> &str {
            &self.slot
        }

        fn unload(&self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store(ids: &[&str]) -> (ItemStore, Arc<FakeRemote>) {
        let remote = FakeRemote::with_items(ids);
        let store = ItemStore::open(
            Box::new(SqliteStore::in_memory().unwrap()),
            remote.clone(),
            StoreOptions::default(),
        )
        .unwrap();
        (store, remote)
    }

    #[tokio::test]
    async fn test_registered_view_follows_store() {
        let (store, _) = store(&["1", "2"]);
        let manager = ViewManager::new(store.clone());
        let view = CountingView::in_slot("pocket");

        manager.register_view(view.clone()).unwrap();
        assert_eq!(view.renders.load(Ordering::SeqCst), 1);
        assert_eq!(view.last_len.load(Ordering::SeqCst), 0);

        store.sync(&Credential::new("t", "u")).await.unwrap();
        assert_eq!(view.last_len.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_one_view_per_slot() {
        let (store, _) = store(&[]);
        let manager = ViewManager::new(store.clone());

        manager.register_view(CountingView::in_slot("pocket")).unwrap();
        let second = manager.register_view(CountingView::in_slot("pocket"));

        assert!(matches!(
            second,
            Err(PocketSyncError::ViewAlreadyRegistered(_))
        ));
        assert_eq!(manager.len(), 1);
        assert_eq!(store.observer_count(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_view_is_unloaded_once_and_goes_quiet() {
        let (store, _) = store(&["1"]);
        let manager = ViewManager::new(store.clone());
        let view = CountingView::in_slot("pocket");
        let handle = manager.register_view(view.clone()).unwrap();

        assert!(manager.unregister_view(&handle));
        assert!(!manager.unregister_view(&handle));
        store.sync(&Credential::new("t", "u")).await.unwrap();

        assert_eq!(view.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(view.renders.load(Ordering::SeqCst), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_views_unloads_everything() {
        let (store, _) = store(&["1"]);
        let manager = ViewManager::new(store.clone());
        let left = CountingView::in_slot("left");
        let right = CountingView::in_slot("right");
        manager.register_view(left.clone()).unwrap();
        manager.register_view(right.clone()).unwrap();

        assert_eq!(manager.clear_views(), 2);
        assert_eq!(manager.clear_views(), 0);
        assert!(manager.is_empty());

        store.sync(&Credential::new("t", "u")).await.unwrap();
        assert_eq!(left.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(right.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(left.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_view_sees_optimistic_change() {
        let (store, remote) = store(&["42"]);
        let credential = Credential::new("t", "u");
        store.sync(&credential).await.unwrap();
        let manager = ViewManager::new(store.clone());
        let view = CountingView::in_slot("pocket");
        manager.register_view(view.clone()).unwrap();
        remote.hold_mutations();

        store.dispatch(&credential, "42", MutationOp::Delete).unwrap();
        assert_eq!(view.last_len.load(Ordering::SeqCst), 0);

        remote.release_mutations();
        store.wait_idle().await;
    }
}
