pub mod item_store;
pub mod observer;
pub mod snapshot;
pub mod sqlite;

use crate::app::Result;

pub use item_store::{ItemStore, StoreOptions, SyncReport, MAX_MUTATION_RETRIES};
pub use observer::{Notice, Observer, SubscriptionId};
pub use snapshot::{Entry, PendingChange, Snapshot};
pub use sqlite::SqliteStore;

/// Durable home of the item snapshot.
pub trait SnapshotStore: Send + Sync {
    fn load_entries(&self) -> Result<Vec<Entry>>;
    fn upsert(&self, entries: &[&Entry]) -> Result<()>;
    fn remove(&self, ids: &[String]) -> Result<()>;
    fn replace_all(&self, entries: &[Entry]) -> Result<()>;
}
