use std::fmt;
use std::sync::Arc;

use crate::domain::{Item, PendingOp};

/// Handle returned by [`ItemStore::subscribe`](crate::store::ItemStore::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// An optimistic change was rolled back.
    MutationFailed {
        item_id: String,
        title: String,
        op: PendingOp,
        reason: String,
    },
    /// A sync cycle stopped early; already merged pages were kept.
    SyncFailed { reason: String },
    /// The credential was rejected and has to be replaced by a new login.
    ReauthRequired,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::MutationFailed {
                title, op, reason, ..
            } => write!(f, "Could not {} \"{}\": {}", op, title, reason),
            Notice::SyncFailed { reason } => write!(f, "Sync failed: {}", reason),
            Notice::ReauthRequired => f.write_str("Pocket access expired; please log in again"),
        }
    }
}

/// Receives store changes.
///
/// Called synchronously after each commit, in commit order. Implementations may
/// read the store (`list`, `get`) but must not dispatch from inside a callback.
pub trait Observer: Send + Sync {
    fn on_change(&self, items: Arc<[Item]>);

    fn on_notice(&self, _notice: &Notice) {}
}
