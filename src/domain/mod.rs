pub mod credential;
pub mod item;
pub mod mutation;

pub use credential::{Credential, RequestToken};
pub use item::{Item, ItemStatus, SyncState};
pub use mutation::{MutationOp, PendingOp};
