//! Presentation surfaces fed by the item store.
//!
//! A view is an [`Observer`] bound to a named slot of the host workspace.
//! The [`ViewManager`] subscribes views on registration and unloads them on
//! teardown.

pub mod console;
pub mod manager;

use crate::store::Observer;

pub use console::ConsoleView;
pub use manager::{SubscriptionHandle, ViewManager};

pub trait View: Observer {
    /// Workspace slot this view occupies. At most one view per slot.
    fn slot(&self) -> &str;

    /// Release whatever the view holds. Called exactly once, after the view
    /// stops receiving changes.
    fn unload(&self);
}
