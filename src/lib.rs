//! # pocket-sync
//!
//! An offline-first local mirror of a Pocket reading list.
//!
//! ## Architecture
//!
//! ```text
//! AuthFlow → CredentialStore
//!                 ↓
//! RemoteApi ⇄ ItemStore → Observers / ViewManager
//!                 ↓
//!            SqliteStore
//! ```
//!
//! - [`auth`]: request-token flow and the persisted credential
//! - [`remote`]: Pocket v3 API client
//! - [`store`]: cached snapshot, sync engine, optimistic mutations
//! - [`view`]: views subscribed to store changes
//!
//! ## Quick Start
//!
//! ```bash
//! export POCKET_CONSUMER_KEY=1234-abcd
//! pocket-sync login
//! pocket-sync list --unread
//! pocket-sync archive 2093284512
//! pocket-sync watch --interval 15m
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the credential
/// store, auth flow, item store and view manager.
pub mod app;

/// Authorization flow and credential persistence.
pub mod auth;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/pocket-sync/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Item`](domain::Item): a saved article with its sync state
/// - [`MutationOp`](domain::MutationOp): user-requested state changes
/// - [`Credential`](domain::Credential): access token and username
pub mod domain;

/// Remote service access.
///
/// - [`RemoteApi`](remote::RemoteApi) / [`AuthApi`](remote::AuthApi): async traits
/// - [`PocketClient`](remote::PocketClient): reqwest-based implementation
pub mod remote;

/// Periodic background sync for `pocket-sync watch`.
pub mod scheduler;

/// Local item cache and synchronization engine.
///
/// - [`ItemStore`](store::ItemStore): merge, dispatch, confirm, roll back
/// - [`SqliteStore`](store::SqliteStore): SQLite persistence of the snapshot
pub mod store;

/// Views fed by the item store.
pub mod view;

#[cfg(test)]
pub(crate) mod testing;
