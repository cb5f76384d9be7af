use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix for ids assigned locally before the remote service confirms an add.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Unread,
    Archived,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Unread => "unread",
            ItemStatus::Archived => "archived",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(ItemStatus::Unread),
            "archived" => Ok(ItemStatus::Archived),
            other => Err(format!("unknown item status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::PendingCreate => "pending_create",
            SyncState::PendingUpdate => "pending_update",
            SyncState::PendingDelete => "pending_delete",
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncState::Synced)
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncState::Synced),
            "pending_create" => Ok(SyncState::PendingCreate),
            "pending_update" => Ok(SyncState::PendingUpdate),
            "pending_delete" => Ok(SyncState::PendingDelete),
            other => Err(format!("unknown sync state: {}", other)),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A saved article as cached by the item store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub status: ItemStatus,
    pub favorite: bool,
    pub added_at: DateTime<Utc>,
    pub sync_state: SyncState,
}

impl Item {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: String::new(),
            excerpt: String::new(),
            status: ItemStatus::Unread,
            favorite: false,
            added_at: Utc::now(),
            sync_state: SyncState::Synced,
        }
    }

    /// Build a not-yet-confirmed item for a URL the user just saved.
    pub fn local(url: &str) -> Self {
        let added_at = Utc::now();
        let id = Self::generate_local_id(url, &added_at);
        let mut item = Self::new(id, url);
        item.added_at = added_at;
        item.sync_state = SyncState::PendingCreate;
        item
    }

    /// Deterministic placeholder id from the saved URL and the time it was saved
    pub fn generate_local_id(url: &str, added_at: &DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(added_at.to_rfc3339().as_bytes());
        format!("{}{}", LOCAL_ID_PREFIX, hex::encode(hasher.finalize()))
    }

    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state.is_pending()
    }

    pub fn is_archived(&self) -> bool {
        self.status == ItemStatus::Archived
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}
