use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::item::{Item, ItemStatus, SyncState};

/// A state change the user asked for on an existing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Archive,
    Readd,
    Favorite,
    Unfavorite,
    Delete,
}

impl MutationOp {
    /// Action name on the remote `send` endpoint.
    pub fn action(&self) -> &'static str {
        match self {
            MutationOp::Archive => "archive",
            MutationOp::Readd => "readd",
            MutationOp::Favorite => "favorite",
            MutationOp::Unfavorite => "unfavorite",
            MutationOp::Delete => "delete",
        }
    }

    pub fn pending_state(&self) -> SyncState {
        match self {
            MutationOp::Delete => SyncState::PendingDelete,
            _ => SyncState::PendingUpdate,
        }
    }

    /// Optimistic transition applied before the remote service confirms.
    pub fn apply(&self, item: &mut Item) {
        match self {
            MutationOp::Archive => item.status = ItemStatus::Archived,
            MutationOp::Readd => item.status = ItemStatus::Unread,
            MutationOp::Favorite => item.favorite = true,
            MutationOp::Unfavorite => item.favorite = false,
            MutationOp::Delete => {}
        }
        item.sync_state = self.pending_state();
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

impl FromStr for MutationOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(MutationOp::Archive),
            "readd" => Ok(MutationOp::Readd),
            "favorite" => Ok(MutationOp::Favorite),
            "unfavorite" => Ok(MutationOp::Unfavorite),
            "delete" => Ok(MutationOp::Delete),
            other => Err(format!("unknown mutation: {}", other)),
        }
    }
}

/// The remote operation queued for a pending item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Add,
    Mutate(MutationOp),
}

impl PendingOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingOp::Add => "add",
            PendingOp::Mutate(op) => op.action(),
        }
    }
}

impl fmt::Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "add" {
            return Ok(PendingOp::Add);
        }
        s.parse().map(PendingOp::Mutate)
    }
}
