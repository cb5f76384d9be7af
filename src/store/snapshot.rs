//! In-memory item map owned by the item store.
//!
//! Entries keep their insertion position so list rendering stays stable across
//! syncs. An entry is pending exactly when it carries a [`PendingChange`].

use std::collections::{HashMap, HashSet};

use crate::domain::{Item, PendingOp, SyncState};

/// The remote operation queued for an item and the state to restore if it fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub op: PendingOp,
    /// `None` for items created locally; rolling those back removes them.
    pub base: Option<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub position: i64,
    pub item: Item,
    pub pending: Option<PendingChange>,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Ids touched by one commit, so persistence can write only those rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Changes {
    pub upserted: Vec<String>,
    pub removed: Vec<String>,
}

impl Changes {
    pub fn upsert(id: impl Into<String>) -> Self {
        Self {
            upserted: vec![id.into()],
            removed: Vec::new(),
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self {
            upserted: Vec::new(),
            removed: vec![id.into()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of merging one page of remote items.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_pending: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    next_position: i64,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted entries; later duplicates of an id are dropped.
    pub fn from_entries(mut entries: Vec<Entry>) -> Self {
        entries.sort_by_key(|e| e.position);
        let mut snapshot = Self::new();
        for entry in entries {
            if snapshot.index.contains_key(&entry.item.id) {
                continue;
            }
            snapshot.next_position = snapshot.next_position.max(entry.position + 1);
            snapshot
                .index
                .insert(entry.item.id.clone(), snapshot.entries.len());
            snapshot.entries.push(entry);
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.index.get(id).map(|&i| &mut self.entries[i])
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Append a new entry at the end of the list.
    pub fn push(&mut self, item: Item, pending: Option<PendingChange>) {
        if let Some(existing) = self.get_mut(&item.id) {
            existing.item = item;
            existing.pending = pending;
            return;
        }
        let position = self.next_position;
        self.next_position += 1;
        self.index.insert(item.id.clone(), self.entries.len());
        self.entries.push(Entry {
            position,
            item,
            pending,
        });
    }

    pub fn remove(&mut self, id: &str) -> Option<Entry> {
        let idx = self.index.remove(id)?;
        let entry = self.entries.remove(idx);
        self.reindex_from(idx);
        Some(entry)
    }

    /// Swap the entry under `old_id` for `item`, keeping its list position.
    pub fn rekey(&mut self, old_id: &str, item: Item) {
        let Some(idx) = self.index.remove(old_id) else {
            self.push(item, None);
            return;
        };
        if let Some(&other) = self.index.get(&item.id) {
            // The remote id is already cached; keep that entry and drop ours.
            self.entries.remove(idx);
            self.reindex_from(idx.min(other));
            if let Some(existing) = self.get_mut(&item.id) {
                if !existing.is_pending() {
                    existing.item = item;
                }
            }
            return;
        }
        self.index.insert(item.id.clone(), idx);
        let entry = &mut self.entries[idx];
        entry.item = item;
        entry.pending = None;
    }

    pub fn clear(&mut self) -> Vec<String> {
        let ids = self.entries.iter().map(|e| e.item.id.clone()).collect();
        self.entries.clear();
        self.index.clear();
        ids
    }

    /// Items for display, in list order. Items awaiting deletion are hidden.
    pub fn visible_items(&self) -> Vec<Item> {
        self.entries
            .iter()
            .filter(|e| e.item.sync_state != SyncState::PendingDelete)
            .map(|e| e.item.clone())
            .collect()
    }

    /// Merge one page of remote items. Remote data overwrites synced entries
    /// and never touches pending ones.
    pub fn merge_page(&mut self, items: Vec<Item>) -> (MergeStats, Changes) {
        let mut stats = MergeStats::default();
        let mut changes = Changes::default();

        for mut remote in items {
            remote.sync_state = SyncState::Synced;
            match self.get_mut(&remote.id) {
                Some(entry) if entry.is_pending() => stats.skipped_pending += 1,
                Some(entry) if entry.item == remote => stats.unchanged += 1,
                Some(entry) => {
                    changes.upserted.push(remote.id.clone());
                    entry.item = remote;
                    stats.updated += 1;
                }
                None => {
                    changes.upserted.push(remote.id.clone());
                    self.push(remote, None);
                    stats.added += 1;
                }
            }
        }

        (stats, changes)
    }

    /// Drop synced entries missing from a complete remote listing.
    pub fn tombstone(&mut self, seen: &HashSet<String>) -> Changes {
        let removed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_pending() && !seen.contains(&e.item.id))
            .map(|e| e.item.id.clone())
            .collect();

        if removed.is_empty() {
            return Changes::default();
        }

        self.entries
            .retain(|e| e.is_pending() || seen.contains(&e.item.id));
        self.reindex_from(0);

        Changes {
            upserted: Vec::new(),
            removed,
        }
    }

    fn reindex_from(&mut self, start: usize) {
        if start == 0 {
            self.index.clear();
        }
        for (i, entry) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(entry.item.id.clone(), i);
        }
    }
}
