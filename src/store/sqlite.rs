use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use rusqlite_migration::{Migrations, M};

use crate::app::{PocketSyncError, Result};
use crate::domain::{Item, PendingOp};
use crate::store::snapshot::{Entry, PendingChange};
use crate::store::SnapshotStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(classify)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Delete the database file. Only called on an explicit user request.
    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        // Touches the file header, so a non-database file fails here.
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(classify)?;

        migrations
            .to_latest(&mut conn)
            .map_err(|e| PocketSyncError::StoreCorrupt(format!("schema migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            PocketSyncError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn write_entry(conn: &Connection, entry: &Entry) -> Result<()> {
        let item = &entry.item;
        let (pending_op, base_json) = match &entry.pending {
            Some(change) => {
                let base = change
                    .base
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| PocketSyncError::Other(e.to_string()))?;
                (Some(change.op.as_str()), base)
            }
            None => (None, None),
        };

        conn.execute(
            "INSERT INTO items (id, position, url, title, excerpt, status, favorite, added_at, sync_state, pending_op, base_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                position = ?2, url = ?3, title = ?4, excerpt = ?5, status = ?6, favorite = ?7,
                added_at = ?8, sync_state = ?9, pending_op = ?10, base_json = ?11",
            params![
                item.id,
                entry.position,
                item.url,
                item.title,
                item.excerpt,
                item.status.as_str(),
                item.favorite as i32,
                item.added_at.to_rfc3339(),
                item.sync_state.as_str(),
                pending_op,
                base_json,
            ],
        )?;
        Ok(())
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }
}

/// Undecoded `items` row.
struct Row {
    id: String,
    position: i64,
    url: String,
    title: String,
    excerpt: String,
    status: String,
    favorite: i32,
    added_at: String,
    sync_state: String,
    pending_op: Option<String>,
    base_json: Option<String>,
}

impl Row {
    fn into_entry(self) -> Result<Entry> {
        let corrupt = |what: String| PocketSyncError::StoreCorrupt(format!("item {}: {}", self.id, what));

        let status = self.status.parse().map_err(corrupt)?;
        let sync_state: crate::domain::SyncState = self.sync_state.parse().map_err(corrupt)?;
        let added_at = SqliteStore::parse_datetime(&self.added_at)
            .ok_or_else(|| corrupt(format!("invalid added_at {:?}", self.added_at)))?;

        let pending = match self.pending_op.as_deref() {
            None => None,
            Some(op) => {
                let op: PendingOp = op.parse().map_err(corrupt)?;
                let base = self
                    .base_json
                    .as_deref()
                    .map(serde_json::from_str::<Item>)
                    .transpose()
                    .map_err(|e| corrupt(format!("invalid base state: {}", e)))?;
                Some(PendingChange { op, base })
            }
        };

        // A pending row must say what to send and what to restore.
        match &pending {
            None if sync_state.is_pending() => {
                return Err(corrupt(format!("{} without a queued operation", sync_state)))
            }
            Some(_) if !sync_state.is_pending() => {
                return Err(corrupt("queued operation on a synced item".into()))
            }
            Some(PendingChange {
                op: PendingOp::Mutate(_),
                base: None,
            }) => return Err(corrupt("pending change without a base state".into())),
            _ => {}
        }

        Ok(Entry {
            position: self.position,
            item: Item {
                id: self.id,
                url: self.url,
                title: self.title,
                excerpt: self.excerpt,
                status,
                favorite: self.favorite != 0,
                added_at,
                sync_state,
            },
            pending,
        })
    }
}

impl SnapshotStore for SqliteStore {
    fn load_entries(&self) -> Result<Vec<Entry>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, position, url, title, excerpt, status, favorite, added_at, sync_state, pending_op, base_json
                 FROM items ORDER BY position",
            )
            .map_err(classify)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Row {
                    id: row.get(0)?,
                    position: row.get(1)?,
                    url: row.get(2)?,
                    title: row.get(3)?,
                    excerpt: row.get(4)?,
                    status: row.get(5)?,
                    favorite: row.get(6)?,
                    added_at: row.get(7)?,
                    sync_state: row.get(8)?,
                    pending_op: row.get(9)?,
                    base_json: row.get(10)?,
                })
            })
            .map_err(classify)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(classify)?;

        rows.into_iter().map(Row::into_entry).collect()
    }

    fn upsert(&self, entries: &[&Entry]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for entry in entries {
            Self::write_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, ids: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn replace_all(&self, entries: &[Entry]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM items", [])?;
        for entry in entries {
            Self::write_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Map low-level failures that mean "this file is not our database".
fn classify(e: rusqlite::Error) -> PocketSyncError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
        {
            PocketSyncError::StoreCorrupt(e.to_string())
        }
        _ => PocketSyncError::Database(e),
    }
}
