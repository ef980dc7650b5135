//! Pluggable backends for the same-device replication namespace.
//!
//! The store is an origin-wide resource with uncoordinated readers and
//! writers; last-write-wins is the only consistency guarantee. Change
//! notifications are best-effort (the SQLite backend cannot notify other
//! processes at all) — the channel's poll fallback exists precisely for the
//! deliveries this misses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::model::ReplicationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("invalid stored value: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Shared key-value namespace with change notifications.
///
/// `subscribe` yields the keys of observed writes. Notifications only reach
/// subscribers in the same process and may be dropped under lag; correctness
/// must come from re-reading, never from the notification alone.
#[async_trait]
pub trait ReplicationStore: Send + Sync {
    async fn write(&self, key: &str, value: &ReplicationRecord) -> Result<(), StoreError>;
    async fn read(&self, key: &str) -> Result<Option<ReplicationRecord>, StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// Production backend: a single-table SQLite key-value store, shared between
/// operator consoles and viewers on the same device via the filesystem.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    notify: broadcast::Sender<String>,
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS replication (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        let (notify, _) = broadcast::channel(256);
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            notify,
        })
    }
}

#[async_trait]
impl ReplicationStore for SqliteStore {
    async fn write(&self, key: &str, value: &ReplicationRecord) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(value)?;
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO replication (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
                params![key, serialized, Utc::now()],
            )?;
        }
        let _ = self.notify.send(key.to_string());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<ReplicationRecord>, StoreError> {
        let raw: Option<String> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT value FROM replication WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
        };
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notify.subscribe()
    }
}

/// In-process backend: a plain map plus a notification bus. Used in tests and
/// wherever console and viewer share one process.
#[derive(Clone)]
pub struct MemoryStore {
    map: Arc<Mutex<HashMap<String, ReplicationRecord>>>,
    notify: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(256);
        MemoryStore {
            map: Arc::new(Mutex::new(HashMap::new())),
            notify,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait]
impl ReplicationStore for MemoryStore {
    async fn write(&self, key: &str, value: &ReplicationRecord) -> Result<(), StoreError> {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        let _ = self.notify.send(key.to_string());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<ReplicationRecord>, StoreError> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notify.subscribe()
    }
}
