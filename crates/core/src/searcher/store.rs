//! Durable storage of discovered results.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::debug;

use super::{ContentKind, ResultItem};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("result item has no stable id")]
    MissingStableId,
}

/// A persisted result row.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub stable_id: u64,
    pub backend: String,
    pub title: String,
    pub link: String,
    pub backend_guid: String,
    pub first_seen: DateTime<Utc>,
    pub publish_date: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    pub content_kind: ContentKind,
}

/// Result persistence interface.
pub trait ResultStore: Send + Sync {
    /// Which of the given stable ids already exist in storage.
    fn find_existing_ids(&self, ids: &[u64]) -> Result<HashSet<u64>, StoreError>;

    /// Insert all items. Rows whose stable id already exists are left
    /// untouched; first_seen is never overwritten.
    fn insert_all(&self, items: &[ResultItem]) -> Result<usize, StoreError>;

    /// Load a result by stable id.
    fn find_by_id(&self, id: u64) -> Result<Option<StoredResult>, StoreError>;

    /// Number of stored results.
    fn count(&self) -> Result<u64, StoreError>;
}

/// SQLite-backed result store.
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS search_results (
                stable_id INTEGER PRIMARY KEY,
                backend TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                backend_guid TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                publish_date TEXT,
                size_bytes INTEGER,
                content_kind TEXT NOT NULL DEFAULT 'nzb'
            );
            CREATE INDEX IF NOT EXISTS idx_results_backend ON search_results(backend);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Mutex poisoning only happens if a thread panicked while holding
        // the lock; the connection itself is still usable.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn content_kind_str(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Nzb => "nzb",
        ContentKind::Torrent => "torrent",
    }
}

fn parse_content_kind(s: &str) -> ContentKind {
    match s {
        "torrent" => ContentKind::Torrent,
        _ => ContentKind::Nzb,
    }
}

impl ResultStore for SqliteResultStore {
    fn find_existing_ids(&self, ids: &[u64]) -> Result<HashSet<u64>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.lock();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql =
            format!("SELECT stable_id FROM search_results WHERE stable_id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            row.get::<_, i64>(0)
        })?;
        let mut existing = HashSet::new();
        for row in rows {
            existing.insert(row? as u64);
        }
        Ok(existing)
    }

    fn insert_all(&self, items: &[ResultItem]) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO search_results
                    (stable_id, backend, title, link, backend_guid, first_seen,
                     publish_date, size_bytes, content_kind)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for item in items {
                let stable_id = item.stable_id.ok_or(StoreError::MissingStableId)?;
                let first_seen = item.first_seen.unwrap_or_else(Utc::now);
                inserted += stmt.execute(params![
                    stable_id as i64,
                    item.backend,
                    item.title,
                    item.link,
                    item.backend_guid,
                    first_seen.to_rfc3339(),
                    item.publish_date.map(|d| d.to_rfc3339()),
                    item.size_bytes.map(|s| s as i64),
                    content_kind_str(item.content_kind),
                ])?;
            }
        }
        tx.commit()?;
        debug!(inserted, total = items.len(), "persisted search results");
        Ok(inserted)
    }

    fn find_by_id(&self, id: u64) -> Result<Option<StoredResult>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT stable_id, backend, title, link, backend_guid, first_seen,
                   publish_date, size_bytes, content_kind
            FROM search_results WHERE stable_id = ?1
            "#,
        )?;
        let mut rows = stmt.query_map(params![id as i64], |row| {
            Ok(StoredResult {
                stable_id: row.get::<_, i64>(0)? as u64,
                backend: row.get(1)?,
                title: row.get(2)?,
                link: row.get(3)?,
                backend_guid: row.get(4)?,
                first_seen: parse_datetime(&row.get::<_, String>(5)?),
                publish_date: row
                    .get::<_, Option<String>>(6)?
                    .map(|s| parse_datetime(&s)),
                size_bytes: row.get::<_, Option<i64>>(7)?.map(|s| s as u64),
                content_kind: parse_content_kind(&row.get::<_, String>(8)?),
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM search_results", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
