use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{ContentRecord, ContentStore};
use crate::error::StoreError;

/// Content records in a SQLite database.
///
/// Schema: a single `content` table keyed by identifier; `attributes` holds a
/// JSON object of string values. WAL mode lets an editor seed or update
/// records while the engine reads them.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::ReadFile(dir.display().to_string(), e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS content (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                body        TEXT NOT NULL DEFAULT '',
                attributes  TEXT NOT NULL DEFAULT '{}'
            );",
        )?;

        info!(path = %path.display(), "content database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let attributes = serde_json::to_string(&record.attributes).map_err(|e| {
            StoreError::Record {
                id: record.id.clone(),
                reason: e.to_string(),
            }
        })?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO content (id, title, body, attributes)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.title, record.body, attributes],
        )?;
        debug!(id = %record.id, "content record stored");
        Ok(())
    }
}

impl ContentStore for SqliteStore {
    fn lookup(&self, id: &str) -> Result<Option<Arc<ContentRecord>>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT id, title, body, attributes FROM content WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let Some((id, title, body, attributes)) = row else {
            return Ok(None);
        };
        let attributes: BTreeMap<String, String> =
            serde_json::from_str(&attributes).map_err(|e| StoreError::Record {
                id: id.clone(),
                reason: format!("bad attributes JSON: {e}"),
            })?;
        Ok(Some(Arc::new(ContentRecord {
            id,
            title,
            body,
            attributes,
        })))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
