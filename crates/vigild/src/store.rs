//! SQLite persistence: the identity gallery and the access log.
//!
//! Both share one connection behind a mutex. Descriptors are stored as JSON
//! arrays next to their dimension, which every insert checks against the rows
//! already present.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use vigil_core::{
    AccessLogEntry, AccessLogSink, Category, Descriptor, EnrolledIdentity, Gallery, GalleryError,
    SinkError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    identity_id        TEXT PRIMARY KEY,
    descriptor         TEXT NOT NULL,
    dim                INTEGER NOT NULL,
    display_name       TEXT NOT NULL,
    category           TEXT NOT NULL,
    is_authorized      INTEGER NOT NULL,
    external_reference TEXT,
    created_at         TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS access_log (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp           TEXT NOT NULL,
    matched_identity_id TEXT,
    detected_name       TEXT NOT NULL,
    confidence          REAL NOT NULL,
    access_granted      INTEGER NOT NULL,
    location            TEXT NOT NULL,
    image_reference     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS access_log_timestamp ON access_log (timestamp);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

impl From<StoreError> for GalleryError {
    fn from(err: StoreError) -> Self {
        GalleryError::Backend(Box::new(err))
    }
}

impl From<StoreError> for SinkError {
    fn from(err: StoreError) -> Self {
        SinkError::Backend(Box::new(err))
    }
}

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (creating if needed) the database at `path` and apply the schema.
pub fn open(path: &Path) -> Result<SharedConnection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    init(conn)
}

pub fn open_in_memory() -> Result<SharedConnection, StoreError> {
    init(Connection::open_in_memory()?)
}

fn init(conn: Connection) -> Result<SharedConnection, StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn lock(conn: &SharedConnection) -> std::sync::MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Raw `identities` row before validation.
struct IdentityRow {
    identity_id: String,
    descriptor: String,
    display_name: String,
    category: String,
    is_authorized: bool,
    external_reference: Option<String>,
    created_at: String,
}

impl IdentityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity_id: row.get(0)?,
            descriptor: row.get(1)?,
            display_name: row.get(2)?,
            category: row.get(3)?,
            is_authorized: row.get(4)?,
            external_reference: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_identity(self) -> Result<EnrolledIdentity, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            id: self.identity_id.clone(),
            reason,
        };
        let descriptor =
            Descriptor::from_json(&self.descriptor).map_err(|e| corrupt(e.to_string()))?;
        let category = self
            .category
            .parse::<Category>()
            .map_err(|e| corrupt(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(EnrolledIdentity {
            identity_id: self.identity_id,
            descriptor,
            display_name: self.display_name,
            category,
            is_authorized: self.is_authorized,
            external_reference: self.external_reference,
            created_at,
        })
    }
}

/// Gallery backed by the `identities` table.
#[derive(Clone)]
pub struct SqliteGallery {
    conn: SharedConnection,
}

impl SqliteGallery {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn select(&self, authorized_only: bool) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let sql = if authorized_only {
            "SELECT identity_id, descriptor, display_name, category, is_authorized,
                    external_reference, created_at
             FROM identities WHERE is_authorized = 1 ORDER BY rowid"
        } else {
            "SELECT identity_id, descriptor, display_name, category, is_authorized,
                    external_reference, created_at
             FROM identities ORDER BY rowid"
        };
        let rows: Vec<IdentityRow> = {
            let conn = lock(&self.conn);
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt
                .query_map([], IdentityRow::from_row)?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        let identities = rows
            .into_iter()
            .filter_map(|row| match row.into_identity() {
                Ok(identity) => Some(identity),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable identity row");
                    None
                }
            })
            .collect();
        Ok(identities)
    }

    fn insert(&self, identity: &EnrolledIdentity) -> Result<(), GalleryError> {
        let descriptor = identity
            .descriptor
            .to_json()
            .map_err(|e| GalleryError::Backend(Box::new(e)))?;
        let actual = identity.descriptor.dim();

        let mut conn = lock(&self.conn);
        let tx = conn.transaction().map_err(StoreError::from)?;

        let expected: Option<i64> = tx
            .query_row("SELECT dim FROM identities LIMIT 1", [], |row| row.get(0))
            .optional()
            .map_err(StoreError::from)?;
        if let Some(expected) = expected {
            if expected as usize != actual {
                return Err(GalleryError::DimensionMismatch {
                    expected: expected as usize,
                    actual,
                });
            }
        }

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM identities WHERE identity_id = ?1)",
                [&identity.identity_id],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        if exists {
            return Err(GalleryError::DuplicateId(identity.identity_id.clone()));
        }

        tx.execute(
            "INSERT INTO identities (identity_id, descriptor, dim, display_name, category,
                                     is_authorized, external_reference, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                identity.identity_id,
                descriptor,
                actual as i64,
                identity.display_name,
                identity.category.as_str(),
                identity.is_authorized,
                identity.external_reference,
                identity.created_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }
}

impl Gallery for SqliteGallery {
    fn add(&self, identity: EnrolledIdentity) -> Result<(), GalleryError> {
        self.insert(&identity)?;
        tracing::debug!(identity_id = %identity.identity_id, "identity stored");
        Ok(())
    }

    fn remove(&self, identity_id: &str) -> Result<bool, GalleryError> {
        let removed = lock(&self.conn)
            .execute("DELETE FROM identities WHERE identity_id = ?1", [identity_id])
            .map_err(StoreError::from)?;
        Ok(removed > 0)
    }

    fn all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        Ok(self.select(false)?)
    }

    fn authorized(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        Ok(self.select(true)?)
    }

    fn set_authorized(&self, identity_id: &str, authorized: bool) -> Result<bool, GalleryError> {
        let updated = lock(&self.conn)
            .execute(
                "UPDATE identities SET is_authorized = ?2 WHERE identity_id = ?1",
                params![identity_id, authorized],
            )
            .map_err(StoreError::from)?;
        Ok(updated > 0)
    }
}

/// Access log backed by the `access_log` table.
#[derive(Clone)]
pub struct SqliteAccessLog {
    conn: SharedConnection,
}

impl SqliteAccessLog {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<AccessLogEntry>, StoreError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, matched_identity_id, detected_name, confidence,
                    access_granted, location, image_reference
             FROM access_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(AccessRow {
                    timestamp: row.get(0)?,
                    matched_identity_id: row.get(1)?,
                    detected_name: row.get(2)?,
                    confidence: row.get(3)?,
                    access_granted: row.get(4)?,
                    location: row.get(5)?,
                    image_reference: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(AccessRow::into_entry).collect()
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = lock(&self.conn).query_row("SELECT COUNT(*) FROM access_log", [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }
}

struct AccessRow {
    timestamp: String,
    matched_identity_id: Option<String>,
    detected_name: String,
    confidence: f64,
    access_granted: bool,
    location: String,
    image_reference: String,
}

impl AccessRow {
    fn into_entry(self) -> Result<AccessLogEntry, StoreError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::CorruptRow {
                id: self.image_reference.clone(),
                reason: format!("timestamp: {e}"),
            })?
            .with_timezone(&Utc);
        Ok(AccessLogEntry {
            timestamp,
            matched_identity_id: self.matched_identity_id,
            detected_name: self.detected_name,
            confidence: self.confidence as f32,
            access_granted: self.access_granted,
            location: self.location,
            image_reference: self.image_reference,
        })
    }
}

impl AccessLogSink for SqliteAccessLog {
    fn record(&self, entry: &AccessLogEntry) -> Result<(), SinkError> {
        lock(&self.conn)
            .execute(
                "INSERT INTO access_log (timestamp, matched_identity_id, detected_name, confidence,
                                         access_granted, location, image_reference)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.timestamp.to_rfc3339(),
                    entry.matched_identity_id,
                    entry.detected_name,
                    entry.confidence as f64,
                    entry.access_granted,
                    entry.location,
                    entry.image_reference,
                ],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }
}
