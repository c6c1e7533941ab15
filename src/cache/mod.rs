//! SQLite-backed rowset cache.
//!
//! Persists materialized pre-aggregations so a restarted process can serve
//! stale rollups before its first refresh. Configured paths may start
//! with `~/`.
//!
//! # Design
//!
//! - Key-value store with JSON values, keyed by `Cube.preAgg`
//! - Versioned: a format change clears the table on open
//! - Write-through: callers persist on every commit
//!
//! `Connection` is not `Sync`; the store wraps it in a mutex.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

/// Bump when the stored value format changes.
const CACHE_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to determine home directory")]
    NoHomeDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

pub struct RowsetCache {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for RowsetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowsetCache").finish_non_exhaustive()
    }
}

impl RowsetCache {
    /// Open or create the cache at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Expand a leading `~/` to the home directory.
    pub fn resolve_path(path: &str) -> CacheResult<PathBuf> {
        match path.strip_prefix("~/") {
            Some(rest) => Ok(dirs::home_dir().ok_or(CacheError::NoHomeDir)?.join(rest)),
            None => Ok(PathBuf::from(path)),
        }
    }

    fn init(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rowsets (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(CACHE_VERSION) {
            if stored_version.is_some() {
                tracing::info!(
                    from = ?stored_version,
                    to = CACHE_VERSION,
                    "rowset cache format changed; clearing"
                );
            }
            conn.execute("DELETE FROM rowsets", [])?;
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                params![CACHE_VERSION.to_string()],
            )?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM rowsets WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO rowsets (key, value) VALUES (?, ?)",
            params![key, json],
        )?;
        Ok(())
    }

    /// Returns whether a row was deleted.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM rowsets WHERE key = ?", params![key])?;
        Ok(rows > 0)
    }

    pub fn keys(&self) -> CacheResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM rowsets ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}
