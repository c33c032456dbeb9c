//! The SQLite handle behind [`SqliteStore`](crate::SqliteStore).

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::migrations;

/// An open connection with the schema migrated to the current version.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "Opened relational store");
        Self::prepare(conn)
    }

    /// A private, throwaway database for mock mode and tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, for transactions.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// File backing the database; `None` when in memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().filter(|p| !p.is_empty()).map(PathBuf::from)
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers shared by the per-table modules
// ---------------------------------------------------------------------------

pub(crate) fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn parse_uuid(column: usize, raw: &str) -> rusqlite::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).map_err(|e| conversion_error(column, e))
}

pub(crate) fn parse_time(
    column: usize,
    raw: &str,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| conversion_error(column, e))
}

pub(crate) fn parse_opt_time(
    column: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.map(|s| parse_time(column, &s)).transpose()
}

/// Map "no rows" onto `None` for single-row lookups.
pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(other) => Err(StoreError::Sqlite(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_database_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatwii.db");

        let db = Database::open_at(&path).unwrap();
        assert!(db.path().is_some());

        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatwii.db");
        drop(Database::open_at(&path).unwrap());
        let db = Database::open_at(&path).unwrap();
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn test_in_memory_has_no_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
    }
}
