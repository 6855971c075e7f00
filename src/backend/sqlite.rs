use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;

use crate::backend::{BackendAdapter, BackendKind};
use crate::errors::BackendError;

/// SQLite-based backend, the durable `indexedDB` equivalent.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBackend {
    /// Opens (or creates) the database at `path`.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI,
            )
            .with_init(|c| {
                c.busy_timeout(Duration::from_millis(500))?;
                c.pragma_update(None, "journal_mode", "WAL")?;
                c.execute_batch(
                    "CREATE TABLE IF NOT EXISTS locale_store (
                        key TEXT PRIMARY KEY NOT NULL,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
                    );",
                )?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, BackendError> {
        self.pool.get().map_err(|e| BackendError::Unavailable {
            backend: BackendKind::IndexedDb,
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        let Ok(conn) = self.conn() else { return 0 };
        conn.query_row("SELECT COUNT(*) FROM locale_store", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sqlite_err(e: r2d2_sqlite::rusqlite::Error) -> BackendError {
    BackendError::Sqlite(e.to_string())
}

impl BackendAdapter for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IndexedDb
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM locale_store WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(sqlite_err)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO locale_store(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE
             SET value=excluded.value, updated_at=strftime('%s','now')",
            params![key, value],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM locale_store WHERE key=?1", params![key])
            .map_err(sqlite_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_contract_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        let db = SqliteBackend::new(path).unwrap();
        assert!(db.is_empty());
        assert_eq!(db.get("missing").unwrap(), None);

        db.set("a", "1").unwrap();
        db.set("a", "2").unwrap();
        db.set("b", "3").unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("a").unwrap().as_deref(), Some("2"));

        drop(db);
        let reopened = SqliteBackend::new(path).unwrap();
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("3"));
        reopened.remove("b").unwrap();
        assert_eq!(reopened.get("b").unwrap(), None);
    }
}
