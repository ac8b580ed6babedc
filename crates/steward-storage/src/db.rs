//! Thread-safe handle over the single system database.
//!
//! Wraps one SQLite connection in a `Mutex`; WAL mode tolerates concurrent
//! readers while writers serialize through the lock. Every subsystem shares
//! a clone of this handle - there is exactly one writer path per table
//! (sessions manager, schedulers, worker executor, notifier).

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, Params, Row};
use tracing::info;

use crate::error::Result;
use crate::schema;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if necessary) the system database at `path`, switch it
    /// to WAL, apply the base schema and any pending migrations.
    ///
    /// A migration failure is fatal by design: the caller must abort startup
    /// rather than run against a half-migrated schema.
    pub fn open(
        path: &Path,
        schema_path: Option<&Path>,
        migrations_dir: Option<&Path>,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=3000;
             PRAGMA synchronous=NORMAL;",
        )?;

        schema::init_schema(&conn, schema_path)?;
        if let Some(dir) = migrations_dir {
            schema::apply_migrations(&mut conn, dir)?;
        }

        info!(path = %path.display(), "database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database with the full schema, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn, None)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Run a statement, returning the number of affected rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.lock();
        Ok(conn.execute(sql, params)?)
    }

    /// Run the same statement for each parameter set, inside one transaction.
    pub fn execute_many<P: Params>(&self, sql: &str, param_sets: Vec<P>) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut total = 0usize;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for params in param_sets {
                total += stmt.execute(params)?;
            }
        }
        tx.commit()?;
        Ok(total)
    }

    /// Fetch a single row mapped through `f`, or `None` when no row matches.
    pub fn fetch_one<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.lock();
        match conn.query_row(sql, params, f) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch all matching rows mapped through `f`. Rows that fail to map are
    /// skipped rather than failing the whole query.
    pub fn fetch_all<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, f)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Drop rolls back; make it explicit for the reader.
                tx.rollback()?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        db.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params!["model_chief", "opus", "2026-01-01T00:00:00Z"],
        )
        .unwrap();

        let value: Option<String> = db
            .fetch_one(
                "SELECT value FROM settings WHERE key = ?1",
                ["model_chief"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value.as_deref(), Some("opus"));

        let missing: Option<String> = db
            .fetch_one(
                "SELECT value FROM settings WHERE key = ?1",
                ["model_nobody"],
                |row| row.get(0),
            )
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES ('a', '1', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(crate::error::StorageError::NotFound {
                what: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: Option<i64> = db
            .fetch_one("SELECT COUNT(*) FROM settings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, Some(0));
    }

    #[test]
    fn execute_many_is_atomic() {
        let db = Database::open_in_memory().unwrap();
        let n = db
            .execute_many(
                "INSERT OR IGNORE INTO conversation_notifications (conversation_id, worker_id) VALUES (?1, ?2)",
                vec![["chief", "w1"], ["chief", "w2"], ["chief", "w1"]],
            )
            .unwrap();
        // Duplicate (chief, w1) ignored.
        assert_eq!(n, 2);
    }

    #[test]
    fn open_creates_parent_dirs_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/system.db");
        let db = Database::open(&path, None, None).unwrap();
        db.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES ('k', 'v', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        assert!(path.exists());
    }
}
