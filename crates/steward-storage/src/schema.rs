//! Schema bootstrap and additive migrations.
//!
//! The full DDL lives in `schema.sql` (embedded at compile time; a copy under
//! `.engine/config/schema.sql` takes precedence when present so operators can
//! inspect what runs). Migrations are plain SQL files named `NNN_label.sql`,
//! applied in lexicographic order and recorded in `schema_migrations`.

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StorageError};

/// Built-in DDL, used when no on-disk schema file exists.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Apply the base schema. Safe to call on every startup - the DDL uses
/// `IF NOT EXISTS` throughout.
pub fn init_schema(conn: &Connection, schema_path: Option<&Path>) -> Result<()> {
    let ddl = match schema_path {
        Some(path) if path.exists() => std::fs::read_to_string(path)?,
        _ => SCHEMA_SQL.to_string(),
    };
    conn.execute_batch(&ddl)?;
    Ok(())
}

/// Apply every unapplied migration under `dir`, in lexicographic file-name
/// order. Each migration runs in its own transaction; the first failure
/// aborts with [`StorageError::Migration`] and the caller must not continue.
pub fn apply_migrations(conn: &mut Connection, dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.ends_with(".sql").then_some(name)
        })
        .collect();
    names.sort();

    let mut applied = 0usize;
    for name in names {
        let already: Option<String> = conn
            .query_row(
                "SELECT name FROM schema_migrations WHERE name = ?1",
                [&name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if already.is_some() {
            continue;
        }

        let sql = std::fs::read_to_string(dir.join(&name))?;
        let tx = conn.transaction()?;
        tx.execute_batch(&sql)
            .map_err(|e| StorageError::Migration {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![name, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        info!(migration = %name, "migration applied");
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, None).unwrap();
        // Idempotent
        init_schema(&conn, None).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn migrations_apply_in_order_and_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("002_add_note.sql"),
            "ALTER TABLE duties ADD COLUMN note TEXT;",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("001_seed.sql"),
            "INSERT INTO settings (key, value, updated_at) VALUES ('seeded', '1', '2026-01-01T00:00:00Z');",
        )
        .unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, None).unwrap();
        let applied = apply_migrations(&mut conn, dir.path()).unwrap();
        assert_eq!(applied, 2);

        // Re-running applies nothing.
        let applied = apply_migrations(&mut conn, dir.path()).unwrap();
        assert_eq!(applied, 0);

        let recorded: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(recorded, 2);
    }

    #[test]
    fn failing_migration_aborts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("001_bad.sql"), "THIS IS NOT SQL;").unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, None).unwrap();
        let err = apply_migrations(&mut conn, dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::Migration { .. }));

        // Nothing recorded for the failed migration.
        let recorded: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(recorded, 0);
    }
}
