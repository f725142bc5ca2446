//! Database schema migrations for checkin.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{info, warn};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const CURRENT_VERSION: i32 = 2;

/// Owner of rows written before the schema knew about users.
pub const LEGACY_USER: &str = "default";

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: single-user boolean check-ins plus the kv table.
///
/// Existing databases from the first release already have this shape, so
/// every statement is `IF NOT EXISTS`.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS checkin (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            d    TEXT NOT NULL,
            task TEXT NOT NULL,
            done INTEGER NOT NULL DEFAULT 0,
            UNIQUE(d, task)
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    set_schema_version(conn, 1)?;
    Ok(())
}

/// Migration v2: per-user levels with optional activity, and notes.
///
/// Rebuilds `checkin` because its unique key changes. Legacy `done` flags
/// become level 1 rows owned by [`LEGACY_USER`].
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE checkin_v2 (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            user     TEXT NOT NULL,
            d        TEXT NOT NULL,
            task     TEXT NOT NULL,
            activity TEXT NOT NULL DEFAULT '',
            level    INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user, d, task, activity)
        );",
    )?;

    let moved = tx.execute(
        "INSERT INTO checkin_v2 (user, d, task, activity, level)
         SELECT ?1, d, task, '', MIN(MAX(done, 0), 3) FROM checkin",
        [LEGACY_USER],
    )?;

    tx.execute_batch(
        "DROP TABLE checkin;
         ALTER TABLE checkin_v2 RENAME TO checkin;
         CREATE INDEX IF NOT EXISTS idx_checkin_user_d ON checkin(user, d);

         CREATE TABLE IF NOT EXISTS notes (
            user TEXT NOT NULL,
            d    TEXT NOT NULL,
            task TEXT NOT NULL,
            note TEXT NOT NULL,
            UNIQUE(user, d, task)
         );",
    )?;

    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    tx.commit()?;

    if moved > 0 {
        info!(rows = moved, "migrated legacy check-ins");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn test_migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        assert_eq!(get_schema_version(&conn), CURRENT_VERSION);
        let cols = columns(&conn, "checkin");
        for expected in ["user", "d", "task", "activity", "level"] {
            assert!(cols.iter().any(|c| c == expected), "missing {expected}");
        }
        assert!(!cols.iter().any(|c| c == "done"));
        assert_eq!(columns(&conn, "notes").len(), 4);
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn test_legacy_rows_are_carried_over() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE checkin (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                d    TEXT NOT NULL,
                task TEXT NOT NULL,
                done INTEGER NOT NULL DEFAULT 0,
                UNIQUE(d, task)
            );
            INSERT INTO checkin (d, task, done) VALUES ('2025-01-01', 'reading', 1);
            INSERT INTO checkin (d, task, done) VALUES ('2025-01-01', 'exercise', 0);",
        )
        .unwrap();

        migrate(&conn).unwrap();

        let rows: Vec<(String, String, i64)> = conn
            .prepare("SELECT user, task, level FROM checkin ORDER BY task")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            rows,
            vec![
                ("default".to_string(), "exercise".to_string(), 0),
                ("default".to_string(), "reading".to_string(), 1),
            ]
        );
    }
}
