//! SQLite-backed completion store.
//!
//! Provides the same contract as the remote completion store for people
//! running without a server:
//! - Per-user, per-day levels for every `(task, activity)` item
//! - Per-day notes
//! - History windows grouped by date

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};

use super::{data_dir, migrations};
use crate::catalog::{ItemKey, Level, TaskCatalog};
use crate::clock::{date_key, parse_date_key};
use crate::day_record::{DayRecord, StatusMap, TaskStatus};
use crate::error::DatabaseError;
use crate::history::HistoryWindow;
use crate::sync::remote::CompletionStore;
use crate::sync::types::SyncError;

/// SQLite database holding check-in levels and notes.
pub struct CompletionDb {
    conn: Mutex<Connection>,
}

impl CompletionDb {
    /// Open the database at `~/.config/checkin/checkin.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("checkin.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a zero row for every catalog item on `date`. Existing rows are
    /// kept. Returns how many rows were created.
    pub fn ensure_today_rows(
        &self,
        user: &str,
        date: NaiveDate,
        catalog: &TaskCatalog,
    ) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let d = date_key(date);
        let mut created = 0;
        for item in catalog.items() {
            created += conn.execute(
                "INSERT OR IGNORE INTO checkin (user, d, task, activity, level)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![user, d, item.task, item.activity.as_deref().unwrap_or("")],
            )?;
        }
        Ok(created)
    }

    /// Every stored level for `date`, zeros included.
    pub fn status(&self, user: &str, date: NaiveDate) -> Result<StatusMap, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT task, activity, level FROM checkin
             WHERE user = ?1 AND d = ?2
             ORDER BY task, activity",
        )?;
        let rows = stmt.query_map(params![user, date_key(date)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut status = StatusMap::new();
        for row in rows {
            let (task, activity, level) = row?;
            insert_level(&mut status, task, activity, level);
        }
        Ok(status)
    }

    pub fn write_level(
        &self,
        user: &str,
        date: NaiveDate,
        item: &ItemKey,
        level: Level,
    ) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO checkin (user, d, task, activity, level) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user, d, task, activity) DO UPDATE SET level = excluded.level",
            params![
                user,
                date_key(date),
                item.task,
                item.activity.as_deref().unwrap_or(""),
                level
            ],
        )?;
        Ok(())
    }

    /// Days `end - (days - 1)` through `end`, grouped by date.
    pub fn history(
        &self,
        user: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<HistoryWindow, DatabaseError> {
        let cutoff = end - Duration::days(i64::from(days.max(1)) - 1);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT d, task, activity, level FROM checkin
             WHERE user = ?1 AND d >= ?2 AND d <= ?3
             ORDER BY d DESC, task",
        )?;
        let rows = stmt.query_map(params![user, date_key(cutoff), date_key(end)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut grouped: BTreeMap<NaiveDate, StatusMap> = BTreeMap::new();
        for row in rows {
            let (d, task, activity, level) = row?;
            match parse_date_key(&d) {
                Ok(date) => insert_level(grouped.entry(date).or_default(), task, activity, level),
                Err(e) => tracing::debug!(error = %e, "skipping stored row"),
            }
        }

        Ok(HistoryWindow::from_records(
            end,
            grouped
                .iter()
                .map(|(date, status)| DayRecord::from_status(*date, status)),
        ))
    }

    pub fn note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let note = self
            .conn()
            .query_row(
                "SELECT note FROM notes WHERE user = ?1 AND d = ?2 AND task = ?3",
                params![user, date_key(date), task],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(note)
    }

    /// Store a note; blank text deletes it.
    pub fn write_note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
        note: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        if note.trim().is_empty() {
            conn.execute(
                "DELETE FROM notes WHERE user = ?1 AND d = ?2 AND task = ?3",
                params![user, date_key(date), task],
            )?;
        } else {
            conn.execute(
                "INSERT OR REPLACE INTO notes (user, d, task, note) VALUES (?1, ?2, ?3, ?4)",
                params![user, date_key(date), task, note],
            )?;
        }
        Ok(())
    }
}

/// Rows without an activity are flat levels. A task that has activity rows
/// keeps those and ignores any stray flat row.
fn insert_level(status: &mut StatusMap, task: String, activity: String, level: i64) {
    let level = level.clamp(0, i64::from(crate::catalog::MAX_LEVEL)) as Level;
    if activity.is_empty() {
        status.entry(task).or_insert(TaskStatus::Flat(level));
        return;
    }
    match status.get_mut(&task) {
        Some(TaskStatus::Activities(map)) => {
            map.insert(activity, level);
        }
        _ => {
            status.insert(task, TaskStatus::Activities(BTreeMap::from([(activity, level)])));
        }
    }
}

fn storage(e: DatabaseError) -> SyncError {
    SyncError::Storage(e.to_string())
}

#[async_trait]
impl CompletionStore for CompletionDb {
    async fn today_status(&self, user: &str, date: NaiveDate) -> Result<StatusMap, SyncError> {
        self.status(user, date).map_err(storage)
    }

    async fn set_level(
        &self,
        user: &str,
        date: NaiveDate,
        item: &ItemKey,
        level: Level,
    ) -> Result<(), SyncError> {
        self.write_level(user, date, item, level).map_err(storage)
    }

    async fn history(
        &self,
        user: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<HistoryWindow, SyncError> {
        CompletionDb::history(self, user, end, days).map_err(storage)
    }

    async fn note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
    ) -> Result<Option<String>, SyncError> {
        CompletionDb::note(self, user, date, task).map_err(storage)
    }

    async fn set_note(
        &self,
        user: &str,
        date: NaiveDate,
        task: &str,
        note: &str,
    ) -> Result<(), SyncError> {
        self.write_note(user, date, task, note).map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[test]
    fn ensure_today_rows_is_idempotent() {
        let db = CompletionDb::open_memory().unwrap();
        let catalog = TaskCatalog::builtin();
        assert_eq!(db.ensure_today_rows("alice", date(6), &catalog).unwrap(), 3);
        assert_eq!(db.ensure_today_rows("alice", date(6), &catalog).unwrap(), 0);

        let status = db.status("alice", date(6)).unwrap();
        assert_eq!(status.len(), 3);
        assert_eq!(status["reading"], TaskStatus::Flat(0));
    }

    #[test]
    fn write_level_upserts() {
        let db = CompletionDb::open_memory().unwrap();
        let item = ItemKey::new("meaning", Some("writing"));
        db.write_level("alice", date(6), &item, 2).unwrap();
        db.write_level("alice", date(6), &item, 3).unwrap();

        let status = db.status("alice", date(6)).unwrap();
        match &status["meaning"] {
            TaskStatus::Activities(map) => assert_eq!(map["writing"], 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(db.status("bob", date(6)).unwrap().is_empty());
    }

    #[test]
    fn history_is_bounded_and_grouped() {
        let db = CompletionDb::open_memory().unwrap();
        for d in 1..=9 {
            db.write_level("alice", date(d), &ItemKey::flat("reading"), 1)
                .unwrap();
        }

        let window = db.history("alice", date(8), 3).unwrap();
        let dates: Vec<_> = window.iter_desc().map(|r| r.date()).collect();
        assert_eq!(dates, vec![date(8), date(7), date(6)]);
        assert_eq!(window.end(), date(8));
    }

    #[test]
    fn notes_set_and_clear() {
        let db = CompletionDb::open_memory().unwrap();
        assert_eq!(db.note("alice", date(6), "caring").unwrap(), None);

        db.write_note("alice", date(6), "caring", "walked outside").unwrap();
        assert_eq!(
            db.note("alice", date(6), "caring").unwrap().as_deref(),
            Some("walked outside")
        );

        db.write_note("alice", date(6), "caring", "  ").unwrap();
        assert_eq!(db.note("alice", date(6), "caring").unwrap(), None);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkin.db");
        {
            let db = CompletionDb::open_at(&path).unwrap();
            db.write_level("alice", date(6), &ItemKey::flat("exercise"), 2)
                .unwrap();
        }
        let db = CompletionDb::open_at(&path).unwrap();
        assert_eq!(
            db.status("alice", date(6)).unwrap()["exercise"],
            TaskStatus::Flat(2)
        );
    }

    #[tokio::test]
    async fn serves_completion_store_contract() {
        let db = CompletionDb::open_memory().unwrap();
        let store: &dyn CompletionStore = &db;

        store
            .set_level("alice", date(6), &ItemKey::flat("reading"), 3)
            .await
            .unwrap();
        store
            .set_note("alice", date(6), "reading", "finished chapter")
            .await
            .unwrap();

        let status = store.today_status("alice", date(6)).await.unwrap();
        assert_eq!(status["reading"], TaskStatus::Flat(3));
        let window = store.history("alice", date(6), 30).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(
            store.note("alice", date(6), "reading").await.unwrap().as_deref(),
            Some("finished chapter")
        );
    }
}
