//! Warm-start cache: a key -> JSON blob store namespaced per user.
//!
//! Nothing here is authoritative. The cache lets a session show the last
//! known state while the remote is unreachable and keeps the achievement
//! ledger between runs.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{data_dir, migrations};
use crate::achievements::AchievementLedger;
use crate::day_record::DayRecord;
use crate::error::DatabaseError;

const TODAY: &str = "today";
const LEDGER: &str = "achievements";

pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    /// Open the cache inside `~/.config/checkin/checkin.db`.
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

    fn key(user: &str, name: &str) -> String {
        format!("user/{user}/{name}")
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Decode the blob stored under `user/<user>/<name>`. A blob that no
    /// longer decodes reads as absent.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        user: &str,
        name: &str,
    ) -> Result<Option<T>, DatabaseError> {
        let Some(raw) = self.kv_get(&Self::key(user, name))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(user = %user, name = %name, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    pub fn put_json<T: Serialize>(
        &self,
        user: &str,
        name: &str,
        value: &T,
    ) -> Result<(), DatabaseError> {
        let raw =
            serde_json::to_string(value).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        self.kv_set(&Self::key(user, name), &raw)
    }

    /// Remove every entry of `user`. The key prefix is compared exactly:
    /// `LIKE` would treat `_` and `%` as wildcards and ignore ASCII case.
    pub fn clear_user(&self, user: &str) -> Result<usize, DatabaseError> {
        let prefix = Self::key(user, "");
        let removed = self.conn().execute(
            "DELETE FROM kv WHERE substr(key, 1, ?2) = ?1",
            params![prefix, prefix.chars().count() as i64],
        )?;
        debug!(user = %user, removed, "cleared cached entries");
        Ok(removed)
    }

    pub fn load_today(&self, user: &str) -> Result<Option<DayRecord>, DatabaseError> {
        self.get_json(user, TODAY)
    }

    pub fn save_today(&self, user: &str, record: &DayRecord) -> Result<(), DatabaseError> {
        self.put_json(user, TODAY, record)
    }

    pub fn load_ledger(&self, user: &str) -> Result<AchievementLedger, DatabaseError> {
        Ok(self.get_json(user, LEDGER)?.unwrap_or_default())
    }

    pub fn save_ledger(&self, user: &str, ledger: &AchievementLedger) -> Result<(), DatabaseError> {
        self.put_json(user, LEDGER, ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemKey;
    use chrono::NaiveDate;

    #[test]
    fn kv_store() {
        let cache = LocalCache::open_memory().unwrap();
        assert!(cache.kv_get("test").unwrap().is_none());
        cache.kv_set("test", "hello").unwrap();
        assert_eq!(cache.kv_get("test").unwrap().unwrap(), "hello");
    }

    #[test]
    fn today_record_roundtrips_per_user() {
        let cache = LocalCache::open_memory().unwrap();
        let mut record = DayRecord::new(NaiveDate::from_ymd_opt(2025, 10, 6).unwrap());
        record.put_level(ItemKey::flat("reading"), 2);

        cache.save_today("alice", &record).unwrap();
        assert_eq!(cache.load_today("alice").unwrap(), Some(record));
        assert_eq!(cache.load_today("bob").unwrap(), None);
    }

    #[test]
    fn corrupt_entry_reads_as_absent() {
        let cache = LocalCache::open_memory().unwrap();
        cache.kv_set("user/alice/today", "{not json").unwrap();
        assert_eq!(cache.load_today("alice").unwrap(), None);
    }

    #[test]
    fn ledger_defaults_to_empty_and_clears() {
        let cache = LocalCache::open_memory().unwrap();
        assert!(cache.load_ledger("alice").unwrap().is_empty());

        let mut ledger = AchievementLedger::new();
        ledger.insert("first_star");
        cache.save_ledger("alice", &ledger).unwrap();
        cache.save_ledger("alicex", &ledger).unwrap();
        assert!(cache.load_ledger("alice").unwrap().contains("first_star"));

        assert_eq!(cache.clear_user("alice").unwrap(), 1);
        assert!(cache.load_ledger("alice").unwrap().is_empty());
        assert!(!cache.load_ledger("alicex").unwrap().is_empty());
    }

    #[test]
    fn clear_user_matches_the_exact_id() {
        let cache = LocalCache::open_memory().unwrap();
        let mut ledger = AchievementLedger::new();
        ledger.insert("first_star");
        for user in ["Alice", "alice", "ab", "a_", "a%"] {
            cache.save_ledger(user, &ledger).unwrap();
        }

        assert_eq!(cache.clear_user("alice").unwrap(), 1);
        assert!(cache.load_ledger("alice").unwrap().is_empty());
        assert!(cache.load_ledger("Alice").unwrap().contains("first_star"));

        assert_eq!(cache.clear_user("a_").unwrap(), 1);
        assert!(cache.load_ledger("ab").unwrap().contains("first_star"));
        assert!(cache.load_ledger("a%").unwrap().contains("first_star"));

        assert_eq!(cache.clear_user("nobody").unwrap(), 0);
    }
}
