use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::state_store::{sort_descending, MediaStateStore, StoreError};

/// SQLite-backed shared state for scores, cursors, and selection indices.
pub struct DbManager {
    conn: Mutex<Connection>,
}

impl DbManager {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening state database at {}", db_path.display());
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let db_manager = Self {
            conn: Mutex::new(conn),
        };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|err| StoreError::Poisoned(err.to_string()))
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scores (
                set_key TEXT NOT NULL,
                member TEXT NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY(set_key, member)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS strings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS hash_fields (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY(key, field)
            )",
            [],
        )?;
        Ok(())
    }
}

impl MediaStateStore for DbManager {
    fn increment_score(&self, set: &str, member: &str, amount: f64) -> Result<f64, StoreError> {
        let conn = self.lock()?;
        let score = conn.query_row(
            "INSERT INTO scores (set_key, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(set_key, member) DO UPDATE SET score = score + excluded.score
             RETURNING score",
            params![set, member, amount],
            |row| row.get(0),
        )?;
        Ok(score)
    }

    fn set_score(&self, set: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO scores (set_key, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT(set_key, member) DO UPDATE SET score = excluded.score",
            params![set, member, score],
        )?;
        Ok(())
    }

    fn score(&self, set: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let score = self
            .lock()?
            .query_row(
                "SELECT score FROM scores WHERE set_key = ?1 AND member = ?2",
                params![set, member],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    }

    fn top_by_score(
        &self,
        set: &str,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT member, score FROM scores
             WHERE set_key = ?1 AND score >= ?2
             ORDER BY score DESC, member DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![set, min_score, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        // SQLite and the in-memory store must agree on tie order.
        sort_descending(&mut entries);
        Ok(entries)
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .lock()?
            .query_row(
                "SELECT value FROM strings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO strings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .lock()?
            .query_row(
                "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DbManager;
    use crate::state_store::MediaStateStore;

    #[test]
    fn test_increment_score_upserts_and_returns_total() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        assert_eq!(db.increment_score("set", "a", 1.0).ok(), Some(1.0));
        assert_eq!(db.increment_score("set", "a", 1.0).ok(), Some(2.0));
        db.set_score("set", "a", 0.0).expect("reset score");
        assert_eq!(db.score("set", "a").ok().flatten(), Some(0.0));
    }

    #[test]
    fn test_top_by_score_returns_highest_members_above_threshold() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        for (member, score) in [("a", 12.0), ("b", 8.0), ("c", 10.0), ("d", 9.0)] {
            db.set_score("set", member, score).expect("set score");
        }
        db.set_score("other", "z", 99.0).expect("set score");
        let top = db.top_by_score("set", 10.0, 3).expect("query");
        assert_eq!(top, vec![("a".to_string(), 12.0), ("c".to_string(), 10.0)]);
    }

    #[test]
    fn test_strings_and_hash_fields_persist_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.db");
        {
            let db = DbManager::open(&path).expect("open db");
            db.set_string("media.cursor:images/x1", "abc").expect("set");
            db.hash_set("channel:7", "prevJ", "3").expect("hset");
        }
        let db = DbManager::open(&path).expect("reopen db");
        assert_eq!(
            db.get_string("media.cursor:images/x1").ok().flatten().as_deref(),
            Some("abc")
        );
        assert_eq!(
            db.hash_get("channel:7", "prevJ").ok().flatten().as_deref(),
            Some("3")
        );
    }
}
