//! Durable journal stores.
//!
//! [`JsonFileStore`] keeps the whole collection as one JSON blob under the
//! storage key. [`SqliteJournalStore`] keeps one row per entry.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use shared::journal::{JournalEntry, JournalStore, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One JSON array in `<dir>/<key>.json`, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{key}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, entries: &[JournalEntry]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(entries)?;
        // Write beside the target then rename so readers never see half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl JournalStore for JsonFileStore {
    fn get_all(&self) -> Result<Vec<JournalEntry>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut entries = self.get_all()?;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.insert(0, entry.clone()),
        }
        self.write_all(&entries)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.get_all()?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Ok(());
        }
        self.write_all(&entries)
    }
}

/// Journal entries in a SQLite table.
#[derive(Clone)]
pub struct SqliteJournalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJournalStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(backend)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS journal_entries (
                id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("journal database lock poisoned".into()))
    }
}

impl JournalStore for SqliteJournalStore {
    fn get_all(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, title, content, updated_at FROM journal_entries")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, title, content, updated_at) = row.map_err(backend)?;
            let timestamp = DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(backend)?;
            entries.push(JournalEntry {
                id,
                title,
                content,
                timestamp,
            });
        }
        Ok(entries)
    }

    fn put(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO journal_entries (id, title, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.id,
                    entry.title,
                    entry.content,
                    entry.timestamp.to_rfc3339()
                ],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.lock()?
            .execute("DELETE FROM journal_entries WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(())
    }
}

fn backend<E: std::error::Error + Send + Sync + 'static>(e: E) -> StoreError {
    StoreError::Backend(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::journal::{Journal, JOURNAL_STORAGE_KEY};

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), JOURNAL_STORAGE_KEY);
        assert!(store.get_all().unwrap().is_empty());
        assert!(store.path().ends_with("nira-journal-entries.json"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mut journal =
                Journal::open(JsonFileStore::new(dir.path(), JOURNAL_STORAGE_KEY)).unwrap();
            let first = journal.create().unwrap().id.clone();
            let second = journal.create().unwrap().id.clone();
            journal.save(&second, "Ideas", "ship it").unwrap();
            journal.delete(&first).unwrap();
            second
        };

        let journal = Journal::open(JsonFileStore::new(dir.path(), JOURNAL_STORAGE_KEY)).unwrap();
        assert_eq!(journal.len(), 1);
        let entry = journal.get(&id).unwrap();
        assert_eq!(entry.title, "Ideas");
        assert_eq!(entry.content, "ship it");
        // No temp file left behind
        assert!(!dir.path().join("nira-journal-entries.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), "journal");
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.get_all(), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("journal.db");
        let id = {
            let mut journal = Journal::open(SqliteJournalStore::open(&db).unwrap()).unwrap();
            let id = journal.create().unwrap().id.clone();
            journal.save(&id, "Standup", "notes").unwrap();
            id
        };

        let journal = Journal::open(SqliteJournalStore::open(&db).unwrap()).unwrap();
        let entry = journal.get(&id).unwrap();
        assert_eq!(entry.title, "Standup");
        assert_eq!(entry.content, "notes");
    }

    #[test]
    fn test_sqlite_store_newest_first() {
        let mut journal = Journal::open(SqliteJournalStore::in_memory().unwrap()).unwrap();
        let a = journal.create().unwrap().id.clone();
        let b = journal.create().unwrap().id.clone();

        let reopened = Journal::open(journal.store().clone()).unwrap();
        let ids: Vec<&str> = reopened.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![b.as_str(), a.as_str()]);
    }
}
