//! Notes journal: entry model, storage interface and the in-memory collection.
//!
//! The journal loads its entries once when opened and writes every change
//! through a [`JournalStore`], so the medium (file, SQLite, memory) can be
//! swapped without touching callers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Key the journal collection is persisted under.
pub const JOURNAL_STORAGE_KEY: &str = "nira-journal-entries";

pub const DEFAULT_ENTRY_TITLE: &str = "New Entry";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Creation time in milliseconds since the Unix epoch
    pub id: String,
    pub title: String,
    pub content: String,
    /// Last modified
    pub timestamp: DateTime<Utc>,
}

impl JournalEntry {
    fn new(id: String) -> Self {
        Self {
            id,
            title: DEFAULT_ENTRY_TITLE.to_string(),
            content: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Display format used in the entry list, e.g. "Mar 04, 09:15"
    pub fn formatted_time(&self) -> String {
        self.timestamp.format("%b %d, %H:%M").to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("journal storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal data is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("journal storage backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("no journal entry with id {0}")]
    NotFound(String),
}

/// Persistence medium for journal entries.
pub trait JournalStore {
    fn get_all(&self) -> Result<Vec<JournalEntry>, StoreError>;
    /// Insert or replace by id.
    fn put(&self, entry: &JournalEntry) -> Result<(), StoreError>;
    /// Removing an unknown id is not an error.
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Lets the medium be picked at runtime.
impl<S: JournalStore + ?Sized> JournalStore for Box<S> {
    fn get_all(&self) -> Result<Vec<JournalEntry>, StoreError> {
        (**self).get_all()
    }

    fn put(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        (**self).put(entry)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        (**self).delete(id)
    }
}

/// Keeps entries in memory only. Handy for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryJournalStore {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for MemoryJournalStore {
    fn get_all(&self) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn put(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.insert(0, entry.clone()),
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.lock().retain(|e| e.id != id);
        Ok(())
    }
}

/// The journal as the editor sees it: newest entry first.
pub struct Journal<S: JournalStore> {
    store: S,
    entries: Vec<JournalEntry>,
    last_id: i64,
}

impl<S: JournalStore> Journal<S> {
    /// Load the persisted collection once.
    pub fn open(store: S) -> Result<Self, StoreError> {
        let mut entries = store.get_all()?;
        entries.sort_by(|a, b| id_millis(&b.id).cmp(&id_millis(&a.id)));
        let last_id = entries.iter().map(|e| id_millis(&e.id)).max().unwrap_or(0);
        Ok(Self {
            store,
            entries,
            last_id,
        })
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&JournalEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create an entry with the placeholder title and an empty body.
    pub fn create(&mut self) -> Result<&JournalEntry, StoreError> {
        let id = self.next_id();
        let entry = JournalEntry::new(id.to_string());
        self.store.put(&entry)?;
        self.last_id = id;
        self.entries.insert(0, entry);
        Ok(&self.entries[0])
    }

    /// Replace title and body of an existing entry and bump its timestamp.
    pub fn save(&mut self, id: &str, title: &str, content: &str) -> Result<&JournalEntry, StoreError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = self.entries[pos].clone();
        updated.title = title.to_string();
        updated.content = content.to_string();
        updated.timestamp = Utc::now();
        self.store.put(&updated)?;
        self.entries[pos] = updated;
        Ok(&self.entries[pos])
    }

    /// Returns whether an entry was removed.
    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return Ok(false);
        };
        self.store.delete(id)?;
        self.entries.remove(pos);
        Ok(true)
    }

    fn next_id(&self) -> i64 {
        Utc::now().timestamp_millis().max(self.last_id + 1)
    }
}

fn id_millis(id: &str) -> i64 {
    id.parse().unwrap_or(0)
}
