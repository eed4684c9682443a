//! Persistence for the session table.
//!
//! The table is read and written wholesale; there is no per-key update or
//! delete. Callers serialize their load-modify-save cycles (see
//! [`crate::service::SessionService`]).

use std::path::Path;
use std::sync::Mutex;

use super::Database;
use crate::error::{CoreError, DatabaseError};
use crate::session::SessionTable;

/// Storage key the whole table lives under.
pub const SESSIONS_KEY: &str = "pomo.sessions";

pub trait SessionStore: Send + Sync {
    /// The full current table. An absent table is an empty one.
    fn load_all(&self) -> Result<SessionTable, CoreError>;

    /// Replace the persisted table.
    fn save_all(&self, table: &SessionTable) -> Result<(), CoreError>;

    /// Load, let `apply` edit the table, and save it if `apply` returns
    /// true. Returns whether the table was saved.
    ///
    /// `apply` is never called when the load fails. Stores shared between
    /// processes override this to make the whole cycle atomic; the default
    /// is only atomic against callers that serialize on their own.
    fn update(
        &self,
        apply: &mut dyn FnMut(&mut SessionTable) -> bool,
    ) -> Result<bool, CoreError> {
        let mut table = self.load_all()?;
        if !apply(&mut table) {
            return Ok(false);
        }
        self.save_all(&table)?;
        Ok(true)
    }
}

fn decode_table(json: &str) -> Result<SessionTable, CoreError> {
    serde_json::from_str(json).map_err(|e| {
        DatabaseError::CorruptTable {
            key: SESSIONS_KEY.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Session table stored as JSON in the SQLite `kv` table.
pub struct SqliteSessionStore {
    db: Mutex<Database>,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open the store in the default data directory.
    pub fn open() -> Result<Self, CoreError> {
        Ok(Self::new(Database::open()?))
    }

    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_memory() -> Result<Self, CoreError> {
        Ok(Self::new(Database::open_memory()?))
    }
}

impl SessionStore for SqliteSessionStore {
    fn load_all(&self) -> Result<SessionTable, CoreError> {
        let db = self.db.lock().map_err(|_| DatabaseError::Poisoned)?;
        match db.kv_get(SESSIONS_KEY)? {
            Some(json) => decode_table(&json),
            None => Ok(SessionTable::new()),
        }
    }

    fn save_all(&self, table: &SessionTable) -> Result<(), CoreError> {
        let json = serde_json::to_string(table)?;
        let db = self.db.lock().map_err(|_| DatabaseError::Poisoned)?;
        db.kv_set(SESSIONS_KEY, &json)?;
        Ok(())
    }

    fn update(
        &self,
        apply: &mut dyn FnMut(&mut SessionTable) -> bool,
    ) -> Result<bool, CoreError> {
        let mut db = self.db.lock().map_err(|_| DatabaseError::Poisoned)?;
        db.kv_update(SESSIONS_KEY, |current| {
            let mut table = match current {
                Some(json) => decode_table(&json)?,
                None => SessionTable::new(),
            };
            if !apply(&mut table) {
                return Ok(None);
            }
            Ok(Some(serde_json::to_string(&table)?))
        })
    }
}

/// In-process table, for embedding and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    table: Mutex<SessionTable>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load_all(&self) -> Result<SessionTable, CoreError> {
        let table = self.table.lock().map_err(|_| DatabaseError::Poisoned)?;
        Ok(table.clone())
    }

    fn save_all(&self, table: &SessionTable) -> Result<(), CoreError> {
        let mut current = self.table.lock().map_err(|_| DatabaseError::Poisoned)?;
        *current = table.clone();
        Ok(())
    }

    fn update(
        &self,
        apply: &mut dyn FnMut(&mut SessionTable) -> bool,
    ) -> Result<bool, CoreError> {
        let mut table = self.table.lock().map_err(|_| DatabaseError::Poisoned)?;
        let mut next = table.clone();
        if !apply(&mut next) {
            return Ok(false);
        }
        *table = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionStatus};

    fn sample_table() -> SessionTable {
        let mut table = SessionTable::new();
        table.insert(
            "boj-1000".into(),
            Session {
                status: SessionStatus::Focus,
                started_at: Some(0),
                end_at: Some(1_500_000),
                focus_min: Some(25),
                break_min: Some(5),
                cooldown_until: Some(300_000),
                ..Session::idle()
            },
        );
        table
    }

    #[test]
    fn sqlite_store_starts_empty() {
        let store = SqliteSessionStore::open_memory().unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn sqlite_store_replaces_whole_table() {
        let store = SqliteSessionStore::open_memory().unwrap();
        store.save_all(&sample_table()).unwrap();
        assert_eq!(store.load_all().unwrap(), sample_table());

        store.save_all(&SessionTable::new()).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn sqlite_store_uses_camel_case_layout() {
        let db = Database::open_memory().unwrap();
        let store = SqliteSessionStore::new(db);
        store.save_all(&sample_table()).unwrap();

        let db = store.db.lock().unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&db.kv_get(SESSIONS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw["boj-1000"]["endAt"], 1_500_000);
        assert_eq!(raw["boj-1000"]["cooldownUntil"], 300_000);
    }

    #[test]
    fn corrupt_table_is_an_error() {
        let store = SqliteSessionStore::open_memory().unwrap();
        store
            .db
            .lock()
            .unwrap()
            .kv_set(SESSIONS_KEY, "not json")
            .unwrap();
        assert!(matches!(
            store.load_all(),
            Err(CoreError::Database(DatabaseError::CorruptTable { .. }))
        ));
    }

    #[test]
    fn sqlite_update_sees_other_connections_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomohud.db");
        let first = SqliteSessionStore::open_at(&path).unwrap();
        let second = SqliteSessionStore::open_at(&path).unwrap();

        first.save_all(&sample_table()).unwrap();
        let saved = second
            .update(&mut |table| {
                table.insert("boj-2000".into(), Session::idle());
                true
            })
            .unwrap();
        assert!(saved);

        let table = first.load_all().unwrap();
        assert!(table.contains_key("boj-1000"));
        assert!(table.contains_key("boj-2000"));
    }

    #[test]
    fn update_on_corrupt_table_never_applies() {
        let store = SqliteSessionStore::open_memory().unwrap();
        store
            .db
            .lock()
            .unwrap()
            .kv_set(SESSIONS_KEY, "not json")
            .unwrap();

        let mut called = false;
        let result = store.update(&mut |_| {
            called = true;
            true
        });
        assert!(result.is_err());
        assert!(!called);
        assert_eq!(
            store.db.lock().unwrap().kv_get(SESSIONS_KEY).unwrap().as_deref(),
            Some("not json")
        );
    }

    #[test]
    fn declined_update_writes_nothing() {
        let store = MemorySessionStore::new();
        store.save_all(&sample_table()).unwrap();
        let saved = store
            .update(&mut |table| {
                table.clear();
                false
            })
            .unwrap();
        assert!(!saved);
        assert_eq!(store.load_all().unwrap(), sample_table());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemorySessionStore::new();
        store.save_all(&sample_table()).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
