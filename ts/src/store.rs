//! SQLite-backed Store
//!
//! One database file per store directory, opened in WAL mode. The directory
//! is locked for the lifetime of the `Store` so only one process writes it.

use fs2::FileExt;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::conflict::ConflictRecord;
use crate::error::{Result, StoreError};
use crate::outbox::OutboxEntry;
use crate::record::{Filter, Record};

/// Database file name inside the store directory
pub const DB_FILE: &str = "timerstore.db";

/// Lock file name inside the store directory
pub const LOCK_FILE: &str = ".lock";

const SCHEMA: &str = "BEGIN;
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        payload TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (collection, id)
    );
    CREATE TABLE IF NOT EXISTS record_indexes (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        value_int INTEGER,
        PRIMARY KEY (collection, id, field)
    );
    CREATE INDEX IF NOT EXISTS idx_record_indexes_field
        ON record_indexes (collection, field, value);
    CREATE TABLE IF NOT EXISTS outbox (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        op_id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        first_failure_at INTEGER,
        next_attempt_at INTEGER NOT NULL,
        last_error TEXT,
        stale INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        local TEXT NOT NULL,
        remote TEXT NOT NULL,
        strategy TEXT NOT NULL,
        resolved_at INTEGER NOT NULL
    );
    COMMIT;";

/// Durable record store
pub struct Store {
    base_path: PathBuf,
    conn: Connection,
    /// Held for the lifetime of the store; dropping it releases the lock
    _lock: File,
}

impl Store {
    /// Open or create a store in the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        debug!(?base_path, "Store::open: called");
        fs::create_dir_all(&base_path)?;

        let lock = File::create(base_path.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(base_path.clone()))?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(base_path.join(DB_FILE), flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %base_path.display(), "Opened timer store");
        Ok(Self {
            base_path,
            conn,
            _lock: lock,
        })
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Run `op` inside a single SQLite transaction
    ///
    /// Either every write made through the `StoreTx` commits, or none does.
    /// Callers may use their own error type as long as store errors convert into it.
    pub fn transaction<T, E>(&mut self, op: impl FnOnce(&StoreTx<'_>) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        debug!("Store::transaction: called");
        let tx = self.conn.transaction().map_err(StoreError::from)?;
        let out = op(&StoreTx { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    fn reader(&self) -> StoreTx<'_> {
        StoreTx { conn: &self.conn }
    }

    // === Records ===

    /// Insert a new record, failing if the id is taken
    pub fn create<T: Record>(&mut self, record: &T) -> Result<String> {
        debug!(id = %record.id(), collection = T::collection_name(), "Store::create: called");
        self.transaction(|tx| {
            if tx.get::<T>(record.id())?.is_some() {
                return Err(StoreError::AlreadyExists {
                    collection: T::collection_name().to_string(),
                    id: record.id().to_string(),
                });
            }
            tx.upsert(record)?;
            Ok(record.id().to_string())
        })
    }

    /// Replace an existing record, failing if it does not exist
    pub fn update<T: Record>(&mut self, record: &T) -> Result<()> {
        debug!(id = %record.id(), collection = T::collection_name(), "Store::update: called");
        self.transaction(|tx| {
            if tx.get::<T>(record.id())?.is_none() {
                return Err(StoreError::NotFound {
                    collection: T::collection_name().to_string(),
                    id: record.id().to_string(),
                });
            }
            tx.upsert(record)
        })
    }

    /// Insert or replace a record (last writer wins)
    pub fn upsert<T: Record>(&mut self, record: &T) -> Result<()> {
        debug!(id = %record.id(), collection = T::collection_name(), "Store::upsert: called");
        self.transaction(|tx| tx.upsert(record))
    }

    /// Get a record by id
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        self.reader().get(id)
    }

    /// Delete a record and its indexes; returns whether a row existed
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        debug!(%id, collection = T::collection_name(), "Store::delete: called");
        self.transaction(|tx| tx.delete::<T>(id))
    }

    /// List records matching all filters, oldest update first
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        self.reader().list(filters)
    }

    /// Delete every record whose index `field` equals `value`
    pub fn delete_by_index<T: Record>(&mut self, field: &str, value: crate::IndexValue) -> Result<usize> {
        debug!(%field, ?value, "Store::delete_by_index: called");
        let matches: Vec<T> = self.list(&[Filter::eq(field, value)])?;
        self.transaction(|tx| {
            let mut count = 0;
            for record in &matches {
                if tx.delete::<T>(record.id())? {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    /// Recompute indexes for every record of a collection
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        debug!(collection = T::collection_name(), "Store::rebuild_indexes: called");
        let records: Vec<T> = self.list(&[])?;
        self.transaction(|tx| {
            for record in &records {
                tx.write_indexes(record)?;
            }
            Ok(records.len())
        })
    }

    /// Raw JSON payloads of a collection, for inspection tools
    pub fn list_raw(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        debug!(%collection, "Store::list_raw: called");
        let mut stmt = self
            .conn
            .prepare("SELECT id, payload FROM records WHERE collection = ?1 ORDER BY updated_at ASC, id ASC")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            out.push((id, serde_json::from_str(&payload)?));
        }
        Ok(out)
    }

    /// Names of collections that hold at least one record
    pub fn collections(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT collection FROM records ORDER BY collection")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Outbox ===

    /// Append an entry to the outbox
    pub fn enqueue(&mut self, entry: &OutboxEntry) -> Result<()> {
        self.transaction(|tx| tx.enqueue(entry))
    }

    /// All outbox entries in write order
    pub fn pending(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare("SELECT * FROM outbox ORDER BY seq ASC")?;
        let rows = stmt.query_map([], OutboxEntry::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Number of outbox entries
    pub fn pending_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove an acknowledged entry
    pub fn ack(&mut self, op_id: &str) -> Result<bool> {
        debug!(%op_id, "Store::ack: called");
        let n = self.conn.execute("DELETE FROM outbox WHERE op_id = ?1", params![op_id])?;
        Ok(n > 0)
    }

    /// Record a failed push attempt and when to try again
    pub fn record_failure(&mut self, op_id: &str, error: &str, failed_at: i64, next_attempt_at: i64) -> Result<()> {
        debug!(%op_id, %error, next_attempt_at, "Store::record_failure: called");
        self.conn.execute(
            "UPDATE outbox SET attempts = attempts + 1, \
                first_failure_at = COALESCE(first_failure_at, ?2), \
                next_attempt_at = ?3, last_error = ?4 \
             WHERE op_id = ?1",
            params![op_id, failed_at, next_attempt_at, error],
        )?;
        Ok(())
    }

    /// Flag an entry as not yet synced past the retry window
    pub fn mark_stale(&mut self, op_id: &str) -> Result<()> {
        debug!(%op_id, "Store::mark_stale: called");
        self.conn
            .execute("UPDATE outbox SET stale = 1 WHERE op_id = ?1", params![op_id])?;
        Ok(())
    }

    /// Drop every pending entry for a record
    pub fn discard_for(&mut self, collection: &str, record_id: &str) -> Result<usize> {
        self.transaction(|tx| tx.discard_for(collection, record_id))
    }

    // === Conflicts ===

    /// Resolved conflicts, oldest first
    pub fn list_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let mut stmt = self.conn.prepare("SELECT * FROM conflicts ORDER BY id ASC")?;
        let rows = stmt.query_map([], ConflictRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Append a resolved conflict to the log
    pub fn record_conflict(&mut self, conflict: &ConflictRecord) -> Result<i64> {
        self.transaction(|tx| tx.record_conflict(conflict))
    }
}

/// Write handle valid inside `Store::transaction`
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    /// Get a record by id
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM records WHERE collection = ?1 AND id = ?2",
                params![T::collection_name(), id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a record and its indexes
    pub fn upsert<T: Record>(&self, record: &T) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO records (collection, id, payload, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(collection, id) DO UPDATE SET \
                payload = excluded.payload, \
                updated_at = excluded.updated_at",
            params![T::collection_name(), record.id(), payload, record.updated_at()],
        )?;
        self.write_indexes(record)
    }

    fn write_indexes<T: Record>(&self, record: &T) -> Result<()> {
        self.conn.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
            params![T::collection_name(), record.id()],
        )?;
        for (field, value) in record.indexed_fields() {
            self.conn.execute(
                "INSERT INTO record_indexes (collection, id, field, value, value_int) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![T::collection_name(), record.id(), field, value.as_text(), value.as_int()],
            )?;
        }
        Ok(())
    }

    /// Delete a record and its indexes
    pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
        self.conn.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
            params![T::collection_name(), id],
        )?;
        let n = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![T::collection_name(), id],
        )?;
        Ok(n > 0)
    }

    /// List records matching all filters, oldest update first
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        let mut sql = String::from("SELECT r.payload FROM records r WHERE r.collection = ?");
        let mut values = vec![SqlValue::Text(T::collection_name().to_string())];

        for filter in filters {
            let (column, value) = match filter.value.as_int() {
                Some(i) => ("value_int", SqlValue::Integer(i)),
                None => ("value", SqlValue::Text(filter.value.as_text())),
            };
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM record_indexes i \
                   WHERE i.collection = r.collection AND i.id = r.id \
                   AND i.field = ? AND i.{} {} ?)",
                column,
                filter.op.as_sql()
            ));
            values.push(SqlValue::Text(filter.field.clone()));
            values.push(value);
        }
        sql.push_str(" ORDER BY r.updated_at ASC, r.id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }

    /// Append an entry to the outbox
    pub fn enqueue(&self, entry: &OutboxEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO outbox (op_id, kind, collection, record_id, payload, created_at, \
                attempts, first_failure_at, next_attempt_at, last_error, stale) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.op_id,
                entry.kind,
                entry.collection,
                entry.record_id,
                serde_json::to_string(&entry.payload)?,
                entry.created_at,
                entry.attempts,
                entry.first_failure_at,
                entry.next_attempt_at,
                entry.last_error,
                entry.stale
            ],
        )?;
        Ok(())
    }

    /// Drop every pending entry for a record
    pub fn discard_for(&self, collection: &str, record_id: &str) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM outbox WHERE collection = ?1 AND record_id = ?2",
            params![collection, record_id],
        )?;
        Ok(n)
    }

    /// Whether a record has unacknowledged outbox entries
    pub fn has_pending(&self, collection: &str, record_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE collection = ?1 AND record_id = ?2",
            params![collection, record_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Append a resolved conflict to the log
    pub fn record_conflict(&self, conflict: &ConflictRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO conflicts (collection, record_id, local, remote, strategy, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conflict.collection,
                conflict.record_id,
                serde_json::to_string(&conflict.local)?,
                serde_json::to_string(&conflict.remote)?,
                conflict.strategy,
                conflict.resolved_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FilterOp, IndexValue};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        color: String,
        size: i64,
        updated_at: i64,
    }

    impl Widget {
        fn new(id: &str, color: &str, size: i64) -> Self {
            Self {
                id: id.to_string(),
                color: color.to_string(),
                size,
                updated_at: crate::now_ms(),
            }
        }
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }

        fn updated_at(&self) -> i64 {
            self.updated_at
        }

        fn collection_name() -> &'static str {
            "widgets"
        }

        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut fields = HashMap::new();
            fields.insert("color".to_string(), IndexValue::String(self.color.clone()));
            fields.insert("size".to_string(), IndexValue::Int(self.size));
            fields
        }
    }

    #[test]
    fn test_crud() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let w = Widget::new("w1", "red", 3);
        assert_eq!(store.create(&w).unwrap(), "w1");
        assert!(matches!(store.create(&w), Err(StoreError::AlreadyExists { .. })));

        let got: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(got, w);

        let mut changed = w.clone();
        changed.color = "blue".to_string();
        store.update(&changed).unwrap();
        let got: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(got.color, "blue");

        assert!(store.delete::<Widget>("w1").unwrap());
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        assert!(!store.delete::<Widget>("w1").unwrap());
    }

    #[test]
    fn test_update_missing_fails() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        let err = store.update(&Widget::new("nope", "red", 1)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_upsert_last_writer_wins() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        store.upsert(&Widget::new("w1", "red", 1)).unwrap();
        store.upsert(&Widget::new("w1", "green", 2)).unwrap();

        let all: Vec<Widget> = store.list(&[]).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].color, "green");

        // Old index value must be gone
        let red: Vec<Widget> = store
            .list(&[Filter::eq("color", IndexValue::String("red".to_string()))])
            .unwrap();
        assert!(red.is_empty());
    }

    #[test]
    fn test_list_filters() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.upsert(&Widget::new("a", "red", 1)).unwrap();
        store.upsert(&Widget::new("b", "red", 5)).unwrap();
        store.upsert(&Widget::new("c", "blue", 9)).unwrap();

        let red: Vec<Widget> = store
            .list(&[Filter::eq("color", IndexValue::String("red".to_string()))])
            .unwrap();
        assert_eq!(red.len(), 2);

        let big_red: Vec<Widget> = store
            .list(&[
                Filter::eq("color", IndexValue::String("red".to_string())),
                Filter {
                    field: "size".to_string(),
                    op: FilterOp::Gt,
                    value: IndexValue::Int(2),
                },
            ])
            .unwrap();
        assert_eq!(big_red.len(), 1);
        assert_eq!(big_red[0].id, "b");
    }

    #[test]
    fn test_delete_by_index_and_rebuild() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.upsert(&Widget::new("a", "red", 1)).unwrap();
        store.upsert(&Widget::new("b", "red", 2)).unwrap();
        store.upsert(&Widget::new("c", "blue", 3)).unwrap();

        assert_eq!(store.rebuild_indexes::<Widget>().unwrap(), 3);
        let removed = store
            .delete_by_index::<Widget>("color", IndexValue::String("red".to_string()))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list::<Widget>(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let temp = tempdir().unwrap();
        {
            let mut store = Store::open(temp.path()).unwrap();
            store.upsert(&Widget::new("w1", "red", 1)).unwrap();
        }
        let store = Store::open(temp.path()).unwrap();
        assert!(store.get::<Widget>("w1").unwrap().is_some());
    }

    #[test]
    fn test_second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _store = Store::open(temp.path()).unwrap();
        let err = Store::open(temp.path()).err().unwrap();
        assert!(matches!(err, StoreError::Locked(_)));
    }

    #[test]
    fn test_transaction_is_atomic() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let result: Result<()> = store.transaction(|tx| {
            tx.upsert(&Widget::new("w1", "red", 1))?;
            tx.enqueue(&OutboxEntry::new("create", "widgets", "w1", serde_json::json!({})))?;
            Err(StoreError::NotFound {
                collection: "widgets".to_string(),
                id: "boom".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_outbox_lifecycle() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let first = OutboxEntry::new("create", "widgets", "w1", serde_json::json!({"n": 1}));
        let second = OutboxEntry::new("update", "widgets", "w1", serde_json::json!({"n": 2}));
        let other = OutboxEntry::new("create", "widgets", "w2", serde_json::json!({}));
        store.enqueue(&first).unwrap();
        store.enqueue(&second).unwrap();
        store.enqueue(&other).unwrap();

        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].op_id, first.op_id);
        assert_eq!(pending[1].payload["n"], 2);

        store.record_failure(&first.op_id, "offline", 100, 200).unwrap();
        store.record_failure(&first.op_id, "offline", 150, 400).unwrap();
        let entry = store.pending().unwrap().remove(0);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.first_failure_at, Some(100));
        assert_eq!(entry.next_attempt_at, 400);
        assert_eq!(entry.last_error.as_deref(), Some("offline"));

        store.mark_stale(&first.op_id).unwrap();
        assert!(store.pending().unwrap()[0].stale);

        assert!(store.ack(&first.op_id).unwrap());
        assert_eq!(store.pending_count().unwrap(), 2);

        assert_eq!(store.discard_for("widgets", "w1").unwrap(), 1);
        let rest = store.pending().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].record_id, "w2");
    }

    #[test]
    fn test_conflict_log() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let conflict = ConflictRecord {
            id: 0,
            collection: "widgets".to_string(),
            record_id: "w1".to_string(),
            local: serde_json::json!({"owner": "a"}),
            remote: serde_json::json!({"owner": "b"}),
            strategy: "first-writer-wins".to_string(),
            resolved_at: 42,
        };
        let id = store.record_conflict(&conflict).unwrap();
        assert!(id > 0);

        let all = store.list_conflicts().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote["owner"], "b");
        assert_eq!(all[0].strategy, "first-writer-wins");
    }

    #[test]
    fn test_list_raw_and_collections() {
        let temp = tempdir().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.upsert(&Widget::new("w1", "red", 1)).unwrap();

        assert_eq!(store.collections().unwrap(), vec!["widgets".to_string()]);
        let raw = store.list_raw("widgets").unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].1["color"], "red");
    }
}
