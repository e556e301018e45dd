//! SQLite-backed [`OffsetStore`].
//!
//! Один `Mutex<Connection>`: вызовы приходят из worker pool, запросы
//! короткие, конкуренции за соединение практически нет.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};

use relay_api::{OffsetStore, StoreError};

use crate::{offset_from_sql, offset_to_sql};

/// Idempotent DDL для таблицы checkpoint'ов (SQLite dialect).
const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stream_offsets (
    stream TEXT PRIMARY KEY,
    "offset" INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const SELECT_OFFSET: &str = r#"SELECT "offset" FROM stream_offsets WHERE stream = ?1"#;

const UPSERT_OFFSET: &str = r#"INSERT INTO stream_offsets (stream, "offset") VALUES (?1, ?2)
ON CONFLICT(stream) DO UPDATE SET "offset" = excluded."offset", updated_at = datetime('now')"#;

/// Checkpoint'ы в локальном файле SQLite.
///
/// Создаётся через [`SqliteOffsetStore::open`] или
/// [`SqliteOffsetStore::in_memory`] для тестов.
pub struct SqliteOffsetStore {
    conn: Mutex<Connection>,
}

impl SqliteOffsetStore {
    /// Открыть (или создать) базу по пути, создав родительские директории.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        Self::init(conn)
    }

    /// База в памяти процесса.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(StoreError::backend)?;
        conn.execute_batch(CREATE_TABLE).map_err(StoreError::backend)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl OffsetStore for SqliteOffsetStore {
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError> {
        let conn = self.lock_conn()?;
        let value: Option<i64> = conn
            .query_row(SELECT_OFFSET, [stream], |row| row.get(0))
            .optional()
            .map_err(StoreError::backend)?;
        value.map(|v| offset_from_sql(stream, v)).transpose()
    }

    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError> {
        let value = offset_to_sql(offset)?;
        let conn = self.lock_conn()?;
        conn.execute(UPSERT_OFFSET, rusqlite::params![stream, value])
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
