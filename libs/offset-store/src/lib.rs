//! Реализации [`OffsetStore`]: in-memory, SQLite и PostgreSQL.
//!
//! Все реализации блокирующие и потокобезопасные; pipeline вызывает их
//! из worker pool.

mod memory;
mod pg;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use relay_api::{OffsetStore, StoreError};

pub use memory::MemoryOffsetStore;
pub use pg::PostgresOffsetStore;
pub use sqlite::SqliteOffsetStore;

/// Таблица checkpoint'ов по умолчанию.
pub const DEFAULT_TABLE: &str = "stream_offsets";

// ═══════════════════════════════════════════════════════════════
//  OffsetStoreConfig
// ═══════════════════════════════════════════════════════════════

/// Выбор backend'а хранилища offset'ов (`[offsets]` в конфиге).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum OffsetStoreConfig {
    /// Без persistence: checkpoint'ы теряются при рестарте.
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
    Postgres {
        /// libpq-style строка подключения или `postgresql://` URI.
        url: String,
        /// Имя таблицы, допускается `schema.table`.
        #[serde(default = "default_table")]
        table: String,
    },
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

impl OffsetStoreConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            OffsetStoreConfig::Memory => "memory",
            OffsetStoreConfig::Sqlite { .. } => "sqlite",
            OffsetStoreConfig::Postgres { .. } => "postgres",
        }
    }
}

/// Открыть хранилище по конфигу. Блокирующий вызов (подключение к БД, DDL).
pub fn open(config: &OffsetStoreConfig) -> Result<Arc<dyn OffsetStore>, StoreError> {
    let store: Arc<dyn OffsetStore> = match config {
        OffsetStoreConfig::Memory => Arc::new(MemoryOffsetStore::new()),
        OffsetStoreConfig::Sqlite { path } => Arc::new(SqliteOffsetStore::open(path)?),
        OffsetStoreConfig::Postgres { url, table } => {
            Arc::new(PostgresOffsetStore::connect(url, table)?)
        }
    };
    tracing::info!(backend = config.backend_name(), "offset store opened");
    Ok(store)
}

/// Проверить имя таблицы: `[A-Za-z_][A-Za-z0-9_]*`, опционально с одной
/// схемой через точку. Имя подставляется в SQL как идентификатор.
pub(crate) fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(StoreError::Config(format!("invalid table name '{table}'")));
    }
    for part in parts {
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::Config(format!("invalid table name '{table}'")));
        }
    }
    Ok(())
}

/// Offset → BIGINT. Offsets выше i64::MAX в SQL не представимы.
pub(crate) fn offset_to_sql(offset: u64) -> Result<i64, StoreError> {
    i64::try_from(offset)
        .map_err(|_| StoreError::Backend(format!("offset {offset} exceeds BIGINT range")))
}

pub(crate) fn offset_from_sql(stream: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt { stream: stream.to_string(), value })
}
