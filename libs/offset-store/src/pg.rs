//! PostgreSQL-backed [`OffsetStore`].
//!
//! Синхронный `postgres` crate с одним `Mutex<Client>`. Crate держит
//! собственный runtime, поэтому вызывать его можно только вне async
//! контекста: из worker pool / `spawn_blocking`.

use std::sync::{Mutex, MutexGuard};

use postgres::{Client, NoTls};

use relay_api::{OffsetStore, StoreError};

use crate::{offset_from_sql, offset_to_sql, validate_table_name};

/// Checkpoint'ы в таблице PostgreSQL:
/// `stream TEXT PRIMARY KEY, "offset" BIGINT, updated_at TIMESTAMPTZ`.
pub struct PostgresOffsetStore {
    client: Mutex<Client>,
    select_sql: String,
    upsert_sql: String,
}

impl PostgresOffsetStore {
    /// Подключиться и создать таблицу (и схему), если их нет.
    pub fn connect(url: &str, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let mut client = Client::connect(url, NoTls).map_err(StoreError::backend)?;
        client
            .batch_execute(&create_table_sql(table))
            .map_err(StoreError::backend)?;
        tracing::debug!(%table, "stream offsets table ready");
        Ok(Self {
            client: Mutex::new(client),
            select_sql: select_sql(table),
            upsert_sql: upsert_sql(table),
        })
    }

    fn lock_client(&self) -> Result<MutexGuard<'_, Client>, StoreError> {
        self.client.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn create_table_sql(table: &str) -> String {
    let schema = match table.split_once('.') {
        Some((schema, _)) => format!("CREATE SCHEMA IF NOT EXISTS {schema};\n"),
        None => String::new(),
    };
    format!(
        "{schema}CREATE TABLE IF NOT EXISTS {table} (\n    \
         stream TEXT PRIMARY KEY,\n    \
         \"offset\" BIGINT NOT NULL,\n    \
         updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n);"
    )
}

fn select_sql(table: &str) -> String {
    format!("SELECT \"offset\" FROM {table} WHERE stream = $1")
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (stream, \"offset\") VALUES ($1, $2) \
         ON CONFLICT (stream) DO UPDATE SET \"offset\" = EXCLUDED.\"offset\", updated_at = NOW()"
    )
}

impl OffsetStore for PostgresOffsetStore {
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError> {
        let mut client = self.lock_client()?;
        let row = client
            .query_opt(self.select_sql.as_str(), &[&stream])
            .map_err(StoreError::backend)?;
        match row {
            Some(row) => {
                let value: i64 = row.try_get(0).map_err(StoreError::backend)?;
                offset_from_sql(stream, value).map(Some)
            }
            None => Ok(None),
        }
    }

    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError> {
        let value = offset_to_sql(offset)?;
        let mut client = self.lock_client()?;
        client
            .execute(self.upsert_sql.as_str(), &[&stream, &value])
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
