use std::collections::HashMap;
use std::sync::RwLock;

use relay_api::{OffsetStore, StoreError};

/// In-memory хранилище offset'ов. Для тестов и запусков без persistence.
#[derive(Default)]
pub struct MemoryOffsetStore {
    offsets: RwLock<HashMap<String, u64>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Хранилище с заранее записанными checkpoint'ами.
    pub fn with_offsets<I, S>(offsets: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            offsets: RwLock::new(offsets.into_iter().map(|(s, o)| (s.into(), o)).collect()),
        }
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError> {
        let guard = self.offsets.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.get(stream).copied())
    }

    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError> {
        let mut guard = self.offsets.write().map_err(|_| StoreError::LockPoisoned)?;
        guard.insert(stream.to_string(), offset);
        Ok(())
    }
}
