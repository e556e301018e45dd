use crate::{Checkpoint, StoreError};

/// Durable mapping `stream → last committed offset`.
///
/// Ничего не знает о broker'е и pipeline. Методы блокирующие: pipeline
/// вызывает их из worker pool, поэтому реализации обязаны быть `Send + Sync`
/// и допускать конкурентные вызовы для разных stream'ов.
pub trait OffsetStore: Send + Sync {
    /// Последний закоммиченный offset stream'а, `None` если checkpoint'а нет.
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError>;

    /// Записать offset (last-write-wins). Идемпотентно; запись меньшего
    /// offset'а тоже успешна: монотонность обеспечивает вызывающий route.
    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError>;

    /// Checkpoint stream'а целиком (для CLI и диагностики).
    fn checkpoint(&self, stream: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .get(stream)?
            .map(|offset| Checkpoint { stream: stream.to_string(), offset }))
    }
}

impl<T: OffsetStore + ?Sized> OffsetStore for std::sync::Arc<T> {
    fn get(&self, stream: &str) -> Result<Option<u64>, StoreError> {
        (**self).get(stream)
    }

    fn upsert(&self, stream: &str, offset: u64) -> Result<(), StoreError> {
        (**self).upsert(stream, offset)
    }
}
