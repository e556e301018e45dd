use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::WorkerError;

/// Ограниченный пул для блокирующих вызовов: OffsetStore и enrichment.
///
/// Поверх `spawn_blocking`: семафор на `size` одновременных задач, чтобы
/// медленная БД не съела весь blocking-пул tokio.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Выполнить `f` на пуле и вернуть результат в вызывающую задачу.
    pub async fn run<F, T>(&self, f: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Closed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                WorkerError::Panicked
            } else {
                WorkerError::Cancelled
            }
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}
