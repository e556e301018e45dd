use std::sync::Arc;

use relay_api::{Confirmation, OffsetStore, PipelineRecord, StreamProducer};

use crate::error::SinkError;
use crate::flow::FlowControl;
use crate::pool::WorkerPool;
use crate::route::RouteStats;

// ═══════════════════════════════════════════════════════════════
//  Checkpoint sink: confirm-publish + checkpoint
// ═══════════════════════════════════════════════════════════════

/// Состояние цикла публикации.
///
/// `Idle → Publishing → Confirmed → Committing → Idle`, либо
/// `Publishing → Faulted` при отказе broker'а. Skip-записи идут сразу
/// `Idle → Committing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Publishing,
    Confirmed,
    Committing,
    Faulted,
}

/// Терминальная стадия route'а.
///
/// Offset коммитится только после подтверждения публикации (или для
/// skip-записи). Ingestion возобновляется только из `Idle`.
pub struct CheckpointSink {
    route: String,
    producer: Arc<dyn StreamProducer>,
    store: Arc<dyn OffsetStore>,
    pool: WorkerPool,
    flow: FlowControl,
    stats: Arc<RouteStats>,
    state: SinkState,
}

impl CheckpointSink {
    pub fn new(
        route: impl Into<String>,
        producer: Arc<dyn StreamProducer>,
        store: Arc<dyn OffsetStore>,
        pool: WorkerPool,
        flow: FlowControl,
        stats: Arc<RouteStats>,
    ) -> Self {
        Self {
            route: route.into(),
            producer,
            store,
            pool,
            flow,
            stats,
            state: SinkState::Idle,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Провести запись через полный цикл.
    ///
    /// `Err`: route в `Faulted`: поток закрыт, offset записи не закоммичен.
    pub async fn process(&mut self, record: PipelineRecord) -> Result<(), SinkError> {
        if self.state == SinkState::Faulted {
            return Err(SinkError::Faulted);
        }
        // До любого await: вторая запись не должна попасть в цикл.
        self.flow.suspend();

        let PipelineRecord { stream, offset, envelope } = record;

        match envelope {
            Some(envelope) => {
                self.transition(SinkState::Publishing, offset);

                let payload = match envelope.to_vec() {
                    Ok(payload) => payload,
                    Err(e) => return Err(self.fault(SinkError::Encode { offset, detail: e.to_string() })),
                };

                let pending = match self.producer.send(payload) {
                    Ok(pending) => pending,
                    Err(source) => return Err(self.fault(SinkError::Send { offset, source })),
                };

                match pending.await {
                    Confirmation::Confirmed => {
                        self.stats.record_published();
                        self.transition(SinkState::Confirmed, offset);
                    }
                    Confirmation::Rejected(reason) => {
                        return Err(self.fault(SinkError::Rejected { offset, reason }));
                    }
                }
            }
            None => self.stats.record_skipped(),
        }

        self.transition(SinkState::Committing, offset);
        self.commit(stream, offset).await;

        self.transition(SinkState::Idle, offset);
        self.flow.resume();
        Ok(())
    }

    /// Закрыть producer route'а. Повторный вызов безопасен.
    pub async fn close_producer(&self) {
        if let Err(e) = self.producer.close().await {
            tracing::warn!(route = %self.route, producer = %self.producer.stream(), error = %e, "producer close error");
        }
    }

    /// Записать checkpoint. Сбой логируется, но route продолжает работу:
    /// после рестарта запись будет доставлена и опубликована повторно.
    async fn commit(&self, stream: String, offset: u64) {
        let store = self.store.clone();
        let key = stream.clone();
        match self.pool.run(move || store.upsert(&key, offset)).await {
            Ok(Ok(())) => {
                tracing::debug!(route = %self.route, stream = %stream, offset, "checkpoint committed");
            }
            Ok(Err(e)) => {
                self.stats.record_commit_failure();
                tracing::warn!(route = %self.route, stream = %stream, offset, error = %e, "checkpoint write failed, resuming");
            }
            Err(e) => {
                self.stats.record_commit_failure();
                tracing::warn!(route = %self.route, stream = %stream, offset, error = %e, "checkpoint write failed, resuming");
            }
        }
    }

    fn transition(&mut self, next: SinkState, offset: u64) {
        tracing::trace!(route = %self.route, offset, from = ?self.state, to = ?next, "sink state");
        self.state = next;
    }

    fn fault(&mut self, error: SinkError) -> SinkError {
        tracing::error!(route = %self.route, producer = %self.producer.stream(), error = %error, "publish failed, route faulted");
        self.state = SinkState::Faulted;
        self.flow.close();
        error
    }
}
