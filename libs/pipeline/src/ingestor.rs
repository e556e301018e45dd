use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{ErrorKind, OffsetSpec, OffsetStore, StreamRecord, StreamSubscription};

use crate::flow::FlowControl;
use crate::pool::WorkerPool;
use crate::route::RouteStats;

// ═══════════════════════════════════════════════════════════════
//  Offset recovery
// ═══════════════════════════════════════════════════════════════

/// Позиция старта подписки по checkpoint'у source stream'а.
///
/// Сбой чтения checkpoint'а не фатален: стартуем с начала stream'а.
/// Повторная доставка лучше потери данных.
pub async fn resolve_start(
    store: &Arc<dyn OffsetStore>,
    pool: &WorkerPool,
    route: &str,
    stream: &str,
) -> OffsetSpec {
    let lookup_store = store.clone();
    let lookup_stream = stream.to_string();
    let result = pool.run(move || lookup_store.get(&lookup_stream)).await;

    let checkpoint = match result {
        Ok(Ok(checkpoint)) => checkpoint,
        Ok(Err(e)) => {
            tracing::warn!(route = %route, stream = %stream, error = %e, "checkpoint lookup failed, starting from first");
            None
        }
        Err(e) => {
            tracing::warn!(route = %route, stream = %stream, error = %e, "checkpoint lookup failed, starting from first");
            None
        }
    };

    let start = OffsetSpec::resume_after(checkpoint);
    tracing::info!(route = %route, stream = %stream, checkpoint = ?checkpoint, %start, "resolved start offset");
    start
}

// ═══════════════════════════════════════════════════════════════
//  Ingestor task: subscription → route actor
// ═══════════════════════════════════════════════════════════════

/// Запустить ingestor: по одной записи из подписки в route.
///
/// Перед каждой записью ждёт `Resumed`, перед передачей записи ставит
/// `Suspended`. Credit подписке (`ack`) возвращается только после того, как
/// sink отпустил поток: так в route никогда нет больше одной записи.
pub fn spawn_ingestor(
    route: String,
    mut subscription: Box<dyn StreamSubscription>,
    tx: mpsc::Sender<StreamRecord>,
    flow: FlowControl,
    stats: Arc<RouteStats>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending_ack: Option<u64> = None;

        loop {
            let resumed = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                resumed = flow.wait_resumed() => resumed,
            };
            if !resumed {
                tracing::debug!(route = %route, "flow closed");
                break;
            }
            if let Some(offset) = pending_ack.take() {
                subscription.ack(offset);
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = subscription.recv() => next,
            };

            match next {
                Some(Ok(record)) => {
                    let offset = record.offset;
                    tracing::trace!(route = %route, offset, "delivered");
                    stats.record_delivered();
                    flow.suspend();
                    if tx.send(record).await.is_err() {
                        tracing::debug!(route = %route, "route actor gone");
                        break;
                    }
                    pending_ack = Some(offset);
                }
                Some(Err(e)) => {
                    // Запись до pipeline'а не дошла, offset не коммитится.
                    stats.record_ingest_drop();
                    match e.kind() {
                        ErrorKind::Format => {
                            tracing::warn!(route = %route, error = %e, "undeliverable record dropped");
                        }
                        kind => {
                            tracing::error!(route = %route, %kind, error = %e, "delivery failed, record dropped");
                        }
                    }
                }
                None => {
                    tracing::info!(route = %route, "subscription ended");
                    break;
                }
            }
        }

        if let Err(e) = subscription.close().await {
            tracing::warn!(route = %route, error = %e, "subscription close error");
        }
        tracing::info!(route = %route, "ingestor stopped");
    })
}
