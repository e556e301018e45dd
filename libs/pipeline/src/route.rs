use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::StreamRecord;

use crate::config::RouteConfig;
use crate::decoder;
use crate::pool::WorkerPool;
use crate::sink::CheckpointSink;
use crate::transform::{TransformStrategy, Transformer};

// ═══════════════════════════════════════════════════════════════
//  Route
// ═══════════════════════════════════════════════════════════════

/// Описание route'а: source stream → strategy → destination stream.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub source: String,
    pub destination: String,
    pub strategy: TransformStrategy,
}

impl Route {
    pub fn new(name: impl Into<String>, source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            strategy: TransformStrategy::Passthrough,
        }
    }

    pub fn with_strategy(mut self, strategy: TransformStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Route из конфига; блокирующие стратегии получают `pool`.
    pub fn from_config(config: &RouteConfig, pool: &WorkerPool) -> Self {
        Route::new(&config.name, &config.source, &config.destination)
            .with_strategy(TransformStrategy::from_config(&config.name, &config.transform, pool))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Status & Stats
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteStatus {
    Starting,
    Running,
    /// Публикация не подтверждена; route остановлен до внешнего рестарта.
    Faulted(String),
    Stopped,
}

impl RouteStatus {
    pub fn is_faulted(&self) -> bool {
        matches!(self, RouteStatus::Faulted(_))
    }
}

impl std::fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteStatus::Starting => f.write_str("starting"),
            RouteStatus::Running => f.write_str("running"),
            RouteStatus::Faulted(reason) => write!(f, "faulted: {reason}"),
            RouteStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// Счётчики route'а.
#[derive(Debug, Default)]
pub struct RouteStats {
    delivered: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    commit_failures: AtomicU64,
    ingest_drops: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub published: u64,
    pub skipped: u64,
    pub commit_failures: u64,
    pub ingest_drops: u64,
}

impl RouteStats {
    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ingest_drop(&self) {
        self.ingest_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            ingest_drops: self.ingest_drops.load(Ordering::Relaxed),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Route handle
// ═══════════════════════════════════════════════════════════════

/// Запущенный route: задачи ingestor'а и actor'а плюс наблюдаемое состояние.
pub struct RouteHandle {
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) status: Arc<watch::Sender<RouteStatus>>,
    pub(crate) stats: Arc<RouteStats>,
    pub(crate) token: CancellationToken,
    pub(crate) ingestor: Option<JoinHandle<()>>,
    pub(crate) actor: Option<JoinHandle<()>>,
}

impl RouteHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn status(&self) -> RouteStatus {
        self.status.borrow().clone()
    }

    /// Подписка на изменения статуса.
    pub fn watch_status(&self) -> watch::Receiver<RouteStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Route actor: decode → transform → sink
// ═══════════════════════════════════════════════════════════════

/// Все стадии route'а выполняются в одной задаче, последовательно.
///
/// Завершается, когда ingestor закрыл канал (записи в работе дорабатываются)
/// или когда sink ушёл в fault.
pub(crate) fn spawn_route_actor(
    route: String,
    transformer: Transformer,
    mut sink: CheckpointSink,
    mut rx: mpsc::Receiver<StreamRecord>,
    status: Arc<watch::Sender<RouteStatus>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let record = decoder::decode(&route, record);
            let record = transformer.apply(record).await;

            if let Err(e) = sink.process(record).await {
                status.send_replace(RouteStatus::Faulted(e.to_string()));
                // Закрыть канал: ingestor больше ничего не передаст.
                rx.close();
                sink.close_producer().await;
                tracing::error!(route = %route, error = %e, "route halted");
                return;
            }
        }

        tracing::info!(route = %route, "route drained");
    })
}
