use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use relay_api::{OffsetStore, StreamBroker, StreamProducer};

use crate::PipelineError;
use crate::config::check_routes;
use crate::flow::FlowControl;
use crate::ingestor::{resolve_start, spawn_ingestor};
use crate::pool::WorkerPool;
use crate::route::{Route, RouteHandle, RouteStats, RouteStatus, spawn_route_actor};
use crate::sink::CheckpointSink;
use crate::transform::Transformer;

// ═══════════════════════════════════════════════════════════════
//  PipelineCoordinator
// ═══════════════════════════════════════════════════════════════

/// Владелец всех route'ов процесса.
///
/// Старт: сначала producer'ы всех route'ов, потом подписки: публиковать
/// должно быть куда раньше, чем придёт первая запись.
/// Стоп: consumers → drain route'ов → producers → сессия broker'а.
pub struct PipelineCoordinator {
    broker: Arc<dyn StreamBroker>,
    store: Arc<dyn OffsetStore>,
    pool: WorkerPool,
    routes: Vec<Route>,
    producers: Vec<Arc<dyn StreamProducer>>,
    handles: Vec<RouteHandle>,
    started: bool,
}

impl PipelineCoordinator {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        store: Arc<dyn OffsetStore>,
        pool: WorkerPool,
        routes: Vec<Route>,
    ) -> Result<Self, PipelineError> {
        check_routes(
            routes
                .iter()
                .map(|r| (r.name.as_str(), r.source.as_str(), r.destination.as_str())),
        )?;
        Ok(Self {
            broker,
            store,
            pool,
            routes,
            producers: Vec::new(),
            handles: Vec::new(),
            started: false,
        })
    }

    /// Запустить все route'ы. При ошибке уже запущенное останавливается.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        if self.started {
            return Err(PipelineError::AlreadyStarted);
        }
        self.started = true;

        if let Err(e) = self.start_routes().await {
            tracing::error!(error = %e, "pipeline start failed, stopping");
            if let Err(stop_err) = self.stop().await {
                tracing::warn!(error = %stop_err, "stop after failed start");
            }
            return Err(e);
        }

        tracing::info!(routes = self.handles.len(), workers = self.pool.size(), "pipeline started");
        Ok(())
    }

    async fn start_routes(&mut self) -> Result<(), PipelineError> {
        for route in &self.routes {
            let producer = self
                .broker
                .create_producer(&route.destination)
                .await
                .map_err(|source| PipelineError::Producer {
                    route: route.name.clone(),
                    stream: route.destination.clone(),
                    source,
                })?;
            tracing::info!(route = %route.name, stream = %route.destination, "producer created");
            self.producers.push(Arc::from(producer));
        }

        for (route, producer) in self.routes.iter().zip(&self.producers) {
            let status = Arc::new(watch::channel(RouteStatus::Starting).0);

            let start = resolve_start(&self.store, &self.pool, &route.name, &route.source).await;
            let subscription = self
                .broker
                .subscribe(&route.source, start)
                .await
                .map_err(|source| PipelineError::Subscription {
                    route: route.name.clone(),
                    stream: route.source.clone(),
                    source,
                })?;

            let flow = FlowControl::new();
            let stats = Arc::new(RouteStats::default());
            let token = CancellationToken::new();
            let (tx, rx) = mpsc::channel(1);

            let sink = CheckpointSink::new(
                route.name.clone(),
                producer.clone(),
                self.store.clone(),
                self.pool.clone(),
                flow.clone(),
                stats.clone(),
            );
            let transformer = Transformer::new(route.name.clone(), route.strategy.clone());

            status.send_replace(RouteStatus::Running);
            let actor = spawn_route_actor(
                route.name.clone(),
                transformer,
                sink,
                rx,
                status.clone(),
            );
            let ingestor = spawn_ingestor(
                route.name.clone(),
                subscription,
                tx,
                flow,
                stats.clone(),
                token.clone(),
            );

            tracing::info!(
                route = %route.name,
                source = %route.source,
                destination = %route.destination,
                transform = ?route.strategy,
                %start,
                "route started"
            );

            self.handles.push(RouteHandle {
                name: route.name.clone(),
                source: route.source.clone(),
                status,
                stats,
                token,
                ingestor: Some(ingestor),
                actor: Some(actor),
            });
        }
        Ok(())
    }

    pub fn routes(&self) -> &[RouteHandle] {
        &self.handles
    }

    pub fn route(&self, name: &str) -> Option<&RouteHandle> {
        self.handles.iter().find(|h| h.name == name)
    }

    /// Graceful shutdown. Текущий цикл публикации каждого route'а
    /// дорабатывается до конца, прерывания публикации нет.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        // 1. Consumers: больше никаких новых записей.
        for handle in &self.handles {
            handle.token.cancel();
        }
        for handle in &mut self.handles {
            if let Some(task) = handle.ingestor.take()
                && let Err(e) = task.await
            {
                tracing::error!(route = %handle.name, error = %e, "ingestor task failed");
            }
        }

        // 2. Drain: запись в работе доходит до Idle или Faulted.
        for handle in &mut self.handles {
            if let Some(task) = handle.actor.take()
                && let Err(e) = task.await
            {
                tracing::error!(route = %handle.name, error = %e, "route task failed");
            }
            handle.status.send_if_modified(|status| {
                if status.is_faulted() || *status == RouteStatus::Stopped {
                    false
                } else {
                    *status = RouteStatus::Stopped;
                    true
                }
            });
            let stats = handle.stats.snapshot();
            tracing::info!(
                route = %handle.name,
                status = %handle.status(),
                delivered = stats.delivered,
                published = stats.published,
                skipped = stats.skipped,
                commit_failures = stats.commit_failures,
                ingest_drops = stats.ingest_drops,
                "route stopped"
            );
        }

        // 3. Producers.
        for producer in self.producers.drain(..) {
            if let Err(e) = producer.close().await {
                tracing::warn!(stream = %producer.stream(), error = %e, "producer close error");
            }
        }

        // 4. Сессия broker'а.
        self.broker.close().await.map_err(PipelineError::BrokerClose)?;
        tracing::info!("pipeline stopped");
        Ok(())
    }
}
