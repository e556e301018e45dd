use std::path::Path;
use std::sync::Arc;

use offset_store::OffsetStoreConfig;
use pipeline::{PipelineCoordinator, Route, WorkerPool};
use relay_api::OffsetStore;
use stream_engine::MemoryBroker;

use crate::config::{SeedConfig, ServeArgs, ServerConfig};
use crate::error::ServerError;

pub async fn run(args: ServeArgs, config: ServerConfig) -> Result<(), ServerError> {
    tracing::info!("relay-server starting");
    config.validate()?;
    tracing::info!(config = %args.config, routes = config.routes.len(), "loaded config");

    // --- Broker ---
    let broker = Arc::new(MemoryBroker::new());
    for name in config.stream_names() {
        broker.declare(&name);
        tracing::debug!(stream = %name, "declared stream");
    }
    for seed in &config.broker.seed {
        let count = load_seed(&broker, seed)?;
        tracing::info!(stream = %seed.stream, file = %seed.file.display(), records = count, "seeded stream");
    }

    // --- Offset store ---
    let store = open_store(config.offsets.clone()).await?;

    // --- Routes ---
    let pool = WorkerPool::new(config.workers);
    let routes: Vec<Route> = config.routes.iter().map(|r| Route::from_config(r, &pool)).collect();
    let mut coordinator = match PipelineCoordinator::new(broker.clone(), store.clone(), pool, routes) {
        Ok(c) => c,
        Err(e) => {
            release_store(store).await;
            return Err(e.into());
        }
    };
    if let Err(e) = coordinator.start().await {
        drop(coordinator);
        release_store(store).await;
        return Err(e.into());
    }
    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    let signal = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down...");

    let stopped = coordinator.stop().await;
    for route in coordinator.routes() {
        if route.status().is_faulted() {
            tracing::warn!(route = %route.name(), source = %route.source(), status = %route.status(), "route needs restart");
        }
    }
    drop(coordinator);
    release_store(store).await;

    signal?;
    stopped?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Открыть хранилище вне async контекста: sync-клиенты БД (postgres)
/// держат собственный runtime.
async fn open_store(config: OffsetStoreConfig) -> Result<Arc<dyn OffsetStore>, ServerError> {
    let store = tokio::task::spawn_blocking(move || offset_store::open(&config)).await??;
    Ok(store)
}

async fn release_store(store: Arc<dyn OffsetStore>) {
    if let Err(e) = tokio::task::spawn_blocking(move || drop(store)).await {
        tracing::warn!(error = %e, "offset store release failed");
    }
}

/// Дописать в stream непустые строки JSON-lines файла. Строки не
/// валидируются: плохие записи отсеет decoder route'а.
fn load_seed(broker: &MemoryBroker, seed: &SeedConfig) -> Result<usize, ServerError> {
    let lines = read_lines(&seed.file).map_err(|e| ServerError::Seed {
        stream: seed.stream.clone(),
        detail: format!("'{}': {e}", seed.file.display()),
    })?;

    let mut count = 0;
    for line in lines {
        broker
            .publish(&seed.stream, line.into_bytes())
            .map_err(|e| ServerError::Seed { stream: seed.stream.clone(), detail: e.to_string() })?;
        count += 1;
    }
    Ok(count)
}

fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
