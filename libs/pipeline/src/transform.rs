use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relay_api::{Envelope, PipelineRecord, Provider};

use crate::config::TransformConfig;
use crate::error::TransformError;
use crate::pool::WorkerPool;

// ═══════════════════════════════════════════════════════════════
//  Transform trait
// ═══════════════════════════════════════════════════════════════

/// Результат трансформации: `Ok(None)`: запись отфильтрована.
pub type TransformFuture = Pin<Box<dyn Future<Output = Result<Option<Envelope>, TransformError>> + Send>>;

/// Пользовательская трансформация envelope'а.
///
/// Может быть синхронной (готовый future) или асинхронной; route в любом
/// случае ждёт результат до перехода к следующей записи.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn apply(&self, envelope: Envelope) -> TransformFuture;
}

/// Стратегия route'а.
#[derive(Clone)]
pub enum TransformStrategy {
    Passthrough,
    FilterRelabel { accept: Provider, relabel: Provider },
    Custom(Arc<dyn Transform>),
}

impl TransformStrategy {
    pub fn custom(transform: impl Transform + 'static) -> Self {
        TransformStrategy::Custom(Arc::new(transform))
    }

    pub fn name(&self) -> &str {
        match self {
            TransformStrategy::Passthrough => "passthrough",
            TransformStrategy::FilterRelabel { .. } => "filter_relabel",
            TransformStrategy::Custom(t) => t.name(),
        }
    }
}

impl TransformStrategy {
    /// Стратегия из конфига. `enrich` выполняет обогащение на `pool`.
    pub fn from_config(route: &str, config: &TransformConfig, pool: &WorkerPool) -> Self {
        match config {
            TransformConfig::Passthrough => TransformStrategy::Passthrough,
            TransformConfig::FilterRelabel { accept, relabel } => {
                TransformStrategy::FilterRelabel { accept: *accept, relabel: *relabel }
            }
            TransformConfig::Enrich { accept, relabel, annotate } => {
                let mut enrich = Enrich::annotate(route, pool.clone(), annotate.clone());
                if let Some(accept) = *accept {
                    enrich = enrich.with_filter(accept, relabel.unwrap_or(accept));
                }
                TransformStrategy::custom(enrich)
            }
        }
    }
}

impl std::fmt::Debug for TransformStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformStrategy::FilterRelabel { accept, relabel } => {
                write!(f, "FilterRelabel({accept} -> {relabel})")
            }
            other => f.write_str(other.name()),
        }
    }
}

fn filter_relabel(envelope: Envelope, accept: Provider, relabel: Provider) -> Option<Envelope> {
    (envelope.provider == accept).then(|| envelope.relabel(relabel))
}

// ═══════════════════════════════════════════════════════════════
//  Transformer: стадия route'а
// ═══════════════════════════════════════════════════════════════

/// Применяет стратегию к записи. Любой сбой стратегии (ошибка или panic)
/// превращается в skip: offset всё равно будет закоммичен.
pub struct Transformer {
    route: String,
    strategy: TransformStrategy,
}

impl Transformer {
    pub fn new(route: impl Into<String>, strategy: TransformStrategy) -> Self {
        Self { route: route.into(), strategy }
    }

    pub async fn apply(&self, record: PipelineRecord) -> PipelineRecord {
        let PipelineRecord { stream, offset, envelope } = record;
        let Some(envelope) = envelope else {
            return PipelineRecord::skip(stream, offset);
        };

        let result = match &self.strategy {
            TransformStrategy::Passthrough => Ok(Some(envelope)),
            TransformStrategy::FilterRelabel { accept, relabel } => {
                Ok(filter_relabel(envelope, *accept, *relabel))
            }
            TransformStrategy::Custom(transform) => run_custom(transform.clone(), envelope).await,
        };

        match result {
            Ok(Some(envelope)) => PipelineRecord::new(stream, offset, envelope),
            Ok(None) => {
                tracing::trace!(route = %self.route, offset, "record filtered out");
                PipelineRecord::skip(stream, offset)
            }
            Err(e) => {
                tracing::error!(
                    route = %self.route,
                    stream = %stream,
                    offset,
                    transform = self.strategy.name(),
                    error = %e,
                    "transform failed, skipping record"
                );
                PipelineRecord::skip(stream, offset)
            }
        }
    }
}

/// Отдельная задача: panic внутри пользовательского кода не роняет route.
async fn run_custom(
    transform: Arc<dyn Transform>,
    envelope: Envelope,
) -> Result<Option<Envelope>, TransformError> {
    match tokio::spawn(async move { transform.apply(envelope).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(TransformError::Panicked),
        Err(e) => Err(TransformError::failed(e)),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Enrich: фильтр + блокирующее обогащение на worker pool
// ═══════════════════════════════════════════════════════════════

type EnrichFn = dyn Fn(Envelope) -> Result<Option<Envelope>, TransformError> + Send + Sync;

/// Предобработка (опциональный filter/relabel), затем блокирующее
/// обогащение на [`WorkerPool`]. Результат возвращается в route асинхронно.
pub struct Enrich {
    name: String,
    pool: WorkerPool,
    filter: Option<(Provider, Provider)>,
    enrich: Arc<EnrichFn>,
}

impl Enrich {
    pub fn new<F>(name: impl Into<String>, pool: WorkerPool, enrich: F) -> Self
    where
        F: Fn(Envelope) -> Result<Option<Envelope>, TransformError> + Send + Sync + 'static,
    {
        Self { name: name.into(), pool, filter: None, enrich: Arc::new(enrich) }
    }

    /// Встроенное обогащение: дописать `fields` в `data` envelope'а.
    pub fn annotate(name: impl Into<String>, pool: WorkerPool, fields: BTreeMap<String, String>) -> Self {
        Self::new(name, pool, move |mut envelope: Envelope| {
            for (key, value) in &fields {
                envelope.data.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
            Ok(Some(envelope))
        })
    }

    /// Перед обогащением пропускать только `accept`, переименовывая в `relabel`.
    pub fn with_filter(mut self, accept: Provider, relabel: Provider) -> Self {
        self.filter = Some((accept, relabel));
        self
    }
}

impl Transform for Enrich {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, envelope: Envelope) -> TransformFuture {
        let envelope = match self.filter {
            Some((accept, relabel)) => filter_relabel(envelope, accept, relabel),
            None => Some(envelope),
        };
        let pool = self.pool.clone();
        let enrich = self.enrich.clone();

        Box::pin(async move {
            let Some(envelope) = envelope else {
                return Ok(None);
            };
            match pool.run(move || enrich(envelope)).await {
                Ok(result) => result,
                Err(e) => Err(TransformError::from(e)),
            }
        })
    }
}
