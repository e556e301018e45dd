use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use relay_api::Provider;

use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Route Config
// ═══════════════════════════════════════════════════════════════

/// Конфигурация route'а: source stream → transform → destination stream.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Уникальное имя route'а (e.g., "bybit-analysis").
    pub name: String,
    /// Stream, из которого читаем. Он же ключ checkpoint'а.
    pub source: String,
    /// Stream, в который публикуем.
    pub destination: String,
    #[serde(default)]
    pub transform: TransformConfig,
}

/// Стратегия трансформации, задаваемая в конфиге.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    #[default]
    Passthrough,
    /// Пропускать только `accept`, переименовывая provider в `relabel`.
    FilterRelabel { accept: Provider, relabel: Provider },
    /// Опциональный filter/relabel, затем на worker pool в `data`
    /// дописываются поля `annotate` (существующие перезаписываются).
    Enrich {
        #[serde(default)]
        accept: Option<Provider>,
        #[serde(default)]
        relabel: Option<Provider>,
        #[serde(default)]
        annotate: BTreeMap<String, String>,
    },
}

// ═══════════════════════════════════════════════════════════════
//  Validation
// ═══════════════════════════════════════════════════════════════

/// Имена route'ов уникальны; у каждого source stream'а ровно один route;
/// route не публикует в свой же source.
pub fn validate_routes(routes: &[RouteConfig]) -> Result<(), PipelineError> {
    check_routes(
        routes
            .iter()
            .map(|r| (r.name.as_str(), r.source.as_str(), r.destination.as_str())),
    )
}

/// Проверка набора `(name, source, destination)`.
pub(crate) fn check_routes<'a>(
    routes: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
) -> Result<(), PipelineError> {
    let mut names = HashSet::new();
    let mut sources = HashSet::new();

    for (name, source, destination) in routes {
        if name.is_empty() {
            return Err(PipelineError::Config("route name must not be empty".into()));
        }
        if source.is_empty() || destination.is_empty() {
            return Err(PipelineError::Config(format!(
                "route '{name}': source and destination must not be empty"
            )));
        }
        if !names.insert(name) {
            return Err(PipelineError::Config(format!("duplicate route name '{name}'")));
        }
        if !sources.insert(source) {
            return Err(PipelineError::Config(format!(
                "stream '{source}' is the source of more than one route"
            )));
        }
        if source == destination {
            return Err(PipelineError::Config(format!(
                "route '{name}': source and destination are the same stream '{source}'"
            )));
        }
    }
    Ok(())
}
