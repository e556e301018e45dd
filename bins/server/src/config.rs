use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use offset_store::OffsetStoreConfig;
use pipeline::RouteConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "relay-server", about = "Relay stream'ов с подтверждённой публикацией и checkpoint'ами")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить route'ы
    Serve(ServeArgs),
    /// Прочитать или перезаписать checkpoint stream'а
    #[command(subcommand)]
    Offsets(OffsetsCommand),
}

impl Commands {
    pub fn config_path(&self) -> &str {
        match self {
            Commands::Serve(args) => &args.config,
            Commands::Offsets(OffsetsCommand::Get(args)) => &args.config,
            Commands::Offsets(OffsetsCommand::Set(args)) => &args.config,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum OffsetsCommand {
    /// Показать checkpoint
    Get(OffsetGetArgs),
    /// Записать checkpoint (следующий старт route'а начнётся с offset + 1)
    Set(OffsetSetArgs),
}

#[derive(Args, Clone, Debug)]
pub struct OffsetGetArgs {
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
    /// Source stream
    #[arg(long)]
    pub stream: String,
}

#[derive(Args, Clone, Debug)]
pub struct OffsetSetArgs {
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
    /// Source stream
    #[arg(long)]
    pub stream: String,
    /// Последний обработанный offset
    #[arg(long)]
    pub offset: u64,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Фильтр логов, если не задан RUST_LOG (e.g. "info,pipeline=debug").
    #[serde(default)]
    pub log_level: Option<String>,
    /// Размер worker pool'а для OffsetStore и enrichment.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub offsets: OffsetStoreConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_workers() -> usize {
    4
}

/// `[broker]`: in-process broker и его начальное содержимое.
#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: String,
    /// Stream'ы, объявляемые помимо source/destination route'ов.
    #[serde(default)]
    pub streams: Vec<String>,
    /// JSON-lines файлы, дописываемые в stream'ы при старте.
    #[serde(default)]
    pub seed: Vec<SeedConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { kind: default_broker_kind(), streams: Vec::new(), seed: Vec::new() }
    }
}

fn default_broker_kind() -> String {
    "memory".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub stream: String,
    pub file: PathBuf,
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.broker.kind != "memory" {
            return Err(ServerError::Config {
                context: "broker",
                detail: format!("unsupported broker kind '{}'", self.broker.kind),
            });
        }
        if self.workers == 0 {
            return Err(ServerError::Config { context: "workers", detail: "must be at least 1".into() });
        }
        if self.routes.is_empty() {
            return Err(ServerError::NoComponents("[[routes]]"));
        }
        pipeline::validate_routes(&self.routes)?;
        Ok(())
    }

    /// Все stream'ы, которые нужно объявить в broker'е.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let all = self
            .broker
            .streams
            .iter()
            .chain(self.routes.iter().flat_map(|r| [&r.source, &r.destination]))
            .chain(self.broker.seed.iter().map(|s| &s.stream));
        for name in all {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}
