//! Checkpointed stream relay: ingest → decode → transform →
//! confirm-publish → checkpoint, по одному actor'у на route.

pub mod config;
pub mod error;
mod coordinator;
mod decoder;
mod flow;
mod ingestor;
mod pool;
mod route;
mod sink;
mod transform;

pub use config::{RouteConfig, TransformConfig, validate_routes};
pub use coordinator::PipelineCoordinator;
pub use decoder::{decode, try_decode};
pub use error::{DecodeError, PipelineError, SinkError, TransformError, WorkerError};
pub use flow::{FlowControl, FlowState};
pub use ingestor::{resolve_start, spawn_ingestor};
pub use pool::WorkerPool;
pub use route::{Route, RouteHandle, RouteStats, RouteStatus, StatsSnapshot};
pub use sink::{CheckpointSink, SinkState};
pub use transform::{Enrich, Transform, TransformFuture, TransformStrategy, Transformer};
