use relay_api::BrokerError;

/// Ошибки сборки и запуска pipeline'а.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("route config: {0}")]
    Config(String),

    #[error("route [{route}] producer ({stream}): {source}")]
    Producer { route: String, stream: String, source: BrokerError },

    #[error("route [{route}] subscription ({stream}): {source}")]
    Subscription { route: String, stream: String, source: BrokerError },

    #[error("broker close: {0}")]
    BrokerClose(BrokerError),

    #[error("coordinator already started")]
    AlreadyStarted,
}

/// Fault route'а: публикация не подтверждена. Терминально для route'а.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("publish of offset {offset} rejected: {reason}")]
    Rejected { offset: u64, reason: String },

    #[error("publish of offset {offset} failed: {source}")]
    Send { offset: u64, source: BrokerError },

    #[error("encode of offset {offset}: {detail}")]
    Encode { offset: u64, detail: String },

    #[error("sink is faulted")]
    Faulted,
}

/// Сбой стратегии трансформации. Запись пропускается, offset коммитится.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("transform failed: {0}")]
    Failed(String),

    #[error("transform panicked")]
    Panicked,

    #[error("transform worker: {0}")]
    Worker(WorkerError),
}

impl TransformError {
    pub fn failed(e: impl std::fmt::Display) -> Self {
        TransformError::Failed(e.to_string())
    }
}

impl From<WorkerError> for TransformError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::Panicked => TransformError::Panicked,
            other => TransformError::Worker(other),
        }
    }
}

/// Байты не разбираются в envelope. Запись пропускается, offset коммитится.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker pool closed")]
    Closed,

    #[error("worker task panicked")]
    Panicked,

    #[error("worker task cancelled")]
    Cancelled,
}
