#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("no {0} configured")]
    NoComponents(&'static str),

    #[error("seed ({stream}): {detail}")]
    Seed { stream: String, detail: String },

    #[error("{0}")]
    Store(#[from] relay_api::StoreError),

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("blocking task: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
