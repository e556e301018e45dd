/// Category of a broker error. The ingestor uses it to tell a single
/// undeliverable record apart from a broken subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration: permanent, fail at startup.
    Config,
    /// I/O or network error.
    Io,
    /// Data format/parse error: bad input, skip record.
    Format,
    /// Logical error (not found, closed, invalid state).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for the stream broker boundary.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
#[derive(Clone)]
pub struct BrokerError {
    kind: ErrorKind,
    message: String,
}

impl BrokerError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Debug for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BrokerError {}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self { Self::io(e.to_string()) }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self { Self::format_err(e.to_string()) }
}

/// Errors produced by [`OffsetStore`](crate::OffsetStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connectivity or query failure of the underlying database.
    #[error("offset store backend: {0}")]
    Backend(String),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("offset store i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid store configuration.
    #[error("offset store config: {0}")]
    Config(String),

    /// Stored value cannot be represented as an offset.
    #[error("corrupt offset for stream '{stream}': {value}")]
    Corrupt { stream: String, value: i64 },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("offset store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Wrap any displayable backend error.
    pub fn backend(e: impl std::fmt::Display) -> Self {
        StoreError::Backend(e.to_string())
    }
}
