#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream '{0}' not found")]
    NotFound(String),

    #[error("stream '{0}' is closed")]
    Closed(String),

    #[error("broker session is closed")]
    SessionClosed,
}

impl StreamError {
    /// Convert to BrokerError.
    ///
    /// `NotFound` → Config kind (stream must be declared up front).
    /// `Closed` / `SessionClosed` → Logic kind.
    pub fn into_broker_error(self) -> relay_api::BrokerError {
        match self {
            StreamError::NotFound(_) => relay_api::BrokerError::config(self.to_string()),
            StreamError::Closed(_) | StreamError::SessionClosed => {
                relay_api::BrokerError::new(self.to_string())
            }
        }
    }
}
