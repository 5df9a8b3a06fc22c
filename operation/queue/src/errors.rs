use thiserror::Error;

/// Operation queue error
#[derive(Debug, Error)]
pub enum Error {
    /// Broker publish/subscribe failure; retryable.
    #[error("broker error: {0}")]
    Broker(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Db(#[from] orb_db::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Broker(_))
    }
}
