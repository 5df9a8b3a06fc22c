use thiserror::Error;

/// Store error. Reads and writes against the in-memory backend are
/// infallible; failures come from the on-disk backend or from decoding a
/// stored object.
#[derive(Debug, Error)]
pub enum Error {
    #[cfg(feature = "paritydb")]
    #[error("backend error: {0}")]
    Backend(#[from] parity_db::Error),
    #[error("stored object could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("required key {0} not found")]
    KeyNotFound(String),
}
