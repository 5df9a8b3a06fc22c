use thiserror::Error;

/// CAS error
#[derive(Debug, Error)]
pub enum Error {
    #[error("content not found: {0}")]
    NotFound(String),
    /// Fetched bytes do not hash to the requested key. Fatal for the
    /// resolution attempt; the serving peer is misbehaving.
    #[error("hash mismatch: requested {requested}, got {actual}")]
    HashMismatch { requested: String, actual: String },
    #[error("transient: {0}")]
    Transient(String),
    #[error("malformed content: {0}")]
    Malformed(String),
    #[error(transparent)]
    Db(#[from] orb_db::Error),
    #[error(transparent)]
    Hashlink(#[from] orb_linkset::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
