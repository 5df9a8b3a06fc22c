use thiserror::Error;

/// ActivityPub error
#[derive(Debug, Error)]
pub enum Error {
    #[error("request not authenticated")]
    Unauthorized,
    #[error("actor not authorized: {0}")]
    Forbidden(String),
    #[error("malformed activity: {0}")]
    Malformed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error(transparent)]
    Db(#[from] orb_db::Error),
    #[error(transparent)]
    Crypto(#[from] orb_crypto::Error),
    #[error("handler error: {0}")]
    Handler(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
