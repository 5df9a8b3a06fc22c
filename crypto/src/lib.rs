pub mod httpsig;
mod signer;

pub use signer::{verify_signature, LocalSigner, Signer};

use thiserror::Error;

/// Crypto error
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown key id {0}")]
    UnknownKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("malformed signature header: {0}")]
    MalformedSignature(String),
    #[error("transient: {0}")]
    Transient(String),
}
