use thiserror::Error;

/// Linkset / hashlink codec error
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed hashlink: {0}")]
    MalformedHashlink(String),
    #[error("unsupported multihash code {0:#x}")]
    UnsupportedMultihash(u64),
    #[error("malformed linkset: {0}")]
    MalformedLinkset(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
