use thiserror::Error;

/// Anchor builder error
#[derive(Debug, Error)]
pub enum Error {
    #[error("refusing to build an anchor from an empty batch")]
    EmptyBatch,
    #[error(transparent)]
    UnsupportedProfile(#[from] orb_types::UnsupportedProfileError),
    #[error("non-create operation for suffix {0} has no previous anchor")]
    MissingPreviousAnchor(String),
    #[error("credential builder failed: {0}")]
    Credential(String),
    #[error(transparent)]
    Cas(#[from] orb_cas::Error),
    #[error(transparent)]
    Linkset(#[from] orb_linkset::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Queue(#[from] orb_op_queue::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Cas(e) if e.is_transient())
    }
}
