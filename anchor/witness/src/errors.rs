use thiserror::Error;

/// Witness coordination error
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown anchor {0}")]
    UnknownAnchor(String),
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    #[error(transparent)]
    Policy(#[from] orb_policy::PolicyParseError),
    #[error(transparent)]
    ActivityPub(#[from] orb_activitypub::Error),
    #[error(transparent)]
    Db(#[from] orb_db::Error),
    #[error(transparent)]
    Builder(#[from] orb_anchor_builder::Error),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
