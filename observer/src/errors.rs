use thiserror::Error;

/// Observer error
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed anchor: {0}")]
    Malformed(String),
    #[error("anchor verification failed: {0}")]
    VerificationFailed(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error(transparent)]
    Policy(#[from] orb_policy::PolicyParseError),
    #[error(transparent)]
    Linkset(#[from] orb_linkset::Error),
    #[error(transparent)]
    Store(#[from] orb_op_store::StoreError),
    #[error("broker error: {0}")]
    Broker(String),
}

impl From<orb_cas::Error> for Error {
    fn from(e: orb_cas::Error) -> Self {
        match e {
            // a missing body may still be resolvable from a peer later
            orb_cas::Error::NotFound(h) => Error::Transient(format!("CAS body {h} not found")),
            orb_cas::Error::Transient(m) => Error::Transient(m),
            other => Error::Malformed(other.to_string()),
        }
    }
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Broker(_))
    }
}
