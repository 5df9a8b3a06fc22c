pub mod merkle;
mod monitor;
mod store;

pub use monitor::{HttpLogClient, LogClient, LogMonitor, MonitorConfig, SignedTreeHead};
pub use store::{LogMonitorStore, LogStatus};

use thiserror::Error;

/// Log monitor error
#[derive(Debug, Error)]
pub enum Error {
    #[error("transient: {0}")]
    Transient(String),
    #[error("malformed log response: {0}")]
    Malformed(String),
    /// A consistency proof between two tree heads failed to verify; the log
    /// can no longer be trusted.
    #[error("log {0} failed consistency verification")]
    Inconsistent(String),
    #[error(transparent)]
    Db(#[from] orb_db::Error),
}
