//! Periodic reconciliation with the federation. The task walks the inboxes
//! of services that follow this node (to catch peers up on `Create`
//! activities they missed from us) and the outboxes of services this node
//! follows (to pick up `Create` / `Announce` activities we missed), feeding
//! kept activities into the standard inbox handler path.

mod cursor;
mod task;

pub use cursor::{CursorStore, SyncCursor, SyncSource};
pub use task::{AnchorSyncTask, RemoteSource, SyncConfig};

use thiserror::Error;

/// Anchor-sync error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ActivityPub(#[from] orb_activitypub::Error),
    #[error(transparent)]
    Db(#[from] orb_db::Error),
    #[error("transient: {0}")]
    Transient(String),
}
