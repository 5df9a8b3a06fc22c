mod errors;
mod handlers;
mod observer;

pub use errors::Error;
pub use handlers::{AnnounceHandler, CreateHandler};
pub use observer::{Observer, ObserverConfig};

/// Topic carrying anchors received from the federation (`Create` /
/// `Announce` activities). The observer consumes this alongside the
/// locally-completed anchor topic.
pub const ANCHOR_RECEIVED_TOPIC: &str = "orb.anchor.received";
