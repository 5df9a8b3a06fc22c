mod builder;
mod errors;
pub mod vc;
mod writer;

pub use builder::{AnchorBuilder, BatchOperation, BuiltAnchor, OperationBatch};
pub use errors::Error;
pub use vc::{CredentialBuilder, LocalCredentialBuilder};
pub use writer::{BatchWriter, BatchWriterConfig};

/// Topic carrying anchors that have been built and stored but not yet
/// witnessed. The witness coordinator subscribes here.
pub const ANCHOR_BUILT_TOPIC: &str = "orb.anchor.built";
