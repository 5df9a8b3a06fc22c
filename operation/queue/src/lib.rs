mod errors;
mod pubsub;
mod queue;

pub use errors::Error;
pub use pubsub::{MemoryPubSub, PubSub};
pub use queue::{OperationMessage, OperationQueue, QueueConfig, Reserved};

/// Broker topic carrying pending DID operations.
pub const OPERATION_TOPIC: &str = "orb.operation";
