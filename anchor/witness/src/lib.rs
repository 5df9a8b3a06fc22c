mod coordinator;
mod errors;
mod handlers;

pub use coordinator::{
    AnchorIndex, AnchorStatus, NoQuarantine, WitnessConfig, WitnessCoordinator, WitnessEligibility,
};
pub use errors::Error;
pub use handlers::{AcceptHandler, OfferHandler, ProofReply};

/// Topic carrying anchors whose witness policy is satisfied. The observer
/// subscribes here to apply locally issued anchors.
pub const ANCHOR_COMPLETED_TOPIC: &str = "orb.anchor.completed";
