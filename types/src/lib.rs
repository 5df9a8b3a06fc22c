mod did;
mod generator;
mod operation;
mod witness;

pub use did::{DidReference, UNPUBLISHED_PARENT};
pub use generator::{Generator, GeneratorRegistry, UnsupportedProfileError};
pub use operation::{AnchoredOperation, Operation, OperationType};
pub use witness::{Proof, Witness, WitnessType};
