mod canonical;
mod errors;
pub mod hashlink;
mod linkset;

pub use canonical::canonical_json_bytes;
pub use errors::Error;
pub use hashlink::HashLink;
pub use linkset::{Item, Link, Linkset, Reference};

/// Media type under which anchor linksets are stored and served.
pub const LINKSET_MEDIA_TYPE: &str = "application/linkset+json";
/// Media type of anchor credentials referenced from the `replies` relation.
pub const LD_MEDIA_TYPE: &str = "application/ld+json";
