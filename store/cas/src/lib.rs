mod errors;
mod ipfs;
mod local;
mod resolver;
mod web;

pub use errors::Error;
pub use ipfs::IpfsClient;
pub use local::LocalCas;
pub use resolver::CasResolver;
pub use web::WebFetcher;

use async_trait::async_trait;

/// Content-addressable storage. Keys are multibase-encoded multihashes of
/// the stored bytes.
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store `data` and return its resource hash. Idempotent: writing the
    /// same bytes twice returns the same hash.
    async fn write(&self, data: &[u8]) -> Result<String, Error>;

    /// Return exactly the originally written bytes, or [Error::NotFound].
    async fn read(&self, resource_hash: &str) -> Result<Vec<u8>, Error>;
}
