use crate::{CasStore, Error, WebFetcher};
use orb_linkset::{hashlink, HashLink};
use tracing::{debug, warn};
use url::Url;

/// Resolves CAS content, falling back to the remote endpoints embedded in a
/// hashlink's metadata when the local store misses. Fetched bodies are
/// hash-verified before being written back to the local store.
pub struct CasResolver<C> {
    cas: C,
    fetcher: WebFetcher,
}

impl<C: CasStore> CasResolver<C> {
    pub fn new(cas: C, fetcher: WebFetcher) -> Self {
        Self { cas, fetcher }
    }

    pub fn cas(&self) -> &C {
        &self.cas
    }

    /// Resolve the bytes a hashlink refers to.
    pub async fn resolve(&self, link: &HashLink) -> Result<Vec<u8>, Error> {
        match self.cas.read(&link.resource_hash).await {
            Ok(data) => return Ok(data),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        for endpoint in &link.links {
            let url = cas_url(endpoint, &link.resource_hash)?;
            match self.fetcher.fetch(&url).await {
                Ok(data) => {
                    if !hashlink::matches(&data, &link.resource_hash) {
                        return Err(Error::HashMismatch {
                            requested: link.resource_hash.clone(),
                            actual: hashlink::resource_hash(&data),
                        });
                    }
                    self.cas.write(&data).await?;
                    debug!(resource_hash = %link.resource_hash, endpoint = %endpoint,
                        "resolved CAS content from peer");
                    return Ok(data);
                }
                Err(Error::NotFound(_)) => continue,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "CAS endpoint fetch failed");
                    continue;
                }
            }
        }
        Err(Error::NotFound(link.resource_hash.clone()))
    }
}

fn cas_url(endpoint: &Url, resource_hash: &str) -> Result<Url, Error> {
    let mut url = endpoint.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Malformed(format!("cannot-be-a-base CAS URL {endpoint}")))?;
        segments.pop_if_empty().push(resource_hash);
    }
    Ok(url)
}
