use crate::{CasStore, Error, IpfsClient};
use async_trait::async_trait;
use lru::LruCache;
use orb_db::Store;
use orb_linkset::hashlink;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::warn;

const CAS_KEY_PREFIX: &str = "/cas/";
const DEFAULT_CACHE_CAPACITY: usize = 256;

fn cas_key(resource_hash: &str) -> Vec<u8> {
    format!("{CAS_KEY_PREFIX}{resource_hash}").into_bytes()
}

/// CAS over the node's KV store, with a read-through LRU cache and optional
/// best-effort mirroring into IPFS.
pub struct LocalCas<DB> {
    db: DB,
    cache: Mutex<LruCache<String, Vec<u8>>>,
    ipfs: Option<IpfsClient>,
}

impl<DB: Store> LocalCas<DB> {
    pub fn new(db: DB) -> Self {
        Self::with_capacity(db, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(db: DB, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).expect("capacity is nonzero");
        Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
            ipfs: None,
        }
    }

    /// Enable write-through mirroring to an IPFS node. Mirror failures are
    /// logged and do not fail the write.
    pub fn with_ipfs(mut self, ipfs: IpfsClient) -> Self {
        self.ipfs = Some(ipfs);
        self
    }
}

#[async_trait]
impl<DB: Store + Send + Sync> CasStore for LocalCas<DB> {
    async fn write(&self, data: &[u8]) -> Result<String, Error> {
        let hash = hashlink::resource_hash(data);
        self.db.write(cas_key(&hash), data)?;
        if let Some(ipfs) = &self.ipfs {
            if let Err(e) = ipfs.add(data).await {
                warn!(resource_hash = %hash, error = %e, "ipfs mirror failed");
            }
        }
        Ok(hash)
    }

    async fn read(&self, resource_hash: &str) -> Result<Vec<u8>, Error> {
        if let Some(data) = self.cache.lock().get(resource_hash) {
            return Ok(data.clone());
        }
        match self.db.read(cas_key(resource_hash))? {
            Some(data) => {
                self.cache
                    .lock()
                    .put(resource_hash.to_string(), data.clone());
                Ok(data)
            }
            None => Err(Error::NotFound(resource_hash.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_db::MemoryDB;

    #[tokio::test]
    async fn write_is_idempotent() {
        let cas = LocalCas::new(MemoryDB::default());
        let h1 = cas.write(b"anchor bytes").await.unwrap();
        let h2 = cas.write(b"anchor bytes").await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(cas.read(&h1).await.unwrap(), b"anchor bytes");
    }

    #[tokio::test]
    async fn distinct_content_gets_distinct_keys() {
        let cas = LocalCas::new(MemoryDB::default());
        let h1 = cas.write(b"one").await.unwrap();
        let h2 = cas.write(b"two").await.unwrap();
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let cas = LocalCas::new(MemoryDB::default());
        let missing = hashlink::resource_hash(b"never written");
        assert!(matches!(
            cas.read(&missing).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn cached_read_survives_db_delete() {
        let db = MemoryDB::default();
        let cas = LocalCas::new(db.clone());
        let hash = cas.write(b"cached").await.unwrap();
        // prime the cache
        cas.read(&hash).await.unwrap();
        db.delete(cas_key(&hash)).unwrap();
        assert_eq!(cas.read(&hash).await.unwrap(), b"cached");
    }
}
