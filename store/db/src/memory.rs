use super::{Error, Store};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A thread-safe in-memory store. Keys are held in a `BTreeMap` so prefix
/// scans come back in key order, matching the on-disk backends.
#[derive(Debug, Default, Clone)]
pub struct MemoryDB {
    db: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl Store for MemoryDB {
    fn read<K>(&self, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self.db.read().get(key.as_ref()).cloned())
    }

    fn write<K, V>(&self, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.db
            .write()
            .insert(key.as_ref().to_vec(), value.as_ref().to_vec());
        Ok(())
    }

    fn delete<K>(&self, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        self.db.write().remove(key.as_ref());
        Ok(())
    }

    fn exists<K>(&self, key: K) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self.db.read().contains_key(key.as_ref()))
    }

    fn scan_prefix<K>(&self, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        let prefix = prefix.as_ref();
        Ok(self
            .db
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
