use crate::{Error, Store};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON object helpers layered over [Store].
pub trait StoreExt: Store {
    fn write_obj<K, V>(&self, key: K, value: &V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        self.write(key, serde_json::to_vec(value)?)
    }

    fn read_obj<K, V>(&self, key: K) -> Result<Option<V>, Error>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        match self.read(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require_obj<K, V>(&self, key: K) -> Result<V, Error>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        self.read_obj(&key)?
            .ok_or_else(|| Error::KeyNotFound(String::from_utf8_lossy(key.as_ref()).into_owned()))
    }
}

impl<BS: Store> StoreExt for BS {}
