use super::errors::Error;
use crate::Store;
use parity_db::{Db, Options};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct ParityDb {
    pub db: Arc<parity_db::Db>,
}

pub struct ParityDbConfig {
    pub path: PathBuf,
}

impl ParityDbConfig {
    pub fn from_path(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl ParityDb {
    fn to_options(config: &ParityDbConfig) -> Options {
        Options {
            path: config.path.to_owned(),
            sync_wal: true,
            sync_data: true,
            stats: false,
            salt: None,
            columns: vec![parity_db::ColumnOptions {
                // btree indexing keeps keys ordered for prefix scans
                btree_index: true,
                compression: parity_db::CompressionType::Lz4,
                ..Default::default()
            }],
            compression_threshold: HashMap::new(),
        }
    }

    pub fn open(config: &ParityDbConfig) -> Result<Self, Error> {
        let opts = Self::to_options(config);
        Ok(Self {
            db: Arc::new(Db::open_or_create(&opts)?),
        })
    }
}

impl Store for ParityDb {
    fn read<K>(&self, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        self.db.get(0, key.as_ref()).map_err(Error::from)
    }

    fn write<K, V>(&self, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let tx = [(0, key.as_ref(), Some(value.as_ref().to_owned()))];
        self.db.commit(tx).map_err(Error::from)
    }

    fn delete<K>(&self, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        let tx = [(0, key.as_ref(), None)];
        self.db.commit(tx).map_err(Error::from)
    }

    fn exists<K>(&self, key: K) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        self.db
            .get_size(0, key.as_ref())
            .map(|size| size.is_some())
            .map_err(Error::from)
    }

    fn scan_prefix<K>(&self, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        let prefix = prefix.as_ref();
        let mut iter = self.db.iter(0)?;
        iter.seek(prefix)?;
        let mut out = Vec::new();
        while let Some((key, value)) = iter.next()? {
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn bulk_write<K, V>(&self, values: &[(K, V)]) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let tx = values
            .iter()
            .map(|(k, v)| (0, k.as_ref(), Some(v.as_ref().to_owned())))
            .collect::<Vec<_>>();

        self.db.commit(tx).map_err(Error::from)
    }
}
