//! Persistence for DID operations. Published operations are those committed
//! by an anchor; unpublished operations have been accepted locally but not
//! yet anchored. Publication moves an operation from one store to the other.

use orb_db::{Store, StoreExt};
use orb_linkset::hashlink;
use orb_types::{AnchoredOperation, Operation};
use thiserror::Error;
use tracing::debug;

const PUBLISHED_PREFIX: &str = "/operation/published/";
const UNPUBLISHED_PREFIX: &str = "/operation/unpublished/";

/// Operation store error
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] orb_db::Error),
}

/// Multibase multihash of an operation's signed request payload, used to
/// match unpublished records against their later-published counterparts.
pub fn request_hash(operation: &Operation) -> String {
    hashlink::resource_hash(&operation.operation_request)
}

/// Store of anchored (published) operations, deduplicated on
/// `(suffix, canonical_reference)`.
#[derive(Clone)]
pub struct OperationStore<DB> {
    db: DB,
}

impl<DB: Store> OperationStore<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn key(suffix: &str, canonical_reference: &str) -> Vec<u8> {
        format!("{PUBLISHED_PREFIX}{suffix}/{canonical_reference}").into_bytes()
    }

    /// Persist anchored operations. Re-putting an operation already stored
    /// under its `(suffix, canonical_reference)` key is a no-op, which is
    /// what makes observer processing idempotent.
    pub fn put(&self, operations: &[AnchoredOperation]) -> Result<(), StoreError> {
        for op in operations {
            let key = Self::key(&op.operation.unique_suffix, &op.canonical_reference);
            if self.db.exists(&key)? {
                debug!(suffix = %op.operation.unique_suffix,
                    reference = %op.canonical_reference, "operation already stored");
                continue;
            }
            self.db.write_obj(&key, op)?;
        }
        Ok(())
    }

    /// All published operations for a suffix, in `(transaction_time,
    /// canonical_reference)` order.
    pub fn get(&self, suffix: &str) -> Result<Vec<AnchoredOperation>, StoreError> {
        let prefix = format!("{PUBLISHED_PREFIX}{suffix}/");
        let mut ops: Vec<AnchoredOperation> = self
            .db
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect();
        ops.sort_by(|a, b| a.sequence_cmp(b));
        Ok(ops)
    }

    pub fn count(&self, suffix: &str) -> Result<usize, StoreError> {
        Ok(self.get(suffix)?.len())
    }
}

/// Store of operations accepted but not yet anchored, keyed on
/// `(suffix, request-hash)`.
#[derive(Clone)]
pub struct UnpublishedOperationStore<DB> {
    db: DB,
}

impl<DB: Store> UnpublishedOperationStore<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn key(suffix: &str, request_hash: &str) -> Vec<u8> {
        format!("{UNPUBLISHED_PREFIX}{suffix}/{request_hash}").into_bytes()
    }

    pub fn put(&self, operation: &Operation) -> Result<(), StoreError> {
        let key = Self::key(&operation.unique_suffix, &request_hash(operation));
        self.db.write_obj(&key, operation)?;
        Ok(())
    }

    pub fn get(&self, suffix: &str) -> Result<Vec<Operation>, StoreError> {
        let prefix = format!("{UNPUBLISHED_PREFIX}{suffix}/");
        Ok(self
            .db
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect())
    }

    /// Remove the unpublished record matching a now-published operation.
    pub fn delete(&self, suffix: &str, request_hash: &str) -> Result<(), StoreError> {
        self.db.delete(Self::key(suffix, request_hash))?;
        Ok(())
    }
}
