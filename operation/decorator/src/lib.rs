//! Hot-path guard for update / recover / deactivate operations: before an
//! operation is queued, the anchor-origin for its DID is consulted to make
//! sure the local state is at least as current. A stale node would otherwise
//! anchor an operation against an outdated `previous` reference.

use async_trait::async_trait;
use orb_db::Store;
use orb_op_store::OperationStore;
use orb_types::Operation;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Operation decorator error
#[derive(Debug, Error)]
pub enum DecoratorError {
    /// The anchor-origin reports more published operations than we hold;
    /// the caller should retry once the observer catches up.
    #[error("local state is stale: origin has {origin} published operations, local has {local}")]
    StaleLocalState { origin: u64, local: u64 },
    /// The anchor-origin reports operations that are not yet anchored;
    /// the caller should retry after they are published.
    #[error("anchor-origin has unpublished operations")]
    HasUnpublishedOperations,
    #[error("transient: {0}")]
    Transient(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] orb_op_store::StoreError),
}

/// The freshness summary an anchor-origin reports for a DID.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionMetadata {
    pub published_operation_count: u64,
    pub unpublished_operation_count: u64,
}

/// Fetches a DID's resolution metadata from its anchor-origin's discovery
/// endpoint.
#[async_trait]
pub trait OriginResolver: Send + Sync {
    async fn resolution_metadata(
        &self,
        origin: &Url,
        did: &str,
    ) -> Result<ResolutionMetadata, DecoratorError>;
}

/// [OriginResolver] over the origin's `/sidetree/identifiers` endpoint.
pub struct HttpOriginResolver {
    client: reqwest::Client,
}

impl HttpOriginResolver {
    pub fn new() -> Result<Self, DecoratorError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DecoratorError::Transient(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OriginResolver for HttpOriginResolver {
    async fn resolution_metadata(
        &self,
        origin: &Url,
        did: &str,
    ) -> Result<ResolutionMetadata, DecoratorError> {
        let url = origin
            .join(&format!("/sidetree/identifiers/{did}"))
            .map_err(|e| DecoratorError::Transient(e.to_string()))?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DecoratorError::Transient(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DecoratorError::NotFound(did.to_string()));
        }
        if !response.status().is_success() {
            return Err(DecoratorError::Transient(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| DecoratorError::Transient(e.to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct DecoratorConfig {
    /// This node's own origin URL; operations we originated skip the check.
    pub own_origin: Url,
    pub namespace: String,
}

/// The decorator itself.
pub struct OperationDecorator<DB, R> {
    op_store: OperationStore<DB>,
    resolver: R,
    config: DecoratorConfig,
}

impl<DB, R> OperationDecorator<DB, R>
where
    DB: Store,
    R: OriginResolver,
{
    pub fn new(op_store: OperationStore<DB>, resolver: R, config: DecoratorConfig) -> Self {
        Self {
            op_store,
            resolver,
            config,
        }
    }

    /// Validate an operation against its anchor-origin. On success the
    /// operation may be queued; applying it can then never regress the
    /// DID's published operation count.
    pub async fn decorate(&self, operation: &Operation) -> Result<(), DecoratorError> {
        if operation.operation_type.is_create() {
            return Ok(());
        }
        let origin: Url = match operation.anchor_origin.parse() {
            Ok(origin) => origin,
            Err(e) => {
                return Err(DecoratorError::Transient(format!(
                    "unresolvable anchor origin {}: {e}",
                    operation.anchor_origin
                )))
            }
        };
        if origin == self.config.own_origin {
            return Ok(());
        }

        let did = format!(
            "did:{}:{}",
            self.config.namespace, operation.unique_suffix
        );
        let metadata = self.resolver.resolution_metadata(&origin, &did).await?;
        if metadata.unpublished_operation_count > 0 {
            return Err(DecoratorError::HasUnpublishedOperations);
        }
        let local = self.op_store.count(&operation.unique_suffix)? as u64;
        if metadata.published_operation_count > local {
            return Err(DecoratorError::StaleLocalState {
                origin: metadata.published_operation_count,
                local,
            });
        }
        debug!(suffix = %operation.unique_suffix, local, "operation validated against origin");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_db::MemoryDB;
    use orb_types::{AnchoredOperation, OperationType};

    struct StaticResolver(ResolutionMetadata);

    #[async_trait]
    impl OriginResolver for StaticResolver {
        async fn resolution_metadata(
            &self,
            _origin: &Url,
            _did: &str,
        ) -> Result<ResolutionMetadata, DecoratorError> {
            Ok(self.0)
        }
    }

    fn operation(t: OperationType, origin: &str) -> Operation {
        Operation {
            unique_suffix: "EiDsuffix".to_string(),
            operation_type: t,
            operation_request: b"payload".to_vec(),
            anchor_origin: origin.to_string(),
            protocol_version: 1,
        }
    }

    fn decorator(
        db: MemoryDB,
        metadata: ResolutionMetadata,
    ) -> OperationDecorator<MemoryDB, StaticResolver> {
        OperationDecorator::new(
            OperationStore::new(db),
            StaticResolver(metadata),
            DecoratorConfig {
                own_origin: Url::parse("https://orb.domain1.com").unwrap(),
                namespace: "orb".to_string(),
            },
        )
    }

    fn store_published(db: &MemoryDB, count: u64) {
        let store = OperationStore::new(db.clone());
        for i in 0..count {
            store
                .put(&[AnchoredOperation {
                    operation: operation(OperationType::Update, "https://orb.domain3.com"),
                    canonical_reference: format!("hl:uEiAnchor{i}"),
                    transaction_time: i,
                    equivalent_references: vec![],
                }])
                .unwrap();
        }
    }

    #[tokio::test]
    async fn creates_pass_without_an_origin_check() {
        let d = decorator(
            MemoryDB::default(),
            ResolutionMetadata {
                published_operation_count: 99,
                unpublished_operation_count: 99,
            },
        );
        d.decorate(&operation(OperationType::Create, "https://orb.domain3.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn own_origin_is_authoritative() {
        let d = decorator(
            MemoryDB::default(),
            ResolutionMetadata {
                published_operation_count: 99,
                unpublished_operation_count: 0,
            },
        );
        d.decorate(&operation(OperationType::Update, "https://orb.domain1.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_local_state_is_rejected() {
        let db = MemoryDB::default();
        store_published(&db, 1);
        let d = decorator(
            db,
            ResolutionMetadata {
                published_operation_count: 3,
                unpublished_operation_count: 0,
            },
        );
        let err = d
            .decorate(&operation(OperationType::Update, "https://orb.domain3.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DecoratorError::StaleLocalState {
                origin: 3,
                local: 1
            }
        ));
    }

    #[tokio::test]
    async fn unpublished_operations_at_origin_are_rejected() {
        let d = decorator(
            MemoryDB::default(),
            ResolutionMetadata {
                published_operation_count: 0,
                unpublished_operation_count: 1,
            },
        );
        let err = d
            .decorate(&operation(OperationType::Recover, "https://orb.domain3.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecoratorError::HasUnpublishedOperations));
    }

    #[tokio::test]
    async fn up_to_date_state_passes() {
        let db = MemoryDB::default();
        store_published(&db, 2);
        let d = decorator(
            db.clone(),
            ResolutionMetadata {
                published_operation_count: 2,
                unpublished_operation_count: 0,
            },
        );
        d.decorate(&operation(OperationType::Deactivate, "https://orb.domain3.com"))
            .await
            .unwrap();
        // decorator safety: success implies no regression of the local
        // published-operation count
        assert!(OperationStore::new(db).count("EiDsuffix").unwrap() as u64 >= 2);
    }
}
