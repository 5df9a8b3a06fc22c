use crate::builder::{AnchorBuilder, BatchOperation, OperationBatch};
use crate::vc::CredentialBuilder;
use crate::{Error, ANCHOR_BUILT_TOPIC};
use orb_cas::CasStore;
use orb_db::Store;
use orb_op_queue::{OperationQueue, PubSub};
use orb_op_store::OperationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct BatchWriterConfig {
    pub namespace: String,
    /// A batch is cut as soon as this many operations are pending.
    pub max_operations: usize,
    /// A non-empty batch is cut at the latest after this long.
    pub batch_timeout: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            namespace: "orb".to_string(),
            max_operations: 50,
            batch_timeout: Duration::from_secs(10),
        }
    }
}

/// Cuts batches from the operation queue, drives the [AnchorBuilder] and
/// hands built anchors to the witness coordinator over the broker.
pub struct BatchWriter<DB, P, C, V> {
    queue: Arc<OperationQueue<DB, P>>,
    op_store: OperationStore<DB>,
    builder: Arc<AnchorBuilder<C, V>>,
    pubsub: Arc<P>,
    config: BatchWriterConfig,
}

impl<DB, P, C, V> BatchWriter<DB, P, C, V>
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    C: CasStore + Send + Sync + 'static,
    V: CredentialBuilder + Send + Sync + 'static,
{
    pub fn new(
        queue: Arc<OperationQueue<DB, P>>,
        op_store: OperationStore<DB>,
        builder: Arc<AnchorBuilder<C, V>>,
        pubsub: Arc<P>,
        config: BatchWriterConfig,
    ) -> Self {
        Self {
            queue,
            op_store,
            builder,
            pubsub,
            config,
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let check_interval = self
                .config
                .batch_timeout
                .min(Duration::from_secs(1))
                .max(Duration::from_millis(10));
            let mut since_last_cut = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(check_interval) => {}
                }
                since_last_cut += check_interval;
                let full = self.queue.len() >= self.config.max_operations;
                let expired = since_last_cut >= self.config.batch_timeout && !self.queue.is_empty();
                if !full && !expired {
                    continue;
                }
                since_last_cut = Duration::ZERO;
                if let Err(e) = self.cut_batch().await {
                    warn!(error = %e, "batch cut failed");
                }
            }
        })
    }

    /// Cut one batch and anchor it. Publicly callable so tests and admin
    /// tooling can force a cut.
    pub async fn cut_batch(&self) -> Result<(), Error> {
        let reserved = self.queue.remove(self.config.max_operations);
        if reserved.is_empty() {
            return Ok(());
        }

        let mut version = 0;
        let mut operations = Vec::with_capacity(reserved.messages().len());
        for message in reserved.messages() {
            version = version.max(message.protocol_version);
            let op = message.operation.clone();
            let previous_anchor = if op.operation_type.is_create() {
                None
            } else {
                match self.op_store.get(&op.unique_suffix) {
                    Ok(ops) => ops.last().map(|a| a.canonical_reference.clone()),
                    Err(e) => {
                        warn!(suffix = %op.unique_suffix, error = %e,
                            "failed to load previous anchor");
                        None
                    }
                }
            };
            if previous_anchor.is_none() && !op.operation_type.is_create() {
                // nothing published for the suffix yet; dropping the
                // operation rather than poisoning the whole batch
                warn!(suffix = %op.unique_suffix, r#type = %op.operation_type,
                    "dropping non-create operation with no published parent");
                continue;
            }
            operations.push(BatchOperation {
                operation: op,
                previous_anchor,
            });
        }

        if operations.is_empty() {
            debug!("batch contained no anchorable operations");
            reserved.ack().await?;
            return Ok(());
        }

        let batch = OperationBatch {
            namespace: self.config.namespace.clone(),
            version,
            operations,
        };
        match self.builder.build(&batch).await {
            Ok(built) => {
                let payload = serde_json::to_vec(&built)?;
                if let Err(e) = self.pubsub.publish(ANCHOR_BUILT_TOPIC, payload).await {
                    warn!(error = %e, "failed to publish built anchor, returning batch");
                    reserved.nack().await?;
                    return Ok(());
                }
                info!(anchor = %built.anchor_hash, operations = batch.operations.len(),
                    "anchor published for witnessing");
                reserved.ack().await?;
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "transient build failure, returning batch");
                reserved.nack().await?;
            }
            Err(e) => {
                warn!(error = %e, "dropping unanchorable batch");
                reserved.ack().await?;
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vc::LocalCredentialBuilder;
    use crate::BuiltAnchor;
    use orb_cas::LocalCas;
    use orb_crypto::LocalSigner;
    use orb_db::MemoryDB;
    use orb_op_queue::{MemoryPubSub, QueueConfig};
    use orb_types::{Generator, GeneratorRegistry, Operation, OperationType};
    use url::Url;

    fn operation(suffix: &str) -> Operation {
        Operation {
            unique_suffix: suffix.to_string(),
            operation_type: OperationType::Create,
            operation_request: format!("{{\"suffix\":\"{suffix}\"}}").into_bytes(),
            anchor_origin: "https://orb.domain1.com".to_string(),
            protocol_version: 1,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn cuts_a_batch_and_publishes_the_built_anchor() {
        let db = MemoryDB::default();
        let pubsub = Arc::new(MemoryPubSub::new());
        let queue = Arc::new(OperationQueue::new(
            db.clone(),
            Arc::clone(&pubsub),
            QueueConfig::default(),
        ));
        let cancel = CancellationToken::new();
        queue.start(cancel.clone()).await.unwrap();

        let signer = LocalSigner::new();
        signer.generate("vc", "did:web:orb.domain1.com#vc");
        let builder = Arc::new(AnchorBuilder::new(
            GeneratorRegistry::new(vec![Generator {
                namespace: "orb".to_string(),
                version: 1,
                profile: Url::parse("https://w3id.org/orb#v1").unwrap(),
            }]),
            LocalCas::new(db.clone()),
            LocalCredentialBuilder::new(
                Arc::new(signer),
                "vc",
                Url::parse("https://orb.domain1.com").unwrap(),
            ),
            Url::parse("https://orb.domain1.com/services/orb").unwrap(),
            vec![Url::parse("https://orb.domain1.com/cas").unwrap()],
        ));

        let writer = BatchWriter::new(
            Arc::clone(&queue),
            OperationStore::new(db.clone()),
            builder,
            Arc::clone(&pubsub),
            BatchWriterConfig::default(),
        );

        let built_rx = pubsub.subscribe(ANCHOR_BUILT_TOPIC).await.unwrap();

        queue.add(operation("EiDone"), 1).await.unwrap();
        queue.add(operation("EiDtwo"), 1).await.unwrap();
        wait_for(|| queue.len() == 2).await;

        writer.cut_batch().await.unwrap();
        let built: BuiltAnchor =
            serde_json::from_slice(&built_rx.recv_async().await.unwrap()).unwrap();
        assert_eq!(built.namespace, "orb");
        assert_eq!(built.protocol_version, 1);
        assert!(queue.is_empty());
        cancel.cancel();
    }
}
