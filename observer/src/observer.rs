use crate::{Error, ANCHOR_RECEIVED_TOPIC};
use orb_anchor_builder::{vc, BuiltAnchor};
use orb_cas::{CasResolver, CasStore};
use orb_linkset::{HashLink, Linkset};
use orb_op_queue::PubSub;
use orb_op_store::{request_hash, OperationStore, UnpublishedOperationStore};
use orb_policy::PolicyCache;
use orb_types::{AnchoredOperation, Operation, Proof, Witness, WitnessType};
use orb_witness::ANCHOR_COMPLETED_TOPIC;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_PROCESS_RETRIES: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default)]
pub struct ObserverConfig {
    /// Witness policy per protocol version; consulted when verifying the
    /// proofs on received anchors.
    pub policies: HashMap<u64, String>,
    pub default_policy: Option<String>,
}

impl ObserverConfig {
    fn policy_for(&self, version: u64) -> Option<&str> {
        self.policies
            .get(&version)
            .map(String::as_str)
            .or(self.default_policy.as_deref())
    }
}

/// Consumes closed anchors (locally completed or received through the
/// federation), verifies the anchor graph and applies the contained
/// operations to the operation store.
pub struct Observer<DB, C, P> {
    resolver: Arc<CasResolver<C>>,
    op_store: OperationStore<DB>,
    unpublished: UnpublishedOperationStore<DB>,
    pubsub: Arc<P>,
    policy_cache: PolicyCache,
    config: ObserverConfig,
    retries: Mutex<HashMap<String, u32>>,
}

impl<DB, C, P> Observer<DB, C, P>
where
    DB: orb_db::Store + Clone + Send + Sync + 'static,
    C: CasStore + 'static,
    P: PubSub + 'static,
{
    pub fn new(
        resolver: Arc<CasResolver<C>>,
        op_store: OperationStore<DB>,
        unpublished: UnpublishedOperationStore<DB>,
        pubsub: Arc<P>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            resolver,
            op_store,
            unpublished,
            pubsub,
            policy_cache: PolicyCache::default(),
            config,
            retries: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the local and federated anchor topics.
    pub async fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let mut handles = Vec::with_capacity(2);
        for topic in [ANCHOR_COMPLETED_TOPIC, ANCHOR_RECEIVED_TOPIC] {
            let receiver = self
                .pubsub
                .subscribe(topic)
                .await
                .map_err(|e| Error::Broker(e.to_string()))?;
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            let topic = topic.to_string();
            handles.push(tokio::spawn(async move {
                loop {
                    let data = tokio::select! {
                        _ = cancel.cancelled() => return,
                        received = receiver.recv_async() => match received {
                            Ok(data) => data,
                            Err(_) => return,
                        },
                    };
                    let anchor: BuiltAnchor = match serde_json::from_slice(&data) {
                        Ok(a) => a,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed anchor message");
                            continue;
                        }
                    };
                    this.process_with_retry(&topic, anchor, data).await;
                }
            }));
        }
        Ok(handles)
    }

    async fn process_with_retry(&self, topic: &str, anchor: BuiltAnchor, raw: Vec<u8>) {
        let hash = anchor.anchor_hash.clone();
        match self.process(&anchor).await {
            Ok(()) => {
                self.retries.lock().remove(&hash);
            }
            Err(e) if e.is_transient() => {
                let attempt = {
                    let mut retries = self.retries.lock();
                    let attempt = retries.entry(hash.clone()).or_insert(0);
                    *attempt += 1;
                    *attempt
                };
                if attempt > MAX_PROCESS_RETRIES {
                    warn!(anchor = %hash, error = %e, "giving up on anchor after retries");
                    self.retries.lock().remove(&hash);
                    return;
                }
                warn!(anchor = %hash, attempt, error = %e, "anchor processing will be retried");
                if let Err(e) = self.pubsub.publish_after(topic, raw, RETRY_DELAY).await {
                    warn!(anchor = %hash, error = %e, "failed to requeue anchor");
                }
            }
            Err(e) => {
                warn!(anchor = %hash, error = %e, "dropping unprocessable anchor");
            }
        }
    }

    /// Verify and apply one anchor. Idempotent: reprocessing a stored anchor
    /// is a no-op.
    pub async fn process(&self, anchor: &BuiltAnchor) -> Result<(), Error> {
        let outer = anchor.linkset.link()?;
        let anchor_ref = outer
            .anchor
            .as_deref()
            .ok_or_else(|| Error::Malformed("outer link missing anchor".to_string()))?;
        let expected = format!("hl:{}", anchor.anchor_hash);
        if anchor_ref != expected {
            return Err(Error::VerificationFailed(format!(
                "outer anchor {anchor_ref} does not match {expected}"
            )));
        }

        // resolve the content linkset (locally or from the peers hinted in
        // the reference) and re-check its hash against the anchor identity
        let original_ref = outer
            .original
            .as_ref()
            .ok_or_else(|| Error::Malformed("outer link missing original".to_string()))?;
        let original_link: HashLink = original_ref.href.parse()?;
        if original_link.resource_hash != anchor.anchor_hash {
            return Err(Error::VerificationFailed(
                "original reference does not match anchor hash".to_string(),
            ));
        }
        let content_bytes = self.resolver.resolve(&original_link).await?;
        let content = Linkset::parse(&content_bytes)?;
        let content_link = content.link()?;

        // every non-create item must reference a previous anchor recorded in
        // the related linkset
        let related_ref = outer
            .related
            .as_ref()
            .ok_or_else(|| Error::Malformed("outer link missing related".to_string()))?;
        let related_link: HashLink = related_ref.href.parse()?;
        let related = Linkset::parse(&self.resolver.resolve(&related_link).await?)?;
        let related_hrefs: Vec<&str> = related
            .link()?
            .item
            .iter()
            .map(|i| i.href.as_str())
            .collect();
        for item in &content_link.item {
            if let Some(previous) = &item.previous {
                if !related_hrefs.contains(&previous.as_str()) {
                    return Err(Error::VerificationFailed(format!(
                        "previous reference {previous} missing from related linkset"
                    )));
                }
            }
        }

        // the credential must bind exactly this anchor and carry proofs that
        // satisfy the policy at the anchor's protocol version
        let replies_ref = outer
            .replies
            .as_ref()
            .ok_or_else(|| Error::Malformed("outer link missing replies".to_string()))?;
        let replies_link: HashLink = replies_ref.href.parse()?;
        let _stored_credential = self.resolver.resolve(&replies_link).await?;
        if !vc::binds_anchor(&anchor.credential, &expected) {
            return Err(Error::VerificationFailed(
                "credential subject does not bind the anchor".to_string(),
            ));
        }
        self.verify_proofs(anchor)?;

        // replay the operation bundle
        let bundle_ref = content_link
            .original
            .as_ref()
            .ok_or_else(|| Error::Malformed("content link missing operation bundle".to_string()))?;
        let bundle_link: HashLink = bundle_ref.href.parse()?;
        let bundle_bytes = self.resolver.resolve(&bundle_link).await?;
        let operations: Vec<Operation> = serde_json::from_slice(&bundle_bytes)
            .map_err(|e| Error::Malformed(format!("invalid operation bundle: {e}")))?;
        if operations.len() != content_link.item.len() {
            return Err(Error::VerificationFailed(format!(
                "bundle carries {} operations but the linkset lists {} items",
                operations.len(),
                content_link.item.len()
            )));
        }

        let mut anchored = Vec::with_capacity(operations.len());
        for (position, (operation, item)) in
            operations.into_iter().zip(&content_link.item).enumerate()
        {
            if !item.href.ends_with(&operation.unique_suffix) {
                return Err(Error::VerificationFailed(format!(
                    "item {} does not match operation suffix {}",
                    item.href, operation.unique_suffix
                )));
            }
            anchored.push(AnchoredOperation {
                operation,
                canonical_reference: expected.clone(),
                transaction_time: position as u64,
                equivalent_references: vec![],
            });
        }
        self.op_store.put(&anchored)?;
        for op in &anchored {
            self.unpublished.delete(
                &op.operation.unique_suffix,
                &request_hash(&op.operation),
            )?;
        }
        info!(anchor = %anchor.anchor_hash, operations = anchored.len(), "anchor applied");
        Ok(())
    }

    fn verify_proofs(&self, anchor: &BuiltAnchor) -> Result<(), Error> {
        let proofs: Vec<Proof> = vc::proofs(&anchor.credential);
        let Some(source) = self.config.policy_for(anchor.protocol_version) else {
            if proofs.is_empty() {
                return Err(Error::VerificationFailed(
                    "credential carries no proofs".to_string(),
                ));
            }
            return Ok(());
        };
        let policy = self.policy_cache.get(source)?;
        // proof domains stand in for the witness set the issuer selected
        let witnesses: Vec<Witness> = proofs
            .into_iter()
            .filter_map(|p| {
                let uri = p.domain.parse().ok()?;
                let mut w = Witness::new(WitnessType::Batch, uri, true);
                w.selected = true;
                w.proof = Some(p);
                Some(w)
            })
            .collect();
        if !policy.evaluate(&witnesses) {
            return Err(Error::VerificationFailed(format!(
                "proofs do not satisfy the policy at protocol version {}",
                anchor.protocol_version
            )));
        }
        Ok(())
    }
}
