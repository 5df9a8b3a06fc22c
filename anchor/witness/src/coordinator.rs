use crate::{Error, ANCHOR_COMPLETED_TOPIC};
use chrono::{DateTime, Utc};
use orb_activitypub::{Activity, ActivityType, CollectionKind, Collections, Outbox, PUBLIC_IRI};
use orb_anchor_builder::{vc, BuiltAnchor, ANCHOR_BUILT_TOPIC};
use orb_db::{Store, StoreExt};
use orb_op_queue::PubSub;
use orb_policy::PolicyCache;
use orb_types::{Proof, Witness, WitnessType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

const ANCHOR_INDEX_PREFIX: &str = "/witness/anchor/";
const DEFAULT_POLICY: &str = "MinPercent(100,batch) AND MinPercent(100,system)";

/// Lifecycle of an in-flight anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorStatus {
    InProcess,
    Completed,
    Abandoned,
}

/// Per-anchor witnessing state. The witness selection is persisted with the
/// anchor so that retries address the same set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorIndex {
    pub status: AnchorStatus,
    pub anchor: BuiltAnchor,
    pub witnesses: Vec<Witness>,
    pub offer_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Proofs that arrived after completion; stored but never counted.
    #[serde(default)]
    pub late_proofs: Vec<Proof>,
}

/// Witness metadata lookups: whether a witness maintains a transparency log
/// and whether it is currently quarantined (e.g. its log failed a
/// consistency check).
pub trait WitnessEligibility: Send + Sync {
    fn has_log(&self, witness: &Url) -> bool;
    fn is_quarantined(&self, witness: &Url) -> bool;
}

/// Eligibility source used when no log monitor is wired in.
pub struct NoQuarantine;

impl WitnessEligibility for NoQuarantine {
    fn has_log(&self, _witness: &Url) -> bool {
        true
    }

    fn is_quarantined(&self, _witness: &Url) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
pub struct WitnessConfig {
    /// Policy expression; the default requires every selected witness.
    pub policy: Option<String>,
    pub system_witnesses: Vec<Url>,
    pub witness_timeout: Duration,
    pub max_offer_retries: u32,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            policy: None,
            system_witnesses: vec![],
            witness_timeout: Duration::from_secs(60),
            max_offer_retries: 3,
        }
    }
}

/// Drives an anchor from built to closed: solicits witness proofs with
/// `Offer`, collects them, and publishes the `Create` activity once the
/// witness policy is satisfied.
pub struct WitnessCoordinator<DB, P> {
    db: DB,
    collections: Collections<DB>,
    outbox: Arc<Outbox<DB>>,
    pubsub: Arc<P>,
    eligibility: Arc<dyn WitnessEligibility>,
    policy_cache: PolicyCache,
    config: WitnessConfig,
}

impl<DB, P> WitnessCoordinator<DB, P>
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
{
    pub fn new(
        db: DB,
        collections: Collections<DB>,
        outbox: Arc<Outbox<DB>>,
        pubsub: Arc<P>,
        eligibility: Arc<dyn WitnessEligibility>,
        config: WitnessConfig,
    ) -> Self {
        Self {
            db,
            collections,
            outbox,
            pubsub,
            eligibility,
            policy_cache: PolicyCache::default(),
            config,
        }
    }

    /// Subscribe to built anchors and drive each through witnessing.
    pub async fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, Error> {
        let receiver = self
            .pubsub
            .subscribe(ANCHOR_BUILT_TOPIC)
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                let data = tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = receiver.recv_async() => match received {
                        Ok(data) => data,
                        Err(_) => return,
                    },
                };
                let built: BuiltAnchor = match serde_json::from_slice(&data) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed built-anchor message");
                        continue;
                    }
                };
                if let Err(e) = this.process_built(built, cancel.clone()).await {
                    error!(error = %e, "failed to process built anchor");
                }
            }
        }))
    }

    /// Select witnesses, persist the in-process index entry and send the
    /// initial `Offer`.
    pub async fn process_built(
        self: &Arc<Self>,
        built: BuiltAnchor,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let witnesses = self.select_witnesses()?;
        let index = AnchorIndex {
            status: AnchorStatus::InProcess,
            anchor: built,
            witnesses,
            offer_retries: 0,
            created_at: Utc::now(),
            late_proofs: vec![],
        };
        self.write_index(&index)?;
        info!(anchor = %index.anchor.anchor_hash, witnesses = index.witnesses.len(),
            "anchor entered witnessing");

        // with nothing to wait for, close immediately (e.g. a single-node
        // deployment with an empty policy)
        if self.evaluate(&index.witnesses)? {
            return self.complete(index.anchor.anchor_hash.clone()).await;
        }

        self.send_offer(&index, None).await?;
        self.arm_timer(index.anchor.anchor_hash.clone(), cancel);
        Ok(())
    }

    /// Record a proof from a witness. Returns the resulting anchor status.
    pub async fn handle_proof(
        self: &Arc<Self>,
        anchor_hash: &str,
        proof: Proof,
    ) -> Result<AnchorStatus, Error> {
        let mut index = self
            .read_index(anchor_hash)?
            .ok_or_else(|| Error::UnknownAnchor(anchor_hash.to_string()))?;

        if index.status != AnchorStatus::InProcess {
            debug!(anchor = %anchor_hash, domain = %proof.domain,
                "storing proof received after closure");
            index.late_proofs.push(proof);
            self.write_index(&index)?;
            return Ok(index.status);
        }

        let Some(witness) = index
            .witnesses
            .iter_mut()
            .find(|w| w.uri.as_str() == proof.domain)
        else {
            return Err(Error::MalformedProof(format!(
                "proof from unselected witness {}",
                proof.domain
            )));
        };
        match &witness.proof {
            Some(existing) if existing.created >= proof.created => {
                debug!(anchor = %anchor_hash, domain = %proof.domain,
                    "ignoring stale duplicate proof");
            }
            _ => witness.proof = Some(proof),
        }
        self.write_index(&index)?;

        if self.evaluate(&index.witnesses)? {
            self.complete(anchor_hash.to_string()).await?;
            return Ok(AnchorStatus::Completed);
        }
        Ok(AnchorStatus::InProcess)
    }

    pub fn anchor_index(&self, anchor_hash: &str) -> Result<Option<AnchorIndex>, Error> {
        self.read_index(anchor_hash)
    }

    fn select_witnesses(&self) -> Result<Vec<Witness>, Error> {
        let mut witnesses = Vec::new();
        for follower in self.collections.list(CollectionKind::Followers)? {
            if self.eligibility.is_quarantined(&follower) {
                debug!(witness = %follower, "skipping quarantined batch witness");
                continue;
            }
            let mut w = Witness::new(
                WitnessType::Batch,
                follower.clone(),
                self.eligibility.has_log(&follower),
            );
            w.selected = true;
            witnesses.push(w);
        }
        for system in &self.config.system_witnesses {
            if self.eligibility.is_quarantined(system) {
                debug!(witness = %system, "skipping quarantined system witness");
                continue;
            }
            let mut w = Witness::new(
                WitnessType::System,
                system.clone(),
                self.eligibility.has_log(system),
            );
            w.selected = true;
            witnesses.push(w);
        }
        Ok(witnesses)
    }

    fn evaluate(&self, witnesses: &[Witness]) -> Result<bool, Error> {
        let source = self.config.policy.as_deref().unwrap_or(DEFAULT_POLICY);
        Ok(self.policy_cache.get(source)?.evaluate(witnesses))
    }

    /// Offer the anchor to witnesses; `only` restricts the audience (used on
    /// retry to re-address non-responders).
    async fn send_offer(&self, index: &AnchorIndex, only: Option<&[Url]>) -> Result<(), Error> {
        let audience: Vec<String> = match only {
            Some(uris) => uris.iter().map(|u| u.to_string()).collect(),
            None => index.witnesses.iter().map(|w| w.uri.to_string()).collect(),
        };
        if audience.is_empty() {
            return Ok(());
        }
        let offer = Activity::new(
            ActivityType::Offer,
            self.outbox.actor(),
            serde_json::to_value(&index.anchor)?,
            audience,
        );
        self.outbox.post(offer).await?;
        Ok(())
    }

    fn arm_timer(self: &Arc<Self>, anchor_hash: String, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let timeout = self.config.witness_timeout;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(timeout) => {}
                }
                match this.handle_timeout(&anchor_hash).await {
                    Ok(AnchorStatus::InProcess) => continue,
                    Ok(_) => return,
                    Err(e) => {
                        error!(anchor = %anchor_hash, error = %e, "witness timer failed");
                        return;
                    }
                }
            }
        });
    }

    /// Witness round expired: re-offer to non-responders, or abandon once
    /// the retry budget is exhausted.
    async fn handle_timeout(self: &Arc<Self>, anchor_hash: &str) -> Result<AnchorStatus, Error> {
        let mut index = self
            .read_index(anchor_hash)?
            .ok_or_else(|| Error::UnknownAnchor(anchor_hash.to_string()))?;
        if index.status != AnchorStatus::InProcess {
            return Ok(index.status);
        }
        index.offer_retries += 1;
        if index.offer_retries > self.config.max_offer_retries {
            index.status = AnchorStatus::Abandoned;
            self.write_index(&index)?;
            error!(anchor = %anchor_hash, retries = index.offer_retries - 1,
                "anchor abandoned: witness policy unsatisfied");
            return Ok(AnchorStatus::Abandoned);
        }
        self.write_index(&index)?;
        let unresponsive: Vec<Url> = index
            .witnesses
            .iter()
            .filter(|w| !w.has_proof())
            .map(|w| w.uri.clone())
            .collect();
        warn!(anchor = %anchor_hash, retry = index.offer_retries,
            unresponsive = unresponsive.len(), "witness round expired, re-offering");
        self.send_offer(&index, Some(&unresponsive)).await?;
        Ok(AnchorStatus::InProcess)
    }

    /// Attach the collected proofs and publish the anchor.
    async fn complete(self: &Arc<Self>, anchor_hash: String) -> Result<(), Error> {
        let mut index = self
            .read_index(&anchor_hash)?
            .ok_or_else(|| Error::UnknownAnchor(anchor_hash.clone()))?;
        let proofs: Vec<Proof> = index
            .witnesses
            .iter()
            .filter_map(|w| w.proof.clone())
            .collect();
        vc::attach_proofs(&mut index.anchor.credential, &proofs)?;
        index.status = AnchorStatus::Completed;
        self.write_index(&index)?;
        info!(anchor = %anchor_hash, proofs = proofs.len(), "anchor completed");

        self.pubsub
            .publish(
                ANCHOR_COMPLETED_TOPIC,
                serde_json::to_vec(&index.anchor)?,
            )
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;

        let create = Activity::new(
            ActivityType::Create,
            self.outbox.actor(),
            serde_json::to_value(&index.anchor)?,
            vec![
                PUBLIC_IRI.to_string(),
                format!("{}/followers", self.outbox.actor().as_str().trim_end_matches('/')),
            ],
        );
        self.outbox.post(create).await?;
        Ok(())
    }

    fn index_key(anchor_hash: &str) -> Vec<u8> {
        format!("{ANCHOR_INDEX_PREFIX}{anchor_hash}").into_bytes()
    }

    fn read_index(&self, anchor_hash: &str) -> Result<Option<AnchorIndex>, Error> {
        Ok(self.db.read_obj(Self::index_key(anchor_hash))?)
    }

    fn write_index(&self, index: &AnchorIndex) -> Result<(), Error> {
        self.db
            .write_obj(Self::index_key(&index.anchor.anchor_hash), index)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_activitypub::{ActivityStore, ApClient, BoxKind, OutboxConfig};
    use orb_db::MemoryDB;
    use orb_op_queue::MemoryPubSub;

    fn proof(domain: &str, created: DateTime<Utc>) -> Proof {
        Proof {
            created,
            domain: domain.to_string(),
            verification_method: format!("{domain}#key"),
            proof_value: "zSig".to_string(),
            proof_type: "Ed25519Signature2020".to_string(),
        }
    }

    fn built_anchor() -> BuiltAnchor {
        BuiltAnchor {
            anchor_hash: "uEiAnchor".to_string(),
            anchor_hashlink: "hl:uEiAnchor".to_string(),
            linkset: orb_linkset::Linkset {
                linkset: vec![Default::default()],
            },
            credential: serde_json::json!({
                "credentialSubject": {"id": "hl:uEiAnchor"},
            }),
            namespace: "orb".to_string(),
            protocol_version: 1,
        }
    }

    struct Fixture {
        db: MemoryDB,
        pubsub: Arc<MemoryPubSub>,
        coordinator: Arc<WitnessCoordinator<MemoryDB, MemoryPubSub>>,
        cancel: CancellationToken,
    }

    fn fixture(config: WitnessConfig, followers: &[&str]) -> Fixture {
        let db = MemoryDB::default();
        let collections = Collections::new(db.clone());
        for follower in followers {
            collections
                .add(CollectionKind::Followers, &Url::parse(follower).unwrap())
                .unwrap();
        }
        let actor = Url::parse("https://orb.domain1.com/services/orb").unwrap();
        let outbox = Arc::new(Outbox::new(
            ActivityStore::new(db.clone()),
            Collections::new(db.clone()),
            ApClient::new().unwrap(),
            actor,
            OutboxConfig::default(),
        ));
        let pubsub = Arc::new(MemoryPubSub::new());
        let coordinator = Arc::new(WitnessCoordinator::new(
            db.clone(),
            collections,
            outbox,
            Arc::clone(&pubsub),
            Arc::new(NoQuarantine),
            config,
        ));
        Fixture {
            db,
            pubsub,
            coordinator,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn proofs_complete_the_anchor_and_publish_create() {
        let witness_uri = "https://witness.domain2.com/services/orb";
        let f = fixture(
            WitnessConfig {
                policy: Some("MinPercent(100,batch)".to_string()),
                ..Default::default()
            },
            &[witness_uri],
        );
        let completed_rx = f.pubsub.subscribe(ANCHOR_COMPLETED_TOPIC).await.unwrap();

        f.coordinator
            .process_built(built_anchor(), f.cancel.clone())
            .await
            .unwrap();
        let status = f
            .coordinator
            .handle_proof("uEiAnchor", proof(witness_uri, Utc::now()))
            .await
            .unwrap();
        assert_eq!(status, AnchorStatus::Completed);

        let completed: BuiltAnchor =
            serde_json::from_slice(&completed_rx.recv_async().await.unwrap()).unwrap();
        let proofs = vc::proofs(&completed.credential);
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].domain, witness_uri);

        // a Create activity landed in the outbox
        let store = ActivityStore::new(f.db.clone());
        let actor = Url::parse("https://orb.domain1.com/services/orb").unwrap();
        let page = store.page(&actor, BoxKind::Outbox, 0).unwrap();
        assert!(page
            .iter()
            .any(|a| a.activity_type == ActivityType::Create));
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn unsatisfied_policy_keeps_the_anchor_in_process() {
        let f = fixture(
            WitnessConfig {
                policy: Some("OutOf(2,batch)".to_string()),
                ..Default::default()
            },
            &[
                "https://witness.domain2.com/services/orb",
                "https://witness.domain3.com/services/orb",
            ],
        );
        f.coordinator
            .process_built(built_anchor(), f.cancel.clone())
            .await
            .unwrap();
        let status = f
            .coordinator
            .handle_proof(
                "uEiAnchor",
                proof("https://witness.domain2.com/services/orb", Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(status, AnchorStatus::InProcess);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn proof_from_unselected_witness_is_rejected() {
        let f = fixture(
            WitnessConfig {
                policy: Some("OutOf(1,batch)".to_string()),
                ..Default::default()
            },
            &["https://witness.domain2.com/services/orb"],
        );
        f.coordinator
            .process_built(built_anchor(), f.cancel.clone())
            .await
            .unwrap();
        let err = f
            .coordinator
            .handle_proof("uEiAnchor", proof("https://rogue.example.com", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn newer_duplicate_proof_replaces_older() {
        let witness_uri = "https://witness.domain2.com/services/orb";
        let f = fixture(
            WitnessConfig {
                policy: Some("OutOf(2,batch)".to_string()),
                ..Default::default()
            },
            &[witness_uri, "https://witness.domain3.com/services/orb"],
        );
        f.coordinator
            .process_built(built_anchor(), f.cancel.clone())
            .await
            .unwrap();

        let older = Utc::now() - chrono::Duration::minutes(5);
        let newer = Utc::now();
        f.coordinator
            .handle_proof("uEiAnchor", proof(witness_uri, newer))
            .await
            .unwrap();
        f.coordinator
            .handle_proof("uEiAnchor", proof(witness_uri, older))
            .await
            .unwrap();

        let index = f.coordinator.anchor_index("uEiAnchor").unwrap().unwrap();
        let stored = index
            .witnesses
            .iter()
            .find(|w| w.uri.as_str() == witness_uri)
            .unwrap();
        assert_eq!(stored.proof.as_ref().unwrap().created, newer);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn late_proofs_are_stored_but_not_counted() {
        let witness_uri = "https://witness.domain2.com/services/orb";
        let f = fixture(
            WitnessConfig {
                policy: Some("OutOf(1,batch)".to_string()),
                ..Default::default()
            },
            &[witness_uri],
        );
        f.coordinator
            .process_built(built_anchor(), f.cancel.clone())
            .await
            .unwrap();
        f.coordinator
            .handle_proof("uEiAnchor", proof(witness_uri, Utc::now()))
            .await
            .unwrap();

        let status = f
            .coordinator
            .handle_proof("uEiAnchor", proof(witness_uri, Utc::now()))
            .await
            .unwrap();
        assert_eq!(status, AnchorStatus::Completed);
        let index = f.coordinator.anchor_index("uEiAnchor").unwrap().unwrap();
        assert_eq!(index.late_proofs.len(), 1);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn timeout_retries_then_abandons() {
        let f = fixture(
            WitnessConfig {
                policy: Some("OutOf(1,batch)".to_string()),
                max_offer_retries: 1,
                witness_timeout: Duration::from_millis(10),
                ..Default::default()
            },
            &["https://witness.domain2.com/services/orb"],
        );
        f.coordinator
            .process_built(built_anchor(), f.cancel.clone())
            .await
            .unwrap();

        // retry 1 keeps the anchor in process, retry 2 exceeds the budget
        assert_eq!(
            f.coordinator.handle_timeout("uEiAnchor").await.unwrap(),
            AnchorStatus::InProcess
        );
        assert_eq!(
            f.coordinator.handle_timeout("uEiAnchor").await.unwrap(),
            AnchorStatus::Abandoned
        );
        let index = f.coordinator.anchor_index("uEiAnchor").unwrap().unwrap();
        assert_eq!(index.status, AnchorStatus::Abandoned);
        f.cancel.cancel();
    }
}
