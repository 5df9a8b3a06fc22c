//! Inbox handlers for the witnessing exchange. [OfferHandler] runs on the
//! witness side and countersigns offered anchors; [AcceptHandler] runs on
//! the issuing side and feeds returned proofs to the coordinator.

use crate::{Error, WitnessCoordinator};
use async_trait::async_trait;
use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use orb_activitypub::{Activity, ActivityHandler, ActivityType, Outbox};
use orb_anchor_builder::{vc, BuiltAnchor};
use orb_crypto::Signer;
use orb_db::Store;
use orb_linkset::canonical_json_bytes;
use orb_op_queue::PubSub;
use orb_types::Proof;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// The payload a witness returns inside its `Accept`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofReply {
    pub anchor_hash: String,
    pub proof: Proof,
}

/// Handles `Offer`: verifies the offered credential binds the anchor,
/// produces a proof over the canonical credential bytes and replies with
/// `Accept`.
pub struct OfferHandler<DB> {
    signer: Arc<dyn Signer>,
    key_id: String,
    /// This witness's service IRI; recorded as the proof `domain`.
    domain: Url,
    outbox: Arc<Outbox<DB>>,
}

impl<DB> OfferHandler<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    pub fn new(
        signer: Arc<dyn Signer>,
        key_id: &str,
        domain: Url,
        outbox: Arc<Outbox<DB>>,
    ) -> Self {
        Self {
            signer,
            key_id: key_id.to_string(),
            domain,
            outbox,
        }
    }

    async fn witness(&self, anchor: &BuiltAnchor) -> Result<Proof, Error> {
        if !vc::binds_anchor(&anchor.credential, &format!("hl:{}", anchor.anchor_hash)) {
            return Err(Error::MalformedProof(format!(
                "offered credential does not bind anchor {}",
                anchor.anchor_hash
            )));
        }
        let payload = canonical_json_bytes(&anchor.credential)
            .map_err(|e| Error::MalformedProof(e.to_string()))?;
        let signature = self
            .signer
            .sign(&self.key_id, &payload)
            .await
            .map_err(|e| Error::MalformedProof(e.to_string()))?;
        let verification_method = self
            .signer
            .verification_method(&self.key_id)
            .await
            .map_err(|e| Error::MalformedProof(e.to_string()))?;
        Ok(Proof {
            created: Utc::now(),
            domain: self.domain.to_string(),
            verification_method,
            proof_value: BASE64URL_NOPAD.encode(&signature),
            proof_type: "Ed25519Signature2020".to_string(),
        })
    }
}

#[async_trait]
impl<DB> ActivityHandler for OfferHandler<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    async fn handle(&self, activity: &Activity) -> Result<(), orb_activitypub::Error> {
        let anchor: BuiltAnchor = activity
            .object
            .clone()
            .ok_or_else(|| orb_activitypub::Error::Malformed("Offer without object".to_string()))
            .and_then(|o| {
                serde_json::from_value(o)
                    .map_err(|e| orb_activitypub::Error::Malformed(e.to_string()))
            })?;
        let proof = self
            .witness(&anchor)
            .await
            .map_err(|e| orb_activitypub::Error::Handler(e.to_string()))?;
        info!(anchor = %anchor.anchor_hash, offerer = %activity.actor, "anchor witnessed");

        let reply = ProofReply {
            anchor_hash: anchor.anchor_hash,
            proof,
        };
        let accept = Activity::new(
            ActivityType::Accept,
            self.outbox.actor(),
            serde_json::to_value(&reply)
                .map_err(|e| orb_activitypub::Error::Malformed(e.to_string()))?,
            vec![activity.actor.to_string()],
        );
        self.outbox.post(accept).await?;
        Ok(())
    }
}

/// Handles `Accept` replies carrying witness proofs.
pub struct AcceptHandler<DB, P> {
    coordinator: Arc<WitnessCoordinator<DB, P>>,
}

impl<DB, P> AcceptHandler<DB, P> {
    pub fn new(coordinator: Arc<WitnessCoordinator<DB, P>>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl<DB, P> ActivityHandler for AcceptHandler<DB, P>
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
{
    async fn handle(&self, activity: &Activity) -> Result<(), orb_activitypub::Error> {
        let Some(object) = activity.object.clone() else {
            // an Accept with no payload is a plain acknowledgement
            // (e.g. of a Follow); nothing to do here
            return Ok(());
        };
        let reply: ProofReply = match serde_json::from_value(object) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        if reply.proof.domain != activity.actor.as_str() {
            warn!(actor = %activity.actor, domain = %reply.proof.domain,
                "rejecting proof whose domain does not match its sender");
            return Ok(());
        }
        match self
            .coordinator
            .handle_proof(&reply.anchor_hash, reply.proof)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::UnknownAnchor(hash)) => {
                warn!(anchor = %hash, "proof for unknown anchor ignored");
                Ok(())
            }
            Err(Error::MalformedProof(e)) => {
                warn!(error = %e, "malformed proof dropped");
                Ok(())
            }
            Err(e) => Err(orb_activitypub::Error::Handler(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_activitypub::{ActivityStore, ApClient, Collections, OutboxConfig};
    use orb_crypto::LocalSigner;
    use orb_db::MemoryDB;
    use serde_json::json;

    fn outbox(db: MemoryDB, actor: &str) -> Arc<Outbox<MemoryDB>> {
        Arc::new(Outbox::new(
            ActivityStore::new(db.clone()),
            Collections::new(db),
            ApClient::new().unwrap(),
            Url::parse(actor).unwrap(),
            OutboxConfig::default(),
        ))
    }

    fn built_anchor() -> BuiltAnchor {
        BuiltAnchor {
            anchor_hash: "uEiAnchor".to_string(),
            anchor_hashlink: "hl:uEiAnchor".to_string(),
            linkset: orb_linkset::Linkset {
                linkset: vec![Default::default()],
            },
            credential: json!({"credentialSubject": {"id": "hl:uEiAnchor"}}),
            namespace: "orb".to_string(),
            protocol_version: 1,
        }
    }

    #[tokio::test]
    async fn offer_produces_an_accept_with_proof() {
        let db = MemoryDB::default();
        let signer = LocalSigner::new();
        signer.generate("witness", "did:web:witness.domain2.com#key");
        let witness_actor = "https://witness.domain2.com/services/orb";
        let handler = OfferHandler::new(
            Arc::new(signer),
            "witness",
            Url::parse(witness_actor).unwrap(),
            outbox(db.clone(), witness_actor),
        );

        let offer = Activity::new(
            ActivityType::Offer,
            &Url::parse("https://orb.domain1.com/services/orb").unwrap(),
            serde_json::to_value(built_anchor()).unwrap(),
            vec![witness_actor.to_string()],
        );
        handler.handle(&offer).await.unwrap();

        // the Accept landed in the witness's outbox with a proof bound to
        // this witness's domain
        let store = ActivityStore::new(db);
        let actor = Url::parse(witness_actor).unwrap();
        let page = store
            .page(&actor, orb_activitypub::BoxKind::Outbox, 0)
            .unwrap();
        assert_eq!(page.len(), 1);
        let reply: ProofReply =
            serde_json::from_value(page[0].object.clone().unwrap()).unwrap();
        assert_eq!(reply.anchor_hash, "uEiAnchor");
        assert_eq!(reply.proof.domain, witness_actor);
        assert!(!reply.proof.proof_value.is_empty());
    }

    #[tokio::test]
    async fn offer_with_unbound_credential_is_rejected() {
        let db = MemoryDB::default();
        let signer = LocalSigner::new();
        signer.generate("witness", "did:web:witness.domain2.com#key");
        let witness_actor = "https://witness.domain2.com/services/orb";
        let handler = OfferHandler::new(
            Arc::new(signer),
            "witness",
            Url::parse(witness_actor).unwrap(),
            outbox(db, witness_actor),
        );

        let mut anchor = built_anchor();
        anchor.credential = json!({"credentialSubject": {"id": "hl:uEiOther"}});
        let offer = Activity::new(
            ActivityType::Offer,
            &Url::parse("https://orb.domain1.com/services/orb").unwrap(),
            serde_json::to_value(anchor).unwrap(),
            vec![],
        );
        assert!(handler.handle(&offer).await.is_err());
    }
}
