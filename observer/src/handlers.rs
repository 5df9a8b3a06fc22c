use crate::ANCHOR_RECEIVED_TOPIC;
use async_trait::async_trait;
use orb_activitypub::{Activity, ActivityHandler, Error as ApError};
use orb_anchor_builder::BuiltAnchor;
use orb_op_queue::PubSub;
use std::sync::Arc;
use tracing::{debug, warn};

fn anchor_from(activity: &Activity) -> Result<BuiltAnchor, ApError> {
    let object = activity
        .object
        .clone()
        .ok_or_else(|| ApError::Malformed("activity carries no anchor object".to_string()))?;
    serde_json::from_value(object)
        .map_err(|e| ApError::Malformed(format!("activity object is not an anchor: {e}")))
}

/// Handles federated `Create` activities: the embedded anchor is queued for
/// the observer.
pub struct CreateHandler<P> {
    pubsub: Arc<P>,
}

impl<P> CreateHandler<P> {
    pub fn new(pubsub: Arc<P>) -> Self {
        Self { pubsub }
    }
}

#[async_trait]
impl<P: PubSub + 'static> ActivityHandler for CreateHandler<P> {
    async fn handle(&self, activity: &Activity) -> Result<(), ApError> {
        let anchor = anchor_from(activity)?;
        debug!(anchor = %anchor.anchor_hash, from = %activity.actor, "anchor received");
        self.pubsub
            .publish(
                ANCHOR_RECEIVED_TOPIC,
                serde_json::to_vec(&anchor).map_err(|e| ApError::Malformed(e.to_string()))?,
            )
            .await
            .map_err(|e| ApError::Transient(e.to_string()))
    }
}

/// Handles `Announce`: marks the referenced anchor seen and requests the
/// body through the observer path when it is missing locally.
pub struct AnnounceHandler<P> {
    pubsub: Arc<P>,
}

impl<P> AnnounceHandler<P> {
    pub fn new(pubsub: Arc<P>) -> Self {
        Self { pubsub }
    }
}

#[async_trait]
impl<P: PubSub + 'static> ActivityHandler for AnnounceHandler<P> {
    async fn handle(&self, activity: &Activity) -> Result<(), ApError> {
        let anchor = match anchor_from(activity) {
            Ok(anchor) => anchor,
            Err(e) => {
                // an Announce may reference an anchor by IRI only; with no
                // embedded body there is nothing to replay yet
                warn!(id = %activity.id, error = %e, "Announce without usable anchor body");
                return Ok(());
            }
        };
        debug!(anchor = %anchor.anchor_hash, from = %activity.actor, "anchor announced");
        self.pubsub
            .publish(
                ANCHOR_RECEIVED_TOPIC,
                serde_json::to_vec(&anchor).map_err(|e| ApError::Malformed(e.to_string()))?,
            )
            .await
            .map_err(|e| ApError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_activitypub::ActivityType;
    use orb_op_queue::MemoryPubSub;
    use serde_json::json;
    use url::Url;

    fn actor() -> Url {
        Url::parse("https://orb.domain2.com/services/orb").unwrap()
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
    async fn create_queues_the_anchor_for_the_observer() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let rx = pubsub.subscribe(ANCHOR_RECEIVED_TOPIC).await.unwrap();
        let handler = CreateHandler::new(Arc::clone(&pubsub));
        let create = Activity::new(
            ActivityType::Create,
            &actor(),
            serde_json::to_value(built_anchor()).unwrap(),
            vec![],
        );
        handler.handle(&create).await.unwrap();
        let queued: BuiltAnchor = serde_json::from_slice(&rx.recv_async().await.unwrap()).unwrap();
        assert_eq!(queued.anchor_hash, "uEiAnchor");
    }

    #[tokio::test]
    async fn create_without_anchor_is_malformed() {
        let handler = CreateHandler::new(Arc::new(MemoryPubSub::new()));
        let create = Activity::new(ActivityType::Create, &actor(), json!("just-a-string"), vec![]);
        assert!(handler.handle(&create).await.is_err());
    }

    #[tokio::test]
    async fn announce_by_reference_is_tolerated() {
        let handler = AnnounceHandler::new(Arc::new(MemoryPubSub::new()));
        let announce = Activity::new(
            ActivityType::Announce,
            &actor(),
            json!("hl:uEiAnchor"),
            vec![],
        );
        handler.handle(&announce).await.unwrap();
    }
}
