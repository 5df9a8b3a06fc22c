use crate::{
    Activity, ActivityStore, ActivityType, BoxKind, CollectionKind, Collections, Error, Outbox,
};
use async_trait::async_trait;
use orb_db::Store;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// How an inbound request was authenticated.
#[derive(Clone, Debug)]
pub enum InboxAuth {
    /// A configured bearer token matched; the payload is trusted as-is.
    Token,
    /// An HTTP signature verified to this actor IRI.
    Actor(Url),
}

/// Per-type activity processing. Handlers must be idempotent: the inbox
/// dispatches each stored activity id at most once, but redeliveries of the
/// same content under new ids are possible.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, activity: &Activity) -> Result<(), Error>;
}

/// Decides whether an authenticated actor may perform an activity.
#[async_trait]
pub trait InboxAuthorizer: Send + Sync {
    async fn authorize(&self, actor: &Url, activity: &Activity) -> Result<bool, Error>;
}

/// Standard authorization: anchors (`Create` / `Announce`) are accepted only
/// from services this node follows; relationship-building activities are
/// always allowed.
pub struct FollowersOnly<DB> {
    collections: Collections<DB>,
}

impl<DB> FollowersOnly<DB> {
    pub fn new(collections: Collections<DB>) -> Self {
        Self { collections }
    }
}

#[async_trait]
impl<DB: Store + Send + Sync> InboxAuthorizer for FollowersOnly<DB> {
    async fn authorize(&self, actor: &Url, activity: &Activity) -> Result<bool, Error> {
        match activity.activity_type {
            ActivityType::Create | ActivityType::Announce => {
                Ok(self.collections.contains(CollectionKind::Following, actor)?
                    || self.collections.contains(CollectionKind::Witnesses, actor)?)
            }
            _ => Ok(true),
        }
    }
}

/// The actor's inbox: authenticates, authorizes, persists and dispatches
/// inbound activities to a type-indexed handler map.
pub struct Inbox<DB> {
    store: ActivityStore<DB>,
    collections: Collections<DB>,
    actor: Url,
    authorizer: Arc<dyn InboxAuthorizer>,
    handlers: RwLock<HashMap<ActivityType, Arc<dyn ActivityHandler>>>,
    outbox: Option<Arc<Outbox<DB>>>,
}

impl<DB> Inbox<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: ActivityStore<DB>,
        collections: Collections<DB>,
        actor: Url,
        authorizer: Arc<dyn InboxAuthorizer>,
    ) -> Self {
        Self {
            store,
            collections,
            actor,
            authorizer,
            handlers: RwLock::new(HashMap::new()),
            outbox: None,
        }
    }

    /// Attach the outbox used for Accept replies to Follow / Invite.
    pub fn with_outbox(mut self, outbox: Arc<Outbox<DB>>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn register_handler(&self, activity_type: ActivityType, handler: Arc<dyn ActivityHandler>) {
        self.handlers.write().insert(activity_type, handler);
    }

    pub fn actor(&self) -> &Url {
        &self.actor
    }

    /// Process an inbound delivery.
    pub async fn receive(&self, auth: InboxAuth, body: &[u8]) -> Result<(), Error> {
        let activity = Activity::parse(body)?;
        if let InboxAuth::Actor(actor) = &auth {
            if *actor != activity.actor {
                return Err(Error::Unauthorized);
            }
        }
        if self.store.contains(&activity.id)? {
            debug!(id = %activity.id, "duplicate activity acked");
            return Ok(());
        }
        if !self
            .authorizer
            .authorize(&activity.actor, &activity)
            .await?
        {
            return Err(Error::Forbidden(activity.actor.to_string()));
        }
        self.store.add(&self.actor, BoxKind::Inbox, &activity)?;
        self.dispatch(&activity).await
    }

    /// Feed an activity recovered by the sync task into the standard handler
    /// path. Authentication is skipped; the activity was read from a peer's
    /// own collections.
    pub async fn dispatch_synced(&self, activity: &Activity) -> Result<(), Error> {
        if self.store.contains(&activity.id)? {
            return Ok(());
        }
        self.store.add(&self.actor, BoxKind::Inbox, activity)?;
        self.dispatch(activity).await
    }

    async fn dispatch(&self, activity: &Activity) -> Result<(), Error> {
        match activity.activity_type {
            ActivityType::Follow => {
                self.collections
                    .add(CollectionKind::Followers, &activity.actor)?;
                info!(follower = %activity.actor, "follower added");
                self.reply_accept(activity).await;
            }
            ActivityType::Invite => {
                self.collections
                    .add(CollectionKind::Witnesses, &activity.actor)?;
                info!(witness = %activity.actor, "witness added");
                self.reply_accept(activity).await;
            }
            ActivityType::Accept => self.handle_accept(activity)?,
            ActivityType::Undo => self.handle_undo(activity)?,
            ActivityType::Like => {
                if let Some(object) = activity.object_iri() {
                    self.collections.add(CollectionKind::Liked, &object)?;
                }
            }
            _ => {}
        }

        let handler = self.handlers.read().get(&activity.activity_type).cloned();
        if let Some(handler) = handler {
            match handler.handle(activity).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    // non-retryable; the activity stays acked
                    warn!(id = %activity.id, r#type = %activity.activity_type, error = %e,
                        "activity handler rejected activity");
                }
            }
        }
        Ok(())
    }

    /// An `Accept` of one of our own relationship activities completes it:
    /// accepting our Follow makes the accepter a followee, accepting our
    /// Invite makes it a witness. Other Accept payloads (e.g. witness
    /// proofs) are left to the registered handler.
    fn handle_accept(&self, activity: &Activity) -> Result<(), Error> {
        let Some(embedded) = activity.embedded() else {
            return Ok(());
        };
        if embedded.actor != self.actor {
            return Ok(());
        }
        match embedded.activity_type {
            ActivityType::Follow => {
                self.collections
                    .add(CollectionKind::Following, &activity.actor)?;
                info!(followee = %activity.actor, "follow accepted");
            }
            ActivityType::Invite => {
                self.collections
                    .add(CollectionKind::Witnesses, &activity.actor)?;
                info!(witness = %activity.actor, "witness invitation accepted");
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_undo(&self, activity: &Activity) -> Result<(), Error> {
        let embedded = activity
            .embedded()
            .ok_or_else(|| Error::Malformed("Undo without embedded activity".to_string()))?;
        if embedded.actor != activity.actor {
            return Err(Error::Forbidden(
                "cannot undo another actor's activity".to_string(),
            ));
        }
        match embedded.activity_type {
            ActivityType::Follow => {
                self.collections
                    .remove(CollectionKind::Followers, &activity.actor)?;
                info!(follower = %activity.actor, "follower removed");
            }
            ActivityType::Invite => {
                self.collections
                    .remove(CollectionKind::Witnesses, &activity.actor)?;
                info!(witness = %activity.actor, "witness removed");
            }
            other => {
                return Err(Error::Malformed(format!("cannot undo {other} activity")));
            }
        }
        Ok(())
    }

    async fn reply_accept(&self, activity: &Activity) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        let object = match serde_json::to_value(activity) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize activity for Accept");
                return;
            }
        };
        let accept = Activity::new(
            ActivityType::Accept,
            &self.actor,
            object,
            vec![activity.actor.to_string()],
        );
        if let Err(e) = outbox.post(accept).await {
            warn!(to = %activity.actor, error = %e, "failed to post Accept reply");
        }
    }
}
