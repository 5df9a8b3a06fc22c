use crate::{
    Activity, ActivityStore, ApClient, BoxKind, CollectionKind, Collections, Error, PUBLIC_IRI,
};
use backon::{ExponentialBuilder, Retryable};
use orb_db::Store;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub max_delivery_retries: usize,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_delivery_retries: 5,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

/// Posts activities: persists them in the actor's outbox under a stable id
/// with monotone page/index, resolves the audience to concrete peer inboxes
/// and delivers asynchronously with back-off.
pub struct Outbox<DB> {
    store: ActivityStore<DB>,
    collections: Collections<DB>,
    client: ApClient,
    actor: Url,
    config: OutboxConfig,
}

impl<DB> Outbox<DB>
where
    DB: Store + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: ActivityStore<DB>,
        collections: Collections<DB>,
        client: ApClient,
        actor: Url,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            collections,
            client,
            actor,
            config,
        }
    }

    pub fn actor(&self) -> &Url {
        &self.actor
    }

    /// Post an activity. Returns once the activity is persisted; deliveries
    /// proceed in the background.
    pub async fn post(&self, activity: Activity) -> Result<Url, Error> {
        self.store.add(&self.actor, BoxKind::Outbox, &activity)?;
        let recipients = self.resolve_recipients(&activity)?;
        debug!(id = %activity.id, r#type = %activity.activity_type,
            recipients = recipients.len(), "activity posted");

        for recipient in recipients {
            let client = self.client.clone();
            let activity = activity.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = deliver(&client, &recipient, &activity, &config).await {
                    warn!(recipient = %recipient, id = %activity.id, error = %e,
                        "activity delivery failed");
                }
            });
        }
        Ok(activity.id)
    }

    /// Expand the audience into concrete service IRIs. `Public` produces no
    /// direct deliveries; the followers and witnesses collection IRIs expand
    /// to their current members.
    fn resolve_recipients(&self, activity: &Activity) -> Result<BTreeSet<Url>, Error> {
        let followers_iri = collection_iri(&self.actor, "followers");
        let witnesses_iri = collection_iri(&self.actor, "witnesses");
        let mut recipients = BTreeSet::new();
        for entry in &activity.to {
            if entry == PUBLIC_IRI {
                continue;
            }
            if *entry == followers_iri {
                recipients.extend(self.collections.list(CollectionKind::Followers)?);
            } else if *entry == witnesses_iri {
                recipients.extend(self.collections.list(CollectionKind::Witnesses)?);
            } else if let Ok(iri) = entry.parse::<Url>() {
                recipients.insert(iri);
            } else {
                warn!(entry = %entry, "skipping unresolvable recipient");
            }
        }
        recipients.remove(&self.actor);
        Ok(recipients)
    }
}

/// IRI of one of the actor's collections.
pub(crate) fn collection_iri(actor: &Url, name: &str) -> String {
    format!("{}/{}", actor.as_str().trim_end_matches('/'), name)
}

async fn deliver(
    client: &ApClient,
    service: &Url,
    activity: &Activity,
    config: &OutboxConfig,
) -> Result<(), Error> {
    let backoff = ExponentialBuilder::default()
        .with_min_delay(config.retry_initial_delay)
        .with_max_delay(config.retry_max_delay)
        .with_max_times(config.max_delivery_retries);
    (|| async {
        let inbox = match client.get_actor(service).await {
            Ok(actor) => actor.inbox,
            // a bare service that serves no actor document still gets its
            // conventional inbox path
            Err(Error::Malformed(_)) | Err(Error::NotFound(_)) => collection_iri(service, "inbox")
                .parse()
                .map_err(|e| Error::Malformed(format!("inbox IRI: {e}")))?,
            Err(e) => return Err(e),
        };
        client.post_activity(&inbox, activity).await
    })
    .retry(backoff)
    .when(Error::is_transient)
    .await
}
