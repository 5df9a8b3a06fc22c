use orb_activitypub::{ActivityStore, ActorKeyResolver, Collections, Inbox};
use orb_cas::CasStore;
use orb_crypto::Signer;
use orb_db::Store;
use orb_op_decorator::{OperationDecorator, OriginResolver};
use orb_op_queue::{OperationQueue, PubSub};
use orb_op_store::{OperationStore, UnpublishedOperationStore};
use orb_vct::LogMonitorStore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use url::Url;

#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Name of the single service actor hosted by this node (path segment
    /// under `/services/`).
    pub actor_name: String,
    /// Externally reachable base URL of this node.
    pub base: Url,
    pub namespace: String,
    pub protocol_version: u64,
    /// Bearer token required by admin endpoints; `None` disables them.
    pub admin_token: Option<String>,
    /// Bearer token accepted for inbox delivery in lieu of an HTTP
    /// signature.
    pub inbox_token: Option<String>,
}

impl HttpConfig {
    pub fn actor_iri(&self) -> Url {
        self.base
            .join(&format!("/services/{}", self.actor_name))
            .expect("actor IRI derives from a valid base URL")
    }
}

/// Everything the HTTP handlers reach into.
pub struct AppState<DB, P, R> {
    pub cas: Arc<dyn CasStore>,
    pub queue: Arc<OperationQueue<DB, P>>,
    pub decorator: Arc<OperationDecorator<DB, R>>,
    pub op_store: OperationStore<DB>,
    pub unpublished: UnpublishedOperationStore<DB>,
    pub inbox: Arc<Inbox<DB>>,
    pub activity_store: ActivityStore<DB>,
    pub collections: Collections<DB>,
    pub vct_store: LogMonitorStore<DB>,
    pub pubsub: Arc<P>,
    pub signer: Arc<dyn Signer>,
    pub key_resolver: ActorKeyResolver,
    /// Raw ed25519 public key served in the actor document.
    pub public_key: Vec<u8>,
    pub maintenance: AtomicBool,
    pub config: HttpConfig,
}

impl<DB, P, R> AppState<DB, P, R>
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
    R: OriginResolver + 'static,
{
    pub fn actor_iri(&self) -> Url {
        self.config.actor_iri()
    }
}
