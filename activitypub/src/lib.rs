mod client;
mod errors;
mod inbox;
mod outbox;
mod store;
mod vocab;

pub use client::{ActorDocument, ActorKeyResolver, ApClient, CollectionPage, PublicKeyDocument};
pub use errors::Error;
pub use inbox::{ActivityHandler, Inbox, InboxAuth, InboxAuthorizer, FollowersOnly};
pub use outbox::{Outbox, OutboxConfig};
pub use store::{ActivityStore, BoxKind, CollectionKind, Collections, PAGE_SIZE};
pub use vocab::{Activity, ActivityType, PUBLIC_IRI};
