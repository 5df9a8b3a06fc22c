use crate::{Activity, Error};
use orb_db::{Store, StoreExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use url::Url;

/// Activities per collection page.
pub const PAGE_SIZE: u64 = 50;

const ACTIVITY_PREFIX: &str = "/activity/";
const ACTIVITY_ID_PREFIX: &str = "/activityid/";
const ACTIVITY_META_PREFIX: &str = "/activitymeta/";
const COLLECTION_PREFIX: &str = "/collection/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxKind {
    Inbox,
    Outbox,
}

impl fmt::Display for BoxKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoxKind::Inbox => write!(f, "inbox"),
            BoxKind::Outbox => write!(f, "outbox"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Followers,
    Following,
    Witnesses,
    Liked,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CollectionKind::Followers => write!(f, "followers"),
            CollectionKind::Following => write!(f, "following"),
            CollectionKind::Witnesses => write!(f, "witnesses"),
            CollectionKind::Liked => write!(f, "liked"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BoxMeta {
    total: u64,
}

/// Persistent inbox/outbox storage. Activities are appended under a
/// monotonically increasing `(page, index)` pair per `(source, box)`; once
/// stored, `(source, id)` entries are never mutated.
#[derive(Clone)]
pub struct ActivityStore<DB> {
    db: DB,
}

impl<DB: Store> ActivityStore<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn entry_key(source: &Url, box_kind: BoxKind, page: u64, index: u64) -> Vec<u8> {
        format!("{ACTIVITY_PREFIX}{source}|{box_kind}|{page:08}|{index:04}").into_bytes()
    }

    fn meta_key(source: &Url, box_kind: BoxKind) -> Vec<u8> {
        format!("{ACTIVITY_META_PREFIX}{source}|{box_kind}").into_bytes()
    }

    fn id_key(id: &Url) -> Vec<u8> {
        format!("{ACTIVITY_ID_PREFIX}{id}").into_bytes()
    }

    /// Append an activity, returning its `(page, index)` position. Appending
    /// an id that is already stored is a no-op returning the stored position.
    pub fn add(
        &self,
        source: &Url,
        box_kind: BoxKind,
        activity: &Activity,
    ) -> Result<(u64, u64), Error> {
        if let Some(position) = self.position(&activity.id)? {
            debug!(id = %activity.id, "activity already stored");
            return Ok(position);
        }
        let meta: BoxMeta = self
            .db
            .read_obj(Self::meta_key(source, box_kind))?
            .unwrap_or_default();
        let (page, index) = (meta.total / PAGE_SIZE, meta.total % PAGE_SIZE);
        self.db
            .write_obj(Self::entry_key(source, box_kind, page, index), activity)?;
        self.db
            .write_obj(Self::id_key(&activity.id), &(activity, (page, index)))?;
        self.db.write_obj(
            Self::meta_key(source, box_kind),
            &BoxMeta {
                total: meta.total + 1,
            },
        )?;
        Ok((page, index))
    }

    pub fn contains(&self, id: &Url) -> Result<bool, Error> {
        Ok(self.db.exists(Self::id_key(id))?)
    }

    pub fn activity(&self, id: &Url) -> Result<Option<Activity>, Error> {
        Ok(self
            .db
            .read_obj::<_, (Activity, (u64, u64))>(Self::id_key(id))?
            .map(|(activity, _)| activity))
    }

    fn position(&self, id: &Url) -> Result<Option<(u64, u64)>, Error> {
        Ok(self
            .db
            .read_obj::<_, (Activity, (u64, u64))>(Self::id_key(id))?
            .map(|(_, position)| position))
    }

    /// Activities of one page, in insertion order.
    pub fn page(
        &self,
        source: &Url,
        box_kind: BoxKind,
        page: u64,
    ) -> Result<Vec<Activity>, Error> {
        let prefix = format!("{ACTIVITY_PREFIX}{source}|{box_kind}|{page:08}|");
        Ok(self
            .db
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect())
    }

    pub fn total(&self, source: &Url, box_kind: BoxKind) -> Result<u64, Error> {
        let meta: BoxMeta = self
            .db
            .read_obj(Self::meta_key(source, box_kind))?
            .unwrap_or_default();
        Ok(meta.total)
    }

    /// Index of the last (newest) page.
    pub fn last_page(&self, source: &Url, box_kind: BoxKind) -> Result<u64, Error> {
        let total = self.total(source, box_kind)?;
        Ok(total.saturating_sub(1) / PAGE_SIZE)
    }
}

/// The node's follower / following / witness / liked collections. Mutated
/// only by inbox handlers; reads see a consistent snapshot.
#[derive(Clone)]
pub struct Collections<DB> {
    db: DB,
}

impl<DB: Store> Collections<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn key(kind: CollectionKind, iri: &Url) -> Vec<u8> {
        format!("{COLLECTION_PREFIX}{kind}/{iri}").into_bytes()
    }

    pub fn add(&self, kind: CollectionKind, iri: &Url) -> Result<(), Error> {
        self.db.write(Self::key(kind, iri), iri.as_str())?;
        Ok(())
    }

    pub fn remove(&self, kind: CollectionKind, iri: &Url) -> Result<(), Error> {
        self.db.delete(Self::key(kind, iri))?;
        Ok(())
    }

    pub fn contains(&self, kind: CollectionKind, iri: &Url) -> Result<bool, Error> {
        Ok(self.db.exists(Self::key(kind, iri))?)
    }

    pub fn list(&self, kind: CollectionKind) -> Result<Vec<Url>, Error> {
        let prefix = format!("{COLLECTION_PREFIX}{kind}/");
        Ok(self
            .db
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .filter_map(|(_, v)| String::from_utf8(v).ok())
            .filter_map(|s| s.parse().ok())
            .collect())
    }
}
