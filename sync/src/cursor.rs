use crate::Error;
use orb_db::{Store, StoreExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const CURSOR_PREFIX: &str = "/sync/cursor/";

/// Which of a peer's collections a cursor tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncSource {
    Inbox,
    Outbox,
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncSource::Inbox => write!(f, "inbox"),
            SyncSource::Outbox => write!(f, "outbox"),
        }
    }
}

/// Position within a peer's paged collection. Ordered lexicographically by
/// `(page, index)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncCursor {
    pub page: u64,
    pub index: u64,
}

/// Persists per-`(service, source)` sync positions. Writes that do not
/// advance the cursor are ignored, which keeps the position monotone even
/// across overlapping runs.
#[derive(Clone)]
pub struct CursorStore<DB> {
    db: DB,
}

impl<DB: Store> CursorStore<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn key(service: &Url, source: SyncSource) -> Vec<u8> {
        format!("{CURSOR_PREFIX}{service}|{source}").into_bytes()
    }

    pub fn get(&self, service: &Url, source: SyncSource) -> Result<SyncCursor, Error> {
        Ok(self
            .db
            .read_obj(Self::key(service, source))?
            .unwrap_or_default())
    }

    /// Advance the cursor; a position at or behind the stored one is a
    /// no-op. Returns the effective position.
    pub fn advance(
        &self,
        service: &Url,
        source: SyncSource,
        position: SyncCursor,
    ) -> Result<SyncCursor, Error> {
        let current = self.get(service, source)?;
        if position <= current {
            return Ok(current);
        }
        self.db.write_obj(Self::key(service, source), &position)?;
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_db::MemoryDB;
    use pretty_assertions::assert_eq;

    fn service() -> Url {
        Url::parse("https://orb.domain2.com/services/orb").unwrap()
    }

    #[test]
    fn starts_at_origin() {
        let store = CursorStore::new(MemoryDB::default());
        assert_eq!(
            store.get(&service(), SyncSource::Outbox).unwrap(),
            SyncCursor::default()
        );
    }

    #[test]
    fn advances_only_forward() {
        let store = CursorStore::new(MemoryDB::default());
        let ahead = SyncCursor { page: 2, index: 10 };
        store
            .advance(&service(), SyncSource::Outbox, ahead)
            .unwrap();

        // an older position does not move the cursor back
        let behind = SyncCursor { page: 2, index: 3 };
        let effective = store
            .advance(&service(), SyncSource::Outbox, behind)
            .unwrap();
        assert_eq!(effective, ahead);
        assert_eq!(store.get(&service(), SyncSource::Outbox).unwrap(), ahead);

        // a later page advances even with a smaller index
        let next_page = SyncCursor { page: 3, index: 0 };
        store
            .advance(&service(), SyncSource::Outbox, next_page)
            .unwrap();
        assert_eq!(
            store.get(&service(), SyncSource::Outbox).unwrap(),
            next_page
        );
    }

    #[test]
    fn sources_are_tracked_independently() {
        let store = CursorStore::new(MemoryDB::default());
        store
            .advance(
                &service(),
                SyncSource::Inbox,
                SyncCursor { page: 1, index: 1 },
            )
            .unwrap();
        assert_eq!(
            store.get(&service(), SyncSource::Outbox).unwrap(),
            SyncCursor::default()
        );
    }
}
