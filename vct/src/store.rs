use crate::monitor::SignedTreeHead;
use crate::Error;
use orb_db::{Store, StoreExt};
use orb_witness::WitnessEligibility;
use serde::{Deserialize, Serialize};
use url::Url;

const LOG_STATUS_PREFIX: &str = "/vct/log/";
const STH_PREFIX: &str = "/vct/sth/";
const LOG_ENDPOINT_KEY: &str = "/vct/endpoint";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Active,
    Inactive,
}

/// Tracks monitored transparency logs, their latest verified tree heads and
/// the node's own configured witness-log endpoint.
#[derive(Clone)]
pub struct LogMonitorStore<DB> {
    db: DB,
}

impl<DB: Store> LogMonitorStore<DB> {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn status_key(log: &Url) -> Vec<u8> {
        format!("{LOG_STATUS_PREFIX}{log}").into_bytes()
    }

    fn sth_key(log: &Url) -> Vec<u8> {
        format!("{STH_PREFIX}{log}").into_bytes()
    }

    pub fn activate(&self, log: &Url) -> Result<(), Error> {
        self.db.write_obj(Self::status_key(log), &LogStatus::Active)?;
        Ok(())
    }

    pub fn deactivate(&self, log: &Url) -> Result<(), Error> {
        self.db
            .write_obj(Self::status_key(log), &LogStatus::Inactive)?;
        Ok(())
    }

    pub fn status(&self, log: &Url) -> Result<Option<LogStatus>, Error> {
        Ok(self.db.read_obj(Self::status_key(log))?)
    }

    fn with_status(&self, wanted: LogStatus) -> Result<Vec<Url>, Error> {
        Ok(self
            .db
            .scan_prefix(LOG_STATUS_PREFIX.as_bytes())?
            .into_iter()
            .filter_map(|(k, v)| {
                let status: LogStatus = serde_json::from_slice(&v).ok()?;
                (status == wanted).then(|| {
                    String::from_utf8(k[LOG_STATUS_PREFIX.len()..].to_vec())
                        .ok()?
                        .parse()
                        .ok()
                })?
            })
            .collect())
    }

    pub fn active(&self) -> Result<Vec<Url>, Error> {
        self.with_status(LogStatus::Active)
    }

    pub fn inactive(&self) -> Result<Vec<Url>, Error> {
        self.with_status(LogStatus::Inactive)
    }

    pub fn latest_sth(&self, log: &Url) -> Result<Option<SignedTreeHead>, Error> {
        Ok(self.db.read_obj(Self::sth_key(log))?)
    }

    pub fn store_sth(&self, log: &Url, sth: &SignedTreeHead) -> Result<(), Error> {
        self.db.write_obj(Self::sth_key(log), sth)?;
        Ok(())
    }

    /// The witness-log endpoint advertised by this node (admin-configured).
    pub fn log_endpoint(&self) -> Result<Option<Url>, Error> {
        Ok(self.db.read_obj(LOG_ENDPOINT_KEY)?)
    }

    pub fn set_log_endpoint(&self, url: &Url) -> Result<(), Error> {
        self.db.write_obj(LOG_ENDPOINT_KEY, url)?;
        Ok(())
    }
}

/// Witness selection consults the log monitor: a witness whose domain runs
/// an inactive (inconsistent) log is quarantined, and `has_log` reflects
/// whether an active log is known for the domain.
impl<DB: Store + Send + Sync> WitnessEligibility for LogMonitorStore<DB> {
    fn has_log(&self, witness: &Url) -> bool {
        self.active()
            .map(|logs| logs.iter().any(|l| l.host_str() == witness.host_str()))
            .unwrap_or(false)
    }

    fn is_quarantined(&self, witness: &Url) -> bool {
        self.inactive()
            .map(|logs| logs.iter().any(|l| l.host_str() == witness.host_str()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_db::MemoryDB;

    fn log() -> Url {
        Url::parse("https://vct.domain4.com/maple2022").unwrap()
    }

    #[test]
    fn activate_deactivate_round_trip() {
        let store = LogMonitorStore::new(MemoryDB::default());
        assert!(store.status(&log()).unwrap().is_none());

        store.activate(&log()).unwrap();
        assert_eq!(store.status(&log()).unwrap(), Some(LogStatus::Active));
        assert_eq!(store.active().unwrap(), vec![log()]);
        assert!(store.inactive().unwrap().is_empty());

        store.deactivate(&log()).unwrap();
        assert_eq!(store.status(&log()).unwrap(), Some(LogStatus::Inactive));
        assert!(store.active().unwrap().is_empty());
        assert_eq!(store.inactive().unwrap(), vec![log()]);
    }

    #[test]
    fn quarantine_matches_by_host() {
        let store = LogMonitorStore::new(MemoryDB::default());
        store.deactivate(&log()).unwrap();
        let witness = Url::parse("https://vct.domain4.com/services/orb").unwrap();
        assert!(store.is_quarantined(&witness));
        assert!(!store.has_log(&witness));

        let other = Url::parse("https://witness.domain2.com/services/orb").unwrap();
        assert!(!store.is_quarantined(&other));
    }

    #[test]
    fn log_endpoint_config() {
        let store = LogMonitorStore::new(MemoryDB::default());
        assert!(store.log_endpoint().unwrap().is_none());
        store.set_log_endpoint(&log()).unwrap();
        assert_eq!(store.log_endpoint().unwrap(), Some(log()));
    }
}
