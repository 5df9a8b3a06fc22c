use crate::merkle::{self, Hash};
use crate::{Error, LogMonitorStore};
use async_trait::async_trait;
use data_encoding::BASE64;
use orb_db::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A signed tree head as served by the log's `get-sth` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    pub tree_head_signature: String,
}

impl SignedTreeHead {
    pub fn root(&self) -> Result<Hash, Error> {
        let bytes = BASE64
            .decode(self.sha256_root_hash.as_bytes())
            .map_err(|e| Error::Malformed(format!("root hash: {e}")))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Malformed("root hash is not 32 bytes".to_string()))
    }
}

#[derive(Deserialize)]
struct ConsistencyResponse {
    consistency: Vec<String>,
}

/// Access to a transparency log's public endpoints.
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn get_sth(&self, log: &Url) -> Result<SignedTreeHead, Error>;

    async fn get_consistency(
        &self,
        log: &Url,
        first: u64,
        second: u64,
    ) -> Result<Vec<Hash>, Error>;
}

/// [LogClient] over the CT-style HTTP API.
pub struct HttpLogClient {
    client: reqwest::Client,
}

impl HttpLogClient {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("{url}: {e}")))
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    async fn get_sth(&self, log: &Url) -> Result<SignedTreeHead, Error> {
        let url = log
            .join("ct/v1/get-sth")
            .map_err(|e| Error::Malformed(e.to_string()))?;
        self.get_json(url).await
    }

    async fn get_consistency(
        &self,
        log: &Url,
        first: u64,
        second: u64,
    ) -> Result<Vec<Hash>, Error> {
        let mut url = log
            .join("ct/v1/get-sth-consistency")
            .map_err(|e| Error::Malformed(e.to_string()))?;
        url.set_query(Some(&format!("first={first}&second={second}")));
        let response: ConsistencyResponse = self.get_json(url).await?;
        response
            .consistency
            .iter()
            .map(|entry| {
                let bytes = BASE64
                    .decode(entry.as_bytes())
                    .map_err(|e| Error::Malformed(format!("proof node: {e}")))?;
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Malformed("proof node is not 32 bytes".to_string()))
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Periodically fetches each active log's tree head and verifies a
/// consistency proof against the previously stored head. A log that fails
/// verification is flagged inactive, which removes it (and its witnesses)
/// from anchor-witness selection.
pub struct LogMonitor<DB, C> {
    store: LogMonitorStore<DB>,
    client: C,
    config: MonitorConfig,
}

impl<DB, C> LogMonitor<DB, C>
where
    DB: Store + Clone + Send + Sync + 'static,
    C: LogClient + 'static,
{
    pub fn new(store: LogMonitorStore<DB>, client: C, config: MonitorConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "log monitor sweep failed");
                }
            }
        })
    }

    /// Check every active log once.
    pub async fn run_once(&self) -> Result<(), Error> {
        for log in self.store.active()? {
            match self.check(&log).await {
                Ok(()) => {}
                Err(Error::Inconsistent(_)) => {
                    error!(log = %log, "log failed consistency verification, deactivating");
                    self.store.deactivate(&log)?;
                }
                Err(e) => warn!(log = %log, error = %e, "log check failed"),
            }
        }
        Ok(())
    }

    async fn check(&self, log: &Url) -> Result<(), Error> {
        let sth = self.client.get_sth(log).await?;
        let previous = self.store.latest_sth(log)?;
        let Some(previous) = previous else {
            info!(log = %log, tree_size = sth.tree_size, "initial tree head stored");
            self.store.store_sth(log, &sth)?;
            return Ok(());
        };
        if sth.tree_size == previous.tree_size {
            if sth.root()? != previous.root()? {
                return Err(Error::Inconsistent(log.to_string()));
            }
            return Ok(());
        }
        if sth.tree_size < previous.tree_size {
            // a log must never shrink
            return Err(Error::Inconsistent(log.to_string()));
        }
        let proof = self
            .client
            .get_consistency(log, previous.tree_size, sth.tree_size)
            .await?;
        if !merkle::verify_consistency(
            previous.tree_size,
            sth.tree_size,
            &previous.root()?,
            &sth.root()?,
            &proof,
        ) {
            return Err(Error::Inconsistent(log.to_string()));
        }
        info!(log = %log, from = previous.tree_size, to = sth.tree_size,
            "tree head advanced consistently");
        self.store.store_sth(log, &sth)?;
        Ok(())
    }
}
