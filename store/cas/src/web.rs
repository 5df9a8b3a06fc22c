use crate::Error;
use chrono::Utc;
use orb_crypto::httpsig::{self, RequestTarget};
use orb_crypto::Signer;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound HTTP fetcher. When key material is configured, requests carry a
/// Cavage-style signature so peers can authenticate the caller.
#[derive(Clone)]
pub struct WebFetcher {
    client: reqwest::Client,
    signer: Option<(Arc<dyn Signer>, String)>,
}

impl WebFetcher {
    pub fn new() -> Result<Self, Error> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self {
            client,
            signer: None,
        })
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>, key_id: &str) -> Self {
        self.signer = Some((signer, key_id.to_string()));
        self
    }

    /// GET `url`, returning the body bytes. 404 maps to [Error::NotFound];
    /// connection failures, timeouts and 5xx responses are transient.
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, Error> {
        let mut request = self.client.get(url.clone());
        if let Some((signer, key_id)) = &self.signer {
            let date = Utc::now().to_rfc2822();
            let digest = httpsig::digest_header(b"");
            let host = url.host_str().unwrap_or_default();
            let target = RequestTarget {
                method: "GET",
                path: url.path(),
                host,
                date: &date,
                digest: &digest,
            };
            let signature = httpsig::sign_request(signer.as_ref(), key_id, &target)
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;
            request = request
                .header("Host", host)
                .header("Date", date)
                .header("Digest", digest)
                .header("Signature", signature);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::Transient(format!("{url} returned {status}")));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Transient(e.to_string()))
    }
}
