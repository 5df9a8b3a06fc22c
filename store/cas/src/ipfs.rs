use crate::Error;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin client for the IPFS HTTP API, used only for best-effort mirroring
/// of CAS writes.
#[derive(Clone)]
pub struct IpfsClient {
    base: Url,
    client: reqwest::Client,
}

impl IpfsClient {
    pub fn new(base: Url) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { base, client })
    }

    /// `POST /api/v0/add` with the raw bytes as a multipart file.
    pub async fn add(&self, data: &[u8]) -> Result<(), Error> {
        let url = self
            .base
            .join("api/v0/add")
            .map_err(|e| Error::Malformed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(data.to_vec()));
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "ipfs add returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
