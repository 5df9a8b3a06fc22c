use crate::{Activity, Error};
use async_trait::async_trait;
use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use orb_crypto::httpsig::{self, PublicKeyResolver, RequestTarget};
use orb_crypto::Signer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ACTIVITY_MEDIA_TYPE: &str = "application/activity+json";

/// A remote service's actor document, as served from its service IRI.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorDocument {
    pub id: Url,
    pub inbox: Url,
    pub outbox: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKeyDocument>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyDocument {
    pub id: String,
    pub owner: Url,
    /// `u`-multibase (base64url, no padding) raw ed25519 public key.
    pub public_key_multibase: String,
}

impl PublicKeyDocument {
    pub fn new(id: &str, owner: &Url, public_key: &[u8]) -> Self {
        Self {
            id: id.to_string(),
            owner: owner.clone(),
            public_key_multibase: format!("u{}", BASE64URL_NOPAD.encode(public_key)),
        }
    }

    pub fn key_bytes(&self) -> Result<Vec<u8>, Error> {
        let encoded = self
            .public_key_multibase
            .strip_prefix('u')
            .ok_or_else(|| Error::Malformed("unsupported key multibase".to_string()))?;
        BASE64URL_NOPAD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Malformed(format!("bad public key encoding: {e}")))
    }
}

/// One page of an ordered collection, or the collection head itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordered_items: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,
}

impl CollectionPage {
    /// Items parsed as activities; non-activity items are skipped.
    pub fn activities(&self) -> Vec<Activity> {
        self.ordered_items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Items parsed as plain IRIs.
    pub fn iris(&self) -> Vec<Url> {
        self.ordered_items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// HTTP client for talking to peer services: actor documents, collection
/// walks and signed inbox delivery.
#[derive(Clone)]
pub struct ApClient {
    client: reqwest::Client,
    signer: Option<(Arc<dyn Signer>, String)>,
}

impl ApClient {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
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

    async fn signed_headers(
        &self,
        method: &str,
        url: &Url,
        body: &[u8],
    ) -> Result<Vec<(String, String)>, Error> {
        let mut headers = Vec::new();
        if let Some((signer, key_id)) = &self.signer {
            let date = Utc::now().to_rfc2822();
            let digest = httpsig::digest_header(body);
            let host = url.host_str().unwrap_or_default().to_string();
            let target = RequestTarget {
                method,
                path: url.path(),
                host: &host,
                date: &date,
                digest: &digest,
            };
            let signature = httpsig::sign_request(signer.as_ref(), key_id, &target).await?;
            headers.push(("Host".to_string(), host));
            headers.push(("Date".to_string(), date));
            headers.push(("Digest".to_string(), digest));
            headers.push(("Signature".to_string(), signature));
        }
        Ok(headers)
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T, Error> {
        let mut request = self.client.get(url.clone()).header("Accept", ACTIVITY_MEDIA_TYPE);
        for (name, value) in self.signed_headers("GET", url, b"").await? {
            request = request.header(name, value);
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
            .json()
            .await
            .map_err(|e| Error::Malformed(format!("{url}: {e}")))
    }

    pub async fn get_actor(&self, iri: &Url) -> Result<ActorDocument, Error> {
        self.get_json(iri).await
    }

    pub async fn get_collection(&self, url: &Url) -> Result<CollectionPage, Error> {
        self.get_json(url).await
    }

    /// Deliver an activity to a peer inbox.
    pub async fn post_activity(&self, inbox: &Url, activity: &Activity) -> Result<(), Error> {
        let body = serde_json::to_vec(activity).map_err(|e| Error::Malformed(e.to_string()))?;
        let mut request = self
            .client
            .post(inbox.clone())
            .header("Content-Type", ACTIVITY_MEDIA_TYPE)
            .body(body.clone());
        for (name, value) in self.signed_headers("POST", inbox, &body).await? {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Forbidden(format!("{inbox} returned {status}")));
        }
        if status.is_client_error() {
            return Err(Error::Malformed(format!("{inbox} returned {status}")));
        }
        Err(Error::Transient(format!("{inbox} returned {status}")))
    }
}

/// Resolves HTTP-signature key ids by fetching the owning actor's document.
#[derive(Clone)]
pub struct ActorKeyResolver {
    client: ApClient,
}

impl ActorKeyResolver {
    pub fn new(client: ApClient) -> Self {
        Self { client }
    }

    /// The actor IRI a key id belongs to (the key id without its fragment).
    pub fn actor_iri(key_id: &str) -> Result<Url, Error> {
        let mut url: Url = key_id
            .parse()
            .map_err(|_| Error::Malformed(format!("key id {key_id} is not an IRI")))?;
        url.set_fragment(None);
        Ok(url)
    }
}

#[async_trait]
impl PublicKeyResolver for ActorKeyResolver {
    async fn resolve(&self, key_id: &str) -> Result<Vec<u8>, orb_crypto::Error> {
        let actor_iri =
            Self::actor_iri(key_id).map_err(|e| orb_crypto::Error::Transient(e.to_string()))?;
        let actor = self
            .client
            .get_actor(&actor_iri)
            .await
            .map_err(|e| orb_crypto::Error::Transient(e.to_string()))?;
        let key = actor
            .public_key
            .ok_or_else(|| orb_crypto::Error::UnknownKey(key_id.to_string()))?;
        if key.id != key_id {
            return Err(orb_crypto::Error::UnknownKey(key_id.to_string()));
        }
        key.key_bytes()
            .map_err(|_| orb_crypto::Error::UnknownKey(key_id.to_string()))
    }
}
