//! RFC-9264-style linkset documents. An anchor is a small graph of typed
//! references: the content link enumerates the DID operations committed by
//! the anchor, the related link carries the previous-anchor references and
//! the location of the verifiable credential, and the outer anchor link ties
//! the pieces together under the anchor hash.

use crate::{canonical_json_bytes, hashlink, Error};
use serde::{Deserialize, Serialize};

/// A typed reference to another resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Reference {
    pub fn new(href: impl Into<String>, media_type: &str) -> Self {
        Self {
            href: href.into(),
            media_type: Some(media_type.to_string()),
        }
    }
}

/// One committed DID operation. `previous` is present exactly when the
/// operation is not a create and refers to the prior anchor for its suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

/// A single link in a linkset document.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Link {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<Reference>,
}

/// A linkset document: `{"linkset":[...]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linkset {
    pub linkset: Vec<Link>,
}

impl Linkset {
    pub fn new(link: Link) -> Self {
        Self {
            linkset: vec![link],
        }
    }

    /// The sole link of a single-link document.
    pub fn link(&self) -> Result<&Link, Error> {
        match self.linkset.as_slice() {
            [link] => Ok(link),
            links => Err(Error::MalformedLinkset(format!(
                "expected exactly one link, got {}",
                links.len()
            ))),
        }
    }

    /// Canonical bytes of the document; hashing these yields the anchor hash.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, Error> {
        canonical_json_bytes(self)
    }

    /// Resource hash of the canonical bytes.
    pub fn content_hash(&self) -> Result<String, Error> {
        Ok(hashlink::resource_hash(&self.canonical_bytes()?))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedLinkset(format!("invalid linkset JSON: {e}")))
    }
}
