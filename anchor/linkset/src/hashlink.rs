//! `hl:<multibase-multihash>:<multibase-metadata>` strings. The resource
//! section is the sha2-256 multihash of the content, base64url-encoded with
//! the `u` multibase prefix; the optional metadata section encodes the list
//! of CAS URLs the content can be retrieved from.

use crate::Error;
use data_encoding::BASE64URL_NOPAD;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

const HL_PREFIX: &str = "hl:";
const MULTIBASE_BASE64URL: char = 'u';
const SHA2_256_CODE: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

#[derive(Serialize, Deserialize)]
struct Metadata {
    url: Vec<Url>,
}

/// Multibase-encoded sha2-256 multihash of `data`; the canonical resource
/// hash used as CAS key and anchor identity.
pub fn resource_hash(data: &[u8]) -> String {
    let bytes = Code::Sha2_256.digest(data).to_bytes();
    format!(
        "{}{}",
        MULTIBASE_BASE64URL,
        BASE64URL_NOPAD.encode(&bytes)
    )
}

/// Decode a multibase multihash string, enforcing the supported codec.
/// Returns the digest bytes.
pub fn decode_resource_hash(s: &str) -> Result<Vec<u8>, Error> {
    let rest = s
        .strip_prefix(MULTIBASE_BASE64URL)
        .ok_or_else(|| Error::MalformedHashlink(format!("unsupported multibase in {s}")))?;
    let bytes = BASE64URL_NOPAD
        .decode(rest.as_bytes())
        .map_err(|e| Error::MalformedHashlink(format!("{s}: {e}")))?;
    match bytes.as_slice() {
        [SHA2_256_CODE, SHA2_256_LEN, digest @ ..] if digest.len() == SHA2_256_LEN as usize => {
            Ok(digest.to_vec())
        }
        [code, ..] if *code != SHA2_256_CODE => Err(Error::UnsupportedMultihash(*code as u64)),
        _ => Err(Error::MalformedHashlink(format!(
            "truncated multihash in {s}"
        ))),
    }
}

/// Check that `data` hashes to the given resource hash.
pub fn matches(data: &[u8], expected_resource_hash: &str) -> bool {
    resource_hash(data) == expected_resource_hash
}

/// A parsed hashlink: the resource hash plus any CAS retrieval hints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HashLink {
    pub resource_hash: String,
    pub links: Vec<Url>,
}

impl HashLink {
    /// Build a hashlink for `data` carrying the given retrieval hints.
    pub fn create(data: &[u8], links: Vec<Url>) -> Self {
        Self {
            resource_hash: resource_hash(data),
            links,
        }
    }

    /// A hashlink from an already-computed resource hash.
    pub fn from_resource_hash(resource_hash: &str, links: Vec<Url>) -> Result<Self, Error> {
        decode_resource_hash(resource_hash)?;
        Ok(Self {
            resource_hash: resource_hash.to_string(),
            links,
        })
    }
}

impl fmt::Display for HashLink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", HL_PREFIX, self.resource_hash)?;
        if !self.links.is_empty() {
            let metadata = Metadata {
                url: self.links.clone(),
            };
            // Metadata is plain JSON; infallible for a list of URLs.
            let bytes = serde_json::to_vec(&metadata).unwrap_or_default();
            write!(
                f,
                ":{}{}",
                MULTIBASE_BASE64URL,
                BASE64URL_NOPAD.encode(&bytes)
            )?;
        }
        Ok(())
    }
}

impl FromStr for HashLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(HL_PREFIX)
            .ok_or_else(|| Error::MalformedHashlink(format!("missing hl: prefix in {s}")))?;
        let mut sections = rest.split(':');
        let hash = sections
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::MalformedHashlink(format!("missing resource hash in {s}")))?;
        decode_resource_hash(hash)?;

        let links = match sections.next() {
            None => vec![],
            Some(meta) => {
                let encoded = meta.strip_prefix(MULTIBASE_BASE64URL).ok_or_else(|| {
                    Error::MalformedHashlink(format!("unsupported metadata multibase in {s}"))
                })?;
                let bytes = BASE64URL_NOPAD
                    .decode(encoded.as_bytes())
                    .map_err(|e| Error::MalformedHashlink(format!("{s}: {e}")))?;
                let metadata: Metadata = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::MalformedHashlink(format!("metadata is not a URL list: {e}"))
                })?;
                metadata.url
            }
        };
        if sections.next().is_some() {
            return Err(Error::MalformedHashlink(format!(
                "too many sections in {s}"
            )));
        }
        Ok(HashLink {
            resource_hash: hash.to_string(),
            links,
        })
    }
}

impl TryFrom<String> for HashLink {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HashLink> for String {
    fn from(hl: HashLink) -> Self {
        hl.to_string()
    }
}
