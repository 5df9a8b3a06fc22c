use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Parent-hash marker for create operations. The literal is fixed for
/// cross-implementation anchor determinism and must not be re-encoded.
pub const UNPUBLISHED_PARENT: &str = "uAAA";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed DID reference: {0}")]
pub struct MalformedDidError(String);

/// A `did:<namespace>:<parent-hash>:<suffix>` reference as used by anchor
/// linkset items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DidReference {
    pub namespace: String,
    pub parent_hash: String,
    pub suffix: String,
}

impl DidReference {
    pub fn new(namespace: &str, parent_hash: &str, suffix: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            parent_hash: parent_hash.to_string(),
            suffix: suffix.to_string(),
        }
    }

    /// Reference for an operation whose DID has no published parent anchor.
    pub fn unpublished(namespace: &str, suffix: &str) -> Self {
        Self::new(namespace, UNPUBLISHED_PARENT, suffix)
    }

    pub fn is_unpublished(&self) -> bool {
        self.parent_hash == UNPUBLISHED_PARENT
    }
}

impl fmt::Display for DidReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "did:{}:{}:{}",
            self.namespace, self.parent_hash, self.suffix
        )
    }
}

impl FromStr for DidReference {
    type Err = MalformedDidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(ns), Some(parent), Some(suffix))
                if !ns.is_empty() && !parent.is_empty() && !suffix.is_empty() =>
            {
                // A method-specific namespace may itself be multi-segment
                // (e.g. did:orb:ipfs:<hash>:<suffix>); fold trailing segments
                // back into the suffix position.
                let mut suffix = suffix.to_string();
                let mut parent = parent.to_string();
                let mut ns = ns.to_string();
                if let Some(extra) = parts.next() {
                    ns = format!("{ns}:{parent}");
                    parent = suffix;
                    suffix = extra.to_string();
                }
                if parts.next().is_some() {
                    return Err(MalformedDidError(s.to_string()));
                }
                Ok(DidReference {
                    namespace: ns,
                    parent_hash: parent,
                    suffix,
                })
            }
            _ => Err(MalformedDidError(s.to_string())),
        }
    }
}

impl TryFrom<String> for DidReference {
    type Error = MalformedDidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DidReference> for String {
    fn from(did: DidReference) -> Self {
        did.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let did = DidReference::new("orb", "uEiC3Q4", "EiDahaOGH");
        let parsed: DidReference = did.to_string().parse().unwrap();
        assert_eq!(did, parsed);
    }

    #[test]
    fn unpublished_sentinel_is_preserved() {
        let did = DidReference::unpublished("orb", "EiDahaOGH");
        assert_eq!(did.to_string(), "did:orb:uAAA:EiDahaOGH");
        assert!(did.is_unpublished());
    }

    #[test]
    fn multi_segment_namespace() {
        let parsed: DidReference = "did:orb:ipfs:uEiC3Q4:EiDahaOGH".parse().unwrap();
        assert_eq!(parsed.namespace, "orb:ipfs");
        assert_eq!(parsed.parent_hash, "uEiC3Q4");
        assert_eq!(parsed.suffix, "EiDahaOGH");
    }

    #[test]
    fn rejects_malformed() {
        assert!("did:orb:EiDahaOGH".parse::<DidReference>().is_err());
        assert!("urn:orb:uAAA:EiDahaOGH".parse::<DidReference>().is_err());
        assert!("did:orb::EiDahaOGH".parse::<DidReference>().is_err());
    }
}
