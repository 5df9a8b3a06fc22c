use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// How a witness was chosen for an anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WitnessType {
    /// Dynamic witness derived from the peer set (a follower of this node).
    Batch,
    /// Explicitly configured witness.
    System,
}

/// A data-integrity proof returned by a witness for an anchor credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub created: DateTime<Utc>,
    /// URL of the witness service that produced the proof.
    pub domain: String,
    pub verification_method: String,
    pub proof_value: String,
    #[serde(rename = "type")]
    pub proof_type: String,
}

/// A witness service solicited for an anchor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Witness {
    #[serde(rename = "type")]
    pub witness_type: WitnessType,
    pub uri: Url,
    pub has_log: bool,
    pub selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl Witness {
    pub fn new(witness_type: WitnessType, uri: Url, has_log: bool) -> Self {
        Self {
            witness_type,
            uri,
            has_log,
            selected: false,
            proof: None,
        }
    }

    /// A witness proof is a witness that has returned a non-empty proof.
    pub fn has_proof(&self) -> bool {
        self.proof
            .as_ref()
            .map(|p| !p.proof_value.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_proof_value_does_not_count() {
        let mut w = Witness::new(
            WitnessType::System,
            Url::parse("https://witness.domain2.com/services/orb").unwrap(),
            true,
        );
        assert!(!w.has_proof());
        w.proof = Some(Proof {
            created: Utc::now(),
            domain: "https://witness.domain2.com".to_string(),
            verification_method: "did:web:witness.domain2.com#key-1".to_string(),
            proof_value: String::new(),
            proof_type: "Ed25519Signature2020".to_string(),
        });
        assert!(!w.has_proof());
        w.proof.as_mut().unwrap().proof_value = "z3MvG...".to_string();
        assert!(w.has_proof());
    }
}
