//! Anchor credentials. The builder delegates credential issuance to a
//! [CredentialBuilder] capability; a local implementation over the node's
//! signer is provided for deployments without an external issuer.

use crate::Error;
use async_trait::async_trait;
use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use orb_crypto::Signer;
use orb_linkset::canonical_json_bytes;
use orb_types::Proof;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

/// Issues a verifiable credential whose subject binds the given anchor
/// hashlink.
#[async_trait]
pub trait CredentialBuilder: Send + Sync {
    async fn build_credential(&self, anchor_hashlink: &str) -> Result<Value, Error>;
}

/// Credential issuance over the node's own signer.
pub struct LocalCredentialBuilder {
    signer: Arc<dyn Signer>,
    key_id: String,
    issuer: Url,
}

impl LocalCredentialBuilder {
    pub fn new(signer: Arc<dyn Signer>, key_id: &str, issuer: Url) -> Self {
        Self {
            signer,
            key_id: key_id.to_string(),
            issuer,
        }
    }
}

#[async_trait]
impl CredentialBuilder for LocalCredentialBuilder {
    async fn build_credential(&self, anchor_hashlink: &str) -> Result<Value, Error> {
        let mut credential = json!({
            "@context": [
                "https://www.w3.org/2018/credentials/v1",
                "https://w3id.org/security/suites/ed25519-2020/v1",
            ],
            "type": ["VerifiableCredential", "AnchorCredential"],
            "issuer": self.issuer.as_str(),
            "issuanceDate": Utc::now().to_rfc3339(),
            "credentialSubject": { "id": anchor_hashlink },
        });
        let signature = self
            .signer
            .sign(&self.key_id, &canonical_json_bytes(&credential)?)
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        let verification_method = self
            .signer
            .verification_method(&self.key_id)
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        credential["proof"] = json!([{
            "type": "Ed25519Signature2020",
            "created": Utc::now().to_rfc3339(),
            "domain": self.issuer.as_str(),
            "verificationMethod": verification_method,
            "proofValue": BASE64URL_NOPAD.encode(&signature),
        }]);
        Ok(credential)
    }
}

/// The `credentialSubject.id` of a credential, if present.
pub fn credential_subject_id(credential: &Value) -> Option<&str> {
    credential
        .get("credentialSubject")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
}

/// Whether the credential subject binds exactly the given anchor hashlink.
pub fn binds_anchor(credential: &Value, anchor_hashlink: &str) -> bool {
    credential_subject_id(credential) == Some(anchor_hashlink)
}

/// Witness proofs recorded on a credential.
pub fn proofs(credential: &Value) -> Vec<Proof> {
    match credential.get("proof") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|p| serde_json::from_value(p.clone()).ok())
            .collect(),
        Some(other) => serde_json::from_value::<Proof>(other.clone())
            .into_iter()
            .collect(),
        None => vec![],
    }
}

/// Append witness proofs to a credential's proof list.
pub fn attach_proofs(credential: &mut Value, new_proofs: &[Proof]) -> Result<(), Error> {
    let mut list = match credential.get("proof") {
        Some(Value::Array(existing)) => existing.clone(),
        Some(single) => vec![single.clone()],
        None => vec![],
    };
    for proof in new_proofs {
        list.push(serde_json::to_value(proof)?);
    }
    credential["proof"] = Value::Array(list);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_crypto::LocalSigner;

    fn local_builder() -> LocalCredentialBuilder {
        let signer = LocalSigner::new();
        signer.generate("vc", "did:web:orb.domain1.com#vc");
        LocalCredentialBuilder::new(
            Arc::new(signer),
            "vc",
            Url::parse("https://orb.domain1.com").unwrap(),
        )
    }

    #[tokio::test]
    async fn credential_subject_binds_exactly() {
        let credential = local_builder()
            .build_credential("hl:uEiAnchor")
            .await
            .unwrap();
        assert!(binds_anchor(&credential, "hl:uEiAnchor"));
        assert!(!binds_anchor(&credential, "hl:uEiOther"));
    }

    #[tokio::test]
    async fn attach_and_read_proofs() {
        let mut credential = local_builder()
            .build_credential("hl:uEiAnchor")
            .await
            .unwrap();
        assert_eq!(proofs(&credential).len(), 1);

        let witness_proof = Proof {
            created: Utc::now(),
            domain: "https://witness.domain2.com".to_string(),
            verification_method: "did:web:witness.domain2.com#key".to_string(),
            proof_value: "zSig".to_string(),
            proof_type: "Ed25519Signature2020".to_string(),
        };
        attach_proofs(&mut credential, &[witness_proof.clone()]).unwrap();
        let all = proofs(&credential);
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|p| p.domain == witness_proof.domain));
    }
}
