//! Cavage-style HTTP signatures over `(request-target)`, `host`, `date` and
//! `digest`, as exchanged between federated services.

use crate::{Error, Signer};
use async_trait::async_trait;
use data_encoding::BASE64;
use sha2::{Digest, Sha256};

const SIGNED_HEADERS: &str = "(request-target) host date digest";

/// The request parts covered by a signature.
#[derive(Clone, Debug)]
pub struct RequestTarget<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub host: &'a str,
    pub date: &'a str,
    pub digest: &'a str,
}

impl RequestTarget<'_> {
    fn signing_string(&self) -> String {
        format!(
            "(request-target): {} {}\nhost: {}\ndate: {}\ndigest: {}",
            self.method.to_lowercase(),
            self.path,
            self.host,
            self.date,
            self.digest
        )
    }
}

/// `Digest` header value for a request body.
pub fn digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(&Sha256::digest(body)))
}

/// Produce a `Signature` header value for the given request parts.
pub async fn sign_request<S: Signer + ?Sized>(
    signer: &S,
    key_id: &str,
    target: &RequestTarget<'_>,
) -> Result<String, Error> {
    let signature = signer.sign(key_id, target.signing_string().as_bytes()).await?;
    let verification_method = signer.verification_method(key_id).await?;
    Ok(format!(
        "keyId=\"{}\",algorithm=\"Ed25519\",headers=\"{}\",signature=\"{}\"",
        verification_method,
        SIGNED_HEADERS,
        BASE64.encode(&signature)
    ))
}

/// A parsed `Signature` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub key_id: String,
    pub headers: String,
    pub signature: Vec<u8>,
}

pub fn parse_signature_header(value: &str) -> Result<SignatureHeader, Error> {
    let mut key_id = None;
    let mut headers = None;
    let mut signature = None;
    for part in value.split(',') {
        let (name, raw) = part
            .split_once('=')
            .ok_or_else(|| Error::MalformedSignature(part.to_string()))?;
        let raw = raw.trim_matches('"');
        match name.trim() {
            "keyId" => key_id = Some(raw.to_string()),
            "headers" => headers = Some(raw.to_string()),
            "signature" => {
                signature = Some(
                    BASE64
                        .decode(raw.as_bytes())
                        .map_err(|e| Error::MalformedSignature(e.to_string()))?,
                )
            }
            _ => {}
        }
    }
    match (key_id, signature) {
        (Some(key_id), Some(signature)) => Ok(SignatureHeader {
            key_id,
            headers: headers.unwrap_or_else(|| SIGNED_HEADERS.to_string()),
            signature,
        }),
        _ => Err(Error::MalformedSignature(
            "missing keyId or signature".to_string(),
        )),
    }
}

/// Resolves a signature `keyId` to raw ed25519 public key bytes. Federation
/// implements this by fetching the signer's actor document.
#[async_trait]
pub trait PublicKeyResolver: Send + Sync {
    async fn resolve(&self, key_id: &str) -> Result<Vec<u8>, Error>;
}

/// Verify a signed request, returning the `keyId` that authenticated it.
pub async fn verify_request<R: PublicKeyResolver + ?Sized>(
    resolver: &R,
    target: &RequestTarget<'_>,
    signature_header: &str,
) -> Result<String, Error> {
    let parsed = parse_signature_header(signature_header)?;
    if parsed.headers != SIGNED_HEADERS {
        return Err(Error::MalformedSignature(format!(
            "unsupported signed header set: {}",
            parsed.headers
        )));
    }
    let public_key = resolver.resolve(&parsed.key_id).await?;
    crate::verify_signature(
        &public_key,
        target.signing_string().as_bytes(),
        &parsed.signature,
    )?;
    Ok(parsed.key_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalSigner;
    use std::collections::HashMap;

    struct StaticResolver(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl PublicKeyResolver for StaticResolver {
        async fn resolve(&self, key_id: &str) -> Result<Vec<u8>, Error> {
            self.0
                .get(key_id)
                .cloned()
                .ok_or_else(|| Error::UnknownKey(key_id.to_string()))
        }
    }

    fn target<'a>(digest: &'a str, date: &'a str) -> RequestTarget<'a> {
        RequestTarget {
            method: "POST",
            path: "/services/orb/inbox",
            host: "orb.domain2.com",
            date,
            digest,
        }
    }

    #[tokio::test]
    async fn sign_then_verify() {
        let signer = LocalSigner::new();
        let public = signer.generate("http", "https://orb.domain1.com/services/orb#main-key");
        let digest = digest_header(b"{\"type\":\"Create\"}");
        let date = "Tue, 07 Jun 2022 20:51:35 GMT";

        let header = sign_request(&signer, "http", &target(&digest, date))
            .await
            .unwrap();

        let resolver = StaticResolver(HashMap::from([(
            "https://orb.domain1.com/services/orb#main-key".to_string(),
            public.as_bytes().to_vec(),
        )]));
        let key_id = verify_request(&resolver, &target(&digest, date), &header)
            .await
            .unwrap();
        assert_eq!(key_id, "https://orb.domain1.com/services/orb#main-key");
    }

    #[tokio::test]
    async fn tampered_body_fails() {
        let signer = LocalSigner::new();
        let public = signer.generate("http", "https://orb.domain1.com/services/orb#main-key");
        let digest = digest_header(b"{\"type\":\"Create\"}");
        let date = "Tue, 07 Jun 2022 20:51:35 GMT";
        let header = sign_request(&signer, "http", &target(&digest, date))
            .await
            .unwrap();

        let resolver = StaticResolver(HashMap::from([(
            "https://orb.domain1.com/services/orb#main-key".to_string(),
            public.as_bytes().to_vec(),
        )]));
        let tampered = digest_header(b"{\"type\":\"Announce\"}");
        let err = verify_request(&resolver, &target(&tampered, date), &header)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_signature_header("not-a-header").is_err());
        assert!(parse_signature_header("keyId=\"a\"").is_err());
    }
}
