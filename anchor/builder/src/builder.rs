use crate::vc::CredentialBuilder;
use crate::Error;
use orb_cas::CasStore;
use orb_linkset::{
    canonical_json_bytes, hashlink, HashLink, Item, Link, Linkset, Reference, LD_MEDIA_TYPE,
    LINKSET_MEDIA_TYPE,
};
use orb_types::{DidReference, GeneratorRegistry, Operation, UNPUBLISHED_PARENT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;
use url::Url;

/// One operation of a batch, paired with the hashlink of the anchor that
/// last committed its suffix (absent exactly for creates).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_anchor: Option<String>,
}

/// A cut batch ready for anchoring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationBatch {
    pub namespace: String,
    pub version: u64,
    pub operations: Vec<BatchOperation>,
}

/// The product of a successful build: the anchor graph is persisted in CAS
/// and the outer linkset plus credential travel to the witness coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltAnchor {
    /// Resource hash of the canonical content linkset.
    pub anchor_hash: String,
    /// `hl:` reference to the content, carrying this node's CAS hints.
    pub anchor_hashlink: String,
    /// The outer anchor link `{anchor, author, profile, original, related, replies}`.
    pub linkset: Linkset,
    pub credential: serde_json::Value,
    pub namespace: String,
    pub protocol_version: u64,
}

/// Assembles, signs and stores anchors. The same batch yields byte-identical
/// canonical content on any node.
pub struct AnchorBuilder<C, V> {
    registry: GeneratorRegistry,
    cas: C,
    credential_builder: V,
    author: Url,
    /// Public CAS endpoints embedded as retrieval hints in produced
    /// hashlinks.
    cas_endpoints: Vec<Url>,
}

impl<C, V> AnchorBuilder<C, V>
where
    C: CasStore,
    V: CredentialBuilder,
{
    pub fn new(
        registry: GeneratorRegistry,
        cas: C,
        credential_builder: V,
        author: Url,
        cas_endpoints: Vec<Url>,
    ) -> Self {
        Self {
            registry,
            cas,
            credential_builder,
            author,
            cas_endpoints,
        }
    }

    pub fn cas(&self) -> &C {
        &self.cas
    }

    pub async fn build(&self, batch: &OperationBatch) -> Result<BuiltAnchor, Error> {
        if batch.operations.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let profile = self
            .registry
            .profile_for(&batch.namespace, batch.version)?
            .to_string();

        // Bundle of the raw operations, the payload the protocol layer
        // replays on observing nodes.
        let operations: Vec<&Operation> =
            batch.operations.iter().map(|b| &b.operation).collect();
        let bundle_bytes = canonical_json_bytes(&operations)?;
        let bundle_hash = self.cas.write(&bundle_bytes).await?;

        let mut items = Vec::with_capacity(batch.operations.len());
        for entry in &batch.operations {
            let op = &entry.operation;
            let (parent_hash, previous) = match &entry.previous_anchor {
                None if op.operation_type.is_create() => (UNPUBLISHED_PARENT.to_string(), None),
                None => {
                    return Err(Error::MissingPreviousAnchor(op.unique_suffix.clone()));
                }
                Some(previous) => {
                    let parsed: HashLink = previous.parse()?;
                    (
                        parsed.resource_hash.clone(),
                        Some(format!("hl:{}", parsed.resource_hash)),
                    )
                }
            };
            items.push(Item {
                href: DidReference::new(&batch.namespace, &parent_hash, &op.unique_suffix)
                    .to_string(),
                previous,
            });
        }

        let content = Linkset::new(Link {
            author: Some(self.author.to_string()),
            profile: Some(profile.clone()),
            item: items.clone(),
            original: Some(Reference::new(
                format!("hl:{bundle_hash}"),
                "application/json",
            )),
            ..Default::default()
        });
        let content_bytes = content.canonical_bytes()?;
        let anchor_hash = self.cas.write(&content_bytes).await?;
        debug_assert_eq!(anchor_hash, hashlink::resource_hash(&content_bytes));

        let anchor_hashlink = HashLink::from_resource_hash(&anchor_hash, self.cas_endpoints.clone())
            .map_err(Error::Linkset)?
            .to_string();

        let credential = self
            .credential_builder
            .build_credential(&format!("hl:{anchor_hash}"))
            .await?;
        let credential_bytes = canonical_json_bytes(&credential)?;
        let credential_hash = self.cas.write(&credential_bytes).await?;

        // Related linkset: the previous-anchor references plus the location
        // of the credential replies. The observer checks item `previous`
        // references against this set.
        let previous_set: BTreeSet<String> =
            items.iter().filter_map(|i| i.previous.clone()).collect();
        let related = Linkset::new(Link {
            anchor: Some(format!("hl:{anchor_hash}")),
            profile: Some(profile.clone()),
            item: previous_set
                .into_iter()
                .map(|href| Item {
                    href,
                    previous: None,
                })
                .collect(),
            via: Some(Reference::new(
                format!("hl:{credential_hash}"),
                LD_MEDIA_TYPE,
            )),
            ..Default::default()
        });
        let related_bytes = related.canonical_bytes()?;
        let related_hash = self.cas.write(&related_bytes).await?;

        let outer = Linkset::new(Link {
            anchor: Some(format!("hl:{anchor_hash}")),
            author: Some(self.author.to_string()),
            profile: Some(profile),
            original: Some(Reference::new(
                self.hinted(&anchor_hash),
                LINKSET_MEDIA_TYPE,
            )),
            related: Some(Reference::new(self.hinted(&related_hash), LINKSET_MEDIA_TYPE)),
            replies: Some(Reference::new(self.hinted(&credential_hash), LD_MEDIA_TYPE)),
            ..Default::default()
        });

        debug!(anchor = %anchor_hash, operations = batch.operations.len(), "anchor built");
        Ok(BuiltAnchor {
            anchor_hash,
            anchor_hashlink,
            linkset: outer,
            credential,
            namespace: batch.namespace.clone(),
            protocol_version: batch.version,
        })
    }

    fn hinted(&self, resource_hash: &str) -> String {
        HashLink {
            resource_hash: resource_hash.to_string(),
            links: self.cas_endpoints.clone(),
        }
        .to_string()
    }
}
