use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Kind of a Sidetree DID operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Recover,
    Deactivate,
}

impl OperationType {
    /// A create establishes the DID; everything else mutates prior state.
    pub fn is_create(&self) -> bool {
        matches!(self, OperationType::Create)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Recover => write!(f, "recover"),
            OperationType::Deactivate => write!(f, "deactivate"),
        }
    }
}

/// A pending DID operation as accepted from a client, before anchoring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Stable identifier of the DID this operation applies to.
    pub unique_suffix: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// Opaque signed payload; parsed only by the protocol layer.
    #[serde(with = "base64url_bytes")]
    pub operation_request: Vec<u8>,
    /// URL of the node that first accepted this operation.
    pub anchor_origin: String,
    pub protocol_version: u64,
}

/// An operation that has been committed by an anchor.
///
/// For a given suffix the pair `(canonical_reference, transaction_time)` is
/// unique; a create always precedes any update for the same suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchoredOperation {
    #[serde(flatten)]
    pub operation: Operation,
    /// Hashlink of the anchor that committed this operation.
    pub canonical_reference: String,
    /// Monotonic sequence of the operation within its anchor.
    pub transaction_time: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equivalent_references: Vec<String>,
}

impl AnchoredOperation {
    /// Total order of anchored operations for a single suffix.
    pub fn sequence_cmp(&self, other: &Self) -> Ordering {
        self.transaction_time
            .cmp(&other.transaction_time)
            .then_with(|| self.canonical_reference.cmp(&other.canonical_reference))
    }
}

mod base64url_bytes {
    use data_encoding::BASE64URL_NOPAD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64URL_NOPAD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BASE64URL_NOPAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_op(suffix: &str, t: OperationType) -> Operation {
        Operation {
            unique_suffix: suffix.to_string(),
            operation_type: t,
            operation_request: b"{\"delta\":\"...\"}".to_vec(),
            anchor_origin: "https://orb.domain1.com".to_string(),
            protocol_version: 1,
        }
    }

    #[test]
    fn operation_json_round_trip() {
        let op = sample_op("EiDahaOGH", OperationType::Update);
        let encoded = serde_json::to_string(&op).unwrap();
        let decoded: Operation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(op, decoded);
    }

    #[test]
    fn operation_request_is_base64url() {
        let op = sample_op("EiDahaOGH", OperationType::Create);
        let value: serde_json::Value = serde_json::to_value(&op).unwrap();
        assert!(value["operationRequest"].is_string());
        assert_eq!(value["type"], "create");
    }

    #[test]
    fn anchored_sequence_orders_by_time_then_reference() {
        let mk = |time, anchor: &str| AnchoredOperation {
            operation: sample_op("EiDahaOGH", OperationType::Update),
            canonical_reference: anchor.to_string(),
            transaction_time: time,
            equivalent_references: vec![],
        };
        let a = mk(1, "uB");
        let b = mk(2, "uA");
        let c = mk(2, "uB");
        assert_eq!(a.sequence_cmp(&b), Ordering::Less);
        assert_eq!(b.sequence_cmp(&c), Ordering::Less);
        assert_eq!(c.sequence_cmp(&c), Ordering::Equal);
    }
}
