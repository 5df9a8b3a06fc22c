use crate::Error;
use serde::Serialize;

/// Serialize a value to canonical JSON bytes: object keys sorted, no
/// extraneous whitespace. Hashing canonical bytes is stable across
/// implementations, which anchor determinism depends on.
///
/// Serialization goes through [`serde_json::Value`], whose map type keeps
/// keys ordered, rather than straight off the struct, where field order
/// would leak into the output.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}
