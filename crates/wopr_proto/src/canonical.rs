//! Canonical signing encoding.
//!
//! Signatures cover the byte sequence produced by serialising a message as
//! JSON with lexicographically sorted object keys, no whitespace, UTF-8, and
//! the top-level `sig` field omitted. serde_json's default object
//! representation is a BTreeMap, so routing a value through
//! `serde_json::Value` yields sorted keys at every nesting level for free.
//!
//! Invariant: parse → serialise is byte-identical, so a verifier rebuilds
//! exactly the bytes the signer saw.

use serde::Serialize;
use serde_json::Value;

use crate::error::ProtoError;

/// Canonical bytes of `value` with the top-level `sig` stripped.
/// This is the signing input for frames, tokens, and rotation records.
pub fn signing_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let mut v = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut v {
        map.remove("sig");
    }
    Ok(serde_json::to_vec(&v)?)
}

/// Canonical bytes of `value` as transmitted (sorted keys, `sig` included).
pub fn wire_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&v)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_compact() {
        let v = json!({"zeta": 1, "alpha": {"nested_z": 2, "nested_a": 3}});
        let bytes = wire_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":{"nested_a":3,"nested_z":2},"zeta":1}"#
        );
    }

    #[test]
    fn signing_bytes_omit_sig() {
        let v = json!({"b": 1, "sig": "ffff", "a": 2});
        let bytes = signing_bytes(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        let original = r#"{"a":[1,2,3],"m":{"k":"v"},"z":"s"}"#;
        let parsed: Value = serde_json::from_str(original).unwrap();
        assert_eq!(wire_bytes(&parsed).unwrap(), original.as_bytes());
    }
}
