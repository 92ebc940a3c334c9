//! Integrity digest over canonical JSON.
//!
//! The digest is `sha256:<hex>` of the payload serialized with object keys in
//! sorted order and no insignificant whitespace. Both the API (when filling
//! `checksum`) and the client (when verifying a full sync) use [`digest`].

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const DIGEST_PREFIX: &str = "sha256:";

/// Serialize `value` with sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Deterministic digest of a JSON value.
pub fn digest(value: &Value) -> String {
    let hash = Sha256::digest(canonical_json(value).as_bytes());
    format!("{DIGEST_PREFIX}{}", hex::encode(hash))
}

/// Whether `value` hashes to `expected`.
pub fn verify(value: &Value, expected: &str) -> bool {
    digest(value) == expected.trim()
}

/// Digest of a full-sync payload, excluding its own `checksum` field.
pub fn full_sync_digest(payload: &Value) -> String {
    match payload {
        Value::Object(map) if map.contains_key("checksum") => {
            let mut stripped = map.clone();
            stripped.remove("checksum");
            digest(&Value::Object(stripped))
        }
        other => digest(other),
    }
}

/// A full-sync payload that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSnapshot {
    /// Locally computed digest
    pub digest: String,
    /// Whether the server supplied a checksum to compare against
    pub server_checked: bool,
}

/// Verify a raw full-sync payload against its embedded `checksum`.
///
/// A payload without a checksum passes; the computed digest is still
/// returned so it can be persisted.
pub fn verify_full_sync(payload: &Value) -> Result<VerifiedSnapshot> {
    let actual = full_sync_digest(payload);
    let expected = payload
        .get("checksum")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|checksum| !checksum.is_empty());

    match expected {
        Some(expected) if expected != actual => Err(Error::IntegrityMismatch {
            expected: expected.to_string(),
            actual,
        }),
        Some(_) => Ok(VerifiedSnapshot {
            digest: actual,
            server_checked: true,
        }),
        None => Ok(VerifiedSnapshot {
            digest: actual,
            server_checked: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn canonical_form_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"d": [true, null], "c": "x"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"x","d":[true,null]},"b":1}"#
        );
    }

    #[test]
    fn digest_ignores_key_order() {
        let first: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2], "z": "s"}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"z": "s", "y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(digest(&first), digest(&second));
        assert!(digest(&first).starts_with("sha256:"));
        assert_eq!(digest(&first).len(), "sha256:".len() + 64);
    }

    #[test]
    fn digest_changes_on_single_field_mutation() {
        let base = json!({"transactions": [{"id": "t1", "points": 10}]});
        let mutated = json!({"transactions": [{"id": "t1", "points": 11}]});
        assert_ne!(digest(&base), digest(&mutated));
        assert!(verify(&base, &digest(&base)));
        assert!(!verify(&mutated, &digest(&base)));
    }

    #[test]
    fn full_sync_checksum_round_trips() {
        let mut payload = json!({"user": {"id": "u1"}, "transactions": [], "totalRecords": 0});
        let checksum = full_sync_digest(&payload);
        payload["checksum"] = Value::String(checksum.clone());

        let verified = verify_full_sync(&payload).unwrap();
        assert_eq!(verified.digest, checksum);
        assert!(verified.server_checked);
    }

    #[test]
    fn tampered_full_sync_is_rejected() {
        let mut payload = json!({"user": {"id": "u1"}, "stores": [{"id": "s1"}]});
        payload["checksum"] = Value::String(full_sync_digest(&payload));
        payload["stores"][0]["id"] = json!("s2");

        let error = verify_full_sync(&payload).unwrap_err();
        assert!(matches!(error, Error::IntegrityMismatch { .. }));
    }

    #[test]
    fn missing_checksum_still_yields_digest() {
        let payload = json!({"user": {"id": "u1"}});
        let verified = verify_full_sync(&payload).unwrap();
        assert!(!verified.server_checked);
        assert_eq!(verified.digest, digest(&payload));
    }
}
