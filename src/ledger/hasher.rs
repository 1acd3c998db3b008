//! Canonical Hasher
//!
//! Deterministic encoding of a record payload and its predecessor hash,
//! digested with SHA-256.
//!
//! The canonical form is the JSON object
//! `{"payload":<payload>,"previous_hash":<hash>}` serialized per RFC 8785
//! (JCS): sorted keys at every depth, compact separators. Floats are rejected
//! up front so money only ever hashes as integer minor units.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::LedgerError;

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Hash a payload together with its predecessor hash
pub fn record_hash(payload: &Value, previous_hash: &str) -> Result<String, LedgerError> {
    let canonical = canonical_bytes(payload, previous_hash)?;
    Ok(sha256_hex(&canonical))
}

/// Canonical byte encoding of `(payload, previous_hash)`
pub fn canonical_bytes(payload: &Value, previous_hash: &str) -> Result<Vec<u8>, LedgerError> {
    reject_floats(payload)?;
    let envelope = serde_json::json!({
        "payload": payload,
        "previous_hash": previous_hash,
    });
    serde_jcs::to_vec(&envelope)
        .map_err(|e| LedgerError::validation(format!("Payload cannot be canonicalized: {}", e)))
}

fn reject_floats(value: &Value) -> Result<(), LedgerError> {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => Err(LedgerError::validation(format!(
            "Floating-point number {} cannot be hashed; use integer minor units",
            n
        ))),
        Value::Array(items) => items.iter().try_for_each(reject_floats),
        Value::Object(map) => map.values().try_for_each(reject_floats),
        _ => Ok(()),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_deterministic() {
        let payload = json!({"trust_id": "t1", "amount": 1000, "currency": "USD"});
        let hash1 = record_hash(&payload, "0").unwrap();
        let hash2 = record_hash(&payload, "0").unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), HASH_HEX_LEN);
        assert!(hash1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[3,"z"]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":[3,"z"],"y":2},"b":1}"#).unwrap();
        assert_eq!(record_hash(&a, "0").unwrap(), record_hash(&b, "0").unwrap());
    }

    #[test]
    fn test_canonical_form() {
        let payload = json!({"vote": "approve", "reason": "ok\n", "n": -3});
        let bytes = canonical_bytes(&payload, "abc").unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"payload":{"n":-3,"reason":"ok\n","vote":"approve"},"previous_hash":"abc"}"#
        );
    }

    #[test]
    fn test_previous_hash_changes_digest() {
        let payload = json!({"trust_id": "t1"});
        assert_ne!(
            record_hash(&payload, "0").unwrap(),
            record_hash(&payload, "1").unwrap()
        );
    }

    #[test]
    fn test_known_digest() {
        // sha256 of {"payload":{},"previous_hash":"0"}
        let expected = hex::encode(Sha256::digest(br#"{"payload":{},"previous_hash":"0"}"#));
        assert_eq!(record_hash(&json!({}), "0").unwrap(), expected);
    }

    #[test]
    fn test_floats_are_rejected() {
        let payload = json!({"amount": 10.5});
        let err = record_hash(&payload, "0").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let nested = json!({"items": [{"amount": 1}, {"amount": 0.25}]});
        assert!(canonical_bytes(&nested, "0").is_err());
    }

    #[test]
    fn test_control_characters_are_escaped() {
        let payload = json!({"note": "a\u{1}b"});
        let bytes = canonical_bytes(&payload, "0").unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"payload":{"note":"a\u0001b"},"previous_hash":"0"}"#
        );
    }
}
