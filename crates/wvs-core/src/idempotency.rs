// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-hash canonicalization for idempotent submission.
//!
//! A submission's fingerprint is SHA-256 over three parts concatenated in
//! order: the request body re-serialized with object keys recursively
//! sorted, the HTTP method, and the request path. Two submissions with the
//! same idempotency key must carry the same fingerprint; a differing
//! fingerprint is a key-reuse error.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the request hash for a submission.
///
/// `body` must be valid JSON. Object keys are sorted lexicographically at
/// every nesting level; array order is preserved; non-object JSON is
/// serialized in its canonical compact form. The hex digest is lowercase.
pub fn request_hash(body: &Value, method: &str, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(body));
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hex(&hasher.finalize())
}

/// Serialize a JSON value with recursively sorted object keys.
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json string serialization cannot fail
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":4,"c":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"c":3,"d":4},"b":1}"#).unwrap();
        assert_eq!(
            request_hash(&a, "POST", "/v1/workspaces"),
            request_hash(&b, "POST", "/v1/workspaces")
        );
    }

    #[test]
    fn array_order_matters() {
        let a = json!({"items": [1, 2, 3]});
        let b = json!({"items": [3, 2, 1]});
        assert_ne!(
            request_hash(&a, "POST", "/p"),
            request_hash(&b, "POST", "/p")
        );
    }

    #[test]
    fn method_and_path_are_part_of_the_hash() {
        let body = json!({"wsid": "w1"});
        let base = request_hash(&body, "POST", "/v1/workspaces");
        assert_ne!(base, request_hash(&body, "DELETE", "/v1/workspaces"));
        assert_ne!(base, request_hash(&body, "POST", "/v1/workspaces/w1"));
    }

    #[test]
    fn body_changes_the_hash() {
        let a = json!({"wsid": "w1", "owner": "a"});
        let b = json!({"wsid": "w1", "owner": "b"});
        assert_ne!(
            request_hash(&a, "POST", "/v1/workspaces"),
            request_hash(&b, "POST", "/v1/workspaces")
        );
    }

    #[test]
    fn canonical_form_is_compact_and_sorted() {
        let v: Value = serde_json::from_str(r#"{ "b" : [ {"y":2,"x":1} ], "a" : null }"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":null,"b":[{"x":1,"y":2}]}"#);
    }

    #[test]
    fn non_object_bodies_are_canonical_compact() {
        assert_eq!(canonical_json(&json!([1, "two", null])), r#"[1,"two",null]"#);
        assert_eq!(canonical_json(&json!("plain")), r#""plain""#);
        assert_eq!(canonical_json(&json!(42)), "42");
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let h = request_hash(&json!({}), "GET", "/");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
