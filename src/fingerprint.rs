//! Request fingerprinting for the response cache.
//!
//! A fingerprint is the SHA-256 of a canonical serialization of the request's
//! semantic fields. Canonical means: object keys recursively sorted, compact
//! separators, and an explicit `null` for every absent optional field — so
//! two requests that mean the same thing hash the same regardless of field
//! order or how the client spelled its omissions.
//!
//! Excluded by construction: `metadata`, `stream`, request ids, and anything
//! transport-level. Streaming and non-streaming variants of the same request
//! share a fingerprint.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::CanonicalRequest;

/// Fields that participate in the fingerprint, in canonical order.
const SEMANTIC_FIELDS: [&str; 9] = [
    "max_tokens",
    "messages",
    "model",
    "stop_sequences",
    "system",
    "temperature",
    "tools",
    "top_k",
    "top_p",
];

/// Compute the cache fingerprint for a request.
///
/// The `model` field must already be post-override; the pipeline applies
/// `model_overrides` before fingerprinting.
pub fn fingerprint(req: &CanonicalRequest) -> String {
    let value = serde_json::to_value(req).unwrap_or(Value::Null);

    let mut canonical = String::with_capacity(256);
    canonical.push('{');
    for (i, field) in SEMANTIC_FIELDS.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        canonical.push('"');
        canonical.push_str(field);
        canonical.push_str("\":");
        write_canonical(value.get(*field).unwrap_or(&Value::Null), &mut canonical);
    }
    canonical.push('}');

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Serialize `value` into `out` with sorted object keys and no whitespace.
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
                // Key serialization via serde_json handles escaping.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
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
        scalar => {
            out.push_str(&serde_json::to_string(scalar).unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> CanonicalRequest {
        serde_json::from_value(value).expect("test request should deserialize")
    }

    fn base() -> serde_json::Value {
        json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 512,
            "messages": [{ "role": "user", "content": "what is a monad?" }],
        })
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[test]
    fn identical_requests_share_a_fingerprint() {
        assert_eq!(fingerprint(&request(base())), fingerprint(&request(base())));
    }

    #[test]
    fn field_order_in_the_wire_body_does_not_matter() {
        let a = request(json!({
            "model": "m", "max_tokens": 10, "temperature": 0.5,
            "messages": [{ "role": "user", "content": "hi" }],
        }));
        let b = request(json!({
            "messages": [{ "content": "hi", "role": "user" }],
            "temperature": 0.5, "max_tokens": 10, "model": "m",
        }));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn metadata_is_excluded() {
        let mut with_meta = base();
        with_meta["metadata"] = json!({ "user_id": "u-123" });
        assert_eq!(
            fingerprint(&request(base())),
            fingerprint(&request(with_meta))
        );
    }

    #[test]
    fn stream_flag_is_excluded() {
        let mut streaming = base();
        streaming["stream"] = json!(true);
        assert_eq!(
            fingerprint(&request(base())),
            fingerprint(&request(streaming))
        );
    }

    // -----------------------------------------------------------------------
    // Sensitivity — every semantic field must matter
    // -----------------------------------------------------------------------

    #[test]
    fn model_change_changes_fingerprint() {
        let mut other = base();
        other["model"] = json!("claude-3-haiku-20240307");
        assert_ne!(fingerprint(&request(base())), fingerprint(&request(other)));
    }

    #[test]
    fn message_content_change_changes_fingerprint() {
        let mut other = base();
        other["messages"][0]["content"] = json!("what is a functor?");
        assert_ne!(fingerprint(&request(base())), fingerprint(&request(other)));
    }

    #[test]
    fn sampling_params_change_fingerprint() {
        for (key, value) in [
            ("temperature", json!(0.9)),
            ("top_p", json!(0.5)),
            ("top_k", json!(40)),
            ("max_tokens", json!(1024)),
        ] {
            let mut other = base();
            other[key] = value;
            assert_ne!(
                fingerprint(&request(base())),
                fingerprint(&request(other)),
                "changing `{key}` must change the fingerprint"
            );
        }
    }

    #[test]
    fn system_prompt_changes_fingerprint() {
        let mut other = base();
        other["system"] = json!("answer in French");
        assert_ne!(fingerprint(&request(base())), fingerprint(&request(other)));
    }

    #[test]
    fn tools_change_fingerprint() {
        let mut other = base();
        other["tools"] = json!([{
            "name": "calc",
            "input_schema": { "type": "object" },
        }]);
        assert_ne!(fingerprint(&request(base())), fingerprint(&request(other)));
    }

    // -----------------------------------------------------------------------
    // Canonical writer
    // -----------------------------------------------------------------------

    #[test]
    fn canonical_writer_sorts_nested_keys() {
        let mut out = String::new();
        write_canonical(&json!({ "b": { "z": 1, "a": 2 }, "a": [3, null] }), &mut out);
        assert_eq!(out, r#"{"a":[3,null],"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let fp = fingerprint(&request(base()));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
