//! Deterministic request fingerprinting for replay lookup.
//!
//! The digest covers `(prompt, options, output_schema, tools)` after
//! canonicalization: object keys sorted recursively, line endings in
//! strings normalized, and volatile option keys (session ids, request
//! ids, timestamps) excluded at any depth. Wall-clock never enters the
//! hash.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use orchid_domain::ProviderRequest;

/// Option keys excluded from the fingerprint at any depth.
const VOLATILE_KEYS: &[&str] = &[
    "sessionId",
    "session_id",
    "requestId",
    "request_id",
    "timestamp",
];

/// Compute the hex-encoded SHA-256 fingerprint of a request.
pub fn fingerprint(request: &ProviderRequest) -> String {
    let mut canonical = Map::new();
    canonical.insert("prompt".into(), canonicalize(&request.prompt, false));
    canonical.insert("options".into(), canonicalize(&request.options, true));
    canonical.insert(
        "schema".into(),
        request
            .output_schema
            .as_ref()
            .map(|s| canonicalize(s, false))
            .unwrap_or(Value::Null),
    );
    canonical.insert(
        "tools".into(),
        request
            .tools
            .as_ref()
            .map(|t| canonicalize(t, false))
            .unwrap_or(Value::Null),
    );

    // serde_json's default Map is BTree-backed, so serialization is
    // already key-sorted; canonicalize rebuilds nested maps the same
    // way.
    let bytes = serde_json::to_vec(&Value::Object(canonical)).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

fn canonicalize(value: &Value, exclude_volatile: bool) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace("\r\n", "\n")),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| canonicalize(v, exclude_volatile))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if exclude_volatile && VOLATILE_KEYS.contains(&k.as_str()) {
                    continue;
                }
                out.insert(k.clone(), canonicalize(v, exclude_volatile));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
