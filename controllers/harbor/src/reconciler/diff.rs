//! Desired-vs-actual comparison.
//!
//! The API server fills defaults into every object it stores, so an exact
//! comparison would always report a difference. A child is up to date when
//! every field the operator sets is present in the stored object with the
//! same value, and when the stored object was last applied from the same
//! desired content. The second check catches fields the operator stopped
//! setting: server-side apply removes them, but a containment check alone
//! never notices they are stale. JSON objects compare by key, so map
//! ordering never matters.

use kube::core::DynamicObject;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Digest of the desired content a child was last applied from.
pub const APPLIED_HASH_ANNOTATION: &str = "goharbor.io/applied-hash";

/// Whether `desired` is contained in `actual`.
///
/// - objects: every key of `desired` must match in `actual` (a `null` in
///   `desired` matches a missing key)
/// - arrays: same length, element-wise containment
/// - scalars: equality
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| match have.get(key) {
            Some(existing) => is_subset(value, existing),
            None => value.is_null(),
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (Value::Number(want), Value::Number(have)) => want.as_f64() == have.as_f64(),
        _ => desired == actual,
    }
}

/// Lower-case hex of a digest.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Feeds `value` into `hasher` with object keys in sorted order.
fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                feed(hasher, &Value::String(key.clone()));
                hasher.update(b":");
                feed(hasher, &map[key]);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                feed(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}

/// The part of a desired object the operator applies.
///
/// Status, server-managed metadata and the applied-hash annotation never
/// take part.
fn applied_content(desired: &DynamicObject) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(desired)?;
    if let Value::Object(map) = &mut value {
        map.remove("status");
        if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
            for field in ["uid", "resourceVersion", "generation", "creationTimestamp", "managedFields"] {
                metadata.remove(field);
            }
            if let Some(Value::Object(annotations)) = metadata.get_mut("annotations") {
                annotations.remove(APPLIED_HASH_ANNOTATION);
            }
        }
    }
    Ok(value)
}

fn content_hash(content: &Value) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, content);
    to_hex(&hasher.finalize())
}

/// Stable digest of what applying `desired` sets.
pub fn applied_hash(desired: &DynamicObject) -> Result<String, serde_json::Error> {
    Ok(content_hash(&applied_content(desired)?))
}

/// `desired` carrying its own applied-hash annotation, ready to apply.
pub fn with_applied_hash(desired: &DynamicObject) -> Result<DynamicObject, serde_json::Error> {
    let hash = applied_hash(desired)?;
    let mut object = desired.clone();
    object
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(APPLIED_HASH_ANNOTATION.to_string(), hash);
    Ok(object)
}

/// Whether a stored child already matches the desired object.
///
/// A child last applied from other content is stale even when every desired
/// field matches: some field it still carries may no longer be wanted.
pub fn is_up_to_date(desired: &DynamicObject, actual: &DynamicObject) -> Result<bool, serde_json::Error> {
    let want = applied_content(desired)?;
    let recorded = actual
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(APPLIED_HASH_ANNOTATION));
    if recorded.map(String::as_str) != Some(content_hash(&want).as_str()) {
        return Ok(false);
    }
    let have = serde_json::to_value(actual)?;
    Ok(is_subset(&want, &have))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_defaults_are_ignored() {
        let desired = json!({"spec": {"replicas": 1, "template": {"containers": [{"name": "core"}]}}});
        let actual = json!({
            "spec": {
                "replicas": 1,
                "revisionHistoryLimit": 10,
                "template": {"containers": [{"name": "core", "terminationMessagePath": "/dev/termination-log"}]}
            }
        });
        assert!(is_subset(&desired, &actual));
    }

    #[test]
    fn test_changed_values_are_detected() {
        let desired = json!({"data": {"PORT": "8080"}});
        assert!(!is_subset(&desired, &json!({"data": {"PORT": "8443"}})));
        assert!(!is_subset(&desired, &json!({"data": {}})));
    }

    #[test]
    fn test_arrays_must_have_the_same_length() {
        let desired = json!({"args": ["a"]});
        assert!(!is_subset(&desired, &json!({"args": ["a", "b"]})));
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let desired: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": true, "x": "s"}}"#).unwrap();
        let actual: Value = serde_json::from_str(r#"{"a": {"x": "s", "y": true}, "b": 1}"#).unwrap();
        assert!(is_subset(&desired, &actual));
    }

    fn config_map(data: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "demo-core", "namespace": "harbor"},
            "data": data,
        }))
        .unwrap()
    }

    /// What the API server holds after `desired` was applied.
    fn stored(desired: &DynamicObject) -> DynamicObject {
        let mut object = with_applied_hash(desired).unwrap();
        object.metadata.uid = Some("uid-1".to_string());
        object.metadata.resource_version = Some("7".to_string());
        object
    }

    #[test]
    fn test_applied_child_is_up_to_date() {
        let desired = config_map(json!({"PORT": "8080"}));
        assert!(is_up_to_date(&desired, &stored(&desired)).unwrap());
    }

    #[test]
    fn test_dropped_key_is_drift() {
        let before = config_map(json!({"PORT": "8080", "HTTP_PROXY": "http://proxy:3128"}));
        let after = config_map(json!({"PORT": "8080"}));
        // Every desired key still matches, yet the stored proxy setting is stale.
        assert!(!is_up_to_date(&after, &stored(&before)).unwrap());
    }

    #[test]
    fn test_child_without_hash_is_reapplied() {
        let desired = config_map(json!({"PORT": "8080"}));
        let mut adopted = desired.clone();
        adopted.metadata.uid = Some("uid-1".to_string());
        assert!(!is_up_to_date(&desired, &adopted).unwrap());
    }

    #[test]
    fn test_applied_hash_ignores_key_order_and_server_fields() {
        let a: Value = serde_json::from_str(r#"{"b": "1", "a": "2"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": "2", "b": "1"}"#).unwrap();
        let first = config_map(a);
        let second = stored(&config_map(b));
        assert_eq!(applied_hash(&first).unwrap(), applied_hash(&second).unwrap());
        assert_eq!(applied_hash(&first).unwrap().len(), 64);
    }

    #[test]
    fn test_null_matches_missing() {
        assert!(is_subset(&json!({"a": null}), &json!({})));
        assert!(!is_subset(&json!({"a": null}), &json!({"a": 1})));
    }
}
