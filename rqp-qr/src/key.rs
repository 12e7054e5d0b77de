//! Content-derived query keys
//!
//! A key is the lowercase hex MD5 digest of the canonical parameter document
//! followed by the query text. Analyses also append a NUL-delimited parent
//! tag, so two analyses with identical options under different searches never
//! share a key, and no root query text can reproduce an analysis key. Root
//! keys carry no suffix.

use serde_json::{Map, Value};

use crate::Parameters;

/// Length of a query key in hex characters
pub const KEY_LENGTH: usize = 32;

/// Separates the query text from the parent key in analysis hash input
const PARENT_TAG: &str = "\0parent:";

/// Serialize parameters with object keys sorted at every level
///
/// The result is independent of insertion order, so the same logical
/// document always produces the same text.
pub fn canonical_parameters(parameters: &Parameters) -> String {
    let canonical = canonical_object(parameters);
    Value::Object(canonical).to_string()
}

fn canonical_object(object: &Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(&String, &Value)> = object.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    entries
        .into_iter()
        .map(|(k, v)| (k.clone(), canonical_value(v)))
        .collect()
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(canonical_object(object)),
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

/// Compute the key for a query
///
/// `parent` is the owning root key for analyses and `None` (or empty) for
/// root searches.
pub fn query_key(query: &str, parameters: &Parameters, parent: Option<&str>) -> String {
    let mut plain = canonical_parameters(parameters);
    plain.push_str(query);
    if let Some(parent) = parent.filter(|p| !p.is_empty()) {
        plain.push_str(PARENT_TAG);
        plain.push_str(parent);
    }

    format!("{:x}", md5::compute(plain.as_bytes()))
}

/// Whether `candidate` has the shape of a query key
pub fn is_valid_key(candidate: &str) -> bool {
    candidate.len() == KEY_LENGTH
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
