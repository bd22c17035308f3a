//! Helpers for addressing a JSON document by slash-separated segments.
//!
//! The tree follows realtime-database semantics: `null` and empty objects do
//! not exist, so writing `null` removes a key and prunes parents that become
//! empty.

use serde_json::{Map, Value};

pub fn value_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(*segment)?;
    }
    if is_absent(node) {
        return None;
    }
    Some(node)
}

pub fn write_at(root: &mut Value, segments: &[&str], value: Value) {
    let value = normalize(value);
    if segments.is_empty() {
        *root = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    }

    if value.is_none() && value_at(root, segments).is_none() {
        return;
    }

    write_into(root, segments, value);
    prune(root);
}

pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Drops nulls and empty objects recursively; `None` when nothing remains.
pub fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| normalize(child).map(|child| (key, child)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

fn write_into(node: &mut Value, segments: &[&str], value: Option<Value>) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if rest.is_empty() {
            match value {
                Some(value) => {
                    map.insert(first.to_string(), value);
                }
                None => {
                    map.remove(*first);
                }
            }
        } else {
            let child = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            write_into(child, rest, value);
        }
    }
}

fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, child| !is_absent(child));
    }
}
