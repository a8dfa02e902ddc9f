//! Path operations over the argument tree
//!
//! The argument tree is a plain JSON value. Paths are dot-separated; a
//! segment addressing a sequence must be a decimal index.

use crate::error::{CoreError, CoreResult};
use serde_json::{Map, Value as JsonValue};

/// Iterate the non-empty segments of a dot path
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// Join two dot paths, either of which may be empty
pub fn join(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}.{}", parent, child),
    }
}

/// The segment directly below `parent` on the way to `path`, if `path` is deeper.
pub fn immediate_child<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let rest = if parent.is_empty() {
        path
    } else {
        path.strip_prefix(parent)?.strip_prefix('.')?
    };
    segments(rest).next()
}

/// Resolve `path` below `root`; the empty path is the root itself.
pub fn get<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    segments(path).try_fold(root, |node, segment| match node {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn get_mut<'a>(root: &'a mut JsonValue, path: &str) -> Option<&'a mut JsonValue> {
    segments(path).try_fold(root, |node, segment| match node {
        JsonValue::Object(map) => map.get_mut(segment),
        JsonValue::Array(items) => {
            segment.parse::<usize>().ok().and_then(move |i| items.get_mut(i))
        }
        _ => None,
    })
}

/// Write `value` at `path`, creating intermediate mappings as needed.
///
/// Scalars found on the way are replaced by mappings. Sequence segments must
/// address an existing index.
pub fn set(root: &mut JsonValue, path: &str, value: JsonValue) -> CoreResult<()> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        node = descend_or_create(node, segment, path)?;
    }

    match node {
        JsonValue::Array(items) => {
            let slot = index_slot(items, last, path)?;
            *slot = value;
        }
        JsonValue::Object(map) => {
            map.insert((*last).to_string(), value);
        }
        other => {
            let mut map = Map::new();
            map.insert((*last).to_string(), value);
            *other = JsonValue::Object(map);
        }
    }
    Ok(())
}

fn descend_or_create<'a>(
    node: &'a mut JsonValue,
    segment: &str,
    path: &str,
) -> CoreResult<&'a mut JsonValue> {
    if !node.is_object() && !node.is_array() {
        *node = JsonValue::Object(Map::new());
    }
    match node {
        JsonValue::Array(items) => index_slot(items, segment, path),
        JsonValue::Object(map) => {
            let child = map
                .entry(segment.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !child.is_object() && !child.is_array() {
                *child = JsonValue::Object(Map::new());
            }
            Ok(child)
        }
        _ => Err(CoreError::invalid_path(path, format!("'{}' is not a container", segment))),
    }
}

fn index_slot<'a>(
    items: &'a mut [JsonValue],
    segment: &str,
    path: &str,
) -> CoreResult<&'a mut JsonValue> {
    let len = items.len();
    let index: usize = segment.parse().map_err(|_| {
        CoreError::invalid_path(path, format!("segment '{}' addresses a sequence", segment))
    })?;
    items.get_mut(index).ok_or_else(|| {
        CoreError::invalid_path(path, format!("index {} out of bounds (len {})", index, len))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_and_child() {
        assert_eq!(join("", "lines"), "lines");
        assert_eq!(join("lines", ""), "lines");
        assert_eq!(join("lines.0", "items"), "lines.0.items");

        assert_eq!(immediate_child("", "lines.items"), Some("lines"));
        assert_eq!(immediate_child("lines", "lines.items.tags"), Some("items"));
        assert_eq!(immediate_child("lines", "lines"), None);
        assert_eq!(immediate_child("lines", "linesx.items"), None);
        assert_eq!(immediate_child("a.b", "a.c.d"), None);
    }

    #[test]
    fn get_resolves_objects_and_indices() {
        let tree = json!({"doc": {"lines": [{"id": 1}, {"id": 2}]}});
        assert_eq!(get(&tree, ""), Some(&tree));
        assert_eq!(get(&tree, "doc.lines.1.id"), Some(&json!(2)));
        assert_eq!(get(&tree, "doc.lines.5"), None);
        assert_eq!(get(&tree, "doc.lines.x"), None);
        assert_eq!(get(&tree, "doc.missing.deep"), None);
    }

    #[test]
    fn get_mut_allows_in_place_updates() {
        let mut tree = json!({"lines": [{"id": 1}]});
        if let Some(JsonValue::Object(line)) = get_mut(&mut tree, "lines.0") {
            line.insert("pid".into(), json!(10));
        }
        assert_eq!(tree, json!({"lines": [{"id": 1, "pid": 10}]}));
    }

    #[test]
    fn set_creates_intermediate_mappings() {
        let mut tree = json!({"a": 1});
        set(&mut tree, "b.c.d", json!("x")).unwrap();
        assert_eq!(tree, json!({"a": 1, "b": {"c": {"d": "x"}}}));

        set(&mut tree, "a.z", json!(true)).unwrap();
        assert_eq!(tree["a"], json!({"z": true}));
    }

    #[test]
    fn set_into_sequences_requires_existing_index() {
        let mut tree = json!({"lines": [{"id": 1}]});
        set(&mut tree, "lines.0.pid", json!(5)).unwrap();
        assert_eq!(tree["lines"][0]["pid"], json!(5));

        let err = set(&mut tree, "lines.3.pid", json!(5)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath { .. }));
        assert!(set(&mut tree, "lines.first", json!(5)).is_err());
    }

    #[test]
    fn set_empty_path_replaces_root() {
        let mut tree = json!({"a": 1});
        set(&mut tree, "", json!([1, 2])).unwrap();
        assert_eq!(tree, json!([1, 2]));
    }
}
