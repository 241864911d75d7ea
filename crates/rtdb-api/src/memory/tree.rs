// ── JSON tree helpers ──
//
// Path addressing over a `serde_json::Value` tree. Empty objects and
// `null` are never stored: writing them removes the location and prunes
// emptied parents.

use serde_json::{Map, Value};

use crate::types::{DataSnapshot, EventType};

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form of a path: no leading, trailing, or repeated separators.
pub(crate) fn normalize(path: &str) -> String {
    segments(path).join("/")
}

pub(crate) fn last_key(path: &str) -> Option<String> {
    segments(path).last().map(|s| (*s).to_owned())
}

/// Whether a write at `written` can change what a listener at `listening` sees.
pub(crate) fn related(listening: &str, written: &str) -> bool {
    listening == written
        || listening.is_empty()
        || written.is_empty()
        || listening.starts_with(&format!("{written}/"))
        || written.starts_with(&format!("{listening}/"))
}

fn is_empty(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

pub(crate) fn get(root: &Value, path: &str) -> Option<Value> {
    let mut node = root;
    for seg in segments(path) {
        node = node.as_object()?.get(seg)?;
    }
    if is_empty(node) {
        None
    } else {
        Some(node.clone())
    }
}

pub(crate) fn write(root: &mut Value, path: &str, value: Option<Value>) {
    let value = value.filter(|v| !is_empty(v));
    write_at(root, &segments(path), value);
}

fn write_at(node: &mut Value, segs: &[&str], value: Option<Value>) {
    let Some((first, rest)) = segs.split_first() else {
        *node = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    };

    if value.is_none() {
        let Some(map) = node.as_object_mut() else {
            return;
        };
        if rest.is_empty() {
            map.remove(*first);
        } else if let Some(child) = map.get_mut(*first) {
            write_at(child, rest, None);
            if is_empty(child) {
                map.remove(*first);
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map
            .entry((*first).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        write_at(child, rest, value);
    }
}

/// Child-level notifications for a listener of `event`, given the value at
/// its location before and after a write.
pub(crate) fn child_events(
    event: EventType,
    before: Option<&Value>,
    after: Option<&Value>,
) -> Vec<DataSnapshot> {
    let empty = Map::new();
    let old = before.and_then(Value::as_object).unwrap_or(&empty);
    let new = after.and_then(Value::as_object).unwrap_or(&empty);

    match event {
        EventType::ChildAdded => new
            .iter()
            .filter(|(k, _)| !old.contains_key(*k))
            .map(|(k, v)| DataSnapshot::new(Some(k.clone()), Some(v.clone())))
            .collect(),
        EventType::ChildRemoved => old
            .iter()
            .filter(|(k, _)| !new.contains_key(*k))
            .map(|(k, v)| DataSnapshot::new(Some(k.clone()), Some(v.clone())))
            .collect(),
        EventType::ChildChanged => new
            .iter()
            .filter(|(k, v)| old.get(*k).is_some_and(|prev| prev != *v))
            .map(|(k, v)| DataSnapshot::new(Some(k.clone()), Some(v.clone())))
            .collect(),
        // Ordering is not modelled, so nothing ever moves.
        EventType::Value | EventType::ChildMoved => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn normalize_strips_separators() {
        assert_eq!(normalize("/a//b/"), "a/b");
        assert_eq!(normalize(""), "");
        assert_eq!(last_key("a/b"), Some("b".into()));
        assert_eq!(last_key("/"), None);
    }

    #[test]
    fn related_paths() {
        assert!(related("a/b", "a/b"));
        assert!(related("a", "a/b"));
        assert!(related("a/b/c", "a/b"));
        assert!(related("", "x"));
        assert!(!related("a/bc", "a/b"));
        assert!(!related("x", "y"));
    }

    #[test]
    fn write_creates_and_prunes() {
        let mut root = json!({});
        write(&mut root, "a/b/c", Some(json!(1)));
        assert_eq!(root, json!({"a": {"b": {"c": 1}}}));
        assert_eq!(get(&root, "a/b"), Some(json!({"c": 1})));

        write(&mut root, "a/b/c", None);
        assert_eq!(root, json!({}));
        assert_eq!(get(&root, "a"), None);
    }

    #[test]
    fn writing_null_removes() {
        let mut root = json!({"a": 1, "b": 2});
        write(&mut root, "a", Some(Value::Null));
        assert_eq!(root, json!({"b": 2}));
    }

    #[test]
    fn child_diffs() {
        let before = json!({"a": 1, "b": 2});
        let after = json!({"b": 3, "c": 4});
        let keys = |snaps: Vec<DataSnapshot>| -> Vec<String> {
            snaps.into_iter().filter_map(|s| s.key).collect()
        };
        assert_eq!(
            keys(child_events(EventType::ChildAdded, Some(&before), Some(&after))),
            vec!["c"]
        );
        assert_eq!(
            keys(child_events(EventType::ChildRemoved, Some(&before), Some(&after))),
            vec!["a"]
        );
        assert_eq!(
            keys(child_events(EventType::ChildChanged, Some(&before), Some(&after))),
            vec!["b"]
        );
    }
}
