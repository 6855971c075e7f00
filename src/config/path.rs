//! Dotted-path helpers over `serde_json::Value` documents (`"a.b.c"`).

use serde_json::{Map, Value};

pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |cur, seg| cur.as_object()?.get(seg))
}

/// Removes and returns the value at `path`, leaving parents in place.
pub fn take_path(doc: &mut Value, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (parent_mut(doc, parent)?, leaf),
        None => (doc, path),
    };
    parent.as_object_mut()?.remove(leaf)
}

/// Writes `value` at `path`, creating intermediate objects as needed.
/// A non-object in the way is replaced by an object.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };
    let mut cur = doc;
    for seg in parents.into_iter().flat_map(|p| p.split('.')) {
        cur = ensure_object(cur)
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(cur).insert(leaf.to_string(), value);
}

fn ensure_object(v: &mut Value) -> &mut Map<String, Value> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    match v {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn parent_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(doc, |cur, seg| cur.as_object_mut()?.get_mut(seg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_nested_and_missing() {
        let doc = json!({ "a": { "b": { "c": 1 } } });
        assert_eq!(get_path(&doc, "a.b.c"), Some(&json!(1)));
        assert_eq!(get_path(&doc, "a.x"), None);
        assert_eq!(get_path(&doc, "a.b.c.d"), None);
    }

    #[test]
    fn set_creates_parents() {
        let mut doc = json!({});
        set_path(&mut doc, "x.y.z", json!(true));
        assert_eq!(doc, json!({ "x": { "y": { "z": true } } }));
    }

    #[test]
    fn set_replaces_scalar_in_the_way() {
        let mut doc = json!({ "x": 3 });
        set_path(&mut doc, "x.y", json!(1));
        assert_eq!(doc, json!({ "x": { "y": 1 } }));
    }

    #[test]
    fn take_removes_leaf_only() {
        let mut doc = json!({ "a": { "b": 1, "c": 2 }, "d": 3 });
        assert_eq!(take_path(&mut doc, "a.b"), Some(json!(1)));
        assert_eq!(take_path(&mut doc, "d"), Some(json!(3)));
        assert_eq!(take_path(&mut doc, "a.missing"), None);
        assert_eq!(doc, json!({ "a": { "c": 2 } }));
    }
}
