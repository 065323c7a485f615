//! Helpers for building nested result objects addressed by dotted paths.

use arbor_types::FieldPath;
use serde_json::{Map, Value};

/// Writes `value` at `path`, creating intermediate objects. An empty path
/// replaces the whole result.
pub(crate) fn set_nested(result: &mut Value, path: &FieldPath, value: Value) {
    let segments = path.segments();
    let Some((last, parents)) = segments.split_last() else {
        *result = value;
        return;
    };
    let mut current = result;
    for segment in parents {
        ensure_object(current);
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    ensure_object(current);
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}

/// Reads the value at `path`.
pub(crate) fn get_nested<'a>(result: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(result, |current, segment| current.get(segment))
}

/// Removes and returns the value at `path`.
pub(crate) fn take_nested(result: &mut Value, path: &FieldPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = result;
    for segment in parents {
        current = current.get_mut(segment)?;
    }
    current.as_object_mut()?.remove(last)
}

/// Absent, null, empty string, empty array and empty object all count as empty.
pub(crate) fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn ensure_object(value: &mut Value) {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
}
