//! RFC 6902 JSON patch generation and application.
//!
//! Generation walks two documents and emits a minimal operation list; the
//! replace mode decides whether replacements are guarded. Application
//! interprets any RFC 6902 document, so patches authored elsewhere apply the
//! same way as generated ones.

use serde_json::{Map, Value};

use crate::errors::ConfError;

/// How `generate` emits replacements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceMode {
    /// Emit a `test` op against the old value before each `replace`/`remove`,
    /// so application fails loudly when the document drifted.
    #[default]
    Safe,
    /// Emit bare `replace` ops as RFC 6902 examples do.
    Rfc,
}

/// Generate a minimal JSON patch that rewrites `old` into `new`.
pub fn generate(old: &Value, new: &Value, mode: ReplaceMode) -> Value {
    let mut ops = Vec::new();
    diff_values("", old, new, mode, &mut ops);
    Value::Array(ops)
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn diff_values(path: &str, old: &Value, new: &Value, mode: ReplaceMode, ops: &mut Vec<Value>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            diff_objects(path, old_map, new_map, mode, ops);
        }
        (Value::Array(old_arr), Value::Array(new_arr)) if old_arr.len() == new_arr.len() => {
            for (i, (o, n)) in old_arr.iter().zip(new_arr.iter()).enumerate() {
                diff_values(&format!("{path}/{i}"), o, n, mode, ops);
            }
        }
        _ => push_replace(path, old, new, mode, ops),
    }
}

fn diff_objects(
    path: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    mode: ReplaceMode,
    ops: &mut Vec<Value>,
) {
    for (key, old_value) in old {
        let child = format!("{path}/{}", escape_token(key));
        match new.get(key) {
            Some(new_value) => diff_values(&child, old_value, new_value, mode, ops),
            None => {
                if mode == ReplaceMode::Safe {
                    ops.push(serde_json::json!({
                        "op": "test", "path": child, "value": old_value
                    }));
                }
                ops.push(serde_json::json!({"op": "remove", "path": child}));
            }
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            let child = format!("{path}/{}", escape_token(key));
            ops.push(serde_json::json!({
                "op": "add", "path": child, "value": new_value
            }));
        }
    }
}

fn push_replace(path: &str, old: &Value, new: &Value, mode: ReplaceMode, ops: &mut Vec<Value>) {
    if mode == ReplaceMode::Safe {
        ops.push(serde_json::json!({"op": "test", "path": path, "value": old}));
    }
    ops.push(serde_json::json!({"op": "replace", "path": path, "value": new}));
}

/// Apply an RFC 6902 patch document to `doc`. Any malformed operation or
/// failed precondition yields `ChangeConflict`.
pub fn apply(doc: &Value, patch: &Value) -> Result<Value, ConfError> {
    let ops = patch
        .as_array()
        .ok_or_else(|| ConfError::conflict("JSON patch must be an array of operations"))?;
    let mut out = doc.clone();
    for op in ops {
        apply_op(&mut out, op)?;
    }
    Ok(out)
}

fn op_field<'a>(op: &'a Value, field: &str) -> Result<&'a str, ConfError> {
    op.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ConfError::conflict(format!("JSON patch op lacks `{field}`: {op}")))
}

fn apply_op(doc: &mut Value, op: &Value) -> Result<(), ConfError> {
    let kind = op_field(op, "op")?;
    let path = op_field(op, "path")?.to_owned();
    match kind {
        "add" => {
            let value = required_value(op)?;
            insert(doc, &path, value, true)
        }
        "replace" => {
            let value = required_value(op)?;
            remove(doc, &path)?;
            insert(doc, &path, value, false)
        }
        "remove" => {
            remove(doc, &path)?;
            Ok(())
        }
        "move" => {
            let from = op_field(op, "from")?.to_owned();
            let value = remove(doc, &from)?;
            insert(doc, &path, value, true)
        }
        "copy" => {
            let from = op_field(op, "from")?.to_owned();
            let value = resolve(doc, &from)?.clone();
            insert(doc, &path, value, true)
        }
        "test" => {
            let expected = required_value(op)?;
            let actual = resolve(doc, &path)?;
            if *actual != expected {
                return Err(ConfError::conflict(format!(
                    "JSON patch test failed at `{path}`: expected {expected}, found {actual}"
                )));
            }
            Ok(())
        }
        other => Err(ConfError::conflict(format!(
            "unsupported JSON patch op `{other}`"
        ))),
    }
}

fn required_value(op: &Value) -> Result<Value, ConfError> {
    op.get("value")
        .cloned()
        .ok_or_else(|| ConfError::conflict(format!("JSON patch op lacks `value`: {op}")))
}

fn split_pointer(pointer: &str) -> Result<Vec<String>, ConfError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(ConfError::conflict(format!(
            "JSON pointer must start with `/`: `{pointer}`"
        )));
    }
    Ok(pointer[1..].split('/').map(unescape_token).collect())
}

fn resolve<'a>(doc: &'a Value, pointer: &str) -> Result<&'a Value, ConfError> {
    doc.pointer(pointer)
        .ok_or_else(|| ConfError::conflict(format!("JSON pointer has no target: `{pointer}`")))
}

/// Navigate to the parent of the pointer target.
fn parent_of<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    pointer: &str,
) -> Result<(&'a mut Value, String), ConfError> {
    let (last, init) = tokens
        .split_last()
        .ok_or_else(|| ConfError::conflict("JSON patch cannot address the document root here"))?;
    let mut cur = doc;
    for token in init {
        cur = match cur {
            Value::Object(map) => map.get_mut(token).ok_or_else(|| {
                ConfError::conflict(format!("JSON pointer has no target: `{pointer}`"))
            })?,
            Value::Array(arr) => {
                let idx: usize = token.parse().map_err(|_| {
                    ConfError::conflict(format!("bad array index `{token}` in `{pointer}`"))
                })?;
                arr.get_mut(idx).ok_or_else(|| {
                    ConfError::conflict(format!("JSON pointer has no target: `{pointer}`"))
                })?
            }
            _ => {
                return Err(ConfError::conflict(format!(
                    "JSON pointer traverses a scalar: `{pointer}`"
                )));
            }
        };
    }
    Ok((cur, last.clone()))
}

fn insert(doc: &mut Value, pointer: &str, value: Value, adding: bool) -> Result<(), ConfError> {
    let tokens = split_pointer(pointer)?;
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, last) = parent_of(doc, &tokens, pointer)?;
    match parent {
        Value::Object(map) => {
            map.insert(last, value);
            Ok(())
        }
        Value::Array(arr) => {
            if adding && last == "-" {
                arr.push(value);
                return Ok(());
            }
            let idx: usize = last.parse().map_err(|_| {
                ConfError::conflict(format!("bad array index `{last}` in `{pointer}`"))
            })?;
            if adding {
                if idx > arr.len() {
                    return Err(ConfError::conflict(format!(
                        "array index {idx} out of bounds in `{pointer}`"
                    )));
                }
                arr.insert(idx, value);
            } else {
                if idx >= arr.len() + 1 {
                    return Err(ConfError::conflict(format!(
                        "array index {idx} out of bounds in `{pointer}`"
                    )));
                }
                arr.insert(idx.min(arr.len()), value);
            }
            Ok(())
        }
        _ => Err(ConfError::conflict(format!(
            "JSON pointer parent is a scalar: `{pointer}`"
        ))),
    }
}

fn remove(doc: &mut Value, pointer: &str) -> Result<Value, ConfError> {
    let tokens = split_pointer(pointer)?;
    if tokens.is_empty() {
        return Ok(std::mem::replace(doc, Value::Null));
    }
    let (parent, last) = parent_of(doc, &tokens, pointer)?;
    match parent {
        Value::Object(map) => map.remove(&last).ok_or_else(|| {
            ConfError::conflict(format!("JSON pointer has no target: `{pointer}`"))
        }),
        Value::Array(arr) => {
            let idx: usize = last.parse().map_err(|_| {
                ConfError::conflict(format!("bad array index `{last}` in `{pointer}`"))
            })?;
            if idx >= arr.len() {
                return Err(ConfError::conflict(format!(
                    "array index {idx} out of bounds in `{pointer}`"
                )));
            }
            Ok(arr.remove(idx))
        }
        _ => Err(ConfError::conflict(format!(
            "JSON pointer parent is a scalar: `{pointer}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{apply, generate, ReplaceMode};

    /// Safe mode guards each replace with a test against the old value.
    #[test]
    fn generate_safe_replace() {
        let old = json!({"a": 1});
        let new = json!({"a": 2});
        let patch = generate(&old, &new, ReplaceMode::Safe);
        assert_eq!(
            patch,
            json!([
                {"op": "test", "path": "/a", "value": 1},
                {"op": "replace", "path": "/a", "value": 2}
            ])
        );
    }

    /// RFC mode emits bare replace ops.
    #[test]
    fn generate_rfc_replace() {
        let old = json!({"a": 1});
        let new = json!({"a": 2});
        let patch = generate(&old, &new, ReplaceMode::Rfc);
        assert_eq!(patch, json!([{"op": "replace", "path": "/a", "value": 2}]));
    }

    /// Nested additions and removals are emitted per key.
    #[test]
    fn generate_add_and_remove() {
        let old = json!({"keep": true, "drop": 1});
        let new = json!({"keep": true, "fresh": {"x": 1}});
        let patch = generate(&old, &new, ReplaceMode::Rfc);
        assert_eq!(
            patch,
            json!([
                {"op": "remove", "path": "/drop"},
                {"op": "add", "path": "/fresh", "value": {"x": 1}}
            ])
        );
    }

    /// Generated patches re-apply to reproduce the new document.
    #[test]
    fn generate_apply_round_trip() {
        let old = json!({"a": {"b": [1, 2, 3]}, "c": "x"});
        let new = json!({"a": {"b": [1, 5, 3], "d": null}, "c": "y"});
        for mode in [ReplaceMode::Safe, ReplaceMode::Rfc] {
            let patch = generate(&old, &new, mode);
            assert_eq!(apply(&old, &patch).unwrap(), new);
        }
    }

    /// Keys containing pointer metacharacters survive the round trip.
    #[test]
    fn generate_escapes_pointer_tokens() {
        let old = json!({"a/b": 1, "c~d": 2});
        let new = json!({"a/b": 9, "c~d": 2});
        let patch = generate(&old, &new, ReplaceMode::Rfc);
        assert_eq!(apply(&old, &patch).unwrap(), new);
    }

    /// A failed test op surfaces as a conflict.
    #[test]
    fn apply_failed_test_is_conflict() {
        let doc = json!({"a": 1});
        let patch = json!([{"op": "test", "path": "/a", "value": 2}]);
        let err = apply(&doc, &patch).unwrap_err();
        assert!(matches!(err, crate::errors::ConfError::ChangeConflict(_)));
    }

    /// Array append via the `-` token.
    #[test]
    fn apply_array_append() {
        let doc = json!({"a": [1]});
        let patch = json!([{"op": "add", "path": "/a/-", "value": 2}]);
        assert_eq!(apply(&doc, &patch).unwrap(), json!({"a": [1, 2]}));
    }

    /// Move and copy operations.
    #[test]
    fn apply_move_and_copy() {
        let doc = json!({"a": 1, "b": {}});
        let patch = json!([
            {"op": "copy", "from": "/a", "path": "/b/a"},
            {"op": "move", "from": "/a", "path": "/b/moved"}
        ]);
        assert_eq!(
            apply(&doc, &patch).unwrap(),
            json!({"b": {"a": 1, "moved": 1}})
        );
    }

    /// Whole-document replacement through the empty pointer.
    #[test]
    fn apply_root_replace() {
        let doc = json!({"a": 1});
        let patch = json!([{"op": "replace", "path": "", "value": [1, 2]}]);
        assert_eq!(apply(&doc, &patch).unwrap(), json!([1, 2]));
    }
}
