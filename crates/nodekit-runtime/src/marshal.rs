//! Result/Error marshaling.
//!
//! Converts interpreter values into plain `serde_json` data, the only
//! shape allowed to cross the host boundary (and, in isolated mode, the
//! worker channel). Values with no transferable representation are
//! rejected with a [`SerializeError`] rather than silently dropped;
//! cycles are cut off by the depth cap.

use boa_engine::object::builtins::JsArray;
use boa_engine::{js_string, Context, JsError, JsObject, JsValue};

use crate::result::{ErrorPayload, StructuredError};

/// Maximum nesting depth marshaled before a structure is rejected.
/// Cyclic structures exceed this and fail deterministically.
pub const MAX_DEPTH: usize = 64;

/// Why a value could not be marshaled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    #[error("value of type {0} cannot be serialized")]
    Unsupported(&'static str),

    #[error("structure exceeds the maximum serialization depth of {MAX_DEPTH}")]
    DepthExceeded,

    #[error("engine error while serializing: {0}")]
    Engine(String),
}

fn engine_err(err: JsError) -> SerializeError {
    SerializeError::Engine(err.to_string())
}

/// Convert an interpreter value to transferable JSON data.
pub fn value_to_json(
    value: &JsValue,
    context: &mut Context,
) -> Result<serde_json::Value, SerializeError> {
    walk(value, context, 0)
}

fn walk(
    value: &JsValue,
    context: &mut Context,
    depth: usize,
) -> Result<serde_json::Value, SerializeError> {
    if depth > MAX_DEPTH {
        return Err(SerializeError::DepthExceeded);
    }

    if value.is_undefined() || value.is_null() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(serde_json::Value::Bool(b));
    }
    if let Some(n) = value.as_number() {
        // JSON has no NaN/Infinity; JSON.stringify maps them to null.
        return Ok(serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null));
    }
    if value.is_string() {
        let s = value.to_string(context).map_err(engine_err)?;
        return Ok(serde_json::Value::String(s.to_std_string_escaped()));
    }
    if value.is_bigint() {
        return Err(SerializeError::Unsupported("bigint"));
    }
    if value.is_symbol() {
        return Err(SerializeError::Unsupported("symbol"));
    }

    if let Some(obj) = value.as_object() {
        if obj.is_callable() {
            return Err(SerializeError::Unsupported("function"));
        }
        if obj.is_array() {
            let array = JsArray::from_object(obj.clone()).map_err(engine_err)?;
            let len = array.length(context).map_err(engine_err)?;
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item = array.get(i, context).map_err(engine_err)?;
                items.push(walk(&item, context, depth + 1)?);
            }
            return Ok(serde_json::Value::Array(items));
        }

        let mut map = serde_json::Map::new();
        for key in own_keys(&obj, context)? {
            let item = obj
                .get(boa_engine::JsString::from(key.as_str()), context)
                .map_err(engine_err)?;
            map.insert(key, walk(&item, context, depth + 1)?);
        }
        return Ok(serde_json::Value::Object(map));
    }

    Err(SerializeError::Unsupported("value"))
}

/// Enumerable own string keys of an object, via the guest's `Object.keys`.
fn own_keys(obj: &JsObject, context: &mut Context) -> Result<Vec<String>, SerializeError> {
    let global = context.global_object();
    let object_ns = global
        .get(js_string!("Object"), context)
        .map_err(engine_err)?;
    let object_ns = object_ns
        .as_object()
        .ok_or(SerializeError::Engine("Object intrinsic missing".to_string()))?;
    let keys_fn = object_ns
        .get(js_string!("keys"), context)
        .map_err(engine_err)?;
    let keys_fn = keys_fn
        .as_object()
        .ok_or(SerializeError::Engine("Object.keys missing".to_string()))?;

    let keys_val = keys_fn
        .call(
            &JsValue::undefined(),
            &[JsValue::from(obj.clone())],
            context,
        )
        .map_err(engine_err)?;
    let keys_obj = keys_val
        .as_object()
        .ok_or(SerializeError::Engine("Object.keys returned non-array".to_string()))?;
    let keys_arr = JsArray::from_object(keys_obj).map_err(engine_err)?;

    let len = keys_arr.length(context).map_err(engine_err)?;
    let mut keys = Vec::with_capacity(len as usize);
    for i in 0..len {
        let key = keys_arr.get(i, context).map_err(engine_err)?;
        let key = key.to_string(context).map_err(engine_err)?;
        keys.push(key.to_std_string_escaped());
    }
    Ok(keys)
}

/// Convert a thrown engine error into a transferable payload.
pub fn error_to_payload(err: &JsError, context: &mut Context) -> ErrorPayload {
    let value = err.to_opaque(context);
    error_value_to_payload(&value, context)
}

/// Convert a thrown guest value (an `Error`, a plain object, or anything
/// else) into a transferable payload, preserving structure where present.
pub fn error_value_to_payload(value: &JsValue, context: &mut Context) -> ErrorPayload {
    let Some(obj) = value.as_object() else {
        // Thrown strings come through verbatim; other primitives use the
        // engine's display form.
        if value.is_string() {
            if let Ok(s) = value.to_string(context) {
                return ErrorPayload::Text(s.to_std_string_escaped());
            }
        }
        return ErrorPayload::Text(value.display().to_string());
    };
    let obj = obj.clone();

    let name = string_prop(&obj, "name", context).unwrap_or_else(|| "Error".to_string());
    let message = string_prop(&obj, "message", context)
        .unwrap_or_else(|| value.display().to_string());
    let stack = string_prop(&obj, "stack", context);

    let mut structured = StructuredError::new(name, message);
    structured.stack = stack;

    // Extra enumerable own properties survive as structured fields so the
    // host can render multi-field payloads distinctly from plain strings.
    if let Ok(keys) = own_keys(&obj, context) {
        for key in keys {
            if matches!(key.as_str(), "name" | "message" | "stack") {
                continue;
            }
            let item = match obj.get(boa_engine::JsString::from(key.as_str()), context) {
                Ok(item) => item,
                Err(_) => continue,
            };
            if let Ok(json) = walk(&item, context, 1) {
                structured.properties.insert(key, json);
            }
        }
    }

    ErrorPayload::Structured(structured)
}

fn string_prop(obj: &JsObject, name: &str, context: &mut Context) -> Option<String> {
    let value = obj
        .get(boa_engine::JsString::from(name), context)
        .ok()?;
    if value.is_undefined() || value.is_null() {
        return None;
    }
    let s = value.to_string(context).ok()?;
    Some(s.to_std_string_escaped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    fn eval(context: &mut Context, code: &str) -> JsValue {
        context.eval(Source::from_bytes(code.as_bytes())).unwrap()
    }

    #[test]
    fn test_primitives() {
        let mut ctx = Context::default();
        let value = eval(&mut ctx, "42");
        assert_eq!(value_to_json(&value, &mut ctx).unwrap(), serde_json::json!(42.0));
        let value = eval(&mut ctx, "'hello'");
        assert_eq!(
            value_to_json(&value, &mut ctx).unwrap(),
            serde_json::json!("hello")
        );
        let value = eval(&mut ctx, "null");
        assert_eq!(value_to_json(&value, &mut ctx).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_nested_structures() {
        let mut ctx = Context::default();
        let value = eval(&mut ctx, "({ status: 'ok', items: [1, true, { deep: null }] })");
        assert_eq!(
            value_to_json(&value, &mut ctx).unwrap(),
            serde_json::json!({ "status": "ok", "items": [1.0, true, { "deep": null }] })
        );
    }

    #[test]
    fn test_function_rejected() {
        let mut ctx = Context::default();
        let value = eval(&mut ctx, "({ callback: () => 1 })");
        assert_eq!(
            value_to_json(&value, &mut ctx).unwrap_err(),
            SerializeError::Unsupported("function")
        );
    }

    #[test]
    fn test_cycle_hits_depth_cap() {
        let mut ctx = Context::default();
        let value = eval(&mut ctx, "(() => { const a = {}; a.self = a; return a; })()");
        assert_eq!(
            value_to_json(&value, &mut ctx).unwrap_err(),
            SerializeError::DepthExceeded
        );
    }

    #[test]
    fn test_non_finite_numbers_become_null() {
        let mut ctx = Context::default();
        let value = eval(&mut ctx, "({ inf: Infinity, nan: NaN })");
        assert_eq!(
            value_to_json(&value, &mut ctx).unwrap(),
            serde_json::json!({ "inf": null, "nan": null })
        );
    }

    #[test]
    fn test_error_payload_preserves_fields() {
        let mut ctx = Context::default();
        let value = eval(
            &mut ctx,
            "(() => { const e = new TypeError('bad input'); e.status = 422; return e; })()",
        );
        match error_value_to_payload(&value, &mut ctx) {
            ErrorPayload::Structured(e) => {
                assert_eq!(e.name, "TypeError");
                assert_eq!(e.message, "bad input");
                assert_eq!(e.properties.get("status"), Some(&serde_json::json!(422.0)));
            }
            other => panic!("expected structured payload, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_throw_is_text() {
        let mut ctx = Context::default();
        let value = eval(&mut ctx, "'plain failure'");
        assert_eq!(
            error_value_to_payload(&value, &mut ctx),
            ErrorPayload::Text("plain failure".to_string())
        );
    }
}
