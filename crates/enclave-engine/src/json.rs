//! Conversion between script values and `serde_json` values

use crate::builtins::Intrinsics;
use crate::object::{ObjectKind, ObjectRef};
use crate::value::{PropertyKey, Value};
use serde_json::{Map, Number, Value as Json};
use thiserror::Error;

/// Deepest object nesting converted to JSON.
pub const MAX_JSON_DEPTH: usize = 256;

/// Most values converted in one call. Shared sub-objects count once per
/// occurrence.
pub const MAX_JSON_VALUES: usize = 1 << 21;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
    #[error("Converting circular structure to JSON")]
    Circular,
    #[error("Maximum nesting depth exceeded while converting to JSON")]
    TooDeep,
    #[error("Value too large to convert to JSON")]
    TooLarge,
}

/// `JSON.stringify` semantics: `None` for values that have no JSON form
/// (undefined, functions); cycles are an error.
pub fn to_json(value: &Value) -> Result<Option<Json>, JsonError> {
    Serializer::default().convert(value)
}

/// Best-effort conversion for inspection. Values without a JSON form,
/// cyclic references and objects nested deeper than [`MAX_JSON_DEPTH`]
/// render as `null`. Members past [`MAX_JSON_VALUES`] are left out.
pub fn to_json_lossy(value: &Value) -> Json {
    let mut serializer = Serializer {
        lossy: true,
        ..Serializer::default()
    };
    match serializer.convert(value) {
        Ok(Some(json)) => json,
        _ => Json::Null,
    }
}

#[derive(Default)]
struct Serializer {
    lossy: bool,
    stack: Vec<ObjectRef>,
    converted: usize,
}

impl Serializer {
    /// Whether the value budget is spent. Strict conversion fails at that
    /// point; lossy conversion stops adding members.
    fn exhausted(&self) -> Result<bool, JsonError> {
        if self.converted < MAX_JSON_VALUES {
            return Ok(false);
        }
        if self.lossy {
            Ok(true)
        } else {
            Err(JsonError::TooLarge)
        }
    }

    fn convert(&mut self, value: &Value) -> Result<Option<Json>, JsonError> {
        self.converted += 1;
        let json = match value {
            Value::Undefined | Value::Hole if self.lossy => Json::Null,
            Value::Undefined | Value::Hole => return Ok(None),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number(*n),
            Value::String(s) => Json::String(s.to_string()),
            Value::Object(obj) if obj.is_callable() => {
                return Ok(self.lossy.then_some(Json::Null));
            }
            Value::Object(obj) => {
                if self.stack.iter().any(|seen| seen.ptr_eq(obj)) {
                    return if self.lossy {
                        Ok(Some(Json::Null))
                    } else {
                        Err(JsonError::Circular)
                    };
                }
                if self.stack.len() >= MAX_JSON_DEPTH {
                    return if self.lossy {
                        Ok(Some(Json::Null))
                    } else {
                        Err(JsonError::TooDeep)
                    };
                }
                self.stack.push(obj.clone());
                let json = self.object(obj);
                self.stack.pop();
                json?
            }
        };
        Ok(Some(json))
    }

    fn object(&mut self, obj: &ObjectRef) -> Result<Json, JsonError> {
        if let Some(elements) = obj.array_elements() {
            let mut items = Vec::with_capacity(elements.len().min(MAX_JSON_VALUES));
            for element in &elements {
                if self.exhausted()? {
                    break;
                }
                items.push(self.convert(element)?.unwrap_or(Json::Null));
            }
            return Ok(Json::Array(items));
        }
        let mut map = Map::new();
        for key in obj.own_keys(true) {
            if self.exhausted()? {
                break;
            }
            let Some(value) = obj.get_own(&key) else {
                continue;
            };
            if let Some(json) = self.convert(&value)? {
                map.insert(key.to_string(), json);
            }
        }
        Ok(Json::Object(map))
    }
}

fn number(n: f64) -> Json {
    // Integral values print without a fraction, as scripts expect.
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Json::from(n as i64);
    }
    Number::from_f64(n).map_or(Json::Null, Json::Number)
}

/// Builds script values from JSON using the given context's prototypes.
pub(crate) fn from_json(json: &Json, intrinsics: &Intrinsics) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => {
            let elements = items.iter().map(|j| from_json(j, intrinsics)).collect();
            Value::Object(ObjectRef::new(
                ObjectKind::Array(elements),
                Some(intrinsics.array_prototype.clone()),
            ))
        }
        Json::Object(map) => {
            let obj = ObjectRef::new(
                ObjectKind::Ordinary,
                Some(intrinsics.object_prototype.clone()),
            );
            for (key, value) in map {
                obj.set_own(PropertyKey::from(key.as_str()), from_json(value, intrinsics));
            }
            Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use serde_json::json;

    #[test]
    fn test_integral_numbers_have_no_fraction() {
        assert_eq!(to_json(&Value::Number(42.0)).unwrap(), Some(json!(42)));
        assert_eq!(to_json(&Value::Number(0.5)).unwrap(), Some(json!(0.5)));
        assert_eq!(to_json(&Value::Number(f64::NAN)).unwrap(), Some(Json::Null));
    }

    #[test]
    fn test_round_trip_keeps_property_order() {
        let engine = Engine::new();
        let value = engine.value_from_json(&json!({"z": 1, "a": [true, null, "s"]}));
        let back = to_json(&value).unwrap().unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), r#"{"z":1,"a":[true,null,"s"]}"#);
    }

    #[test]
    fn test_cycles() {
        let obj = ObjectRef::plain();
        obj.set_own(PropertyKey::from("self"), Value::Object(obj.clone()));
        let value = Value::Object(obj.clone());
        assert_eq!(to_json(&value), Err(JsonError::Circular));
        assert_eq!(to_json_lossy(&value), json!({"self": null}));
        obj.clear();
    }

    #[test]
    fn test_deep_nesting_is_cut_off() {
        let mut head = ObjectRef::plain();
        for _ in 0..10_000 {
            let next = ObjectRef::plain();
            next.set_own(PropertyKey::from("next"), Value::Object(head));
            head = next;
        }
        let value = Value::Object(head);
        assert_eq!(to_json(&value), Err(JsonError::TooDeep));

        let mut json = to_json_lossy(&value);
        let mut depth = 0;
        while let Some(next) = json.get_mut("next") {
            json = next.take();
            depth += 1;
        }
        assert_eq!(depth, MAX_JSON_DEPTH);
        assert_eq!(json, Json::Null);
    }

    #[test]
    fn test_shared_subtrees_are_bounded() {
        // Each level references the previous one twice, doubling the
        // expanded size.
        let mut shared = Value::from(1);
        for _ in 0..40 {
            let pair = ObjectRef::new(ObjectKind::Array(vec![shared.clone(), shared]), None);
            shared = Value::Object(pair);
        }
        assert_eq!(to_json(&shared), Err(JsonError::TooLarge));
        assert!(to_json_lossy(&shared).is_array());
    }

    #[test]
    fn test_undefined_members() {
        let obj = ObjectRef::plain();
        obj.set_own(PropertyKey::from("u"), Value::Undefined);
        obj.set_own(PropertyKey::from("n"), Value::Number(1.0));
        let value = Value::Object(obj);
        assert_eq!(to_json(&value).unwrap(), Some(json!({"n": 1})));
        assert_eq!(to_json_lossy(&value), json!({"u": null, "n": 1}));
        assert_eq!(to_json(&Value::Undefined).unwrap(), None);
    }
}
