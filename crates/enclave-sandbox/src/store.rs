//! Backing stores of a sandbox context
//!
//! The sandbox store is host-owned and receives every global write a
//! script performs. The proxy-global store is the engine's own global
//! object for the context and holds the built-ins.

use crate::error::CreationError;
use enclave_engine::{to_json_lossy, Engine, ObjectRef, PropertyKey, Value};
use serde_json::Value as Json;

pub struct BackingStores {
    sandbox: ObjectRef,
    proxy_global: ObjectRef,
}

impl BackingStores {
    pub fn new(sandbox: ObjectRef, proxy_global: ObjectRef) -> Self {
        debug_assert!(!sandbox.ptr_eq(&proxy_global));
        Self {
            sandbox,
            proxy_global,
        }
    }

    pub fn sandbox(&self) -> &ObjectRef {
        &self.sandbox
    }

    pub fn proxy_global(&self) -> &ObjectRef {
        &self.proxy_global
    }
}

/// Builds a sandbox store from a JSON object, as an ordinary object of the
/// engine's current context with members in document order. Any other JSON
/// value is not a sandbox.
pub fn sandbox_from_json(engine: &Engine, json: &Json) -> Result<ObjectRef, CreationError> {
    if !json.is_object() {
        return Err(CreationError::InvalidSandbox);
    }
    engine
        .value_from_json(json)
        .as_object()
        .cloned()
        .ok_or(CreationError::InvalidSandbox)
}

/// Name of the function found at `sandbox.constructor`, or `Object`.
pub fn constructor_name(sandbox: &ObjectRef) -> String {
    let name = sandbox
        .lookup_real(&PropertyKey::from("constructor"))
        .and_then(|ctor| ctor.as_object().and_then(ObjectRef::function))
        .map(|function| function.name().to_string());
    match name {
        Some(name) if !name.is_empty() => name,
        _ => "Object".to_string(),
    }
}

/// The store's own enumerable properties as JSON. Functions and cyclic
/// references render as `null`.
pub fn snapshot(store: &ObjectRef) -> Json {
    to_json_lossy(&Value::Object(store.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_engine::ObjectKind;
    use serde_json::json;

    #[test]
    fn test_constructor_name_defaults_to_object() {
        let engine = Engine::new();
        let store = sandbox_from_json(&engine, &json!({"a": 1})).unwrap();
        assert_eq!(constructor_name(&store), "Object");
        assert_eq!(constructor_name(&ObjectRef::plain()), "Object");
    }

    #[test]
    fn test_constructor_name_from_prototype() {
        let engine = Engine::new();
        let ctor = engine.new_function("Box", |_, _, _| Ok(Value::Undefined));
        let proto = engine.new_object();
        proto.define_own(PropertyKey::from("constructor"), Value::Object(ctor), false);
        let instance = ObjectRef::new(ObjectKind::Ordinary, Some(proto));
        assert_eq!(constructor_name(&instance), "Box");
    }

    #[test]
    fn test_snapshot_skips_non_enumerable() {
        let engine = Engine::new();
        let store = sandbox_from_json(&engine, &json!({"x": 1})).unwrap();
        store.define_own(PropertyKey::from("hidden"), Value::from(true), false);
        assert_eq!(snapshot(&store), json!({"x": 1}));
    }

    #[test]
    fn test_seeding_requires_a_json_object() {
        let engine = Engine::new();
        let store = sandbox_from_json(&engine, &json!({"b": 2, "a": [1]})).unwrap();
        let keys: Vec<String> = store.own_keys(true).iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        for json in [json!(5), json!("s"), json!(null), json!([1, 2])] {
            assert_eq!(
                sandbox_from_json(&engine, &json).unwrap_err(),
                CreationError::InvalidSandbox
            );
        }
    }
}
