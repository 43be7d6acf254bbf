//! Global property interception
//!
//! Routes every global-identifier touch of a sandboxed script between the
//! two backing stores. The sandbox store wins: the proxy-global store is
//! only consulted when the sandbox store lacks the property as an own
//! property. Writes always land in the sandbox store.

use crate::context::ContextState;
use crate::store::BackingStores;
use enclave_engine::{PropertyCallbackInfo, PropertyHandler, PropertyKey, Value};
use std::rc::Weak;
use tracing::trace;

/// Sandbox value first, proxy-global value second, `None` when neither
/// store holds the property.
pub fn get(stores: &BackingStores, key: &PropertyKey) -> Option<Value> {
    stores
        .sandbox()
        .get_own(key)
        .or_else(|| stores.proxy_global().get_own(key))
        .filter(|value| !value.is_hole())
}

/// Writes to the sandbox store. Never touches the proxy-global store.
pub fn set(stores: &BackingStores, key: &PropertyKey, value: Value) -> bool {
    stores.sandbox().set_own(key.clone(), value);
    true
}

/// Present in either store.
pub fn has(stores: &BackingStores, key: &PropertyKey) -> bool {
    stores.sandbox().has_own(key) || stores.proxy_global().has_own(key)
}

/// Deletes from the sandbox store when it holds the property, otherwise
/// from the proxy-global store. Deleting a property neither store holds
/// succeeds, as `delete` does for absent properties.
pub fn delete(stores: &BackingStores, key: &PropertyKey) -> bool {
    if stores.sandbox().has_own(key) {
        stores.sandbox().delete_own(key)
    } else if stores.proxy_global().has_own(key) {
        stores.proxy_global().delete_own(key)
    } else {
        true
    }
}

/// The sandbox store's own enumerable keys. Proxy-only built-ins are never
/// listed.
pub fn enumerate(stores: &BackingStores) -> Vec<PropertyKey> {
    let sandbox = stores.sandbox();
    sandbox
        .own_keys(true)
        .into_iter()
        .filter(|key| sandbox.has_own(key))
        .collect()
}

/// Engine-facing handler installed on a sandbox context's global object.
///
/// Holds a weak reference to the owning context, so the engine's global
/// object never keeps the context alive. Once the context is disposed every
/// operation behaves as if both stores were empty.
pub(crate) struct GlobalInterceptor {
    state: Weak<ContextState>,
}

impl GlobalInterceptor {
    pub(crate) fn new(state: Weak<ContextState>) -> Self {
        Self { state }
    }

    fn with_stores<R>(&self, f: impl FnOnce(&BackingStores) -> R) -> Option<R> {
        let state = self.state.upgrade()?;
        let stores = state.stores().ok()?;
        Some(f(&stores))
    }
}

impl PropertyHandler for GlobalInterceptor {
    fn getter(&self, key: &PropertyKey, _info: &PropertyCallbackInfo<'_>) -> Option<Value> {
        let value = self.with_stores(|stores| get(stores, key)).flatten();
        trace!(%key, found = value.is_some(), "intercepted global get");
        value
    }

    fn setter(&self, key: &PropertyKey, value: Value, _info: &PropertyCallbackInfo<'_>) -> bool {
        let stored = self
            .with_stores(|stores| set(stores, key, value))
            .unwrap_or(false);
        trace!(%key, stored, "intercepted global set");
        stored
    }

    fn query(&self, key: &PropertyKey, _info: &PropertyCallbackInfo<'_>) -> bool {
        let present = self
            .with_stores(|stores| has(stores, key))
            .unwrap_or(false);
        trace!(%key, present, "intercepted global query");
        present
    }

    fn deleter(&self, key: &PropertyKey, _info: &PropertyCallbackInfo<'_>) -> bool {
        let deleted = self
            .with_stores(|stores| delete(stores, key))
            .unwrap_or(true);
        trace!(%key, deleted, "intercepted global delete");
        deleted
    }

    fn enumerator(&self, _info: &PropertyCallbackInfo<'_>) -> Vec<PropertyKey> {
        let keys = self.with_stores(enumerate).unwrap_or_default();
        trace!(count = keys.len(), "intercepted global enumeration");
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_engine::ObjectRef;

    fn stores() -> BackingStores {
        BackingStores::new(ObjectRef::plain(), ObjectRef::plain())
    }

    fn key(name: &str) -> PropertyKey {
        PropertyKey::from(name)
    }

    #[test]
    fn test_get_prefers_sandbox() {
        let stores = stores();
        stores.proxy_global().set_own(key("y"), Value::from("proxy"));
        assert_eq!(get(&stores, &key("y")).and_then(|v| v.as_str().map(String::from)), Some("proxy".into()));

        stores.sandbox().set_own(key("y"), Value::from("sandbox"));
        assert_eq!(get(&stores, &key("y")).and_then(|v| v.as_str().map(String::from)), Some("sandbox".into()));
        assert!(get(&stores, &key("missing")).is_none());
    }

    #[test]
    fn test_set_only_touches_sandbox() {
        let stores = stores();
        stores.proxy_global().set_own(key("x"), Value::from(1));
        assert!(set(&stores, &key("x"), Value::from(2)));
        assert_eq!(stores.sandbox().get_own(&key("x")).and_then(|v| v.as_number()), Some(2.0));
        assert_eq!(stores.proxy_global().get_own(&key("x")).and_then(|v| v.as_number()), Some(1.0));
    }

    #[test]
    fn test_has_is_either_store() {
        let stores = stores();
        assert!(!has(&stores, &key("a")));
        stores.sandbox().set_own(key("a"), Value::Null);
        assert!(has(&stores, &key("a")));

        stores.proxy_global().set_own(key("b"), Value::Undefined);
        assert!(has(&stores, &key("b")));

        stores.sandbox().set_own(key("c"), Value::from(1));
        stores.proxy_global().set_own(key("c"), Value::from(2));
        assert!(has(&stores, &key("c")));
    }

    #[test]
    fn test_delete_takes_sandbox_first() {
        let stores = stores();
        stores.sandbox().set_own(key("y"), Value::from(1));
        stores.proxy_global().set_own(key("y"), Value::from(2));

        assert!(delete(&stores, &key("y")));
        assert!(!stores.sandbox().has_own(&key("y")));
        assert!(stores.proxy_global().has_own(&key("y")));
        assert!(has(&stores, &key("y")));

        assert!(delete(&stores, &key("y")));
        assert!(!stores.proxy_global().has_own(&key("y")));
        assert!(!has(&stores, &key("y")));

        assert!(delete(&stores, &key("y")));
    }

    #[test]
    fn test_enumerate_excludes_proxy_and_hidden_keys() {
        let stores = stores();
        stores.proxy_global().set_own(key("builtin"), Value::from(1));
        stores.sandbox().set_own(key("b"), Value::from(1));
        stores.sandbox().set_own(key("a"), Value::from(2));
        stores.sandbox().define_own(key("hidden"), Value::from(3), false);
        stores.sandbox().set_own(PropertyKey::Index(0), Value::from(4));

        let keys: Vec<String> = enumerate(&stores).iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["0", "b", "a"]);
    }

    #[test]
    fn test_hole_slots_read_as_absent() {
        let stores = stores();
        stores.sandbox().set_own(key("h"), Value::Hole);
        assert!(get(&stores, &key("h")).is_none());
        assert!(!has(&stores, &key("h")));
        assert!(enumerate(&stores).is_empty());
    }
}
