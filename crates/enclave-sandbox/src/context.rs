//! Sandbox contexts
//!
//! A sandbox context owns one engine context whose global object is
//! virtualized by [`GlobalInterceptor`] over the host's sandbox store and
//! the engine's own global (the proxy-global store).

use crate::error::{CreationError, RuntimeError};
use crate::interceptor::GlobalInterceptor;
use crate::policy::{AccessPolicy, AllowAll, PolicyCheck};
use crate::store::{self, BackingStores};
use enclave_engine::{ContextId, ContextScope, Engine, GlobalTemplate, ObjectRef, Value};
use serde_json::Value as Json;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Payload of a context's identity object. Scripts and hosts may pass the
/// identity object around; only the weak link leads back to the context.
struct ContextMarker {
    state: Weak<ContextState>,
}

pub(crate) struct ContextState {
    engine: Engine,
    id: ContextId,
    class_name: String,
    stores: RefCell<Option<BackingStores>>,
    marker: ObjectRef,
}

impl ContextState {
    pub(crate) fn stores(&self) -> Result<Ref<'_, BackingStores>, RuntimeError> {
        Ref::filter_map(self.stores.borrow(), Option::as_ref)
            .map_err(|_| RuntimeError::ContextDisposed)
    }

    fn is_disposed(&self) -> bool {
        self.stores.borrow().is_none()
    }

    fn dispose(&self) -> bool {
        let Some(stores) = self.stores.borrow_mut().take() else {
            return false;
        };
        drop(stores);
        self.engine.dispose_context(self.id);
        debug!(context = %self.id, "disposed sandbox context");
        true
    }
}

impl Drop for ContextState {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Host handle to a sandbox context. Clones share the same context.
#[derive(Clone)]
pub struct SandboxContext {
    state: Rc<ContextState>,
}

impl SandboxContext {
    /// Creates a context over `sandbox` with the default allow-all policy.
    pub fn new(engine: &Engine, sandbox: &Value) -> Result<Self, CreationError> {
        Self::with_policy(engine, sandbox, Rc::new(AllowAll))
    }

    pub fn with_policy(
        engine: &Engine,
        sandbox: &Value,
        policy: Rc<dyn AccessPolicy>,
    ) -> Result<Self, CreationError> {
        let Value::Object(sandbox) = sandbox else {
            return Err(CreationError::InvalidSandbox);
        };
        let class_name = store::constructor_name(sandbox);

        let state = Rc::new_cyclic(|weak: &Weak<ContextState>| {
            let template = GlobalTemplate::new(&class_name)
                .with_handler(Rc::new(GlobalInterceptor::new(weak.clone())))
                .with_access_check(Rc::new(PolicyCheck::new(policy)));
            let (id, proxy_global) = engine.new_context(template);
            let marker = engine.new_embedder_object(Rc::new(ContextMarker {
                state: weak.clone(),
            }));
            ContextState {
                engine: engine.clone(),
                id,
                class_name,
                stores: RefCell::new(Some(BackingStores::new(sandbox.clone(), proxy_global))),
                marker,
            }
        });
        debug!(context = %state.id, class = %state.class_name, "created sandbox context");
        Ok(Self { state })
    }

    /// Recovers the context behind an identity value. Anything that is not
    /// a context's identity object is an invalid target.
    pub fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        let marker = value
            .as_object()
            .and_then(ObjectRef::embedder_data)
            .and_then(|data| data.downcast::<ContextMarker>().ok())
            .ok_or(RuntimeError::InvalidTarget)?;
        let state = marker.state.upgrade().ok_or(RuntimeError::ContextDisposed)?;
        if state.is_disposed() {
            return Err(RuntimeError::ContextDisposed);
        }
        Ok(Self { state })
    }

    /// Whether `value` is the identity object of a sandbox context, live or
    /// disposed.
    pub fn is_sandbox_context(value: &Value) -> bool {
        value
            .as_object()
            .and_then(ObjectRef::embedder_data)
            .is_some_and(|data| data.is::<ContextMarker>())
    }

    /// The identity object standing for this context.
    pub fn as_value(&self) -> Value {
        Value::Object(self.state.marker.clone())
    }

    pub fn id(&self) -> ContextId {
        self.state.id
    }

    pub fn engine(&self) -> &Engine {
        &self.state.engine
    }

    /// Constructor name of the sandbox store, reported as the global's class.
    pub fn class_name(&self) -> &str {
        &self.state.class_name
    }

    pub fn sandbox(&self) -> Result<ObjectRef, RuntimeError> {
        Ok(self.state.stores()?.sandbox().clone())
    }

    pub fn proxy_global(&self) -> Result<ObjectRef, RuntimeError> {
        Ok(self.state.stores()?.proxy_global().clone())
    }

    /// Makes this context current until the scope is dropped.
    pub fn enter(&self) -> Result<ContextScope, RuntimeError> {
        if self.is_disposed() {
            return Err(RuntimeError::ContextDisposed);
        }
        Ok(self.state.engine.enter(self.state.id)?)
    }

    /// JSON copy of the sandbox store's own enumerable properties.
    pub fn snapshot(&self) -> Result<Json, RuntimeError> {
        Ok(store::snapshot(self.state.stores()?.sandbox()))
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Releases the engine context and both stores. Idempotent; returns
    /// whether this call disposed the context.
    pub fn dispose(&self) -> bool {
        self.state.dispose()
    }

    pub fn ptr_eq(&self, other: &SandboxContext) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxContext")
            .field("id", &self.state.id)
            .field("class_name", &self.state.class_name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_engine::PropertyKey;
    use serde_json::json;

    fn sandbox(engine: &Engine, json: Json) -> Value {
        engine.value_from_json(&json)
    }

    #[test]
    fn test_rejects_non_objects() {
        let engine = Engine::new();
        for value in [Value::Undefined, Value::Null, Value::from(1), Value::from("s")] {
            assert_eq!(
                SandboxContext::new(&engine, &value).err(),
                Some(CreationError::InvalidSandbox)
            );
        }
    }

    #[test]
    fn test_stores_are_distinct() {
        let engine = Engine::new();
        let ctx = SandboxContext::new(&engine, &sandbox(&engine, json!({}))).unwrap();
        assert!(!ctx.sandbox().unwrap().ptr_eq(&ctx.proxy_global().unwrap()));
        assert!(ctx
            .proxy_global()
            .unwrap()
            .has_own(&PropertyKey::from("JSON")));
    }

    #[test]
    fn test_identity_round_trip() {
        let engine = Engine::new();
        let ctx = SandboxContext::new(&engine, &sandbox(&engine, json!({}))).unwrap();
        let value = ctx.as_value();
        assert!(SandboxContext::is_sandbox_context(&value));
        assert!(SandboxContext::from_value(&value).unwrap().ptr_eq(&ctx));

        let lookalike = sandbox(&engine, json!({"id": 1}));
        assert!(!SandboxContext::is_sandbox_context(&lookalike));
        assert!(matches!(
            SandboxContext::from_value(&lookalike),
            Err(RuntimeError::InvalidTarget)
        ));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let engine = Engine::new();
        let ctx = SandboxContext::new(&engine, &sandbox(&engine, json!({}))).unwrap();
        let id = ctx.id();
        assert!(engine.is_alive(id));
        assert!(ctx.dispose());
        assert!(!ctx.dispose());
        assert!(!engine.is_alive(id));
        assert!(matches!(ctx.sandbox(), Err(RuntimeError::ContextDisposed)));
        assert!(matches!(ctx.enter(), Err(RuntimeError::ContextDisposed)));
        assert!(matches!(
            SandboxContext::from_value(&ctx.as_value()),
            Err(RuntimeError::ContextDisposed)
        ));
    }

    #[test]
    fn test_dropping_last_handle_releases_engine_context() {
        let engine = Engine::new();
        let ctx = SandboxContext::new(&engine, &sandbox(&engine, json!({}))).unwrap();
        let id = ctx.id();
        let identity = ctx.as_value();
        drop(ctx);
        assert!(!engine.is_alive(id));
        assert!(matches!(
            SandboxContext::from_value(&identity),
            Err(RuntimeError::ContextDisposed)
        ));
    }

    #[test]
    fn test_class_name_follows_sandbox_constructor() {
        let engine = Engine::new();
        let ctx = SandboxContext::new(&engine, &sandbox(&engine, json!({}))).unwrap();
        assert_eq!(ctx.class_name(), "Object");
        assert_eq!(ctx.proxy_global().unwrap().class_name(), "Object");
    }
}
