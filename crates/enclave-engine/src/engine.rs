//! Engine instances, execution contexts and context activation

use crate::ast::Program;
use crate::builtins::{self, Intrinsics};
use crate::error::{EngineError, ExecuteError, SyntaxDiagnostic};
use crate::interpreter::{Env, Interpreter, JsResult};
use crate::json;
use crate::object::{
    AccessCheck, Function, GlobalHooks, NativeFunction, ObjectKind, ObjectRef, PropertyHandler,
};
use crate::parser;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Identifies an execution context within one [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Execution budget applied to every script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Statements executed per run; 0 means unlimited.
    pub max_steps: u64,
    /// Nested script function calls; 0 means unlimited.
    pub max_call_depth: usize,
    /// Longest array a script may create or grow; 0 means the language
    /// maximum of `2^32 - 1`.
    pub max_array_length: usize,
    /// Longest string, in bytes, a script may build; 0 means unlimited.
    pub max_string_length: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_call_depth: 128,
            max_array_length: 1 << 22,
            max_string_length: 1 << 24,
        }
    }
}

/// Shape of a new context's global object.
#[derive(Clone)]
pub struct GlobalTemplate {
    class_name: Rc<str>,
    handler: Option<Rc<dyn PropertyHandler>>,
    access_check: Option<Rc<dyn AccessCheck>>,
}

impl GlobalTemplate {
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: Rc::from(class_name),
            handler: None,
            access_check: None,
        }
    }

    /// Routes every global property touch through `handler`.
    pub fn with_handler(mut self, handler: Rc<dyn PropertyHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_access_check(mut self, check: Rc<dyn AccessCheck>) -> Self {
        self.access_check = Some(check);
        self
    }
}

impl Default for GlobalTemplate {
    fn default() -> Self {
        Self::new("Object")
    }
}

/// Per-context state: the global object, the script scope holding
/// top-level `let`/`const`, and the built-in prototypes.
pub(crate) struct Realm {
    pub(crate) id: ContextId,
    pub(crate) global: ObjectRef,
    pub(crate) script_scope: Env,
    pub(crate) intrinsics: Intrinsics,
}

impl Realm {
    fn new(id: ContextId, template: GlobalTemplate) -> Self {
        let intrinsics = Intrinsics::new();
        let hooks = GlobalHooks {
            class_name: template.class_name,
            handler: template.handler,
            access_check: template.access_check,
        };
        let global = ObjectRef::new(
            ObjectKind::Global(hooks),
            Some(intrinsics.object_prototype.clone()),
        );
        builtins::install(&global, &intrinsics);
        Self {
            id,
            global,
            script_scope: Env::default(),
            intrinsics,
        }
    }

    /// Drops everything the context's objects hold on to. Anything still
    /// referencing them afterwards sees empty objects.
    fn teardown(&self) {
        trace!(context = %self.id, "tearing down realm");
        self.global.clear();
        self.script_scope.clear();
        self.intrinsics.clear();
    }
}

struct ContextSlot {
    realm: Rc<Realm>,
    /// Disposed while entered; released when its last scope exits.
    pending_release: bool,
}

struct EngineInner {
    default_realm: Rc<Realm>,
    contexts: RefCell<HashMap<ContextId, ContextSlot>>,
    entered: RefCell<Vec<ContextId>>,
    next_context: Cell<u64>,
    limits: RuntimeLimits,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for slot in self.contexts.get_mut().values() {
            slot.realm.teardown();
        }
        self.default_realm.teardown();
    }
}

/// A single-threaded script engine instance.
///
/// Cloning is cheap and yields another handle to the same instance. The
/// engine always owns a default context that is entered for as long as
/// the engine lives.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_limits(RuntimeLimits::default())
    }

    pub fn with_limits(limits: RuntimeLimits) -> Self {
        let default_id = ContextId(0);
        let default_realm = Rc::new(Realm::new(default_id, GlobalTemplate::default()));
        Self {
            inner: Rc::new(EngineInner {
                default_realm,
                contexts: RefCell::new(HashMap::new()),
                entered: RefCell::new(Vec::new()),
                next_context: Cell::new(1),
                limits,
            }),
        }
    }

    pub fn limits(&self) -> RuntimeLimits {
        self.inner.limits
    }

    /// Whether both handles refer to the same engine instance.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn default_context(&self) -> ContextId {
        self.inner.default_realm.id
    }

    /// The innermost entered context, or the default context.
    pub fn current_context(&self) -> ContextId {
        self.inner
            .entered
            .borrow()
            .last()
            .copied()
            .unwrap_or_else(|| self.default_context())
    }

    /// Creates a context whose global object follows `template`. Returns
    /// the context id and its global object.
    pub fn new_context(&self, template: GlobalTemplate) -> (ContextId, ObjectRef) {
        let id = ContextId(self.inner.next_context.get());
        self.inner.next_context.set(id.0 + 1);
        let realm = Rc::new(Realm::new(id, template));
        let global = realm.global.clone();
        self.inner.contexts.borrow_mut().insert(
            id,
            ContextSlot {
                realm,
                pending_release: false,
            },
        );
        debug!(context = %id, "created context");
        (id, global)
    }

    pub(crate) fn realm(&self, id: ContextId) -> Result<Rc<Realm>, EngineError> {
        if id == self.default_context() {
            return Ok(self.inner.default_realm.clone());
        }
        match self.inner.contexts.borrow().get(&id) {
            Some(slot) if !slot.pending_release => Ok(slot.realm.clone()),
            Some(_) => Err(EngineError::ContextDisposed(id.0)),
            None if id.0 < self.inner.next_context.get() => Err(EngineError::ContextDisposed(id.0)),
            None => Err(EngineError::UnknownContext(id.0)),
        }
    }

    fn current_realm(&self) -> Rc<Realm> {
        let current = self.current_context();
        match self.inner.contexts.borrow().get(&current) {
            Some(slot) => slot.realm.clone(),
            None => self.inner.default_realm.clone(),
        }
    }

    /// The global object of a live context.
    pub fn global(&self, id: ContextId) -> Result<ObjectRef, EngineError> {
        Ok(self.realm(id)?.global.clone())
    }

    pub fn is_alive(&self, id: ContextId) -> bool {
        self.realm(id).is_ok()
    }

    /// Releases a context. Idempotent; returns whether this call disposed
    /// it. The default context cannot be disposed. A context that is
    /// currently entered is released when its last scope exits.
    pub fn dispose_context(&self, id: ContextId) -> bool {
        if id == self.default_context() {
            warn!("ignoring request to dispose the default context");
            return false;
        }
        let is_entered = self.inner.entered.borrow().contains(&id);
        let mut contexts = self.inner.contexts.borrow_mut();
        let Some(slot) = contexts.get_mut(&id) else {
            return false;
        };
        if slot.pending_release {
            return false;
        }
        if is_entered {
            debug!(context = %id, "context disposed while entered, deferring release");
            slot.pending_release = true;
            return true;
        }
        let slot = contexts.remove(&id);
        drop(contexts);
        if let Some(slot) = slot {
            slot.realm.teardown();
        }
        debug!(context = %id, "disposed context");
        true
    }

    fn release_if_pending(&self, id: ContextId) {
        if self.inner.entered.borrow().contains(&id) {
            return;
        }
        let mut contexts = self.inner.contexts.borrow_mut();
        if !contexts.get(&id).is_some_and(|slot| slot.pending_release) {
            return;
        }
        let slot = contexts.remove(&id);
        drop(contexts);
        if let Some(slot) = slot {
            slot.realm.teardown();
            debug!(context = %id, "released disposed context");
        }
    }

    /// Makes `id` the current context until the returned scope is dropped.
    pub fn enter(&self, id: ContextId) -> Result<ContextScope, EngineError> {
        self.realm(id)?;
        let mut entered = self.inner.entered.borrow_mut();
        entered.push(id);
        trace!(context = %id, depth = entered.len(), "entered context");
        Ok(ContextScope {
            engine: self.clone(),
            id,
            depth: entered.len(),
        })
    }

    /// Parses `source`. The result is not tied to any context and binds
    /// to whichever context is current when it is executed.
    pub fn compile(&self, source: &str, origin: &str) -> Result<CompiledScript, SyntaxDiagnostic> {
        let compiled_in = self.current_context();
        let program = parser::parse(source, origin).map_err(|diagnostic| {
            debug!(context = %compiled_in, %diagnostic, "compilation failed");
            diagnostic
        })?;
        debug!(context = %compiled_in, origin, "compiled script");
        Ok(CompiledScript {
            program: Rc::new(program),
            origin: Rc::from(origin),
            source: Rc::from(source),
            compiled_in,
        })
    }

    /// Runs a compiled script in the current context.
    pub fn execute(&self, script: &CompiledScript) -> Result<Value, ExecuteError> {
        let realm = self.realm(self.current_context())?;
        let context = realm.id;
        trace!(context = %context, origin = %script.origin, "executing script");
        let mut interpreter = Interpreter::new(self, realm, self.inner.limits);
        let result = interpreter.run_script(&script.program);
        match &result {
            Ok(_) => trace!(context = %context, "script completed"),
            Err(exception) => debug!(context = %context, %exception, "script threw"),
        }
        result.map_err(ExecuteError::Thrown)
    }

    /// An ordinary object belonging to the current context.
    pub fn new_object(&self) -> ObjectRef {
        let realm = self.current_realm();
        ObjectRef::new(
            ObjectKind::Ordinary,
            Some(realm.intrinsics.object_prototype.clone()),
        )
    }

    pub fn new_array(&self, elements: Vec<Value>) -> ObjectRef {
        let realm = self.current_realm();
        ObjectRef::new(
            ObjectKind::Array(elements),
            Some(realm.intrinsics.array_prototype.clone()),
        )
    }

    /// A host function callable from scripts.
    pub fn new_function<F>(&self, name: &str, call: F) -> ObjectRef
    where
        F: Fn(&mut Interpreter<'_>, &Value, &[Value]) -> JsResult<Value> + 'static,
    {
        let realm = self.current_realm();
        ObjectRef::new(
            ObjectKind::Function(Function::Native(NativeFunction {
                name: Rc::from(name),
                call: Rc::new(call),
            })),
            Some(realm.intrinsics.function_prototype.clone()),
        )
    }

    /// An object wrapping an opaque host payload. Scripts see a plain object.
    pub fn new_embedder_object(&self, data: Rc<dyn std::any::Any>) -> ObjectRef {
        let realm = self.current_realm();
        ObjectRef::new(
            ObjectKind::Embedder(data),
            Some(realm.intrinsics.object_prototype.clone()),
        )
    }

    pub fn value_from_json(&self, json: &serde_json::Value) -> Value {
        json::from_json(json, &self.current_realm().intrinsics)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("current_context", &self.current_context())
            .field("contexts", &self.inner.contexts.borrow().len())
            .finish()
    }
}

/// Keeps a context entered. Dropping it restores the previous context.
#[must_use = "the context is exited as soon as the scope is dropped"]
pub struct ContextScope {
    engine: Engine,
    id: ContextId,
    depth: usize,
}

impl ContextScope {
    pub fn context(&self) -> ContextId {
        self.id
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        {
            let mut entered = self.engine.inner.entered.borrow_mut();
            if entered.len() == self.depth && entered.last() == Some(&self.id) {
                entered.pop();
            } else {
                warn!(context = %self.id, "context scopes exited out of order");
                if let Some(pos) = entered.iter().rposition(|id| *id == self.id) {
                    entered.remove(pos);
                }
            }
            trace!(context = %self.id, depth = entered.len(), "exited context");
        }
        self.engine.release_if_pending(self.id);
    }
}

/// A parsed script, runnable any number of times in any context.
#[derive(Clone)]
pub struct CompiledScript {
    program: Rc<Program>,
    origin: Rc<str>,
    source: Rc<str>,
    compiled_in: ContextId,
}

impl CompiledScript {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The context that was current at compile time. Informational only.
    pub fn compiled_in(&self) -> ContextId {
        self.compiled_in
    }
}

impl fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledScript")
            .field("origin", &self.origin)
            .field("statements", &self.program.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PropertyKey;

    fn run(engine: &Engine, source: &str) -> Result<Value, ExecuteError> {
        let script = engine.compile(source, "test.js").unwrap();
        engine.execute(&script)
    }

    #[test]
    fn test_default_context_is_current() {
        let engine = Engine::new();
        assert_eq!(engine.current_context(), engine.default_context());
        assert!(!engine.dispose_context(engine.default_context()));
    }

    #[test]
    fn test_scopes_nest_and_restore() {
        let engine = Engine::new();
        let (a, _) = engine.new_context(GlobalTemplate::default());
        let (b, _) = engine.new_context(GlobalTemplate::default());
        {
            let _outer = engine.enter(a).unwrap();
            assert_eq!(engine.current_context(), a);
            {
                let _inner = engine.enter(b).unwrap();
                assert_eq!(engine.current_context(), b);
            }
            assert_eq!(engine.current_context(), a);
        }
        assert_eq!(engine.current_context(), engine.default_context());
    }

    #[test]
    fn test_script_binds_to_current_context() {
        let engine = Engine::new();
        let script = engine.compile("answer = 42", "bind.js").unwrap();
        let (ctx, global) = engine.new_context(GlobalTemplate::default());
        {
            let _scope = engine.enter(ctx).unwrap();
            engine.execute(&script).unwrap();
        }
        assert_eq!(
            global.get_own(&PropertyKey::from("answer")).and_then(|v| v.as_number()),
            Some(42.0)
        );
        let default_global = engine.global(engine.default_context()).unwrap();
        assert!(!default_global.has_own(&PropertyKey::from("answer")));
    }

    #[test]
    fn test_dispose_is_idempotent_and_typed() {
        let engine = Engine::new();
        let (ctx, _) = engine.new_context(GlobalTemplate::default());
        assert!(engine.dispose_context(ctx));
        assert!(!engine.dispose_context(ctx));
        assert_eq!(engine.enter(ctx).err(), Some(EngineError::ContextDisposed(ctx.as_u64())));
        assert_eq!(
            engine.global(ContextId(999)).err(),
            Some(EngineError::UnknownContext(999))
        );
    }

    #[test]
    fn test_dispose_while_entered_is_deferred() {
        let engine = Engine::new();
        let (ctx, _) = engine.new_context(GlobalTemplate::default());
        let scope = engine.enter(ctx).unwrap();
        assert!(engine.dispose_context(ctx));
        assert!(!engine.is_alive(ctx));
        assert!(matches!(
            run(&engine, "1"),
            Err(ExecuteError::Engine(EngineError::ContextDisposed(_)))
        ));
        drop(scope);
        assert_eq!(engine.current_context(), engine.default_context());
        assert!(run(&engine, "1").is_ok());
    }

    #[test]
    fn test_out_of_order_exit_still_unwinds() {
        let engine = Engine::new();
        let (a, _) = engine.new_context(GlobalTemplate::default());
        let (b, _) = engine.new_context(GlobalTemplate::default());
        let outer = engine.enter(a).unwrap();
        let inner = engine.enter(b).unwrap();
        drop(outer);
        assert_eq!(engine.current_context(), b);
        drop(inner);
        assert_eq!(engine.current_context(), engine.default_context());
    }

    #[test]
    fn test_functions_from_disposed_context_throw() {
        let engine = Engine::new();
        let (ctx, _) = engine.new_context(GlobalTemplate::default());
        let function = {
            let _scope = engine.enter(ctx).unwrap();
            run(&engine, "(function () { return 1; })").unwrap()
        };
        engine.dispose_context(ctx);
        let holder = engine.global(engine.default_context()).unwrap();
        holder.set_own(PropertyKey::from("stale"), function);
        match run(&engine, "stale()") {
            Err(ExecuteError::Thrown(exception)) => {
                assert!(exception.message().starts_with("TypeError"));
            }
            other => panic!("expected TypeError, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_top_level_let_lives_in_script_scope() {
        let engine = Engine::new();
        run(&engine, "let hidden = 1; var shown = 2;").unwrap();
        let global = engine.global(engine.default_context()).unwrap();
        assert!(!global.has_own(&PropertyKey::from("hidden")));
        assert!(global.has_own(&PropertyKey::from("shown")));
        assert_eq!(run(&engine, "hidden + shown").unwrap().as_number(), Some(3.0));
        assert!(run(&engine, "let hidden = 5;").is_err());
    }

    #[test]
    fn test_host_functions() {
        let engine = Engine::new();
        let double = engine.new_function("double", |_, _, args| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number) * 2.0))
        });
        let global = engine.global(engine.default_context()).unwrap();
        global.set_own(PropertyKey::from("double"), Value::Object(double));
        assert_eq!(run(&engine, "double(21)").unwrap().as_number(), Some(42.0));
    }
}
