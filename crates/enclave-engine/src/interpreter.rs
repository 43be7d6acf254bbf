//! Tree-walking evaluator
//!
//! Every property touch on a context's global object goes through
//! [`Interpreter::lookup`], [`Interpreter::set_property`],
//! [`Interpreter::has_property`], [`Interpreter::delete_property`] and
//! [`Interpreter::own_enumerable_keys`]. Those are the only places that
//! consult a global's [`PropertyHandler`](crate::PropertyHandler) and
//! [`AccessCheck`](crate::AccessCheck).

use crate::ast::*;
use crate::builtins::{ErrorKind, Intrinsics};
use crate::engine::{Engine, Realm, RuntimeLimits};
use crate::error::Exception;
use crate::object::{
    AccessType, Function, GlobalHooks, ObjectKind, ObjectRef, PropertyCallbackInfo,
};
use crate::value::{PropertyKey, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

pub type JsResult<T> = Result<T, Exception>;

/// A script function: its syntax, the scope it closes over and the
/// context it was created in.
pub struct Closure {
    node: Rc<FunctionNode>,
    env: Env,
    realm: Weak<Realm>,
}

impl Closure {
    pub fn name(&self) -> &str {
        self.node.name.as_deref().unwrap_or("")
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Default)]
struct Scope {
    bindings: HashMap<Rc<str>, Binding>,
    parent: Option<Env>,
}

/// Lexical environment. Uninitialized `let`/`const` bindings hold
/// [`Value::Hole`].
#[derive(Clone, Default)]
pub(crate) struct Env(Rc<RefCell<Scope>>);

impl Env {
    fn child(parent: &Env) -> Env {
        Env(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    fn declare(&self, name: Rc<str>, value: Value, mutable: bool) {
        self.0
            .borrow_mut()
            .bindings
            .insert(name, Binding { value, mutable });
    }

    fn has_own(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// The innermost scope that binds `name`.
    fn find(&self, name: &str) -> Option<Env> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            if env.has_own(name) {
                return Some(env);
            }
            current = env.0.borrow().parent.clone();
        }
        None
    }

    fn binding(&self, name: &str) -> Option<(Value, bool)> {
        self.0
            .borrow()
            .bindings
            .get(name)
            .map(|b| (b.value.clone(), b.mutable))
    }

    fn assign(&self, name: &str, value: Value) {
        if let Some(binding) = self.0.borrow_mut().bindings.get_mut(name) {
            binding.value = value;
        }
    }

    pub(crate) fn clear(&self) {
        let mut scope = self.0.borrow_mut();
        scope.bindings.clear();
        scope.parent = None;
    }
}

enum Completion {
    Normal(Option<Value>),
    Return(Value),
    Break,
    Continue,
}

/// Evaluation state for one run of a compiled script.
///
/// Host functions receive the interpreter so they can read and write
/// properties, call back into script code and raise exceptions.
pub struct Interpreter<'e> {
    engine: &'e Engine,
    realm: Rc<Realm>,
    env: Env,
    this: Value,
    steps: u64,
    depth: usize,
    limits: RuntimeLimits,
}

impl<'e> Interpreter<'e> {
    pub(crate) fn new(engine: &'e Engine, realm: Rc<Realm>, limits: RuntimeLimits) -> Self {
        let env = realm.script_scope.clone();
        let this = Value::Object(realm.global.clone());
        Self {
            engine,
            realm,
            env,
            this,
            steps: 0,
            depth: 0,
            limits,
        }
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }

    /// The global object of the context the running code belongs to.
    pub fn global(&self) -> ObjectRef {
        self.realm.global.clone()
    }

    pub(crate) fn intrinsics(&self) -> &Intrinsics {
        &self.realm.intrinsics
    }

    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::new(
            ObjectKind::Ordinary,
            Some(self.intrinsics().object_prototype.clone()),
        )
    }

    pub fn new_array(&self, elements: Vec<Value>) -> ObjectRef {
        ObjectRef::new(
            ObjectKind::Array(elements),
            Some(self.intrinsics().array_prototype.clone()),
        )
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Exception {
        let error = ObjectRef::new(
            ObjectKind::Error,
            Some(self.intrinsics().error_prototype(kind).clone()),
        );
        let message: String = message.into();
        error.define_own(PropertyKey::from("message"), Value::from(message), false);
        Exception::new(Value::Object(error))
    }

    pub fn type_error(&self, message: impl Into<String>) -> Exception {
        self.error(ErrorKind::TypeError, message)
    }

    pub fn range_error(&self, message: impl Into<String>) -> Exception {
        self.error(ErrorKind::RangeError, message)
    }

    fn reference_error(&self, message: impl Into<String>) -> Exception {
        self.error(ErrorKind::ReferenceError, message)
    }

    /// Validates a requested array length against the language rules and
    /// the configured limit.
    pub fn check_array_length(&self, len: f64) -> JsResult<usize> {
        let limit = match self.limits.max_array_length {
            0 => u32::MAX as usize,
            limit => limit.min(u32::MAX as usize),
        };
        if len < 0.0 || len.fract() != 0.0 || len > limit as f64 {
            return Err(self.range_error("Invalid array length"));
        }
        Ok(len as usize)
    }

    /// Fails when a string of `len` bytes would exceed the configured limit.
    pub fn check_string_length(&self, len: usize) -> JsResult<()> {
        let limit = self.limits.max_string_length;
        if limit != 0 && len > limit {
            return Err(self.range_error("Invalid string length"));
        }
        Ok(())
    }

    fn tick(&mut self) -> JsResult<()> {
        self.steps += 1;
        if self.limits.max_steps != 0 && self.steps > self.limits.max_steps {
            let error = self.range_error("Script execution exceeded the step limit");
            return Err(Exception::terminating(error.into_value()));
        }
        Ok(())
    }

    // Entry point

    pub(crate) fn run_script(&mut self, program: &Program) -> JsResult<Value> {
        self.hoist_declarations(&program.body, true)?;
        match self.exec_statements(&program.body)? {
            Completion::Normal(Some(value)) if !value.is_hole() => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    // Property dispatch

    fn check_access(
        &self,
        hooks: &GlobalHooks,
        key: &PropertyKey,
        access: AccessType,
    ) -> JsResult<()> {
        match &hooks.access_check {
            Some(check) if !check.check(key, access) => Err(self.type_error(format!(
                "Access denied to global property '{}'",
                key
            ))),
            _ => Ok(()),
        }
    }

    /// Property lookup along the prototype chain. `None` means "not found".
    pub fn lookup(&mut self, obj: &ObjectRef, key: &PropertyKey) -> JsResult<Option<Value>> {
        if let Some(hooks) = obj.global_hooks() {
            self.check_access(&hooks, key, AccessType::Get)?;
            if let Some(handler) = &hooks.handler {
                if let Some(value) = handler.getter(key, &PropertyCallbackInfo::new(obj)) {
                    if !value.is_hole() {
                        return Ok(Some(value));
                    }
                }
                return Ok(obj.prototype().and_then(|proto| proto.lookup_real(key)));
            }
        }
        Ok(obj.lookup_real(key))
    }

    pub fn get_property(&mut self, obj: &ObjectRef, key: &PropertyKey) -> JsResult<Value> {
        Ok(self.lookup(obj, key)?.unwrap_or_default())
    }

    pub fn set_property(&mut self, obj: &ObjectRef, key: PropertyKey, value: Value) -> JsResult<()> {
        if let Some(hooks) = obj.global_hooks() {
            self.check_access(&hooks, &key, AccessType::Set)?;
            if let Some(handler) = &hooks.handler {
                if handler.setter(&key, value.clone(), &PropertyCallbackInfo::new(obj)) {
                    return Ok(());
                }
            }
        }
        if obj.is_array() {
            match &key {
                PropertyKey::Index(i) => {
                    self.check_array_length(f64::from(*i) + 1.0)?;
                }
                PropertyKey::Name(n) if &**n == "length" => {
                    self.check_array_length(value.to_number())?;
                }
                _ => {}
            }
        }
        obj.set_own(key, value);
        Ok(())
    }

    pub fn has_property(&mut self, obj: &ObjectRef, key: &PropertyKey) -> JsResult<bool> {
        if let Some(hooks) = obj.global_hooks() {
            self.check_access(&hooks, key, AccessType::Has)?;
            if let Some(handler) = &hooks.handler {
                if handler.query(key, &PropertyCallbackInfo::new(obj)) {
                    return Ok(true);
                }
                return Ok(obj
                    .prototype()
                    .is_some_and(|proto| proto.lookup_real(key).is_some()));
            }
        }
        Ok(obj.lookup_real(key).is_some())
    }

    /// Own-property existence, as `hasOwnProperty` sees it.
    pub fn has_own_property(&mut self, obj: &ObjectRef, key: &PropertyKey) -> JsResult<bool> {
        if let Some(hooks) = obj.global_hooks() {
            self.check_access(&hooks, key, AccessType::Has)?;
            if let Some(handler) = &hooks.handler {
                return Ok(handler.query(key, &PropertyCallbackInfo::new(obj)));
            }
        }
        Ok(obj.has_own(key))
    }

    pub fn delete_property(&mut self, obj: &ObjectRef, key: &PropertyKey) -> JsResult<bool> {
        if let Some(hooks) = obj.global_hooks() {
            self.check_access(&hooks, key, AccessType::Delete)?;
            if let Some(handler) = &hooks.handler {
                return Ok(handler.deleter(key, &PropertyCallbackInfo::new(obj)));
            }
        }
        if obj.is_array() && key.as_name() == Some("length") {
            return Ok(false);
        }
        obj.delete_own(key);
        Ok(true)
    }

    /// Own enumerable keys. For a virtualized global this is whatever the
    /// handler enumerates, minus keys the access check hides.
    pub fn own_enumerable_keys(&mut self, obj: &ObjectRef) -> JsResult<Vec<PropertyKey>> {
        if let Some(hooks) = obj.global_hooks() {
            if let Some(handler) = &hooks.handler {
                let keys = handler.enumerator(&PropertyCallbackInfo::new(obj));
                return Ok(match &hooks.access_check {
                    Some(check) => keys
                        .into_iter()
                        .filter(|key| check.check(key, AccessType::Get))
                        .collect(),
                    None => keys,
                });
            }
        }
        Ok(obj.own_keys(true))
    }

    fn get_value(&mut self, base: &Value, key: &PropertyKey) -> JsResult<Value> {
        let proto = match base {
            Value::Object(obj) => return self.get_property(obj, key),
            Value::String(s) => {
                match key {
                    PropertyKey::Index(i) => {
                        return Ok(s
                            .chars()
                            .nth(*i as usize)
                            .map(|c| Value::from(c.to_string()))
                            .unwrap_or_default());
                    }
                    PropertyKey::Name(n) if &**n == "length" => {
                        return Ok(Value::Number(s.chars().count() as f64));
                    }
                    _ => {}
                }
                self.intrinsics().string_prototype.clone()
            }
            Value::Number(_) => self.intrinsics().number_prototype.clone(),
            Value::Bool(_) => self.intrinsics().boolean_prototype.clone(),
            Value::Undefined | Value::Null | Value::Hole => {
                return Err(self.type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    base.to_display_string(),
                    key
                )));
            }
        };
        Ok(proto.lookup_real(key).unwrap_or_default())
    }

    fn put_value(&mut self, base: &Value, key: PropertyKey, value: Value) -> JsResult<()> {
        match base {
            Value::Object(obj) => self.set_property(obj, key, value),
            Value::Undefined | Value::Null | Value::Hole => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                base.to_display_string(),
                key
            ))),
            // Writes to primitives are dropped.
            _ => Ok(()),
        }
    }

    // Identifier resolution

    fn read_identifier(&mut self, name: &Rc<str>, for_typeof: bool) -> JsResult<Value> {
        if let Some(scope) = self.env.find(name) {
            let (value, _) = scope.binding(name).unwrap_or_default();
            if value.is_hole() {
                return Err(self.reference_error(format!(
                    "Cannot access '{}' before initialization",
                    name
                )));
            }
            return Ok(value);
        }
        let global = self.global();
        match self.lookup(&global, &PropertyKey::from(&**name))? {
            Some(value) => Ok(value),
            None if for_typeof => Ok(Value::Undefined),
            None => Err(self.reference_error(format!("{} is not defined", name))),
        }
    }

    fn write_identifier(&mut self, name: &Rc<str>, value: Value) -> JsResult<()> {
        if let Some(scope) = self.env.find(name) {
            let (current, mutable) = scope.binding(name).unwrap_or_default();
            if current.is_hole() {
                return Err(self.reference_error(format!(
                    "Cannot access '{}' before initialization",
                    name
                )));
            }
            if !mutable {
                return Err(self.type_error("Assignment to constant variable."));
            }
            scope.assign(name, value);
            return Ok(());
        }
        let global = self.global();
        self.set_property(&global, PropertyKey::from(&**name), value)
    }

    // Functions

    fn make_closure(&self, node: &Rc<FunctionNode>, env: Env) -> Value {
        let closure = Rc::new(Closure {
            node: node.clone(),
            env,
            realm: Rc::downgrade(&self.realm),
        });
        let intrinsics = self.intrinsics();
        let function = ObjectRef::new(
            ObjectKind::Function(Function::Script(closure)),
            Some(intrinsics.function_prototype.clone()),
        );
        let prototype = self.new_object();
        function.define_own(
            PropertyKey::from("prototype"),
            Value::Object(prototype),
            false,
        );
        Value::Object(function)
    }

    /// Named function expressions see their own name.
    fn function_expression(&self, node: &Rc<FunctionNode>) -> Value {
        match &node.name {
            Some(name) => {
                let scope = Env::child(&self.env);
                let function = self.make_closure(node, scope.clone());
                scope.declare(name.clone(), function.clone(), false);
                function
            }
            None => self.make_closure(node, self.env.clone()),
        }
    }

    pub fn call_function(&mut self, callee: &Value, this: Value, args: &[Value]) -> JsResult<Value> {
        let function = callee.as_object().and_then(ObjectRef::function);
        match function {
            Some(Function::Native(native)) => (native.call)(self, &this, args),
            Some(Function::Script(closure)) => self.call_closure(&closure, this, args),
            None => Err(self.type_error(format!(
                "{} is not a function",
                callee.to_display_string()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: Value, args: &[Value]) -> JsResult<Value> {
        let realm = closure.realm.upgrade().ok_or_else(|| {
            self.type_error("Cannot call a function whose context has been disposed")
        })?;
        if self.limits.max_call_depth != 0 && self.depth >= self.limits.max_call_depth {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }
        let node = &closure.node;
        let scope = Env::child(&closure.env);
        for (i, param) in node.params.iter().enumerate() {
            scope.declare(param.clone(), args.get(i).cloned().unwrap_or_default(), true);
        }
        for name in var_names(&node.body) {
            if !scope.has_own(&name) {
                scope.declare(name, Value::Undefined, true);
            }
        }
        let this = if this.is_nullish() {
            Value::Object(realm.global.clone())
        } else {
            this
        };
        let saved_realm = std::mem::replace(&mut self.realm, realm);
        let saved_env = std::mem::replace(&mut self.env, scope);
        let saved_this = std::mem::replace(&mut self.this, this);
        self.depth += 1;
        let result = self
            .hoist_declarations(&node.body, false)
            .and_then(|_| self.exec_statements(&node.body));
        self.depth -= 1;
        self.this = saved_this;
        self.env = saved_env;
        self.realm = saved_realm;
        match result? {
            Completion::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    fn construct(&mut self, callee: &Value, callee_expr: &Expr, args: &[Value]) -> JsResult<Value> {
        let Some(function) = callee.as_object().filter(|o| o.is_callable()) else {
            return Err(self.type_error(format!("{} is not a constructor", describe(callee_expr))));
        };
        let prototype = match self.get_property(function, &PropertyKey::from("prototype"))? {
            Value::Object(proto) => proto,
            _ => self.intrinsics().object_prototype.clone(),
        };
        let instance = ObjectRef::new(ObjectKind::Ordinary, Some(prototype));
        let result = self.call_function(callee, Value::Object(instance.clone()), args)?;
        Ok(if result.is_object() {
            result
        } else {
            Value::Object(instance)
        })
    }

    // Statements

    /// Hoists `let`/`const` (as uninitialized) and function declarations.
    /// At the top level `var` and function declarations become properties
    /// of the global object and lexical names go to the script scope.
    fn hoist_declarations(&mut self, body: &[Stmt], top_level: bool) -> JsResult<()> {
        if top_level {
            let global = self.global();
            for name in var_names(body) {
                let key = PropertyKey::from(&*name);
                if !self.has_property(&global, &key)? {
                    self.set_property(&global, key, Value::Undefined)?;
                }
            }
        }
        for stmt in body {
            match stmt {
                Stmt::Var(decl) if decl.kind != VarKind::Var => {
                    for d in &decl.declarations {
                        if top_level && self.env.has_own(&d.name) {
                            return Err(self.error(
                                ErrorKind::SyntaxError,
                                format!("Identifier '{}' has already been declared", d.name),
                            ));
                        }
                        self.env
                            .declare(d.name.clone(), Value::Hole, decl.kind == VarKind::Let);
                    }
                }
                Stmt::Function(node) => {
                    let Some(name) = &node.name else { continue };
                    let function = self.make_closure(node, self.env.clone());
                    if top_level {
                        let global = self.global();
                        self.set_property(&global, PropertyKey::from(&**name), function)?;
                    } else {
                        self.env.declare(name.clone(), function, true);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn exec_statements(&mut self, body: &[Stmt]) -> JsResult<Completion> {
        let mut last = None;
        for stmt in body {
            match self.exec(stmt)? {
                Completion::Normal(Some(value)) => last = Some(value),
                Completion::Normal(None) => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal(last))
    }

    fn in_scope<T>(&mut self, scope: Env, f: impl FnOnce(&mut Self) -> JsResult<T>) -> JsResult<T> {
        let saved = std::mem::replace(&mut self.env, scope);
        let result = f(self);
        self.env = saved;
        result
    }

    fn exec_block(&mut self, body: &[Stmt]) -> JsResult<Completion> {
        let scope = Env::child(&self.env);
        self.in_scope(scope, |this| {
            this.hoist_declarations(body, false)?;
            this.exec_statements(body)
        })
    }

    fn exec(&mut self, stmt: &Stmt) -> JsResult<Completion> {
        self.tick()?;
        match stmt {
            Stmt::Empty | Stmt::Function(_) => Ok(Completion::Normal(None)),
            Stmt::Expr(expr) => Ok(Completion::Normal(Some(self.eval(expr)?))),
            Stmt::Var(decl) => {
                self.declare_variables(decl)?;
                Ok(Completion::Normal(None))
            }
            Stmt::Block(body) => self.exec_block(body),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.to_boolean() {
                    self.exec(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate)
                } else {
                    Ok(Completion::Normal(None))
                }
            }
            Stmt::While { test, body } => {
                let mut last = None;
                while self.eval(test)?.to_boolean() {
                    match self.exec(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal(Some(value)) => last = Some(value),
                        Completion::Normal(None) | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal(last))
            }
            Stmt::DoWhile { body, test } => {
                let mut last = None;
                loop {
                    match self.exec(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal(Some(value)) => last = Some(value),
                        Completion::Normal(None) | Completion::Continue => {}
                    }
                    if !self.eval(test)?.to_boolean() {
                        break;
                    }
                }
                Ok(Completion::Normal(last))
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = Env::child(&self.env);
                self.in_scope(scope, |this| this.exec_for(init, test, update, body))
            }
            Stmt::ForIn { left, right, body } => self.exec_for_in(left, right, body),
            Stmt::Return(argument) => {
                let value = match argument {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr)?;
                Err(Exception::new(value))
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => self.exec_try(block, handler.as_ref(), finalizer.as_deref()),
        }
    }

    fn declare_variables(&mut self, decl: &VarDecl) -> JsResult<()> {
        for d in &decl.declarations {
            match decl.kind {
                VarKind::Var => {
                    if let Some(init) = &d.init {
                        let value = self.eval(init)?;
                        self.write_identifier(&d.name, value)?;
                    }
                }
                VarKind::Let | VarKind::Const => {
                    let value = match &d.init {
                        Some(init) => self.eval(init)?,
                        None => Value::Undefined,
                    };
                    self.env
                        .declare(d.name.clone(), value, decl.kind == VarKind::Let);
                }
            }
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        init: &Option<ForInit>,
        test: &Option<Expr>,
        update: &Option<Expr>,
        body: &Stmt,
    ) -> JsResult<Completion> {
        match init {
            Some(ForInit::Var(decl)) => self.declare_variables(decl)?,
            Some(ForInit::Expr(expr)) => {
                self.eval(expr)?;
            }
            None => {}
        }
        let mut last = None;
        loop {
            if let Some(test) = test {
                if !self.eval(test)?.to_boolean() {
                    break;
                }
            }
            match self.exec(body)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal(Some(value)) => last = Some(value),
                Completion::Normal(None) | Completion::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update)?;
            }
        }
        Ok(Completion::Normal(last))
    }

    fn for_in_keys(&mut self, value: &Value) -> JsResult<Vec<PropertyKey>> {
        match value {
            Value::Object(obj) => {
                let mut keys = self.own_enumerable_keys(obj)?;
                let mut proto = obj.prototype();
                while let Some(p) = proto {
                    for key in p.own_keys(true) {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                    proto = p.prototype();
                }
                Ok(keys)
            }
            Value::String(s) => Ok((0..s.chars().count() as u32)
                .map(PropertyKey::Index)
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn exec_for_in(&mut self, left: &ForInLeft, right: &Expr, body: &Stmt) -> JsResult<Completion> {
        let object = self.eval(right)?;
        let keys = self.for_in_keys(&object)?;
        let mut last = None;
        for key in keys {
            let key = key.to_value();
            let completion = match left {
                ForInLeft::Declaration(VarKind::Var, name) => {
                    self.write_identifier(name, key)?;
                    self.exec(body)?
                }
                ForInLeft::Declaration(kind, name) => {
                    let scope = Env::child(&self.env);
                    scope.declare(name.clone(), key, *kind == VarKind::Let);
                    self.in_scope(scope, |this| this.exec(body))?
                }
                ForInLeft::Target(target) => {
                    self.assign_to(target, key)?;
                    self.exec(body)?
                }
            };
            match completion {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal(Some(value)) => last = Some(value),
                Completion::Normal(None) | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal(last))
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        handler: Option<&CatchClause>,
        finalizer: Option<&[Stmt]>,
    ) -> JsResult<Completion> {
        let mut result = self.exec_block(block);
        let caught = match (&result, handler) {
            (Err(exception), Some(handler)) if exception.is_catchable() => {
                Some((exception.value().clone(), handler))
            }
            _ => None,
        };
        if let Some((thrown, handler)) = caught {
            let scope = Env::child(&self.env);
            if let Some(param) = &handler.param {
                scope.declare(param.clone(), thrown, true);
            }
            result = self.in_scope(scope, |this| this.exec_block(&handler.body));
        }
        if let Some(finalizer) = finalizer {
            // An uncatchable exception skips `finally` as well.
            if result.as_ref().err().map_or(true, Exception::is_catchable) {
                match self.exec_block(finalizer)? {
                    Completion::Normal(_) => {}
                    abrupt => return Ok(abrupt),
                }
            }
        }
        result
    }

    // Expressions

    fn property_key(&mut self, key: &MemberKey) -> JsResult<PropertyKey> {
        match key {
            MemberKey::Static(name) => Ok(PropertyKey::from(&**name)),
            MemberKey::Computed(expr) => Ok(self.eval(expr)?.to_property_key()),
        }
    }

    fn assign_to(&mut self, target: &Expr, value: Value) -> JsResult<()> {
        match target {
            Expr::Ident(name) => self.write_identifier(name, value),
            Expr::Member { object, property } => {
                let base = self.eval(object)?;
                let key = self.property_key(property)?;
                self.put_value(&base, key, value)
            }
            _ => Err(self.reference_error("Invalid left-hand side in assignment")),
        }
    }

    fn eval(&mut self, expr: &Expr) -> JsResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::This => Ok(self.this.clone()),
            Expr::Ident(name) => self.read_identifier(name, false),
            Expr::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(match element {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Hole,
                    });
                }
                Ok(Value::Object(self.new_array(values)))
            }
            Expr::Object(properties) => {
                let obj = self.new_object();
                for (name, value) in properties {
                    let key = match name {
                        PropName::Static(name) => PropertyKey::from(&**name),
                        PropName::Computed(expr) => self.eval(expr)?.to_property_key(),
                    };
                    let value = self.eval(value)?;
                    obj.set_own(key, value);
                }
                Ok(Value::Object(obj))
            }
            Expr::Function(node) => Ok(self.function_expression(node)),
            Expr::Member { object, property } => {
                let base = self.eval(object)?;
                let key = self.property_key(property)?;
                self.get_value(&base, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            Expr::New { callee, args } => {
                let function = self.eval(callee)?;
                let args = self.eval_args(args)?;
                self.construct(&function, callee, &args)
            }
            Expr::Unary { op, arg } => self.eval_unary(*op, arg),
            Expr::Update { op, prefix, target } => {
                let old = self.eval(target)?.to_number();
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.assign_to(target, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.to_boolean(),
                    LogicalOp::Or => left.to_boolean(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.to_boolean() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value),
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> JsResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> JsResult<Value> {
        let (function, this) = match callee {
            Expr::Member { object, property } => {
                let base = self.eval(object)?;
                let key = self.property_key(property)?;
                (self.get_value(&base, &key)?, base)
            }
            _ => (self.eval(callee)?, Value::Undefined),
        };
        let args = self.eval_args(args)?;
        if !function.is_callable() {
            return Err(self.type_error(format!("{} is not a function", describe(callee))));
        }
        self.call_function(&function, this, &args)
    }

    fn eval_assign(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr) -> JsResult<Value> {
        let value = match (op, target) {
            (None, _) => self.eval(value)?,
            (Some(op), Expr::Member { object, property }) => {
                // Evaluate the base and key once for compound assignment.
                let base = self.eval(object)?;
                let key = self.property_key(property)?;
                let current = self.get_value(&base, &key)?;
                let rhs = self.eval(value)?;
                let result = self.binary(op, &current, &rhs)?;
                self.put_value(&base, key, result.clone())?;
                return Ok(result);
            }
            (Some(op), _) => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                self.binary(op, &current, &rhs)?
            }
        };
        self.assign_to(target, value.clone())?;
        Ok(value)
    }

    fn eval_unary(&mut self, op: UnaryOp, arg: &Expr) -> JsResult<Value> {
        match op {
            UnaryOp::TypeOf => {
                let value = match arg {
                    Expr::Ident(name) => self.read_identifier(name, true)?,
                    _ => self.eval(arg)?,
                };
                Ok(Value::from(value.type_of()))
            }
            UnaryOp::Delete => self.eval_delete(arg),
            UnaryOp::Void => {
                self.eval(arg)?;
                Ok(Value::Undefined)
            }
            UnaryOp::Not => Ok(Value::Bool(!self.eval(arg)?.to_boolean())),
            UnaryOp::Minus => Ok(Value::Number(-self.eval(arg)?.to_number())),
            UnaryOp::Plus => Ok(Value::Number(self.eval(arg)?.to_number())),
            UnaryOp::BitNot => Ok(Value::Number(!self.eval(arg)?.to_int32() as f64)),
        }
    }

    fn eval_delete(&mut self, arg: &Expr) -> JsResult<Value> {
        match arg {
            Expr::Ident(name) => {
                // Declared bindings are not deletable.
                if self.env.find(name).is_some() {
                    return Ok(Value::Bool(false));
                }
                let global = self.global();
                let deleted = self.delete_property(&global, &PropertyKey::from(&**name))?;
                Ok(Value::Bool(deleted))
            }
            Expr::Member { object, property } => {
                let base = self.eval(object)?;
                let key = self.property_key(property)?;
                match &base {
                    Value::Object(obj) => Ok(Value::Bool(self.delete_property(obj, &key)?)),
                    Value::Undefined | Value::Null | Value::Hole => Err(self.type_error(format!(
                        "Cannot convert undefined or null to object (deleting '{}')",
                        key
                    ))),
                    _ => Ok(Value::Bool(true)),
                }
            }
            other => {
                self.eval(other)?;
                Ok(Value::Bool(true))
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> JsResult<Value> {
        let number = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
        Ok(match op {
            BinaryOp::Add => {
                let (l, r) = (to_primitive(left), to_primitive(right));
                if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                    let (l, r) = (l.to_display_string(), r.to_display_string());
                    self.check_string_length(l.len() + r.len())?;
                    Value::from(l + &r)
                } else {
                    Value::Number(l.to_number() + r.to_number())
                }
            }
            BinaryOp::Sub => number(|a, b| a - b),
            BinaryOp::Mul => number(|a, b| a * b),
            BinaryOp::Div => number(|a, b| a / b),
            BinaryOp::Rem => number(|a, b| a % b),
            BinaryOp::Exp => number(f64::powf),
            BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt => Value::Bool(less_than(left, right) == Some(true)),
            BinaryOp::Gt => Value::Bool(less_than(right, left) == Some(true)),
            BinaryOp::LtEq => Value::Bool(less_than(right, left) == Some(false)),
            BinaryOp::GtEq => Value::Bool(less_than(left, right) == Some(false)),
            BinaryOp::BitAnd => Value::Number((left.to_int32() & right.to_int32()) as f64),
            BinaryOp::BitOr => Value::Number((left.to_int32() | right.to_int32()) as f64),
            BinaryOp::BitXor => Value::Number((left.to_int32() ^ right.to_int32()) as f64),
            BinaryOp::Shl => {
                Value::Number(left.to_int32().wrapping_shl(right.to_uint32() & 31) as f64)
            }
            BinaryOp::Shr => Value::Number((left.to_int32() >> (right.to_uint32() & 31)) as f64),
            BinaryOp::UShr => {
                Value::Number((left.to_uint32() >> (right.to_uint32() & 31)) as f64)
            }
            BinaryOp::In => {
                let Value::Object(obj) = right else {
                    return Err(self.type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        left.to_display_string(),
                        right.to_display_string()
                    )));
                };
                Value::Bool(self.has_property(obj, &left.to_property_key())?)
            }
            BinaryOp::InstanceOf => Value::Bool(self.instance_of(left, right)?),
        })
    }

    fn instance_of(&mut self, value: &Value, constructor: &Value) -> JsResult<bool> {
        let Some(constructor) = constructor.as_object().filter(|c| c.is_callable()) else {
            return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
        };
        let Value::Object(prototype) = self.get_property(constructor, &PropertyKey::from("prototype"))?
        else {
            return Ok(false);
        };
        let mut current = value.as_object().and_then(ObjectRef::prototype);
        while let Some(obj) = current {
            if obj.ptr_eq(&prototype) {
                return Ok(true);
            }
            current = obj.prototype();
        }
        Ok(false)
    }
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::from(value.to_display_string()),
        other => other.clone(),
    }
}

/// Abstract relational comparison; `None` when either side is NaN.
fn less_than(left: &Value, right: &Value) -> Option<bool> {
    let (l, r) = (to_primitive(left), to_primitive(right));
    if let (Value::String(a), Value::String(b)) = (&l, &r) {
        return Some(a < b);
    }
    let (a, b) = (l.to_number(), r.to_number());
    if a.is_nan() || b.is_nan() {
        None
    } else {
        Some(a < b)
    }
}

/// Source-like rendering of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object,
            property: MemberKey::Static(name),
        } => format!("{}.{}", describe(object), name),
        Expr::Member { object, .. } => format!("{}[...]", describe(object)),
        _ => "(intermediate value)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Engine, RuntimeLimits};
    use crate::error::ExecuteError;
    use crate::value::Value;

    fn eval(source: &str) -> Value {
        let engine = Engine::new();
        let script = engine.compile(source, "test.js").unwrap();
        engine.execute(&script).unwrap()
    }

    fn eval_err(source: &str) -> String {
        let engine = Engine::new();
        let script = engine.compile(source, "test.js").unwrap();
        match engine.execute(&script) {
            Err(ExecuteError::Thrown(exception)) => exception.message().to_string(),
            other => panic!("expected exception, got {:?}", other.map(|v| v.to_display_string())),
        }
    }

    #[test]
    fn test_arithmetic_and_completion_value() {
        assert_eq!(eval("x = 1; y = x + 41;").as_number(), Some(42.0));
        assert_eq!(eval("2 ** 10 - 7 % 4").as_number(), Some(1021.0));
        assert_eq!(eval("'a' + 1 + 2").as_str(), Some("a12"));
        assert_eq!(eval("-7 >>> 28").as_number(), Some(15.0));
    }

    #[test]
    fn test_functions_and_closures() {
        let source = "
            function counter() {
                var n = 0;
                return function () { n += 1; return n; };
            }
            var next = counter();
            next(); next(); next()
        ";
        assert_eq!(eval(source).as_number(), Some(3.0));
    }

    #[test]
    fn test_function_hoisting() {
        assert_eq!(eval("f(); function f() { return 7 }").as_number(), Some(7.0));
    }

    #[test]
    fn test_let_tdz_and_const() {
        assert_eq!(
            eval_err("{ a; let a = 1; }"),
            "ReferenceError: Cannot access 'a' before initialization"
        );
        assert_eq!(
            eval_err("const c = 1; c = 2;"),
            "TypeError: Assignment to constant variable."
        );
    }

    #[test]
    fn test_undeclared_identifier() {
        assert_eq!(eval_err("missing + 1"), "ReferenceError: missing is not defined");
        assert_eq!(eval("typeof missing").as_str(), Some("undefined"));
    }

    #[test]
    fn test_try_catch_finally() {
        let source = "
            var log = [];
            try { throw new TypeError('bad'); }
            catch (e) { log.push(e.name, e.message, e instanceof TypeError, e instanceof Error); }
            finally { log.push('done'); }
            log.join(',')
        ";
        assert_eq!(eval(source).as_str(), Some("TypeError,bad,true,true,done"));
    }

    #[test]
    fn test_loops() {
        let source = "
            var total = 0;
            for (var i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; total += i; }
            var j = 0;
            do { j++; } while (j < 5);
            while (j > 0) j--;
            total + j
        ";
        assert_eq!(eval(source).as_number(), Some(12.0));
    }

    #[test]
    fn test_for_in_over_object() {
        let source = "
            var o = {b: 1, a: 2, 1: 3}, keys = [];
            for (var k in o) keys.push(k);
            keys.join()
        ";
        assert_eq!(eval(source).as_str(), Some("1,b,a"));
    }

    #[test]
    fn test_constructors_and_this() {
        let source = "
            function Point(x, y) { this.x = x; this.y = y; }
            var p = new Point(3, 4);
            p.x * p.y
        ";
        assert_eq!(eval(source).as_number(), Some(12.0));
    }

    #[test]
    fn test_calling_non_function() {
        assert_eq!(
            eval_err("var o = {}; o.nope()"),
            "TypeError: o.nope is not a function"
        );
        assert_eq!(
            eval_err("var u; u.x"),
            "TypeError: Cannot read properties of undefined (reading 'x')"
        );
    }

    #[test]
    fn test_step_limit_is_uncatchable() {
        let engine = Engine::with_limits(RuntimeLimits {
            max_steps: 1_000,
            max_call_depth: 16,
            ..RuntimeLimits::default()
        });
        let script = engine
            .compile("try { while (true) {} } catch (e) { 'caught' }", "loop.js")
            .unwrap();
        match engine.execute(&script) {
            Err(ExecuteError::Thrown(exception)) => {
                assert!(!exception.is_catchable());
                assert!(exception.message().starts_with("RangeError"));
            }
            other => panic!("expected step limit, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_huge_array_lengths_throw() {
        assert_eq!(
            eval_err("var a = []; a[4294967294] = 1; a.length"),
            "RangeError: Invalid array length"
        );
        assert_eq!(
            eval_err("new Array(4294967295).length"),
            "RangeError: Invalid array length"
        );
        assert_eq!(
            eval_err("var a = []; a.length = 4000000000"),
            "RangeError: Invalid array length"
        );
        assert_eq!(
            eval_err("var a = []; a.length = 1e300"),
            "RangeError: Invalid array length"
        );
        assert_eq!(eval_err("[].length = -1"), "RangeError: Invalid array length");
        assert_eq!(
            eval("try { new Array(1e9) } catch (e) { e.message }").as_str(),
            Some("Invalid array length")
        );
    }

    #[test]
    fn test_configured_array_and_string_limits() {
        let engine = Engine::with_limits(RuntimeLimits {
            max_array_length: 8,
            max_string_length: 16,
            ..RuntimeLimits::default()
        });
        let run = |source: &str| -> Result<Value, String> {
            let script = engine.compile(source, "limits.js").unwrap();
            engine.execute(&script).map_err(|err| match err {
                ExecuteError::Thrown(exception) => exception.message().to_string(),
                other => other.to_string(),
            })
        };

        assert_eq!(run("var a = []; a[7] = 1; a.length").unwrap().as_number(), Some(8.0));
        assert_eq!(run("var a = []; a[8] = 1").unwrap_err(), "RangeError: Invalid array length");
        assert_eq!(run("Array(9)").unwrap_err(), "RangeError: Invalid array length");
        assert_eq!(
            run("var a = [1, 2, 3, 4, 5]; a.push.apply(a, a)").unwrap_err(),
            "RangeError: Invalid array length"
        );
        assert_eq!(run("'abcd'.split('').length").unwrap().as_number(), Some(4.0));
        assert_eq!(
            run("'abcdefghij'.split('')").unwrap_err(),
            "RangeError: Invalid array length"
        );

        assert_eq!(run("'0123456789' + '012345'").unwrap().as_str(), Some("0123456789012345"));
        assert_eq!(
            run("var s = 'ab'; while (true) s += s;").unwrap_err(),
            "RangeError: Invalid string length"
        );
        assert_eq!(
            run("['aaaaaa', 'bbbbbb', 'cccccc'].join('')").unwrap_err(),
            "RangeError: Invalid string length"
        );
        assert_eq!(
            run("JSON.stringify({key: 'valuevalue'})").unwrap_err(),
            "RangeError: Invalid string length"
        );
    }

    #[test]
    fn test_string_doubling_stops_at_default_limit() {
        assert_eq!(
            eval("var s = 'x'; try { while (true) s = s + s; } catch (e) { e.message + ' at ' + s.length }")
                .as_str(),
            Some("Invalid string length at 16777216")
        );
    }

    #[test]
    fn test_call_depth_limit_is_catchable() {
        let engine = Engine::with_limits(RuntimeLimits {
            max_steps: 0,
            max_call_depth: 16,
            ..RuntimeLimits::default()
        });
        let script = engine
            .compile(
                "function f() { return f(); } try { f() } catch (e) { e.message }",
                "deep.js",
            )
            .unwrap();
        let result = engine.execute(&script).unwrap();
        assert_eq!(result.as_str(), Some("Maximum call stack size exceeded"));
    }

    #[test]
    fn test_delete_and_in() {
        let source = "
            var o = {a: 1};
            var before = 'a' in o;
            delete o.a;
            [before, 'a' in o].join()
        ";
        assert_eq!(eval(source).as_str(), Some("true,false"));
    }
}
