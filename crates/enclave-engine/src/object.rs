//! Object model
//!
//! Objects are shared, interior-mutable property containers. The "real"
//! accessors on [`ObjectRef`] (`get_own`, `set_own`, `delete_own`, ...) work
//! on the object's own storage and never consult virtualization hooks. The
//! interpreter layers hook dispatch and prototype walks on top of them.

use crate::interpreter::{Closure, Interpreter, JsResult};
use crate::value::{PropertyKey, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Signature of host-implemented functions.
pub type NativeFn = Rc<dyn Fn(&mut Interpreter<'_>, &Value, &[Value]) -> JsResult<Value>>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: Rc<str>,
    pub call: NativeFn,
}

#[derive(Clone)]
pub enum Function {
    Script(Rc<Closure>),
    Native(NativeFunction),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Script(closure) => closure.name(),
            Function::Native(native) => &native.name,
        }
    }
}

/// The kind of access an intercepted property touch performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Get,
    Set,
    Has,
    Delete,
}

/// Information handed to every [`PropertyHandler`] callback.
pub struct PropertyCallbackInfo<'a> {
    holder: &'a ObjectRef,
}

impl<'a> PropertyCallbackInfo<'a> {
    pub(crate) fn new(holder: &'a ObjectRef) -> Self {
        Self { holder }
    }

    /// The global object the touched property belongs to. Its real
    /// properties hold the engine-installed built-ins.
    pub fn holder(&self) -> &ObjectRef {
        self.holder
    }
}

/// Global-object virtualization hooks.
///
/// When a context's global object carries a handler, every get, set,
/// existence check, delete and enumeration of a global property is routed
/// through it instead of the global object's own storage.
pub trait PropertyHandler {
    /// `None` means "not found"; lookup then continues with the prototype chain.
    fn getter(&self, key: &PropertyKey, info: &PropertyCallbackInfo<'_>) -> Option<Value>;

    /// Returns `false` when the handler declines the write; the engine then
    /// stores the value on the global object itself.
    fn setter(&self, key: &PropertyKey, value: Value, info: &PropertyCallbackInfo<'_>) -> bool;

    fn query(&self, key: &PropertyKey, info: &PropertyCallbackInfo<'_>) -> bool;

    fn deleter(&self, key: &PropertyKey, info: &PropertyCallbackInfo<'_>) -> bool;

    fn enumerator(&self, info: &PropertyCallbackInfo<'_>) -> Vec<PropertyKey>;
}

/// Access-check predicate evaluated before every intercepted touch.
pub trait AccessCheck {
    fn named(&self, name: &str, access: AccessType) -> bool;

    fn indexed(&self, index: u32, access: AccessType) -> bool;

    fn check(&self, key: &PropertyKey, access: AccessType) -> bool {
        match key {
            PropertyKey::Index(i) => self.indexed(*i, access),
            PropertyKey::Name(n) => self.named(n, access),
        }
    }
}

/// Hooks attached to a context's global object.
#[derive(Clone)]
pub struct GlobalHooks {
    pub class_name: Rc<str>,
    pub handler: Option<Rc<dyn PropertyHandler>>,
    pub access_check: Option<Rc<dyn AccessCheck>>,
}

pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(Function),
    Error,
    Global(GlobalHooks),
    /// Opaque host payload. Scripts see a plain object.
    Embedder(Rc<dyn Any>),
}

struct Slot {
    key: PropertyKey,
    value: Value,
    enumerable: bool,
}

/// Own properties in enumeration order: integer keys ascending, then
/// names in insertion order.
#[derive(Default)]
pub struct PropertyMap {
    slots: Vec<Slot>,
    index: HashMap<PropertyKey, usize>,
}

impl PropertyMap {
    fn get(&self, key: &PropertyKey) -> Option<&Slot> {
        self.index.get(key).map(|&i| &self.slots[i])
    }

    fn insert(&mut self, key: PropertyKey, value: Value, enumerable: Option<bool>) {
        if let Some(&i) = self.index.get(&key) {
            let slot = &mut self.slots[i];
            slot.value = value;
            if let Some(enumerable) = enumerable {
                slot.enumerable = enumerable;
            }
            return;
        }
        self.index.insert(key.clone(), self.slots.len());
        self.slots.push(Slot {
            key,
            value,
            enumerable: enumerable.unwrap_or(true),
        });
    }

    fn remove(&mut self, key: &PropertyKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        let slot = self.slots.remove(i);
        for later in &self.slots[i..] {
            if let Some(pos) = self.index.get_mut(&later.key) {
                *pos -= 1;
            }
        }
        Some(slot.value)
    }

    fn keys(&self, only_enumerable: bool) -> Vec<PropertyKey> {
        let visible = |s: &&Slot| (!only_enumerable || s.enumerable) && !s.value.is_hole();
        let mut indices: Vec<u32> = self
            .slots
            .iter()
            .filter(visible)
            .filter_map(|s| s.key.as_index())
            .collect();
        indices.sort_unstable();
        let mut keys: Vec<PropertyKey> = indices.into_iter().map(PropertyKey::Index).collect();
        keys.extend(
            self.slots
                .iter()
                .filter(visible)
                .filter(|s| s.key.as_name().is_some())
                .map(|s| s.key.clone()),
        );
        keys
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }
}

pub struct Object {
    pub kind: ObjectKind,
    pub prototype: Option<ObjectRef>,
    pub properties: PropertyMap,
}

impl Object {
    /// Moves out every object this one references through its properties,
    /// elements and prototype.
    fn take_children(&mut self, out: &mut Vec<ObjectRef>) {
        self.properties.index.clear();
        let slots = std::mem::take(&mut self.properties.slots);
        let elements = match &mut self.kind {
            ObjectKind::Array(elements) => std::mem::take(elements),
            _ => Vec::new(),
        };
        out.extend(
            slots
                .into_iter()
                .map(|slot| slot.value)
                .chain(elements)
                .filter_map(|value| match value {
                    Value::Object(obj) => Some(obj),
                    _ => None,
                }),
        );
        out.extend(self.prototype.take());
    }
}

// Long chains (`o = {next: o}` in a loop) are released with a work list so
// that dropping them does not recurse once per link.
impl Drop for Object {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(child) = pending.pop() {
            if let Ok(cell) = Rc::try_unwrap(child.0) {
                cell.into_inner().take_children(&mut pending);
            }
        }
    }
}

/// Shared handle to an object.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

/// Non-owning handle to an object.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<RefCell<Object>>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

const LENGTH: &str = "length";

impl ObjectRef {
    pub fn new(kind: ObjectKind, prototype: Option<ObjectRef>) -> Self {
        ObjectRef(Rc::new(RefCell::new(Object {
            kind,
            prototype,
            properties: PropertyMap::default(),
        })))
    }

    /// An ordinary object without a prototype.
    pub fn plain() -> Self {
        Self::new(ObjectKind::Ordinary, None)
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    pub fn prototype(&self) -> Option<ObjectRef> {
        self.borrow().prototype.clone()
    }

    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        self.borrow_mut().prototype = prototype;
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.borrow().kind, ObjectKind::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.borrow().kind, ObjectKind::Array(_))
    }

    pub fn function(&self) -> Option<Function> {
        match &self.borrow().kind {
            ObjectKind::Function(f) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn global_hooks(&self) -> Option<GlobalHooks> {
        match &self.borrow().kind {
            ObjectKind::Global(hooks) => Some(hooks.clone()),
            _ => None,
        }
    }

    pub fn embedder_data(&self) -> Option<Rc<dyn Any>> {
        match &self.borrow().kind {
            ObjectKind::Embedder(data) => Some(data.clone()),
            _ => None,
        }
    }

    /// The class reported by `Object.prototype.toString`.
    pub fn class_name(&self) -> String {
        match &self.borrow().kind {
            ObjectKind::Ordinary | ObjectKind::Embedder(_) => "Object".to_string(),
            ObjectKind::Array(_) => "Array".to_string(),
            ObjectKind::Function(_) => "Function".to_string(),
            ObjectKind::Error => "Error".to_string(),
            ObjectKind::Global(hooks) => hooks.class_name.to_string(),
        }
    }

    /// Own property lookup. Holes read as absent.
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        let obj = self.borrow();
        if let ObjectKind::Array(elements) = &obj.kind {
            match key {
                PropertyKey::Index(i) => {
                    return elements.get(*i as usize).filter(|v| !v.is_hole()).cloned();
                }
                PropertyKey::Name(n) if &**n == LENGTH => {
                    return Some(Value::Number(elements.len() as f64));
                }
                _ => {}
            }
        }
        obj.properties
            .get(key)
            .map(|slot| slot.value.clone())
            .filter(|v| !v.is_hole())
    }

    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.get_own(key).is_some()
    }

    /// Own lookup followed by the prototype chain, without hooks.
    pub fn lookup_real(&self, key: &PropertyKey) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some(v) = obj.get_own(key) {
                return Some(v);
            }
            current = obj.prototype();
        }
        None
    }

    /// Creates or overwrites an own property. New properties are enumerable;
    /// existing ones keep their enumerability.
    pub fn set_own(&self, key: PropertyKey, value: Value) {
        self.write_own(key, value, None);
    }

    /// Creates or overwrites an own property with explicit enumerability.
    pub fn define_own(&self, key: PropertyKey, value: Value, enumerable: bool) {
        self.write_own(key, value, Some(enumerable));
    }

    fn write_own(&self, key: PropertyKey, value: Value, enumerable: Option<bool>) {
        let mut obj = self.borrow_mut();
        if let ObjectKind::Array(elements) = &mut obj.kind {
            match &key {
                PropertyKey::Index(i) => {
                    let i = *i as usize;
                    if i >= elements.len() {
                        elements.resize(i + 1, Value::Hole);
                    }
                    elements[i] = value;
                    return;
                }
                PropertyKey::Name(n) if &**n == LENGTH => {
                    let len = value.to_number();
                    if len >= 0.0 && len.fract() == 0.0 && len <= f64::from(u32::MAX) {
                        elements.resize(len as usize, Value::Hole);
                    }
                    return;
                }
                _ => {}
            }
        }
        obj.properties.insert(key, value, enumerable);
    }

    /// Removes an own property. Returns whether something was removed.
    pub fn delete_own(&self, key: &PropertyKey) -> bool {
        let mut obj = self.borrow_mut();
        if let ObjectKind::Array(elements) = &mut obj.kind {
            match key {
                PropertyKey::Index(i) => {
                    return match elements.get_mut(*i as usize) {
                        Some(slot) if !slot.is_hole() => {
                            *slot = Value::Hole;
                            true
                        }
                        _ => false,
                    };
                }
                PropertyKey::Name(n) if &**n == LENGTH => return false,
                _ => {}
            }
        }
        match obj.properties.remove(key) {
            Some(v) => !v.is_hole(),
            None => false,
        }
    }

    /// Own property keys in enumeration order.
    pub fn own_keys(&self, only_enumerable: bool) -> Vec<PropertyKey> {
        let obj = self.borrow();
        let mut keys = Vec::new();
        if let ObjectKind::Array(elements) = &obj.kind {
            keys.extend(
                elements
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_hole())
                    .map(|(i, _)| PropertyKey::Index(i as u32)),
            );
        }
        keys.extend(obj.properties.keys(only_enumerable));
        if !only_enumerable && matches!(obj.kind, ObjectKind::Array(_)) {
            keys.push(PropertyKey::from(LENGTH));
        }
        keys
    }

    pub fn array_elements(&self) -> Option<Vec<Value>> {
        match &self.borrow().kind {
            ObjectKind::Array(elements) => Some(elements.clone()),
            _ => None,
        }
    }

    /// Drops every property and the prototype link. Used when a context is
    /// torn down so that reference cycles between built-ins are broken.
    pub fn clear(&self) {
        let mut obj = self.borrow_mut();
        obj.properties.clear();
        obj.prototype = None;
        if let ObjectKind::Array(elements) = &mut obj.kind {
            elements.clear();
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self.0.try_borrow() {
            Ok(obj) => match &obj.kind {
                ObjectKind::Function(func) => format!("[Function: {}]", func.name()),
                ObjectKind::Array(elements) => format!("[Array({})]", elements.len()),
                ObjectKind::Global(hooks) => format!("[object {}]", hooks.class_name),
                ObjectKind::Error => "[object Error]".to_string(),
                ObjectKind::Ordinary | ObjectKind::Embedder(_) => "[object Object]".to_string(),
            },
            Err(_) => "[object <borrowed>]".to_string(),
        };
        f.write_str(&rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_order() {
        let obj = ObjectRef::plain();
        obj.set_own(PropertyKey::from("b"), Value::from(1));
        obj.set_own(PropertyKey::from("2"), Value::from(2));
        obj.set_own(PropertyKey::from("a"), Value::from(3));
        obj.set_own(PropertyKey::from("0"), Value::from(4));
        let keys: Vec<String> = obj.own_keys(true).iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["0", "2", "b", "a"]);
    }

    #[test]
    fn test_delete_reports_presence() {
        let obj = ObjectRef::plain();
        obj.set_own(PropertyKey::from("x"), Value::from(1));
        assert!(obj.delete_own(&PropertyKey::from("x")));
        assert!(!obj.delete_own(&PropertyKey::from("x")));
        assert!(!obj.has_own(&PropertyKey::from("x")));
    }

    #[test]
    fn test_delete_keeps_index_consistent() {
        let obj = ObjectRef::plain();
        for name in ["a", "b", "c"] {
            obj.set_own(PropertyKey::from(name), Value::from(name));
        }
        obj.delete_own(&PropertyKey::from("a"));
        obj.set_own(PropertyKey::from("c"), Value::from("C"));
        assert_eq!(obj.get_own(&PropertyKey::from("c")).unwrap().to_display_string(), "C");
        assert_eq!(obj.get_own(&PropertyKey::from("b")).unwrap().to_display_string(), "b");
    }

    #[test]
    fn test_array_holes_read_as_absent() {
        let arr = ObjectRef::new(
            ObjectKind::Array(vec![Value::from(1), Value::Hole, Value::from(3)]),
            None,
        );
        assert!(arr.get_own(&PropertyKey::Index(1)).is_none());
        assert!(!arr.has_own(&PropertyKey::Index(1)));
        assert_eq!(arr.get_own(&PropertyKey::from("length")).unwrap().to_number(), 3.0);
        let keys: Vec<String> = arr.own_keys(true).iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["0", "2"]);
    }

    #[test]
    fn test_hole_slot_in_property_map_is_absent() {
        let obj = ObjectRef::plain();
        obj.set_own(PropertyKey::from("tdz"), Value::Hole);
        assert!(obj.get_own(&PropertyKey::from("tdz")).is_none());
        assert!(obj.own_keys(true).is_empty());
        assert!(!obj.delete_own(&PropertyKey::from("tdz")));
    }

    #[test]
    fn test_dropping_long_chains() {
        let mut head = ObjectRef::plain();
        for _ in 0..200_000 {
            let next = ObjectRef::plain();
            next.set_own(PropertyKey::from("next"), Value::Object(head));
            head = next;
        }
        drop(head);

        let mut nested = ObjectRef::plain();
        for _ in 0..200_000 {
            let elements = vec![Value::Object(nested)];
            nested = ObjectRef::new(ObjectKind::Array(elements), Some(ObjectRef::plain()));
        }
        drop(nested);

        let mut proto = ObjectRef::plain();
        for _ in 0..200_000 {
            proto = ObjectRef::new(ObjectKind::Ordinary, Some(proto));
        }
        drop(proto);
    }

    #[test]
    fn test_shared_children_survive_parent_drop() {
        let child = ObjectRef::plain();
        child.set_own(PropertyKey::from("v"), Value::from(1));
        let parent = ObjectRef::plain();
        parent.set_own(PropertyKey::from("c"), Value::Object(child.clone()));
        drop(parent);
        assert_eq!(child.get_own(&PropertyKey::from("v")).and_then(|v| v.as_number()), Some(1.0));
    }

    #[test]
    fn test_host_length_writes_ignore_invalid_lengths() {
        let arr = ObjectRef::new(ObjectKind::Array(vec![Value::from(1)]), None);
        arr.set_own(PropertyKey::from("length"), Value::Number(1e300));
        arr.set_own(PropertyKey::from("length"), Value::Number(-1.0));
        assert_eq!(arr.get_own(&PropertyKey::from("length")).unwrap().to_number(), 1.0);
    }

    #[test]
    fn test_non_enumerable_hidden_from_enumeration() {
        let obj = ObjectRef::plain();
        obj.define_own(PropertyKey::from("hidden"), Value::from(1), false);
        obj.set_own(PropertyKey::from("shown"), Value::from(2));
        obj.set_own(PropertyKey::from("hidden"), Value::from(3));
        assert_eq!(obj.own_keys(true).len(), 1);
        assert_eq!(obj.own_keys(false).len(), 2);
    }
}
