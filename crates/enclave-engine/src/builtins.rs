//! Built-in objects installed into every context
//!
//! Built-ins live as non-enumerable real properties of the global object,
//! so a virtualized global sees them only through its handler's fallback
//! reads and never through enumeration.

use crate::interpreter::{Interpreter, JsResult};
use crate::json;
use crate::object::{Function, NativeFunction, ObjectKind, ObjectRef};
use crate::value::{PropertyKey, Value};
use std::rc::Rc;

/// Names of the global bindings every context starts with.
pub const GLOBAL_NAMES: &[&str] = &[
    "undefined",
    "NaN",
    "Infinity",
    "Object",
    "Array",
    "Math",
    "JSON",
    "String",
    "Number",
    "Boolean",
    "parseInt",
    "parseFloat",
    "isNaN",
    "Error",
    "TypeError",
    "ReferenceError",
    "RangeError",
    "SyntaxError",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    SyntaxError,
}

impl ErrorKind {
    const ALL: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::ReferenceError,
        ErrorKind::RangeError,
        ErrorKind::SyntaxError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::SyntaxError => "SyntaxError",
        }
    }
}

/// Per-context prototype objects.
pub(crate) struct Intrinsics {
    pub object_prototype: ObjectRef,
    pub function_prototype: ObjectRef,
    pub array_prototype: ObjectRef,
    pub string_prototype: ObjectRef,
    pub number_prototype: ObjectRef,
    pub boolean_prototype: ObjectRef,
    error_prototypes: Vec<ObjectRef>,
}

impl Intrinsics {
    pub fn new() -> Self {
        let object_prototype = ObjectRef::plain();
        let derived = || ObjectRef::new(ObjectKind::Ordinary, Some(object_prototype.clone()));
        let function_prototype = derived();
        let array_prototype = derived();
        let string_prototype = derived();
        let number_prototype = derived();
        let boolean_prototype = derived();

        let base_error = derived();
        let error_prototypes = ErrorKind::ALL
            .iter()
            .map(|kind| {
                let proto = match kind {
                    ErrorKind::Error => base_error.clone(),
                    _ => ObjectRef::new(ObjectKind::Ordinary, Some(base_error.clone())),
                };
                proto.define_own(PropertyKey::from("name"), Value::from(kind.name()), false);
                proto.define_own(PropertyKey::from("message"), Value::from(""), false);
                proto
            })
            .collect();

        let intrinsics = Self {
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            error_prototypes,
        };
        intrinsics.install_prototype_methods();
        intrinsics
    }

    pub fn error_prototype(&self, kind: ErrorKind) -> &ObjectRef {
        &self.error_prototypes[kind as usize]
    }

    fn all(&self) -> impl Iterator<Item = &ObjectRef> {
        [
            &self.object_prototype,
            &self.function_prototype,
            &self.array_prototype,
            &self.string_prototype,
            &self.number_prototype,
            &self.boolean_prototype,
        ]
        .into_iter()
        .chain(self.error_prototypes.iter())
    }

    /// Breaks the prototype/constructor cycles of a torn-down context.
    pub fn clear(&self) {
        for proto in self.all() {
            proto.clear();
        }
    }

    fn native(
        &self,
        name: &str,
        call: impl Fn(&mut Interpreter<'_>, &Value, &[Value]) -> JsResult<Value> + 'static,
    ) -> ObjectRef {
        ObjectRef::new(
            ObjectKind::Function(Function::Native(NativeFunction {
                name: Rc::from(name),
                call: Rc::new(call),
            })),
            Some(self.function_prototype.clone()),
        )
    }

    fn method(
        &self,
        target: &ObjectRef,
        name: &str,
        call: impl Fn(&mut Interpreter<'_>, &Value, &[Value]) -> JsResult<Value> + 'static,
    ) {
        let function = self.native(name, call);
        target.define_own(PropertyKey::from(name), Value::Object(function), false);
    }

    /// A constructor linked both ways with its prototype.
    fn constructor(
        &self,
        name: &str,
        prototype: &ObjectRef,
        call: impl Fn(&mut Interpreter<'_>, &Value, &[Value]) -> JsResult<Value> + 'static,
    ) -> ObjectRef {
        let function = self.native(name, call);
        function.define_own(
            PropertyKey::from("prototype"),
            Value::Object(prototype.clone()),
            false,
        );
        prototype.define_own(
            PropertyKey::from("constructor"),
            Value::Object(function.clone()),
            false,
        );
        function
    }

    fn install_prototype_methods(&self) {
        let object = &self.object_prototype;
        self.method(object, "hasOwnProperty", object_has_own_property);
        self.method(object, "toString", object_to_string);

        let function = &self.function_prototype;
        self.method(function, "call", function_call);
        self.method(function, "apply", function_apply);

        let array = &self.array_prototype;
        self.method(array, "push", array_push);
        self.method(array, "pop", array_pop);
        self.method(array, "join", array_join);
        self.method(array, "indexOf", array_index_of);
        self.method(array, "slice", array_slice);

        let string = &self.string_prototype;
        self.method(string, "charAt", string_char_at);
        self.method(string, "indexOf", string_index_of);
        self.method(string, "slice", string_slice);
        self.method(string, "toUpperCase", |_: &mut Interpreter<'_>, this: &Value, _: &[Value]| {
            Ok(Value::from(this_string(this).to_uppercase()))
        });
        self.method(string, "toLowerCase", |_: &mut Interpreter<'_>, this: &Value, _: &[Value]| {
            Ok(Value::from(this_string(this).to_lowercase()))
        });
        self.method(string, "trim", |_: &mut Interpreter<'_>, this: &Value, _: &[Value]| {
            Ok(Value::from(this_string(this).trim()))
        });
        self.method(string, "split", string_split);
        self.method(string, "toString", |_: &mut Interpreter<'_>, this: &Value, _: &[Value]| {
            Ok(Value::from(this_string(this)))
        });

        self.method(&self.number_prototype, "toString", primitive_to_string);
        self.method(&self.boolean_prototype, "toString", primitive_to_string);
        self.method(self.error_prototype(ErrorKind::Error), "toString", error_to_string);
    }
}

/// Installs the global bindings on a fresh context's global object.
pub(crate) fn install(global: &ObjectRef, intrinsics: &Intrinsics) {
    let define = |name: &str, value: Value| global.define_own(PropertyKey::from(name), value, false);

    define("undefined", Value::Undefined);
    define("NaN", Value::Number(f64::NAN));
    define("Infinity", Value::Number(f64::INFINITY));

    let object = intrinsics.constructor("Object", &intrinsics.object_prototype, object_ctor);
    intrinsics.method(&object, "keys", object_keys);
    define("Object", Value::Object(object));

    let array = intrinsics.constructor("Array", &intrinsics.array_prototype, array_ctor);
    intrinsics.method(&array, "isArray", |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
        Ok(Value::Bool(arg(args, 0).as_object().is_some_and(ObjectRef::is_array)))
    });
    define("Array", Value::Object(array));

    let string = intrinsics.constructor(
        "String",
        &intrinsics.string_prototype,
        |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
            Ok(match args.first() {
                Some(value) => Value::from(value.to_display_string()),
                None => Value::from(""),
            })
        },
    );
    define("String", Value::Object(string));

    let number = intrinsics.constructor(
        "Number",
        &intrinsics.number_prototype,
        |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
        },
    );
    define("Number", Value::Object(number));

    let boolean = intrinsics.constructor(
        "Boolean",
        &intrinsics.boolean_prototype,
        |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
            Ok(Value::Bool(arg(args, 0).to_boolean()))
        },
    );
    define("Boolean", Value::Object(boolean));

    define("parseInt", Value::Object(intrinsics.native("parseInt", parse_int)));
    define("parseFloat", Value::Object(intrinsics.native("parseFloat", parse_float)));
    define(
        "isNaN",
        Value::Object(intrinsics.native(
            "isNaN",
            |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
                Ok(Value::Bool(arg(args, 0).to_number().is_nan()))
            },
        )),
    );

    define("Math", Value::Object(math(intrinsics)));

    let json = ObjectRef::new(
        ObjectKind::Ordinary,
        Some(intrinsics.object_prototype.clone()),
    );
    intrinsics.method(&json, "stringify", json_stringify);
    intrinsics.method(&json, "parse", json_parse);
    define("JSON", Value::Object(json));

    for kind in ErrorKind::ALL {
        let ctor = intrinsics.constructor(
            kind.name(),
            intrinsics.error_prototype(kind),
            move |interp: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
                let message = match args.first() {
                    Some(value) if !value.is_undefined() => value.to_display_string(),
                    _ => String::new(),
                };
                let error = interp.error(kind, message);
                Ok(error.into_value())
            },
        );
        define(kind.name(), Value::Object(ctor));
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn this_object(interp: &Interpreter<'_>, this: &Value, method: &str) -> JsResult<ObjectRef> {
    this.as_object().cloned().ok_or_else(|| {
        interp.type_error(format!(
            "{} called on non-object {}",
            method,
            this.to_display_string()
        ))
    })
}

fn this_string(this: &Value) -> String {
    this.to_display_string()
}

/// Resolves a relative index the way `slice` does.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

// Object

fn object_ctor(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    match args.first() {
        Some(value @ Value::Object(_)) => Ok(value.clone()),
        _ => Ok(Value::Object(interp.new_object())),
    }
}

fn object_keys(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    let keys = match args.first() {
        Some(Value::Object(obj)) => interp.own_enumerable_keys(obj)?,
        Some(Value::String(s)) => (0..s.chars().count() as u32)
            .map(PropertyKey::Index)
            .collect(),
        None | Some(Value::Undefined | Value::Null | Value::Hole) => {
            return Err(interp.type_error("Cannot convert undefined or null to object"));
        }
        Some(_) => Vec::new(),
    };
    let values = keys.iter().map(PropertyKey::to_value).collect();
    Ok(Value::Object(interp.new_array(values)))
}

fn object_has_own_property(
    interp: &mut Interpreter<'_>,
    this: &Value,
    args: &[Value],
) -> JsResult<Value> {
    let key = arg(args, 0).to_property_key();
    match this {
        Value::Object(obj) => Ok(Value::Bool(interp.has_own_property(obj, &key)?)),
        Value::String(s) => Ok(Value::Bool(match key {
            PropertyKey::Index(i) => (i as usize) < s.chars().count(),
            PropertyKey::Name(n) => &*n == "length",
        })),
        _ => Ok(Value::Bool(false)),
    }
}

fn object_to_string(_: &mut Interpreter<'_>, this: &Value, _: &[Value]) -> JsResult<Value> {
    let class = match this {
        Value::Undefined | Value::Hole => "Undefined".to_string(),
        Value::Null => "Null".to_string(),
        Value::Bool(_) => "Boolean".to_string(),
        Value::Number(_) => "Number".to_string(),
        Value::String(_) => "String".to_string(),
        Value::Object(obj) => obj.class_name(),
    };
    Ok(Value::from(format!("[object {}]", class)))
}

// Function

fn function_call(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let receiver = arg(args, 0);
    let rest = args.get(1..).unwrap_or(&[]);
    interp.call_function(this, receiver, rest)
}

fn function_apply(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let receiver = arg(args, 0);
    let list = match args.get(1) {
        None | Some(Value::Undefined | Value::Null) => Vec::new(),
        Some(Value::Object(obj)) if obj.is_array() => obj
            .array_elements()
            .unwrap_or_default()
            .into_iter()
            .map(|v| if v.is_hole() { Value::Undefined } else { v })
            .collect(),
        Some(_) => return Err(interp.type_error("CreateListFromArrayLike called on non-object")),
    };
    interp.call_function(this, receiver, &list)
}

// Array

fn array_ctor(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    if let [Value::Number(n)] = args {
        let len = interp.check_array_length(*n)?;
        return Ok(Value::Object(interp.new_array(vec![Value::Hole; len])));
    }
    Ok(Value::Object(interp.new_array(args.to_vec())))
}

fn with_elements<T>(
    interp: &Interpreter<'_>,
    this: &Value,
    method: &str,
    f: impl FnOnce(&mut Vec<Value>) -> T,
) -> JsResult<T> {
    let obj = this_object(interp, this, method)?;
    let mut borrowed = obj.borrow_mut();
    match &mut borrowed.kind {
        ObjectKind::Array(elements) => Ok(f(elements)),
        _ => Err(interp.type_error(format!("{} called on non-array", method))),
    }
}

fn array_push(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let len = with_elements(interp, this, "Array.prototype.push", |elements| elements.len())?;
    interp.check_array_length((len + args.len()) as f64)?;
    let len = with_elements(interp, this, "Array.prototype.push", |elements| {
        elements.extend(args.iter().cloned());
        elements.len()
    })?;
    Ok(Value::Number(len as f64))
}

fn array_pop(interp: &mut Interpreter<'_>, this: &Value, _: &[Value]) -> JsResult<Value> {
    let last = with_elements(interp, this, "Array.prototype.pop", Vec::pop)?;
    Ok(match last {
        Some(value) if !value.is_hole() => value,
        _ => Value::Undefined,
    })
}

fn array_join(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let separator = match args.first() {
        None | Some(Value::Undefined) => ",".to_string(),
        Some(value) => value.to_display_string(),
    };
    let elements = with_elements(interp, this, "Array.prototype.join", |e| e.clone())?;
    let mut joined = String::new();
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            interp.check_string_length(joined.len() + separator.len())?;
            joined.push_str(&separator);
        }
        if !matches!(element, Value::Undefined | Value::Null | Value::Hole) {
            let part = element.to_display_string();
            interp.check_string_length(joined.len() + part.len())?;
            joined.push_str(&part);
        }
    }
    Ok(Value::from(joined))
}

fn array_index_of(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let needle = arg(args, 0);
    let elements = with_elements(interp, this, "Array.prototype.indexOf", |e| e.clone())?;
    let start = relative_index(&arg(args, 1), elements.len(), 0);
    let found = elements
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, v)| !v.is_hole() && v.strict_equals(&needle))
        .map_or(-1.0, |(i, _)| i as f64);
    Ok(Value::Number(found))
}

fn array_slice(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let elements = with_elements(interp, this, "Array.prototype.slice", |e| e.clone())?;
    let len = elements.len();
    let start = relative_index(&arg(args, 0), len, 0);
    let end = relative_index(&arg(args, 1), len, len);
    let slice = if start < end {
        elements[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::Object(interp.new_array(slice)))
}

// String

fn string_char_at(_: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let s = this_string(this);
    let index = arg(args, 0).to_number();
    let index = if index.is_nan() { 0.0 } else { index.trunc() };
    let c = if index < 0.0 {
        None
    } else {
        s.chars().nth(index as usize)
    };
    Ok(Value::from(c.map(String::from).unwrap_or_default()))
}

fn string_index_of(_: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let haystack: Vec<char> = this_string(this).chars().collect();
    let needle: Vec<char> = arg(args, 0).to_display_string().chars().collect();
    let start = relative_index(&arg(args, 1), haystack.len(), 0);
    if needle.is_empty() {
        return Ok(Value::Number(start as f64));
    }
    let found = (start..haystack.len())
        .find(|&i| haystack[i..].starts_with(&needle))
        .map_or(-1.0, |i| i as f64);
    Ok(Value::Number(found))
}

fn string_slice(_: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let chars: Vec<char> = this_string(this).chars().collect();
    let len = chars.len();
    let start = relative_index(&arg(args, 0), len, 0);
    let end = relative_index(&arg(args, 1), len, len);
    let slice: String = if start < end {
        chars[start..end].iter().collect()
    } else {
        String::new()
    };
    Ok(Value::from(slice))
}

fn string_split(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> JsResult<Value> {
    let s = this_string(this);
    let parts: Vec<Value> = match args.first() {
        None | Some(Value::Undefined) => vec![Value::from(s)],
        Some(separator) => {
            let separator = separator.to_display_string();
            let pieces = if separator.is_empty() {
                s.chars().count()
            } else {
                s.matches(separator.as_str()).count() + 1
            };
            interp.check_array_length(pieces as f64)?;
            if separator.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).map(Value::from).collect()
            }
        }
    };
    Ok(Value::Object(interp.new_array(parts)))
}

fn primitive_to_string(_: &mut Interpreter<'_>, this: &Value, _: &[Value]) -> JsResult<Value> {
    Ok(Value::from(this.to_display_string()))
}

// Number parsing

fn parse_int(_: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    let text = arg(args, 0).to_display_string();
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    let mut radix = arg(args, 1).to_int32();
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let mut result: Option<f64> = None;
    for c in s.chars() {
        let Some(digit) = c.to_digit(radix as u32) else {
            break;
        };
        result = Some(result.unwrap_or(0.0) * radix as f64 + digit as f64);
    }
    Ok(Value::Number(match result {
        Some(n) if negative => -n,
        Some(n) => n,
        None => f64::NAN,
    }))
}

fn parse_float(_: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    let text = arg(args, 0).to_display_string();
    let s = text.trim_start();
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.starts_with("Infinity") {
        let sign = if s.starts_with('-') { -1.0 } else { 1.0 };
        return Ok(Value::Number(sign * f64::INFINITY));
    }
    // Longest prefix that parses as a decimal literal.
    let bytes = s.as_bytes();
    let mut end = usize::from(s.len() > unsigned.len());
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut best = None;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            b'e' | b'E' if seen_digit => {
                let mut exp_end = end + 1;
                if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
                    exp_end += 1;
                }
                let digits = bytes[exp_end..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits > 0 {
                    best = Some(exp_end + digits);
                }
                break;
            }
            _ => break,
        }
        end += 1;
        if seen_digit {
            best = Some(end);
        }
    }
    let value = best
        .and_then(|end| s[..end].parse::<f64>().ok())
        .unwrap_or(f64::NAN);
    Ok(Value::Number(value))
}

// Math

fn math(intrinsics: &Intrinsics) -> ObjectRef {
    let math = ObjectRef::new(
        ObjectKind::Ordinary,
        Some(intrinsics.object_prototype.clone()),
    );
    math.define_own(PropertyKey::from("PI"), Value::Number(std::f64::consts::PI), false);

    let unary: [(&str, fn(f64) -> f64); 5] = [
        ("abs", f64::abs),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("sqrt", f64::sqrt),
        ("round", |x| (x + 0.5).floor()),
    ];
    for (name, f) in unary {
        intrinsics.method(&math, name, move |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
            Ok(Value::Number(f(arg(args, 0).to_number())))
        });
    }
    intrinsics.method(&math, "pow", |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
        Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
    });
    intrinsics.method(&math, "max", |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
        Ok(Value::Number(fold_numbers(args, f64::NEG_INFINITY, f64::max)))
    });
    intrinsics.method(&math, "min", |_: &mut Interpreter<'_>, _: &Value, args: &[Value]| {
        Ok(Value::Number(fold_numbers(args, f64::INFINITY, f64::min)))
    });
    math
}

fn fold_numbers(args: &[Value], init: f64, f: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = f(acc, n);
    }
    acc
}

// JSON

fn json_stringify(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    let converted = json::to_json(&arg(args, 0)).map_err(|e| match e {
        json::JsonError::Circular => interp.type_error(e.to_string()),
        json::JsonError::TooDeep | json::JsonError::TooLarge => interp.range_error(e.to_string()),
    })?;
    let Some(converted) = converted else {
        return Ok(Value::Undefined);
    };
    let pretty = match args.get(2) {
        Some(Value::Number(n)) => *n >= 1.0,
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    };
    let text = if pretty {
        serde_json::to_string_pretty(&converted)
    } else {
        serde_json::to_string(&converted)
    }
    .map_err(|e| interp.type_error(e.to_string()))?;
    interp.check_string_length(text.len())?;
    Ok(Value::from(text))
}

fn json_parse(interp: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    let text = arg(args, 0).to_display_string();
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| interp.error(ErrorKind::SyntaxError, format!("JSON.parse: {}", e)))?;
    Ok(json::from_json(&parsed, interp.intrinsics()))
}

// Error

fn error_to_string(interp: &mut Interpreter<'_>, this: &Value, _: &[Value]) -> JsResult<Value> {
    let obj = this_object(interp, this, "Error.prototype.toString")?;
    let name = match interp.get_property(&obj, &PropertyKey::from("name"))? {
        Value::Undefined => "Error".to_string(),
        other => other.to_display_string(),
    };
    let message = match interp.get_property(&obj, &PropertyKey::from("message"))? {
        Value::Undefined => String::new(),
        other => other.to_display_string(),
    };
    Ok(Value::from(match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => format!("{}: {}", name, message),
    }))
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::value::Value;

    fn eval(source: &str) -> Value {
        let engine = Engine::new();
        let script = engine.compile(source, "builtins.js").unwrap();
        engine.execute(&script).unwrap()
    }

    fn eval_str(source: &str) -> String {
        eval(source).to_display_string()
    }

    #[test]
    fn test_globals_are_not_enumerable() {
        assert_eq!(eval_str("var seen = []; for (var k in this) seen.push(k); seen.join()"), "seen,k");
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(eval_str("var a = [1, 2]; a.push(3, 4); a.pop(); a.join('-')"), "1-2-3");
        assert_eq!(eval_str("[1, 2, 3, 4].slice(1, -1).join()"), "2,3");
        assert_eq!(eval_str("[1, 2, 3].indexOf(3)"), "2");
        assert_eq!(eval_str("Array.isArray([]) && !Array.isArray({})"), "true");
        assert_eq!(eval_str("Array(3).length"), "3");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval_str("'Hello'.toUpperCase() + 'X'.toLowerCase()"), "HELLOx");
        assert_eq!(eval_str("'a,b,c'.split(',').length"), "3");
        assert_eq!(eval_str("'  pad  '.trim().length"), "3");
        assert_eq!(eval_str("'sandbox'.slice(-3)"), "box");
        assert_eq!(eval_str("'sandbox'.indexOf('d') + 'abc'.charAt(1)"), "3b");
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(eval_str("parseInt('42px') + parseInt('0x10')"), "58");
        assert_eq!(eval_str("parseFloat('3.5e1abc')"), "35");
        assert_eq!(eval_str("isNaN(parseInt('abc'))"), "true");
        assert_eq!(eval_str("Number('12') + Number(true)"), "13");
    }

    #[test]
    fn test_math() {
        assert_eq!(eval_str("Math.max(1, 7, 3) + Math.min(4, 2)"), "9");
        assert_eq!(eval_str("Math.round(2.5) + Math.floor(-1.5)"), "1");
        assert_eq!(eval_str("Math.pow(2, 8) + Math.sqrt(16)"), "260");
    }

    #[test]
    fn test_json() {
        assert_eq!(
            eval_str("JSON.stringify({a: [1, 'x', null], b: undefined, f: function () {}})"),
            r#"{"a":[1,"x",null]}"#
        );
        assert_eq!(eval_str("JSON.parse('{\"n\": [1, 2]}').n[1]"), "2");
        assert_eq!(
            eval_str("try { JSON.parse('{') } catch (e) { e.name }"),
            "SyntaxError"
        );
        assert_eq!(
            eval_str("var o = {}; o.o = o; try { JSON.stringify(o) } catch (e) { e.message }"),
            "Converting circular structure to JSON"
        );
    }

    #[test]
    fn test_object_builtins() {
        assert_eq!(eval_str("Object.keys({x: 1, y: 2}).join()"), "x,y");
        assert_eq!(eval_str("({a: 1}).hasOwnProperty('a')"), "true");
        assert_eq!(eval_str("Object.prototype.toString.call([])"), "[object Array]");
        assert_eq!(eval_str("Object.prototype.toString.call(null)"), "[object Null]");
    }

    #[test]
    fn test_function_call_and_apply() {
        let source = "
            function add(a, b) { return this.base + a + b; }
            add.call({base: 1}, 2, 3) + add.apply({base: 10}, [20, 30])
        ";
        assert_eq!(eval_str(source), "66");
    }

    #[test]
    fn test_error_to_string() {
        assert_eq!(eval_str("String(new RangeError('out'))"), "RangeError: out");
        assert_eq!(eval_str("new Error('plain').toString()"), "Error: plain");
    }
}
