//! Script values and property keys

use crate::object::{ObjectKind, ObjectRef};
use std::fmt;
use std::rc::Rc;

/// A script value.
///
/// `Hole` is the engine's internal "no value here" marker. It fills array
/// holes and lexical bindings that have not been initialized yet. It must
/// never be handed to host code as if it were a property value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
    Hole,
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_hole(&self) -> bool {
        matches!(self, Value::Hole)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Object(o) if o.is_callable())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined | Value::Hole => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(o) if o.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Hole => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Hole => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Object(_) => string_to_number(&self.to_display_string()),
        }
    }

    pub fn to_int32(&self) -> i32 {
        let n = self.to_number();
        if !n.is_finite() {
            return 0;
        }
        let modulo = n.trunc().rem_euclid(4_294_967_296.0);
        modulo as u32 as i32
    }

    pub fn to_uint32(&self) -> u32 {
        self.to_int32() as u32
    }

    /// String conversion without running script code. Objects render
    /// through their kind: arrays join their elements, errors render as
    /// `Name: message`, everything else as `[object Class]`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined | Value::Hole => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(o) => object_to_string(o, &mut Vec::new()),
        }
    }

    pub fn to_property_key(&self) -> PropertyKey {
        match self {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 => {
                PropertyKey::Index(*n as u32)
            }
            Value::String(s) => PropertyKey::from(&**s),
            other => PropertyKey::from(other.to_display_string().as_str()),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Hole, Value::Undefined | Value::Hole) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Value::Object(_), _) => Value::string(self.to_display_string()).loose_equals(other),
            (_, Value::Object(_)) => self.loose_equals(&Value::string(other.to_display_string())),
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "{:?}", o),
            Value::Hole => f.write_str("<hole>"),
            other => f.write_str(&other.to_display_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

/// Property name: an array index or a string name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Index(u32),
    Name(Rc<str>),
}

impl PropertyKey {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            PropertyKey::Name(n) => Some(n),
            PropertyKey::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<u32> {
        match self {
            PropertyKey::Index(i) => Some(*i),
            PropertyKey::Name(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::string(self.to_string())
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        match s.parse::<u32>() {
            Ok(i) if i != u32::MAX && i.to_string() == s => PropertyKey::Index(i),
            _ => PropertyKey::Name(Rc::from(s)),
        }
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        PropertyKey::from(s.as_str())
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        PropertyKey::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Index(i) => write!(f, "{}", i),
            PropertyKey::Name(n) => f.write_str(n),
        }
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if n.fract() == 0.0 && abs < 1e21 {
        return format!("{:.0}", n);
    }
    if abs >= 1e21 || abs < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }
    format!("{}", n)
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust accepts "inf"/"nan" spellings the language does not
    if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Arrays nested deeper than this render as empty.
const MAX_RENDER_DEPTH: usize = 256;

/// Array rendering stops adding elements past this many bytes.
const MAX_RENDER_LENGTH: usize = 1 << 24;

fn object_to_string(obj: &ObjectRef, seen: &mut Vec<ObjectRef>) -> String {
    if seen.len() >= MAX_RENDER_DEPTH || seen.iter().any(|s| s.ptr_eq(obj)) {
        return String::new();
    }
    enum Shape {
        Array(Vec<Value>),
        Function(String),
        Error,
        Other,
    }
    let shape = match &obj.borrow().kind {
        ObjectKind::Array(elements) => Shape::Array(elements.clone()),
        ObjectKind::Function(func) => Shape::Function(func.name().to_string()),
        ObjectKind::Error => Shape::Error,
        _ => Shape::Other,
    };
    match shape {
        Shape::Array(elements) => {
            seen.push(obj.clone());
            let mut rendered = String::new();
            for (i, element) in elements.iter().enumerate() {
                if rendered.len() > MAX_RENDER_LENGTH {
                    break;
                }
                if i > 0 {
                    rendered.push(',');
                }
                match element {
                    Value::Undefined | Value::Null | Value::Hole => {}
                    Value::Object(o) => rendered.push_str(&object_to_string(o, seen)),
                    other => rendered.push_str(&other.to_display_string()),
                }
            }
            seen.pop();
            rendered
        }
        Shape::Function(name) => format!("function {}() {{ [code] }}", name),
        Shape::Error => {
            let name = obj
                .lookup_real(&PropertyKey::from("name"))
                .map(|v| v.to_display_string())
                .unwrap_or_else(|| "Error".to_string());
            let message = obj
                .lookup_real(&PropertyKey::from("message"))
                .map(|v| v.to_display_string())
                .unwrap_or_default();
            if message.is_empty() {
                name
            } else {
                format!("{}: {}", name, message)
            }
        }
        Shape::Other => format!("[object {}]", obj.class_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(Value::from("  12 ").to_number(), 12.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert_eq!(Value::from("0x1f").to_number(), 31.0);
        assert!(Value::from("inf").to_number().is_nan());
        assert!(Value::from("abc").to_number().is_nan());
    }

    #[test]
    fn test_index_keys_are_canonical() {
        assert_eq!(PropertyKey::from("7"), PropertyKey::Index(7));
        assert!(matches!(PropertyKey::from("07"), PropertyKey::Name(_)));
        assert!(matches!(PropertyKey::from("-1"), PropertyKey::Name(_)));
        assert_eq!(Value::Number(3.0).to_property_key(), PropertyKey::Index(3));
        assert!(matches!(Value::Number(1.5).to_property_key(), PropertyKey::Name(_)));
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_hole_is_falsy_and_undefined_typed() {
        assert!(!Value::Hole.to_boolean());
        assert_eq!(Value::Hole.type_of(), "undefined");
    }

    #[test]
    fn test_array_rendering_is_bounded() {
        let mut nested = Value::from(7);
        for _ in 0..10_000 {
            nested = Value::Object(ObjectRef::new(ObjectKind::Array(vec![nested]), None));
        }
        assert_eq!(nested.to_display_string(), "");

        let mut shared = Value::from("ab");
        for _ in 0..40 {
            let pair = ObjectRef::new(ObjectKind::Array(vec![shared.clone(), shared]), None);
            shared = Value::Object(pair);
        }
        let rendered = shared.to_display_string();
        assert!(rendered.len() > MAX_RENDER_LENGTH);
        assert!(rendered.len() < 4 * MAX_RENDER_LENGTH);
        assert!(rendered.starts_with("ab,ab,ab"));
    }
}
