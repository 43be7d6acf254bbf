//! Engine error types

use crate::object::ObjectKind;
use crate::value::{PropertyKey, Value};
use std::fmt;
use thiserror::Error;

/// Errors from engine bookkeeping (not from running script code).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unknown context: {0}")]
    UnknownContext(u64),

    #[error("Context {0} has been disposed")]
    ContextDisposed(u64),
}

/// Compilation diagnostic for source text that failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{origin}:{line}:{column}: {message}")]
pub struct SyntaxDiagnostic {
    pub message: String,
    pub origin: String,
    pub line: usize,
    pub column: usize,
}

/// A value thrown by script code (or by the engine on its behalf).
#[derive(Clone)]
pub struct Exception {
    value: Value,
    message: String,
    uncatchable: bool,
}

impl Exception {
    pub fn new(value: Value) -> Self {
        let message = describe(&value);
        Self {
            value,
            message,
            uncatchable: false,
        }
    }

    /// An exception `try`/`catch` cannot intercept. Raised when a run
    /// exhausts its step budget.
    pub(crate) fn terminating(value: Value) -> Self {
        Self {
            uncatchable: true,
            ..Self::new(value)
        }
    }

    /// The thrown value, exactly as thrown.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Rendered form: `Name: message` for error objects, the string
    /// conversion otherwise.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_catchable(&self) -> bool {
        !self.uncatchable
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("message", &self.message)
            .field("catchable", &!self.uncatchable)
            .finish()
    }
}

impl std::error::Error for Exception {}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Error) => {
            value.to_display_string()
        }
        Value::Object(obj) => match obj.lookup_real(&PropertyKey::from("message")) {
            Some(message) if !message.is_undefined() => message.to_display_string(),
            _ => value.to_display_string(),
        },
        Value::String(s) => s.to_string(),
        other => other.to_display_string(),
    }
}

/// Error from running a compiled script.
#[derive(Error, Debug, Clone)]
pub enum ExecuteError {
    #[error("{0}")]
    Thrown(Exception),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_exception_message() {
        let exc = Exception::new(Value::from("boom"));
        assert_eq!(exc.message(), "boom");
        assert!(exc.is_catchable());
        assert_eq!(exc.value().as_str(), Some("boom"));
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = SyntaxDiagnostic {
            message: "Unexpected token '}'".to_string(),
            origin: "evalmachine.<anonymous>".to_string(),
            line: 3,
            column: 7,
        };
        assert_eq!(
            diag.to_string(),
            "evalmachine.<anonymous>:3:7: Unexpected token '}'"
        );
    }
}
