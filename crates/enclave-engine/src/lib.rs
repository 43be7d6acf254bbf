//! Enclave Engine - Embeddable script interpreter
//!
//! This crate provides:
//! - A tree-walking interpreter for a JavaScript subset
//! - Multiple execution contexts per engine, each with its own global
//!   object and built-ins
//! - Scoped context activation
//! - Global objects whose property access can be routed to host code

#![forbid(unsafe_code)]

mod ast;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod json;
mod lexer;
pub mod object;
mod parser;
pub mod value;

pub use builtins::{ErrorKind, GLOBAL_NAMES};
pub use engine::{CompiledScript, ContextId, ContextScope, Engine, GlobalTemplate, RuntimeLimits};
pub use error::{EngineError, Exception, ExecuteError, SyntaxDiagnostic};
pub use interpreter::{Interpreter, JsResult};
pub use json::{JsonError, to_json, to_json_lossy};
pub use parser::MAX_NESTING_DEPTH;
pub use object::{
    AccessCheck, AccessType, ObjectKind, ObjectRef, PropertyCallbackInfo, PropertyHandler,
};
pub use value::{PropertyKey, Value};
