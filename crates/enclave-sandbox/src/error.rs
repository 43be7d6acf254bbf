//! Error taxonomy for sandbox operations

use enclave_engine::{EngineError, Exception, ExecuteError, SyntaxDiagnostic};
use thiserror::Error;

/// Failure to create a sandbox context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreationError {
    #[error("sandbox argument must be an object.")]
    InvalidSandbox,
}

/// Failure to compile source text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("SyntaxError: {0}")]
    SyntaxError(SyntaxDiagnostic),
}

impl From<SyntaxDiagnostic> for CompileError {
    fn from(diagnostic: SyntaxDiagnostic) -> Self {
        CompileError::SyntaxError(diagnostic)
    }
}

/// Failure to run a compiled script.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// The script threw. Carries the thrown value unchanged.
    #[error("Uncaught {0}")]
    ScriptException(Exception),

    #[error("Script has no compiled code")]
    NotCompiled,

    #[error("Run target is not a sandbox context")]
    InvalidTarget,

    #[error("Sandbox context has been disposed")]
    ContextDisposed,
}

impl RuntimeError {
    /// The thrown value, when the script threw.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            RuntimeError::ScriptException(exception) => Some(exception),
            _ => None,
        }
    }
}

impl From<EngineError> for RuntimeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ContextDisposed(_) => RuntimeError::ContextDisposed,
            EngineError::UnknownContext(_) => RuntimeError::InvalidTarget,
        }
    }
}

impl From<ExecuteError> for RuntimeError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Thrown(exception) => RuntimeError::ScriptException(exception),
            ExecuteError::Engine(err) => err.into(),
        }
    }
}

/// Errors from sandbox operations
#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    #[error(transparent)]
    Creation(#[from] CreationError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_engine::Value;

    #[test]
    fn test_engine_errors_map_to_runtime_errors() {
        assert!(matches!(
            RuntimeError::from(EngineError::ContextDisposed(3)),
            RuntimeError::ContextDisposed
        ));
        assert!(matches!(
            RuntimeError::from(EngineError::UnknownContext(3)),
            RuntimeError::InvalidTarget
        ));
    }

    #[test]
    fn test_thrown_value_is_preserved() {
        let err = RuntimeError::from(ExecuteError::Thrown(Exception::new(Value::from("boom"))));
        assert_eq!(err.exception().and_then(|e| e.value().as_str()), Some("boom"));
        assert_eq!(err.to_string(), "Uncaught boom");
    }

    #[test]
    fn test_creation_message() {
        let err = SandboxError::from(CreationError::InvalidSandbox);
        assert_eq!(err.to_string(), "sandbox argument must be an object.");
    }
}
