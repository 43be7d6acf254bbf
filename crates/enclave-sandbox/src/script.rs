//! Compiled script handles

use crate::context::SandboxContext;
use crate::error::{CompileError, RuntimeError};
use enclave_engine::{CompiledScript, Engine, Value};
use std::fmt;
use tracing::debug;

/// Origin label used when the caller does not name one.
pub const DEFAULT_ORIGIN: &str = "evalmachine.<anonymous>";

/// A compiled script, runnable any number of times against any context of
/// the engine it was compiled on.
pub struct ScriptHandle {
    engine: Engine,
    artifact: Option<CompiledScript>,
    origin: String,
}

impl ScriptHandle {
    /// Compiles `source` in whatever context is current. Fails without
    /// producing a handle when the source does not parse.
    pub fn compile(engine: &Engine, source: &str, origin: Option<&str>) -> Result<Self, CompileError> {
        let origin = origin.unwrap_or(DEFAULT_ORIGIN);
        let artifact = engine.compile(source, origin)?;
        debug!(origin, "compiled script handle");
        Ok(Self {
            engine: engine.clone(),
            artifact: Some(artifact),
            origin: origin.to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn source(&self) -> Option<&str> {
        self.artifact.as_ref().map(CompiledScript::source)
    }

    pub fn is_compiled(&self) -> bool {
        self.artifact.is_some()
    }

    /// Drops the compiled code. Later runs fail with `NotCompiled`.
    pub fn release(&mut self) {
        if self.artifact.take().is_some() {
            debug!(origin = %self.origin, "released compiled script");
        }
    }

    /// Runs in the engine's current context.
    pub fn run_in_this_context(&self) -> Result<Value, RuntimeError> {
        let artifact = self.artifact.as_ref().ok_or(RuntimeError::NotCompiled)?;
        Ok(self.engine.execute(artifact)?)
    }

    /// Runs against the context `target` stands for. The previously current
    /// context is restored on every exit path.
    pub fn run_in_context(&self, target: &Value) -> Result<Value, RuntimeError> {
        if !SandboxContext::is_sandbox_context(target) {
            return Err(RuntimeError::InvalidTarget);
        }
        let context = SandboxContext::from_value(target)?;
        self.run_in(&context)
    }

    /// Typed form of [`ScriptHandle::run_in_context`].
    pub fn run_in(&self, context: &SandboxContext) -> Result<Value, RuntimeError> {
        if !context.engine().ptr_eq(&self.engine) {
            return Err(RuntimeError::InvalidTarget);
        }
        let _scope = context.enter()?;
        self.run_in_this_context()
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("origin", &self.origin)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sandbox_from_json;
    use enclave_engine::PropertyKey;
    use serde_json::json;

    fn sandbox(engine: &Engine) -> Value {
        Value::Object(sandbox_from_json(engine, &json!({})).unwrap())
    }

    #[test]
    fn test_default_origin() {
        let engine = Engine::new();
        let script = ScriptHandle::compile(&engine, "1 + 1", None).unwrap();
        assert_eq!(script.origin(), DEFAULT_ORIGIN);
        assert_eq!(script.source(), Some("1 + 1"));
    }

    #[test]
    fn test_syntax_error_carries_diagnostic() {
        let engine = Engine::new();
        let err = ScriptHandle::compile(&engine, "var = 1", Some("bad.js")).unwrap_err();
        let CompileError::SyntaxError(diagnostic) = err;
        assert_eq!(diagnostic.origin, "bad.js");
        assert_eq!(diagnostic.line, 1);
    }

    #[test]
    fn test_released_script_is_not_compiled() {
        let engine = Engine::new();
        let mut script = ScriptHandle::compile(&engine, "1", None).unwrap();
        script.release();
        assert!(matches!(script.run_in_this_context(), Err(RuntimeError::NotCompiled)));
    }

    #[test]
    fn test_run_in_context_restores_previous_context() {
        let engine = Engine::new();
        let ctx = SandboxContext::new(&engine, &sandbox(&engine)).unwrap();
        let script = ScriptHandle::compile(&engine, "x = 1; throw new Error('late')", None).unwrap();

        let err = script.run_in_context(&ctx.as_value()).unwrap_err();
        assert!(matches!(err, RuntimeError::ScriptException(_)));
        assert_eq!(engine.current_context(), engine.default_context());
        assert!(ctx.sandbox().unwrap().has_own(&PropertyKey::from("x")));
    }

    #[test]
    fn test_invalid_targets() {
        let engine = Engine::new();
        let script = ScriptHandle::compile(&engine, "1", None).unwrap();
        let plain = sandbox(&engine);
        assert!(matches!(script.run_in_context(&plain), Err(RuntimeError::InvalidTarget)));
        assert!(matches!(
            script.run_in_context(&Value::Undefined),
            Err(RuntimeError::InvalidTarget)
        ));

        let other = Engine::new();
        let foreign = SandboxContext::new(&other, &sandbox(&other)).unwrap();
        assert!(matches!(script.run_in(&foreign), Err(RuntimeError::InvalidTarget)));
    }
}
