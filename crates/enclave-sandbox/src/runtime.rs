//! Host-facing sandbox runtime

use crate::context::SandboxContext;
use crate::error::{CompileError, CreationError, RuntimeError};
use crate::policy::{AccessPolicy, AllowAll, GlobalAccessPolicy};
use crate::registry::{ContextHandle, ContextInfo, Registry, ScriptId};
use crate::script::{ScriptHandle, DEFAULT_ORIGIN};
use crate::store;
use enclave_engine::{Engine, ObjectRef, RuntimeLimits, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::rc::Rc;
use tracing::debug;

/// Configuration for the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Origin label for scripts compiled without one
    pub origin_name: String,
    /// Step and call-depth budget per run
    pub limits: RuntimeLimits,
    /// Globals scripts may not touch at all
    pub denied_globals: Vec<String>,
    /// Globals scripts may read but not assign or delete
    pub read_only_globals: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            origin_name: DEFAULT_ORIGIN.to_string(),
            limits: RuntimeLimits::default(),
            denied_globals: Vec::new(),
            read_only_globals: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// The access policy new contexts get. Allows everything unless some
    /// global is denied or read-only.
    pub fn access_policy(&self) -> Rc<dyn AccessPolicy> {
        if self.denied_globals.is_empty() && self.read_only_globals.is_empty() {
            return Rc::new(AllowAll);
        }
        let mut policy = GlobalAccessPolicy::new();
        for name in &self.denied_globals {
            policy.deny_all(name.as_str());
        }
        for name in &self.read_only_globals {
            policy.read_only(name.as_str());
        }
        Rc::new(policy)
    }
}

/// One engine instance plus the contexts and scripts created on it.
pub struct SandboxRuntime {
    config: SandboxConfig,
    engine: Engine,
    registry: Registry,
}

impl SandboxRuntime {
    pub fn new(config: SandboxConfig) -> Self {
        let engine = Engine::with_limits(config.limits);
        debug!(limits = ?config.limits, "created sandbox runtime");
        Self {
            config,
            engine,
            registry: Registry::new(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn create_sandbox_context(&mut self, sandbox: &Value) -> Result<ContextHandle, CreationError> {
        let context = SandboxContext::with_policy(&self.engine, sandbox, self.config.access_policy())?;
        Ok(self.registry.insert_context(context))
    }

    /// Seeds a new sandbox store from JSON and wraps it in a context.
    pub fn create_sandbox_from_json(&mut self, json: &Json) -> Result<ContextHandle, CreationError> {
        let sandbox = store::sandbox_from_json(&self.engine, json)?;
        self.create_sandbox_context(&Value::Object(sandbox))
    }

    pub fn dispose_context(&mut self, handle: ContextHandle) -> bool {
        self.registry.dispose_context(handle)
    }

    /// Disposes the context and drops its registry entry.
    pub fn forget_context(&mut self, handle: ContextHandle) -> bool {
        self.registry.forget_context(handle)
    }

    pub fn context(&self, handle: ContextHandle) -> Result<&SandboxContext, RuntimeError> {
        self.registry.context(handle)
    }

    pub fn compile_script(&mut self, source: &str, origin: Option<&str>) -> Result<ScriptId, CompileError> {
        let origin = origin.unwrap_or(self.config.origin_name.as_str());
        let script = ScriptHandle::compile(&self.engine, source, Some(origin))?;
        Ok(self.registry.insert_script(script))
    }

    pub fn release_script(&mut self, script: ScriptId) -> bool {
        self.registry.release_script(script)
    }

    pub fn forget_script(&mut self, script: ScriptId) -> bool {
        self.registry.forget_script(script)
    }

    /// Runs `script` against `context`, or in the current context when no
    /// context is given.
    pub fn run_script(
        &mut self,
        script: ScriptId,
        context: Option<ContextHandle>,
    ) -> Result<Value, RuntimeError> {
        let handle = self.registry.script(script)?;
        let result = match context {
            Some(target) => handle.run_in(self.registry.context(target)?),
            None => handle.run_in_this_context(),
        };
        self.registry.record_run(script, context);
        result
    }

    pub fn context_info(&self, handle: ContextHandle) -> Result<ContextInfo, RuntimeError> {
        self.registry.context_info(handle)
    }

    pub fn sandbox(&self, handle: ContextHandle) -> Result<ObjectRef, RuntimeError> {
        self.registry.context(handle)?.sandbox()
    }

    pub fn snapshot(&self, handle: ContextHandle) -> Result<Json, RuntimeError> {
        self.registry.context(handle)?.snapshot()
    }
}

impl Default for SandboxRuntime {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Drop for SandboxRuntime {
    fn drop(&mut self) {
        self.registry.dispose_all();
    }
}
