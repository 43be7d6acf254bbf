//! Registry of live sandbox contexts and compiled scripts
//!
//! Host-side handles are opaque UUIDs. Disposing a context handle disposes
//! its engine context; scripts are independent of contexts and outlive
//! them. Released handles leave a tombstone so later lookups report a
//! disposed resource rather than an unknown one, until the handle is
//! forgotten.

use crate::context::SandboxContext;
use crate::error::RuntimeError;
use crate::script::ScriptHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Host-facing handle to a sandbox context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextHandle(Uuid);

impl ContextHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

/// Host-facing handle to a compiled script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptId(Uuid);

impl ScriptId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script-{}", self.0)
    }
}

/// Bookkeeping reported for a context handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInfo {
    pub handle: ContextHandle,
    pub class_name: String,
    pub created_at: DateTime<Utc>,
    pub runs: u64,
    pub disposed: bool,
}

struct ContextEntry {
    /// `None` once disposed.
    context: Option<SandboxContext>,
    class_name: String,
    created_at: DateTime<Utc>,
    runs: u64,
}

struct ScriptEntry {
    script: ScriptHandle,
    created_at: DateTime<Utc>,
    runs: u64,
}

#[derive(Default)]
pub struct Registry {
    contexts: HashMap<ContextHandle, ContextEntry>,
    scripts: HashMap<ScriptId, ScriptEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_context(&mut self, context: SandboxContext) -> ContextHandle {
        let handle = ContextHandle::new();
        debug!(%handle, context = %context.id(), "registered context");
        self.contexts.insert(
            handle,
            ContextEntry {
                class_name: context.class_name().to_string(),
                context: Some(context),
                created_at: Utc::now(),
                runs: 0,
            },
        );
        handle
    }

    /// Unknown handles are invalid targets; disposed ones report
    /// `ContextDisposed`.
    pub fn context(&self, handle: ContextHandle) -> Result<&SandboxContext, RuntimeError> {
        let entry = self.contexts.get(&handle).ok_or(RuntimeError::InvalidTarget)?;
        match &entry.context {
            Some(context) if !context.is_disposed() => Ok(context),
            _ => Err(RuntimeError::ContextDisposed),
        }
    }

    pub fn context_info(&self, handle: ContextHandle) -> Result<ContextInfo, RuntimeError> {
        let entry = self.contexts.get(&handle).ok_or(RuntimeError::InvalidTarget)?;
        Ok(ContextInfo {
            handle,
            class_name: entry.class_name.clone(),
            created_at: entry.created_at,
            runs: entry.runs,
            disposed: entry.context.as_ref().map_or(true, SandboxContext::is_disposed),
        })
    }

    /// Idempotent; returns whether this call disposed the context.
    pub fn dispose_context(&mut self, handle: ContextHandle) -> bool {
        let Some(context) = self
            .contexts
            .get_mut(&handle)
            .and_then(|entry| entry.context.take())
        else {
            return false;
        };
        debug!(%handle, "disposing registered context");
        context.dispose()
    }

    /// Disposes the context if it is still live and drops its entry.
    /// Later lookups treat the handle as unknown.
    pub fn forget_context(&mut self, handle: ContextHandle) -> bool {
        let Some(entry) = self.contexts.remove(&handle) else {
            return false;
        };
        if let Some(context) = entry.context {
            context.dispose();
        }
        debug!(%handle, "forgot context");
        true
    }

    pub fn insert_script(&mut self, script: ScriptHandle) -> ScriptId {
        let id = ScriptId::new();
        debug!(%id, origin = script.origin(), "registered script");
        self.scripts.insert(
            id,
            ScriptEntry {
                script,
                created_at: Utc::now(),
                runs: 0,
            },
        );
        id
    }

    /// Unknown and released scripts have no compiled code.
    pub fn script(&self, id: ScriptId) -> Result<&ScriptHandle, RuntimeError> {
        self.scripts
            .get(&id)
            .map(|entry| &entry.script)
            .ok_or(RuntimeError::NotCompiled)
    }

    pub fn script_created_at(&self, id: ScriptId) -> Option<DateTime<Utc>> {
        self.scripts.get(&id).map(|entry| entry.created_at)
    }

    pub fn script_runs(&self, id: ScriptId) -> Option<u64> {
        self.scripts.get(&id).map(|entry| entry.runs)
    }

    /// Drops a script's compiled code. The handle stays known.
    pub fn release_script(&mut self, id: ScriptId) -> bool {
        match self.scripts.get_mut(&id) {
            Some(entry) if entry.script.is_compiled() => {
                entry.script.release();
                true
            }
            _ => false,
        }
    }

    /// Drops a script and its entry.
    pub fn forget_script(&mut self, id: ScriptId) -> bool {
        let forgotten = self.scripts.remove(&id).is_some();
        if forgotten {
            debug!(%id, "forgot script");
        }
        forgotten
    }

    pub fn record_run(&mut self, script: ScriptId, context: Option<ContextHandle>) {
        if let Some(entry) = self.scripts.get_mut(&script) {
            entry.runs += 1;
        }
        if let Some(entry) = context.and_then(|handle| self.contexts.get_mut(&handle)) {
            entry.runs += 1;
        }
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts
            .values()
            .filter(|entry| entry.context.as_ref().is_some_and(|c| !c.is_disposed()))
            .count()
    }

    /// Context entries, tombstones included.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Disposes every context and forgets every script.
    pub fn dispose_all(&mut self) {
        let handles: Vec<ContextHandle> = self.contexts.keys().copied().collect();
        let disposed = handles
            .into_iter()
            .filter(|handle| self.dispose_context(*handle))
            .count();
        self.scripts.clear();
        debug!(disposed, "disposed all registered contexts");
    }
}
