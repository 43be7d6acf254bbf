//! Enclave Sandbox - Script contexts over a virtualized global object
//!
//! Host code evaluates scripts against a sandbox object instead of the
//! engine's real global. Every global read, write, existence check,
//! delete and enumeration inside the script is routed to the sandbox
//! store, with the engine's own global as a read fallback for built-ins.

mod context;
mod error;
pub mod interceptor;
pub mod policy;
mod registry;
mod runtime;
mod script;
pub mod store;

pub use context::SandboxContext;
pub use error::{CompileError, CreationError, RuntimeError, SandboxError};
pub use policy::{AccessPolicy, AllowAll, GlobalAccessPolicy};
pub use registry::{ContextHandle, ContextInfo, Registry, ScriptId};
pub use runtime::{SandboxConfig, SandboxRuntime};
pub use script::{ScriptHandle, DEFAULT_ORIGIN};
pub use store::BackingStores;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Whether `value` stands for a sandbox context.
pub fn is_sandbox_context(value: &enclave_engine::Value) -> bool {
    SandboxContext::is_sandbox_context(value)
}
