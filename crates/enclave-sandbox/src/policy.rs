//! Access policy for global properties
//!
//! Evaluated by the engine before every intercepted global touch. The
//! default policy allows everything; it is an extension point, not an
//! isolation boundary.

use enclave_engine::{AccessCheck, AccessType, PropertyKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::debug;

const ALL_ACCESS: [AccessType; 4] = [
    AccessType::Get,
    AccessType::Set,
    AccessType::Has,
    AccessType::Delete,
];

/// Decides whether a script may touch a global property.
pub trait AccessPolicy {
    fn allows(&self, key: &PropertyKey, access: AccessType) -> bool;
}

/// Allows every access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _key: &PropertyKey, _access: AccessType) -> bool {
        true
    }
}

/// Deny-list keyed by global name and access type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAccessPolicy {
    denied: HashMap<String, HashSet<AccessType>>,
}

impl GlobalAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies one kind of access to `name`.
    pub fn deny(&mut self, name: impl Into<String>, access: AccessType) -> &mut Self {
        self.denied.entry(name.into()).or_default().insert(access);
        self
    }

    /// Hides `name` from scripts entirely.
    pub fn deny_all(&mut self, name: impl Into<String>) -> &mut Self {
        self.denied.entry(name.into()).or_default().extend(ALL_ACCESS);
        self
    }

    /// Lets scripts read `name` but not assign or delete it.
    pub fn read_only(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.deny(name.clone(), AccessType::Set);
        self.deny(name, AccessType::Delete)
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }

    /// Whether `access` to `name` is denied.
    pub fn denies(&self, name: &str, access: AccessType) -> bool {
        self.denied
            .get(name)
            .is_some_and(|accesses| accesses.contains(&access))
    }

    pub fn with_denied(mut self, name: impl Into<String>) -> Self {
        self.deny_all(name);
        self
    }

    pub fn with_read_only(mut self, name: impl Into<String>) -> Self {
        self.read_only(name);
        self
    }
}

impl AccessPolicy for GlobalAccessPolicy {
    fn allows(&self, key: &PropertyKey, access: AccessType) -> bool {
        !self.denies(&key.to_string(), access)
    }
}

/// Adapts an [`AccessPolicy`] to the engine's access-check hook.
pub(crate) struct PolicyCheck {
    policy: Rc<dyn AccessPolicy>,
}

impl PolicyCheck {
    pub(crate) fn new(policy: Rc<dyn AccessPolicy>) -> Self {
        Self { policy }
    }

    fn evaluate(&self, key: &PropertyKey, access: AccessType) -> bool {
        let allowed = self.policy.allows(key, access);
        if !allowed {
            debug!(%key, ?access, "global access denied by policy");
        }
        allowed
    }
}

impl AccessCheck for PolicyCheck {
    fn named(&self, name: &str, access: AccessType) -> bool {
        self.evaluate(&PropertyKey::from(name), access)
    }

    fn indexed(&self, index: u32, access: AccessType) -> bool {
        self.evaluate(&PropertyKey::Index(index), access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_never_blocks() {
        for access in ALL_ACCESS {
            assert!(AllowAll.allows(&PropertyKey::from("process"), access));
        }
    }

    #[test]
    fn test_read_only_blocks_writes() {
        let policy = GlobalAccessPolicy::new().with_read_only("config");
        let key = PropertyKey::from("config");
        assert!(policy.allows(&key, AccessType::Get));
        assert!(policy.allows(&key, AccessType::Has));
        assert!(!policy.allows(&key, AccessType::Set));
        assert!(!policy.allows(&key, AccessType::Delete));
        assert!(policy.allows(&PropertyKey::from("other"), AccessType::Set));
    }

    #[test]
    fn test_denied_blocks_everything() {
        let policy = GlobalAccessPolicy::new().with_denied("secret");
        for access in ALL_ACCESS {
            assert!(!policy.allows(&PropertyKey::from("secret"), access));
        }
    }

    #[test]
    fn test_indexed_keys_match_by_decimal_name() {
        let mut policy = GlobalAccessPolicy::new();
        policy.deny("0", AccessType::Set);
        let check = PolicyCheck::new(Rc::new(policy));
        assert!(!check.indexed(0, AccessType::Set));
        assert!(check.indexed(1, AccessType::Set));
        assert!(check.named("zero", AccessType::Set));
    }
}
