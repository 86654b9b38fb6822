//! Credential resolution.
//!
//! Before each attempt the executor asks a [`CredentialResolver`] for a token, passing the
//! operation, the target resource and the caller's [`AuthContext`]. A resolver that denies
//! access fails the call as `Unauthorized`, which is never retried.

use crate::error::Failure;
use crate::resource::{Operation, ResourceRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Context key conventionally carrying the acting user's id.
pub const USER_ID: &str = "user_id";

/// Open, caller-supplied key/value context for credential resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext(BTreeMap<String, String>);

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for the given user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::new().with(USER_ID, user_id)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get(USER_ID)
    }
}

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Resolution was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("access denied: {reason}")]
pub struct AccessDenied {
    pub reason: String,
}

impl AccessDenied {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl From<AccessDenied> for Failure {
    fn from(denied: AccessDenied) -> Self {
        Failure::unauthorized(denied.to_string())
    }
}

/// Pluggable credential source.
pub trait CredentialResolver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn resolve(
        &self,
        operation: Operation,
        resource: &ResourceRef,
        context: &AuthContext,
    ) -> Result<Credential, AccessDenied>;
}

/// Same credential for every call.
#[derive(Debug, Clone)]
pub struct StaticCredential(Credential);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Credential::new(token))
    }
}

impl CredentialResolver for StaticCredential {
    fn name(&self) -> &'static str {
        "static"
    }

    fn resolve(
        &self,
        _operation: Operation,
        _resource: &ResourceRef,
        _context: &AuthContext,
    ) -> Result<Credential, AccessDenied> {
        Ok(self.0.clone())
    }
}

/// Per-user, per-resource tokens selected by the context's `user_id`.
///
/// A grant on a resource also covers everything beneath it; the deepest matching grant
/// wins. Blocked users are denied before any grant is consulted.
#[derive(Debug, Clone, Default)]
pub struct UserTokenResolver {
    grants: HashMap<String, Vec<(ResourceRef, Credential)>>,
    blocked: HashSet<String>,
}

impl UserTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `user_id` a token scoped to `resource` and its descendants.
    pub fn grant(mut self, user_id: &str, resource: ResourceRef, token: impl Into<String>) -> Self {
        self.grants
            .entry(user_id.to_string())
            .or_default()
            .push((resource, Credential::new(token)));
        self
    }

    pub fn block(mut self, user_id: &str) -> Self {
        self.blocked.insert(user_id.to_string());
        self
    }
}

fn covers(scope: &ResourceRef, target: &ResourceRef) -> bool {
    let mut cursor = Some(target.clone());
    while let Some(current) = cursor {
        if &current == scope {
            return true;
        }
        cursor = current.parent();
    }
    false
}

impl CredentialResolver for UserTokenResolver {
    fn name(&self) -> &'static str {
        "user-token"
    }

    fn resolve(
        &self,
        operation: Operation,
        resource: &ResourceRef,
        context: &AuthContext,
    ) -> Result<Credential, AccessDenied> {
        let user = context
            .user_id()
            .ok_or_else(|| AccessDenied::new("no user id in auth context"))?;
        if self.blocked.contains(user) {
            return Err(AccessDenied::new(format!("user `{user}` is blocked")));
        }
        self.grants
            .get(user)
            .into_iter()
            .flatten()
            .filter(|(scope, _)| covers(scope, resource))
            .max_by_key(|(scope, _)| scope.depth())
            .map(|(_, token)| token.clone())
            .ok_or_else(|| {
                AccessDenied::new(format!(
                    "user `{user}` has no grant for {operation} on {resource}"
                ))
            })
    }
}
