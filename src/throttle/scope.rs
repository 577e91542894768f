//! Key scoping.
//!
//! A base key is either shared by every caller or split per caller identity.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Separator placed between a base key and the caller identity.
pub const IDENTITY_SEPARATOR: &str = "_u_";

tokio::task_local! {
    static CALLER_IDENTITY: Option<String>;
}

/// Whether keys are shared globally or qualified by caller identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Every caller shares the base key
    #[default]
    Global,
    /// Callers with an identity get their own key
    Identity,
}

/// Supplies the identity of the current caller, if there is one.
pub trait IdentityResolver: Send + Sync {
    fn current_identity(&self) -> Option<String>;
}

/// Resolver for deployments without caller identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityResolver for NoIdentity {
    fn current_identity(&self) -> Option<String> {
        None
    }
}

impl<F> IdentityResolver for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_identity(&self) -> Option<String> {
        self()
    }
}

/// Resolver that reads the identity bound to the running task.
///
/// Request handlers wrap their engine calls in [`TaskIdentity::scope`];
/// outside such a scope there is no identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskIdentity;

impl TaskIdentity {
    /// Run `fut` with `identity` visible to this resolver.
    pub async fn scope<F: Future>(identity: Option<String>, fut: F) -> F::Output {
        CALLER_IDENTITY.scope(identity, fut).await
    }
}

impl IdentityResolver for TaskIdentity {
    fn current_identity(&self) -> Option<String> {
        CALLER_IDENTITY.try_with(Clone::clone).ok().flatten()
    }
}

/// Derives the effective lookup key from a base key.
#[derive(Clone)]
pub struct KeyScoper {
    mode: ScopeMode,
    resolver: Arc<dyn IdentityResolver>,
}

impl KeyScoper {
    pub fn new(mode: ScopeMode, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { mode, resolver }
    }

    /// A scoper that never qualifies keys.
    pub fn global() -> Self {
        Self::new(ScopeMode::Global, Arc::new(NoIdentity))
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Compute the key records are stored under.
    ///
    /// In identity mode a caller without an identity falls back to the
    /// global key, so anonymous callers are throttled together.
    pub fn effective_key(&self, base_key: &str) -> String {
        match self.mode {
            ScopeMode::Global => base_key.to_string(),
            ScopeMode::Identity => match self.resolver.current_identity() {
                Some(identity) if !identity.is_empty() => {
                    format!("{}{}{}", base_key, IDENTITY_SEPARATOR, identity)
                }
                _ => base_key.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for KeyScoper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyScoper").field("mode", &self.mode).finish()
    }
}
