//! The throttle engine.
//!
//! The engine keeps no counters of its own. Every answer is derived from the
//! records in the configured store, so any number of engines (in one process
//! or several) can share a store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::record::ThrottleRecord;
use super::scope::{IdentityResolver, KeyScoper, NoIdentity, ScopeMode};
use crate::error::{Result, ThrottleError};
use crate::store::ThrottleStore;

/// Allowed count used when the caller gives none.
pub const DEFAULT_ALLOWED: u64 = 1;
/// Window used when the caller gives none (3 minutes).
pub const DEFAULT_WINDOW_MS: u64 = 180_000;

/// How [`Engine::attempt`] admits an attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Check, then record on success. Two concurrent callers may both pass
    /// the check before either records, admitting one extra attempt.
    #[default]
    CheckThenRecord,
    /// Let the store count and insert in a single atomic step.
    Atomic,
}

/// Everything an engine is built from.
pub struct EngineConfig {
    pub scope: ScopeMode,
    pub resolver: Arc<dyn IdentityResolver>,
    pub store: Arc<dyn ThrottleStore>,
    pub clock: Arc<dyn Clock>,
    pub admission: AdmissionMode,
}

impl EngineConfig {
    /// Global scope, wall clock, check-then-record admission.
    pub fn new(store: Arc<dyn ThrottleStore>) -> Self {
        Self {
            scope: ScopeMode::Global,
            resolver: Arc::new(NoIdentity),
            store,
            clock: Arc::new(SystemClock),
            admission: AdmissionMode::default(),
        }
    }

    pub fn with_scope(mut self, scope: ScopeMode, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.scope = scope;
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionMode) -> Self {
        self.admission = admission;
        self
    }
}

/// Checks, records and purges expiring throttle records.
pub struct Engine {
    scoper: KeyScoper,
    store: Arc<dyn ThrottleStore>,
    clock: Arc<dyn Clock>,
    admission: AdmissionMode,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            scoper: KeyScoper::new(config.scope, config.resolver),
            store: config.store,
            clock: config.clock,
            admission: config.admission,
        }
    }

    pub fn scoper(&self) -> &KeyScoper {
        &self.scoper
    }

    pub fn store(&self) -> &Arc<dyn ThrottleStore> {
        &self.store
    }

    pub fn admission(&self) -> AdmissionMode {
        self.admission
    }

    /// Delete every record that has expired.
    ///
    /// Returns how many records were removed.
    pub async fn purge(&self) -> Result<u64> {
        let now = self.clock.now_millis();
        let removed = self.store.delete_expired(now).await?;
        if removed > 0 {
            trace!(removed = removed, now = now, "Purged expired throttle records");
        }
        Ok(removed)
    }

    /// Whether another attempt under `base_key` would fit in the quota.
    ///
    /// Passes while fewer than `allowed` live records exist. A missing or
    /// zero `allowed` means 1. Apart from purging, nothing is written.
    pub async fn check(&self, base_key: &str, allowed: Option<u64>) -> Result<bool> {
        validate_key(base_key)?;
        let allowed = allowed_or_default(allowed);

        self.purge().await?;

        let key = self.scoper.effective_key(base_key);
        let live = self.store.count_live(&key, self.clock.now_millis()).await?;

        debug!(key = %key, allowed = allowed, live = live, "Throttle check");
        Ok(live < allowed)
    }

    /// Record an attempt under `base_key`, without any quota check.
    ///
    /// A missing window means [`DEFAULT_WINDOW_MS`]. Always returns `true`
    /// unless the store fails.
    pub async fn record(&self, base_key: &str, window_ms: Option<u64>) -> Result<bool> {
        self.record_entry(base_key, window_ms).await?;
        Ok(true)
    }

    /// Like [`Engine::record`], returning the record that was stored.
    pub async fn record_entry(
        &self,
        base_key: &str,
        window_ms: Option<u64>,
    ) -> Result<ThrottleRecord> {
        validate_key(base_key)?;
        let window_ms = window_ms.unwrap_or(DEFAULT_WINDOW_MS);

        let key = self.scoper.effective_key(base_key);
        let record = ThrottleRecord::new(key, self.clock.now_millis(), window_ms);

        debug!(
            key = %record.key,
            window_ms = window_ms,
            expire_at = record.expire_at,
            "Throttle record"
        );

        self.store.insert(record.clone()).await?;
        Ok(record)
    }

    /// Check, and record only if the check passed.
    ///
    /// A rejected attempt is never counted.
    pub async fn attempt(
        &self,
        base_key: &str,
        allowed: Option<u64>,
        window_ms: Option<u64>,
    ) -> Result<bool> {
        match self.admission {
            AdmissionMode::CheckThenRecord => {
                if !self.check(base_key, allowed).await? {
                    debug!(base_key = %base_key, "Throttle attempt rejected");
                    return Ok(false);
                }
                self.record(base_key, window_ms).await
            }
            AdmissionMode::Atomic => self.attempt_atomic(base_key, allowed, window_ms).await,
        }
    }

    async fn attempt_atomic(
        &self,
        base_key: &str,
        allowed: Option<u64>,
        window_ms: Option<u64>,
    ) -> Result<bool> {
        validate_key(base_key)?;
        let allowed = allowed_or_default(allowed);
        let window_ms = window_ms.unwrap_or(DEFAULT_WINDOW_MS);

        self.purge().await?;

        let key = self.scoper.effective_key(base_key);
        let now = self.clock.now_millis();
        let record = ThrottleRecord::new(key, now, window_ms);

        let admitted = self
            .store
            .insert_if_below(record.clone(), allowed, now)
            .await?;

        debug!(
            key = %record.key,
            allowed = allowed,
            admitted = admitted,
            "Atomic throttle attempt"
        );
        Ok(admitted)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scoper", &self.scoper)
            .field("admission", &self.admission)
            .finish()
    }
}

fn validate_key(base_key: &str) -> Result<()> {
    if base_key.is_empty() {
        return Err(ThrottleError::InvalidKey);
    }
    Ok(())
}

fn allowed_or_default(allowed: Option<u64>) -> u64 {
    match allowed {
        Some(n) if n > 0 => n,
        _ => DEFAULT_ALLOWED,
    }
}
