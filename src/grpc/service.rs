//! Throttle service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::throttle_server::Throttle;
use super::proto::{
    timestamp_from_millis, AttemptRequest, CheckRequest, Decision, RecordRequest, RecordResponse,
};
use crate::config::RemoteConfig;
use crate::throttle::{Engine, TaskIdentity};

/// Implementation of the `throttled.v1.Throttle` gRPC interface.
///
/// Requests run inside a [`TaskIdentity`] scope carrying the identity from
/// the configured metadata header, so an engine built with identity scope
/// splits keys per caller.
pub struct ThrottleServiceImpl {
    /// The throttle engine
    engine: Arc<Engine>,
    /// Remote method settings
    remote: RemoteConfig,
}

impl ThrottleServiceImpl {
    /// Create a new service around the given engine.
    pub fn new(engine: Arc<Engine>, mut remote: RemoteConfig) -> Self {
        remote.identity_header = remote.identity_header.to_ascii_lowercase();
        Self { engine, remote }
    }

    fn ensure_enabled(&self) -> Result<(), Status> {
        if self.remote.enabled {
            Ok(())
        } else {
            Err(Status::permission_denied("client-side throttle disabled"))
        }
    }

    fn caller_identity<T>(&self, request: &Request<T>) -> Option<String> {
        request
            .metadata()
            .get(self.remote.identity_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|identity| !identity.is_empty())
            .map(String::from)
    }
}

fn require_key(key: &str) -> Result<(), Status> {
    if key.is_empty() {
        warn!("Received throttle request with empty key");
        return Err(Status::invalid_argument("key is required"));
    }
    Ok(())
}

#[tonic::async_trait]
impl Throttle for ThrottleServiceImpl {
    /// Check the quota and, if it passes, record the attempt.
    #[instrument(
        skip(self, request),
        fields(key = %request.get_ref().key, allowed = ?request.get_ref().allowed)
    )]
    async fn attempt(&self, request: Request<AttemptRequest>) -> Result<Response<Decision>, Status> {
        self.ensure_enabled()?;
        let identity = self.caller_identity(&request);
        let req = request.into_inner();
        require_key(&req.key)?;

        let allowed = TaskIdentity::scope(
            identity,
            self.engine.attempt(&req.key, req.allowed, req.window_ms),
        )
        .await?;

        info!(key = %req.key, allowed = allowed, "Throttle attempt decided");
        Ok(Response::new(Decision { allowed }))
    }

    #[instrument(
        skip(self, request),
        fields(key = %request.get_ref().key, allowed = ?request.get_ref().allowed)
    )]
    async fn check(&self, request: Request<CheckRequest>) -> Result<Response<Decision>, Status> {
        self.ensure_enabled()?;
        let identity = self.caller_identity(&request);
        let req = request.into_inner();
        require_key(&req.key)?;

        let allowed =
            TaskIdentity::scope(identity, self.engine.check(&req.key, req.allowed)).await?;

        debug!(key = %req.key, allowed = allowed, "Throttle check decided");
        Ok(Response::new(Decision { allowed }))
    }

    /// Record an attempt without checking the quota.
    ///
    /// Off unless `remote.allow_record` is set: a client that can record
    /// freely can lock other callers out.
    #[instrument(skip(self, request), fields(key = %request.get_ref().key))]
    async fn record(
        &self,
        request: Request<RecordRequest>,
    ) -> Result<Response<RecordResponse>, Status> {
        self.ensure_enabled()?;
        if !self.remote.allow_record {
            warn!("Rejected remote record call");
            return Err(Status::permission_denied("remote record is disabled"));
        }

        let identity = self.caller_identity(&request);
        let req = request.into_inner();
        require_key(&req.key)?;

        let record =
            TaskIdentity::scope(identity, self.engine.record_entry(&req.key, req.window_ms))
                .await?;

        info!(key = %record.key, expire_at = record.expire_at, "Throttle attempt recorded");
        Ok(Response::new(RecordResponse {
            recorded: true,
            expires_at: Some(timestamp_from_millis(record.expire_at)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::throttle::{EngineConfig, ManualClock, ScopeMode};

    const START: i64 = 1_700_000_000_000;

    fn service_with(scope: ScopeMode, remote: RemoteConfig) -> ThrottleServiceImpl {
        let engine = Engine::new(
            EngineConfig::new(Arc::new(MemoryStore::new()))
                .with_clock(Arc::new(ManualClock::new(START)))
                .with_scope(scope, Arc::new(TaskIdentity)),
        );
        ThrottleServiceImpl::new(Arc::new(engine), remote)
    }

    fn attempt_request(key: &str, allowed: u64) -> Request<AttemptRequest> {
        Request::new(AttemptRequest {
            key: key.to_string(),
            allowed: Some(allowed),
            window_ms: Some(60_000),
        })
    }

    fn with_identity<T>(mut request: Request<T>, identity: &str) -> Request<T> {
        request
            .metadata_mut()
            .insert("x-throttle-identity", identity.parse().unwrap());
        request
    }

    #[tokio::test]
    async fn test_attempt_respects_quota() {
        let service = service_with(ScopeMode::Global, RemoteConfig::default());

        let first = service.attempt(attempt_request("signup", 1)).await.unwrap();
        assert!(first.into_inner().allowed);

        let second = service.attempt(attempt_request("signup", 1)).await.unwrap();
        assert!(!second.into_inner().allowed);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let service = service_with(ScopeMode::Global, RemoteConfig::default());

        let result = service.attempt(attempt_request("", 1)).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);

        let result = service
            .check(Request::new(CheckRequest {
                key: String::new(),
                allowed: None,
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_check_does_not_record() {
        let service = service_with(ScopeMode::Global, RemoteConfig::default());

        for _ in 0..3 {
            let response = service
                .check(Request::new(CheckRequest {
                    key: "k".to_string(),
                    allowed: None,
                }))
                .await
                .unwrap();
            assert!(response.into_inner().allowed);
        }
    }

    #[tokio::test]
    async fn test_identity_header_splits_keys() {
        let service = service_with(ScopeMode::Identity, RemoteConfig::default());

        let alice = service
            .attempt(with_identity(attempt_request("x", 1), "alice"))
            .await
            .unwrap();
        assert!(alice.into_inner().allowed);

        let bob = service
            .attempt(with_identity(attempt_request("x", 1), "bob"))
            .await
            .unwrap();
        assert!(bob.into_inner().allowed);

        let alice_again = service
            .attempt(with_identity(attempt_request("x", 1), "alice"))
            .await
            .unwrap();
        assert!(!alice_again.into_inner().allowed);
    }

    #[tokio::test]
    async fn test_disabled_service_denies_everything() {
        let remote = RemoteConfig {
            enabled: false,
            ..RemoteConfig::default()
        };
        let service = service_with(ScopeMode::Global, remote);

        let result = service.attempt(attempt_request("k", 1)).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::PermissionDenied);

        let result = service
            .check(Request::new(CheckRequest {
                key: "k".to_string(),
                allowed: None,
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_record_disabled_by_default() {
        let service = service_with(ScopeMode::Global, RemoteConfig::default());

        let result = service
            .record(Request::new(RecordRequest {
                key: "k".to_string(),
                window_ms: None,
            }))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_record_when_allowed() {
        let remote = RemoteConfig {
            allow_record: true,
            ..RemoteConfig::default()
        };
        let service = service_with(ScopeMode::Global, remote);

        let response = service
            .record(Request::new(RecordRequest {
                key: "k".to_string(),
                window_ms: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.recorded);
        let expected = timestamp_from_millis(START + 180_000);
        assert_eq!(response.expires_at, Some(expected));

        let check = service
            .check(Request::new(CheckRequest {
                key: "k".to_string(),
                allowed: Some(1),
            }))
            .await
            .unwrap();
        assert!(!check.into_inner().allowed);
    }
}
