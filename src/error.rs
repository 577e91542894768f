//! Error types for the throttle service.

use thiserror::Error;

/// Main error type for throttle operations.
///
/// Running out of quota is not an error; it is the `Ok(false)` answer of
/// [`Engine::check`](crate::throttle::Engine::check) and
/// [`Engine::attempt`](crate::throttle::Engine::attempt).
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// The caller supplied an empty key
    #[error("Invalid key: throttle keys must not be empty")]
    InvalidKey,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQL storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Failures reported by other storage backends
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Whether the error came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, ThrottleError::Storage(_) | ThrottleError::Backend(_))
    }
}

impl From<ThrottleError> for tonic::Status {
    fn from(err: ThrottleError) -> Self {
        match err {
            ThrottleError::InvalidKey => tonic::Status::invalid_argument(err.to_string()),
            ThrottleError::Storage(_) | ThrottleError::Backend(_) => {
                tonic::Status::unavailable(err.to_string())
            }
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

/// Result type alias for throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
