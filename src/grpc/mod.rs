//! gRPC surface for the throttle engine.

pub mod proto;
mod server;
mod service;

pub use server::GrpcServer;
pub use service::ThrottleServiceImpl;

// Re-export commonly used types
pub use proto::throttle_client::ThrottleClient;
pub use proto::throttle_server::ThrottleServer;
pub use proto::{AttemptRequest, CheckRequest, Decision, RecordRequest, RecordResponse};
