//! Throttled - expiring-counter rate limiting
//!
//! Given a key naming an action (e.g. `"send-email:user123"`), the
//! [`Engine`](throttle::Engine) answers whether the action may proceed under
//! an "N attempts per window" quota and records attempts that do. Records
//! live in a pluggable [`ThrottleStore`](store::ThrottleStore): in process
//! memory, or in a SQLite database shared by several processes. The
//! `throttled` binary serves the engine over gRPC.

pub mod config;
pub mod error;
pub mod grpc;
pub mod store;
pub mod throttle;
