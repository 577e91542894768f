//! Throttle protocol: key scoping, expiring records and the engine that
//! checks, records and purges them.

mod clock;
mod engine;
mod record;
mod scope;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{AdmissionMode, Engine, EngineConfig, DEFAULT_ALLOWED, DEFAULT_WINDOW_MS};
pub use record::ThrottleRecord;
pub use scope::{IdentityResolver, KeyScoper, NoIdentity, ScopeMode, TaskIdentity, IDENTITY_SEPARATOR};
