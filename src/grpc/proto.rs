//! Wire messages for the `throttled.v1.Throttle` service.
//!
//! The service stubs are generated by `build.rs` from these types.

/// Check-then-record request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttemptRequest {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    /// Live attempts permitted; absent or zero means 1
    #[prost(uint64, optional, tag = "2")]
    pub allowed: ::core::option::Option<u64>,
    /// Window in milliseconds; absent means 180000
    #[prost(uint64, optional, tag = "3")]
    pub window_ms: ::core::option::Option<u64>,
}

/// Quota check without recording.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckRequest {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(uint64, optional, tag = "2")]
    pub allowed: ::core::option::Option<u64>,
}

/// Unconditional record of an attempt.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordRequest {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(uint64, optional, tag = "2")]
    pub window_ms: ::core::option::Option<u64>,
}

/// Answer to `Attempt` and `Check`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Decision {
    #[prost(bool, tag = "1")]
    pub allowed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordResponse {
    #[prost(bool, tag = "1")]
    pub recorded: bool,
    /// When the stored record stops counting
    #[prost(message, optional, tag = "2")]
    pub expires_at: ::core::option::Option<::prost_types::Timestamp>,
}

/// Convert epoch milliseconds to a protobuf timestamp.
pub fn timestamp_from_millis(millis: i64) -> ::prost_types::Timestamp {
    ::prost_types::Timestamp {
        seconds: millis.div_euclid(1_000),
        nanos: (millis.rem_euclid(1_000) * 1_000_000) as i32,
    }
}

include!(concat!(env!("OUT_DIR"), "/throttled.v1.Throttle.rs"));
