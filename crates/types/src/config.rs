// Path: crates/types/src/config.rs

//! Shared configuration structures for the Chainshim runtime.
//!
//! Field names serialize to the literal option strings the peer ecosystem
//! uses (`request-timeout`, `ssl-target-name-override`, `grpc.*`), so a
//! configuration mapping read from JSON or TOML round-trips unchanged.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection options for the chaincode-support client.
///
/// The `grpc.*` transport knobs pass through to the underlying channel where
/// the client side supports them; the HTTP/2 ping knobs are retained but
/// have no client-side equivalent on this transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    /// The chaincode identity announced in the REGISTER frame.
    #[serde(rename = "chaincode-id-name", default)]
    pub chaincode_id_name: String,

    /// Deadline applied to each high-level peer operation, in milliseconds.
    #[serde(rename = "request-timeout", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Overrides the hostname used for TLS verification and the HTTP/2
    /// `:authority` of the channel.
    #[serde(rename = "ssl-target-name-override", default)]
    pub ssl_target_name_override: Option<String>,

    /// PEM-encoded CA certificate bundle. Mandatory for `grpcs://` targets.
    #[serde(default)]
    pub pem: Option<String>,
    /// Base64-encoded, PEM client private key. Mandatory for `grpcs://`.
    #[serde(default)]
    pub key: Option<String>,
    /// Base64-encoded, PEM client certificate. Mandatory for `grpcs://`.
    #[serde(default)]
    pub cert: Option<String>,

    /// Maximum outbound message size in bytes; `-1` means unlimited.
    #[serde(rename = "grpc.max_send_message_length", default = "default_max_message_length")]
    pub max_send_message_length: i64,
    /// Maximum inbound message size in bytes; `-1` means unlimited.
    #[serde(rename = "grpc.max_receive_message_length", default = "default_max_message_length")]
    pub max_receive_message_length: i64,
    /// Interval between HTTP/2 keepalive pings, in milliseconds.
    #[serde(rename = "grpc.keepalive_time_ms", default = "default_keepalive_time_ms")]
    pub keepalive_time_ms: u64,
    /// How long to wait for a keepalive ping acknowledgement before closing
    /// the transport, in milliseconds.
    #[serde(rename = "grpc.keepalive_timeout_ms", default = "default_keepalive_timeout_ms")]
    pub keepalive_timeout_ms: u64,
    /// Whether keepalive pings are sent while no call is in flight.
    #[serde(
        rename = "grpc.keepalive_permit_without_calls",
        default = "default_keepalive_permit_without_calls"
    )]
    pub keepalive_permit_without_calls: bool,
    /// Minimum spacing the server will tolerate between pings, in
    /// milliseconds. Retained for round-tripping; not applied client-side.
    #[serde(
        rename = "grpc.http2.min_time_between_pings_ms",
        default = "default_keepalive_time_ms"
    )]
    pub http2_min_time_between_pings_ms: u64,
    /// Maximum pings sent without data frames. Retained for round-tripping;
    /// not applied client-side.
    #[serde(rename = "grpc.http2.max_pings_without_data", default)]
    pub http2_max_pings_without_data: u32,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_message_length() -> i64 {
    -1
}
fn default_keepalive_time_ms() -> u64 {
    110_000
}
fn default_keepalive_timeout_ms() -> u64 {
    20_000
}
fn default_keepalive_permit_without_calls() -> bool {
    true
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            chaincode_id_name: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            ssl_target_name_override: None,
            pem: None,
            key: None,
            cert: None,
            max_send_message_length: default_max_message_length(),
            max_receive_message_length: default_max_message_length(),
            keepalive_time_ms: default_keepalive_time_ms(),
            keepalive_timeout_ms: default_keepalive_timeout_ms(),
            keepalive_permit_without_calls: default_keepalive_permit_without_calls(),
            http2_min_time_between_pings_ms: default_keepalive_time_ms(),
            http2_max_pings_without_data: 0,
        }
    }
}

impl ShimConfig {
    /// The per-operation deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
