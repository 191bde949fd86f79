//! Driver configuration
//!
//! One explicit value type with recognized options and documented defaults.
//! A `ClientConfig` is shared by reference across every request issued
//! through one client; it is read-only after construction, so concurrent
//! readers need no locking.

use std::time::Duration;

use crate::auth::Authentication;
use crate::codec::Encoding;

/// Underlying HTTP protocol for the transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpProtocol {
    /// HTTP/1.1 with keep-alive connection reuse.
    #[default]
    Http11,
    /// HTTP/2. Over TLS the protocol is negotiated via ALPN; for cleartext
    /// deployments set [`ClientConfig::http2_cleartext`] to skip the upgrade
    /// and speak HTTP/2 from the first byte.
    Http2,
}

/// Endpoint selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingPolicy {
    /// Cycle through all endpoints, with last-good affinity after failover.
    #[default]
    RoundRobin,
    /// Consistent-hash by database name, so all calls for one database land
    /// on the same node while the endpoint set is unchanged.
    DatabaseAffinity,
}

/// Payload compression settings. Request and response sides toggle
/// independently.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Deflate request bodies at [`level`](Self::level). Default: `false`.
    pub compress_requests: bool,
    /// Advertise and transparently decode compressed responses.
    /// Default: `true`.
    pub accept_compressed: bool,
    /// Deflate level, 0-9. Default: `6`.
    pub level: u32,
    /// Bodies below this many bytes are sent uncompressed even when request
    /// compression is on. Default: `1024`.
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            compress_requests: false,
            accept_compressed: true,
            level: 6,
            min_size: 1024,
        }
    }
}

/// Connection configuration for a [`SanchayaClient`](crate::SanchayaClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URLs of the known server nodes. Must be non-empty.
    pub endpoints: Vec<String>,
    /// Wire encoding for request and response bodies. Default: JSON.
    pub encoding: Encoding,
    /// Endpoint selection policy. Default: round-robin.
    pub routing: RoutingPolicy,
    /// Credentials attached to every call. Default: none.
    pub authentication: Authentication,
    /// Payload compression settings.
    pub compression: CompressionConfig,
    /// HTTP protocol selection. Default: HTTP/1.1.
    pub protocol: HttpProtocol,
    /// Speak HTTP/2 without TLS from the first byte (prior knowledge).
    /// Only meaningful with [`HttpProtocol::Http2`]. Default: `false`.
    pub http2_cleartext: bool,
    /// Skip TLS certificate verification. Test deployments only.
    /// Default: `false`.
    pub danger_accept_invalid_certs: bool,
    /// Default deadline applied to calls that carry none of their own.
    /// Default: off (calls without a deadline wait indefinitely).
    pub request_timeout: Option<Duration>,
    /// TCP connect timeout. Default: 5 s.
    pub connect_timeout: Duration,
    /// How long pooled connections may sit idle. Default: 90 s.
    pub idle_timeout: Duration,
    /// Total attempts per call, first try included, before a retryable
    /// failure becomes fatal. Default: `3`.
    pub max_attempts: u32,
    /// Ask the server to fail a call instead of queueing it longer than
    /// this. A violation is retried on another endpoint. Default: off.
    pub queue_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            encoding: Encoding::default(),
            routing: RoutingPolicy::default(),
            authentication: Authentication::default(),
            compression: CompressionConfig::default(),
            protocol: HttpProtocol::default(),
            http2_cleartext: false,
            danger_accept_invalid_certs: false,
            request_timeout: None,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(90),
            max_attempts: 3,
            queue_timeout: None,
        }
    }
}
