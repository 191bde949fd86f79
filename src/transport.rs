//! HTTP transport: executes one logical request against one endpoint
//!
//! Owns the underlying `reqwest` client (HTTP/1.1 keep-alive or HTTP/2,
//! including cleartext prior-knowledge mode). Serializes the request,
//! applies request compression and the caller's deadline, and returns the
//! raw outcome. This layer never retries and never interprets response
//! bodies; a successfully received non-2xx status is a success here.

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::time::Instant;
use tracing::debug;

use crate::codec::Encoding;
use crate::config::{ClientConfig, HttpProtocol};
use crate::endpoint::Endpoint;
use crate::error::{SanchayaError, SanchayaResult};
use crate::request::Request;

pub struct HttpTransport {
    client: reqwest::Client,
    encoding: Encoding,
    compress_requests: bool,
    compression_level: u32,
    compression_min_size: usize,
    queue_timeout_secs: Option<f64>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> SanchayaResult<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_timeout)
            // Redirects carry failover meaning (leader forwarding); the
            // dispatcher follows them explicitly.
            .redirect(reqwest::redirect::Policy::none());

        match config.protocol {
            HttpProtocol::Http11 => builder = builder.http1_only(),
            HttpProtocol::Http2 => {
                if config.http2_cleartext {
                    builder = builder.http2_prior_knowledge();
                }
                // Over TLS, HTTP/2 is negotiated via ALPN.
            }
        }

        if config.danger_accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if !config.compression.accept_compressed {
            builder = builder.no_deflate();
        }

        let client = builder
            .build()
            .map_err(|e| SanchayaError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            encoding: config.encoding,
            compress_requests: config.compression.compress_requests,
            compression_level: config.compression.level,
            compression_min_size: config.compression.min_size,
            queue_timeout_secs: config.queue_timeout.map(|d| d.as_secs_f64()),
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Execute `request` against `endpoint`.
    ///
    /// An already-expired deadline fails with [`SanchayaError::Cancelled`]
    /// before any network I/O; expiry while in flight aborts the call and
    /// surfaces the same error kind.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        authorization: Option<&str>,
    ) -> SanchayaResult<RawResponse> {
        let remaining = match request.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return Err(SanchayaError::Cancelled(
                        "deadline expired before dispatch".to_string(),
                    ));
                }
                Some(deadline - now)
            }
            None => None,
        };

        let url = request.url_on(endpoint.as_str());
        debug!(method = %request.method, %url, "dispatching request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header("accept", self.encoding.content_type());

        if let Some(authz) = authorization {
            builder = builder.header("authorization", authz);
        }
        if let Some(secs) = self.queue_timeout_secs {
            builder = builder.header("x-sanchaya-queue-time-seconds", format!("{secs:.3}"));
        }
        for (key, value) in request.headers() {
            builder = builder.header(key, value);
        }

        if let Some(body) = &request.body {
            builder = builder.header("content-type", self.encoding.content_type());
            if self.compress_requests && body.len() >= self.compression_min_size {
                builder = builder
                    .header("content-encoding", "deflate")
                    .body(self.deflate(body)?);
            } else {
                builder = builder.body(body.clone());
            }
        }

        if let Some(timeout) = remaining {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        Ok(RawResponse::from_http(response))
    }

    fn deflate(&self, body: &[u8]) -> SanchayaResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(body.len() / 2),
            Compression::new(self.compression_level),
        );
        encoder
            .write_all(body)
            .and_then(|_| encoder.finish())
            .map_err(|e| SanchayaError::Transport(format!("request compression failed: {e}")))
    }
}

fn map_transport_error(err: reqwest::Error) -> SanchayaError {
    if err.is_timeout() {
        SanchayaError::Cancelled(format!("deadline expired in flight: {err}"))
    } else if err.is_connect() {
        SanchayaError::Transport(format!("connection failed: {err}"))
    } else {
        SanchayaError::Transport(err.to_string())
    }
}

/// Raw response handle: status, headers, and the unconsumed body stream.
///
/// The caller owns the body until it is drained or closed; `close` is
/// idempotent so pooled connections are never leaked by a double release.
#[derive(Debug)]
pub struct RawResponse {
    status: u16,
    headers: reqwest::header::HeaderMap,
    body: Body,
}

impl RawResponse {
    fn from_http(response: reqwest::Response) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            body: Body::Http(Some(response)),
        }
    }

    /// Build a response over an in-memory body. Used by tests and by
    /// internal paths that already buffered the payload.
    pub fn from_parts(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: reqwest::header::HeaderMap::new(),
            body: Body::Memory(Some(body.into())),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Drain the whole body into one buffer.
    pub async fn bytes(self) -> SanchayaResult<Bytes> {
        self.body.collect().await
    }
}

/// Response body stream. Pull chunks with [`chunk`](Self::chunk); `None`
/// marks clean end of stream.
#[derive(Debug)]
pub enum Body {
    Http(Option<reqwest::Response>),
    Memory(Option<Bytes>),
}

impl Body {
    /// Next chunk of body bytes, or `None` once the stream is exhausted
    /// (or the body has been closed).
    pub async fn chunk(&mut self) -> SanchayaResult<Option<Bytes>> {
        match self {
            Body::Http(slot) => match slot {
                Some(response) => {
                    let chunk = response.chunk().await.map_err(map_transport_error)?;
                    if chunk.is_none() {
                        *slot = None;
                    }
                    Ok(chunk)
                }
                None => Ok(None),
            },
            Body::Memory(slot) => Ok(slot.take()),
        }
    }

    /// Release the underlying connection. Safe to call any number of times.
    pub fn close(&mut self) {
        match self {
            Body::Http(slot) => {
                slot.take();
            }
            Body::Memory(slot) => {
                slot.take();
            }
        }
    }

    async fn collect(mut self) -> SanchayaResult<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }
}
