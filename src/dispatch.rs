//! Request dispatch: retry, failover, and redirect handling
//!
//! Wraps transport execution in the retry loop: resolve an endpoint, attach
//! credentials, execute, classify the outcome. Retryable failures
//! (network-level errors, leader redirects, requested-queue-time
//! violations) rotate to another endpoint, bounded by the attempt budget
//! and the caller's deadline — whichever is reached first. Application and
//! protocol errors propagate immediately. A call that succeeds after
//! failing over records its endpoint as last-good on the resolver.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::endpoint::{Endpoint, EndpointResolver};
use crate::error::{SanchayaError, SanchayaResult, ServerError};
use crate::request::Request;
use crate::transport::{HttpTransport, RawResponse};

pub(crate) struct Dispatcher {
    transport: HttpTransport,
    resolver: Arc<dyn EndpointResolver>,
    auth: Authenticator,
    max_attempts: u32,
    queue_timeout_requested: bool,
}

impl Dispatcher {
    pub fn new(
        transport: HttpTransport,
        resolver: Arc<dyn EndpointResolver>,
        auth: Authenticator,
        max_attempts: u32,
        queue_timeout_requested: bool,
    ) -> Self {
        Self {
            transport,
            resolver,
            auth,
            max_attempts: max_attempts.max(1),
            queue_timeout_requested,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn EndpointResolver> {
        &self.resolver
    }

    /// Execute `request` with retry/failover. On success the response may
    /// still carry any 2xx status; non-2xx outcomes are decoded into
    /// application errors here.
    pub async fn send(&self, request: &Request) -> SanchayaResult<RawResponse> {
        let mut endpoint = self.resolver.resolve(request.routing_key.as_deref())?;
        let mut attempt = 0u32;
        let mut auth_retried = false;
        let mut failed_over = false;

        loop {
            attempt += 1;
            if deadline_expired(request) {
                return Err(SanchayaError::Cancelled(
                    "deadline expired during retry".to_string(),
                ));
            }

            let authorization = match self.auth.authorization(&self.transport, &endpoint).await {
                Ok(header) => header,
                Err(e) if e.is_transport() && self.may_retry(attempt, request) => {
                    warn!(%endpoint, error = %e, "login transport failure, rotating endpoint");
                    endpoint = self.rotate(&endpoint)?;
                    failed_over = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let response = match self
                .transport
                .execute(&endpoint, request, authorization.as_deref())
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_transport() => {
                    if self.may_retry(attempt, request) {
                        warn!(%endpoint, error = %e, "transport failure, rotating endpoint");
                        endpoint = self.rotate(&endpoint)?;
                        failed_over = true;
                        continue;
                    }
                    self.resolver.note_failure(&endpoint);
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let status = response.status();

            // Leader forwarding in the consensus-store mode: follow the
            // redirect target directly instead of blind rotation.
            if status == 307 {
                let location = response.header("location").map(str::to_string);
                match location {
                    Some(location) if self.may_retry(attempt, request) => {
                        let target = redirect_endpoint(&location, &endpoint);
                        info!(%endpoint, %target, "following leader redirect");
                        endpoint = target;
                        failed_over = true;
                        continue;
                    }
                    Some(_) => {
                        return Err(SanchayaError::Transport(
                            "leader redirect exceeded retry budget".to_string(),
                        ))
                    }
                    None => {
                        return Err(SanchayaError::Protocol(
                            "redirect without location header".to_string(),
                        ))
                    }
                }
            }

            if response.is_success() {
                if failed_over {
                    self.resolver.note_success(&endpoint);
                }
                return Ok(response);
            }

            let err = self.decode_api_error(response).await;

            if err.is_auth_token_expired() && self.auth.renews() && !auth_retried {
                info!(%endpoint, "session token rejected, renewing and retrying once");
                self.auth.invalidate();
                auth_retried = true;
                continue;
            }

            if err.is_queue_time_violated()
                && self.queue_timeout_requested
                && self.may_retry(attempt, request)
            {
                warn!(%endpoint, "queue time bound exceeded, rotating endpoint");
                endpoint = self.rotate(&endpoint)?;
                failed_over = true;
                continue;
            }

            return Err(err);
        }
    }

    fn may_retry(&self, attempt: u32, request: &Request) -> bool {
        attempt < self.max_attempts && !deadline_expired(request)
    }

    fn rotate(&self, failed: &Endpoint) -> SanchayaResult<Endpoint> {
        self.resolver.note_failure(failed);
        self.resolver.next_after(failed)
    }

    /// Consume a non-2xx response into a structured application error.
    async fn decode_api_error(&self, response: RawResponse) -> SanchayaError {
        let status = response.status();
        let encoding = self.transport.encoding();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return e,
        };

        match encoding.decode::<ServerError>(&bytes) {
            Ok(mut server_error) if server_error.error => {
                if server_error.code == 0 {
                    server_error.code = status;
                }
                SanchayaError::Api(server_error)
            }
            // Proxies and load balancers answer with bodies of their own;
            // classify by status alone.
            _ => SanchayaError::Api(ServerError {
                error: true,
                code: status,
                error_num: 0,
                error_message: String::from_utf8_lossy(&bytes).trim().to_string(),
            }),
        }
    }
}

/// Derive the endpoint named by a redirect `Location`. Relative locations
/// point back at the same node.
fn redirect_endpoint(location: &str, current: &Endpoint) -> Endpoint {
    if let Some(scheme_end) = location.find("://") {
        let authority_start = scheme_end + 3;
        let base_end = location[authority_start..]
            .find('/')
            .map(|p| authority_start + p)
            .unwrap_or(location.len());
        Endpoint::new(&location[..base_end])
    } else {
        current.clone()
    }
}

fn deadline_expired(request: &Request) -> bool {
    request
        .deadline
        .map(|deadline| deadline <= Instant::now())
        .unwrap_or(false)
}
