//! Sanchaya client — the driver entry point
//!
//! One `SanchayaClient` composes the transport, resolver, authenticator,
//! and dispatcher, and hands out focused handles: [`Database`] for document
//! operations and [`crate::lock::ConfigStoreClient`] for the consensus
//! config store. The client is cheap to clone and safe to share across
//! tasks; all per-call state lives in the request.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::auth::Authenticator;
use crate::codec::Encoding;
use crate::collection::Collection;
use crate::config::{ClientConfig, RoutingPolicy};
use crate::dispatch::Dispatcher;
use crate::endpoint::{Endpoint, EndpointResolver, MaglevResolver, RoundRobinResolver};
use crate::error::{SanchayaError, SanchayaResult};
use crate::lock::ConfigStoreClient;
use crate::models::{CollectionInfo, ServerStatus, VersionInfo};
use crate::request::{Method, Request};
use crate::transport::{HttpTransport, RawResponse};

/// Client for one Sanchaya deployment.
#[derive(Clone)]
pub struct SanchayaClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    dispatcher: Dispatcher,
    encoding: Encoding,
    request_timeout: Option<std::time::Duration>,
}

impl SanchayaClient {
    /// Build a client from a full configuration.
    pub fn new(config: ClientConfig) -> SanchayaResult<Self> {
        let endpoints: Vec<Endpoint> = config
            .endpoints
            .iter()
            .map(|e| Endpoint::new(e.as_str()))
            .collect();

        let resolver: Arc<dyn EndpointResolver> = match config.routing {
            RoutingPolicy::RoundRobin => Arc::new(RoundRobinResolver::new(endpoints)?),
            RoutingPolicy::DatabaseAffinity => Arc::new(MaglevResolver::new(endpoints)?),
        };

        let transport = HttpTransport::new(&config)?;
        let auth = Authenticator::new(config.authentication.clone());
        let dispatcher = Dispatcher::new(
            transport,
            resolver,
            auth,
            config.max_attempts,
            config.queue_timeout.is_some(),
        );

        info!(
            endpoints = config.endpoints.len(),
            encoding = ?config.encoding,
            routing = ?config.routing,
            "sanchaya client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                dispatcher,
                encoding: config.encoding,
                request_timeout: config.request_timeout,
            }),
        })
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            config: ClientConfig::default(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    /// Handle for one database.
    pub fn database(&self, name: &str) -> Database {
        Database {
            client: self.clone(),
            name: name.to_string(),
        }
    }

    /// Handle for the consensus config store.
    pub fn config_store(&self) -> ConfigStoreClient {
        ConfigStoreClient::new(self.clone())
    }

    /// Snapshot of the endpoints the resolver currently knows.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.dispatcher.resolver().endpoints()
    }

    /// Replace the known endpoint set.
    pub fn update_endpoints<I, S>(&self, endpoints: I) -> SanchayaResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner
            .dispatcher
            .resolver()
            .update(endpoints.into_iter().map(|e| Endpoint::new(e.as_ref())).collect())
    }

    /// Ask the deployment for its current topology and adopt it.
    /// Returns the number of endpoints now known.
    pub async fn synchronize_endpoints(&self) -> SanchayaResult<usize> {
        #[derive(Deserialize)]
        struct Entry {
            endpoint: String,
        }
        #[derive(Deserialize)]
        struct Topology {
            endpoints: Vec<Entry>,
        }

        let request = Request::new(Method::GET, ["api", "cluster", "endpoints"]);
        let topology: Topology = self.request_json(request).await?;
        let endpoints: Vec<Endpoint> = topology
            .endpoints
            .iter()
            .map(|e| Endpoint::new(e.endpoint.as_str()))
            .collect();
        let count = endpoints.len();
        self.inner.dispatcher.resolver().update(endpoints)?;
        info!(count, "adopted topology from server");
        Ok(count)
    }

    /// Execute a prepared logical request. Public for callers that need
    /// full control over paths, headers, and deadlines.
    pub async fn execute(&self, request: Request) -> SanchayaResult<RawResponse> {
        let request = self.with_default_deadline(request);
        self.inner.dispatcher.send(&request).await
    }

    pub(crate) async fn request_json<T: DeserializeOwned>(
        &self,
        request: Request,
    ) -> SanchayaResult<T> {
        let response = self.execute(request).await?;
        self.decode_body(response).await
    }

    pub(crate) async fn decode_body<T: DeserializeOwned>(
        &self,
        response: RawResponse,
    ) -> SanchayaResult<T> {
        check_content_type(&response, self.inner.encoding)?;
        let bytes = response.bytes().await?;
        self.inner.encoding.decode(&bytes)
    }

    pub(crate) fn with_default_deadline(&self, request: Request) -> Request {
        match (request.deadline, self.inner.request_timeout) {
            (None, Some(timeout)) => request.deadline(Instant::now() + timeout),
            _ => request,
        }
    }
}

/// A response body in the wrong encoding is a protocol error, not
/// something to guess through.
pub(crate) fn check_content_type(
    response: &RawResponse,
    encoding: Encoding,
) -> SanchayaResult<()> {
    match response.header("content-type") {
        Some(content_type) if !content_type.starts_with(encoding.content_type()) => {
            Err(SanchayaError::Protocol(format!(
                "unexpected content-type `{content_type}`, expected `{}`",
                encoding.content_type()
            )))
        }
        _ => Ok(()),
    }
}

/// Server identity and health checks. One of the client's focused
/// capability interfaces.
#[async_trait]
pub trait ServerInfo {
    async fn version(&self) -> SanchayaResult<VersionInfo>;
    async fn status(&self) -> SanchayaResult<ServerStatus>;
    async fn ping(&self) -> SanchayaResult<()>;
}

#[async_trait]
impl ServerInfo for SanchayaClient {
    async fn version(&self) -> SanchayaResult<VersionInfo> {
        self.request_json(Request::new(Method::GET, ["api", "version"]))
            .await
    }

    async fn status(&self) -> SanchayaResult<ServerStatus> {
        self.request_json(Request::new(Method::GET, ["api", "status"]))
            .await
    }

    async fn ping(&self) -> SanchayaResult<()> {
        let status = self.status().await?;
        if status.status == "healthy" {
            Ok(())
        } else {
            Err(SanchayaError::Transport(format!(
                "server unhealthy: {}",
                status.status
            )))
        }
    }
}

/// Builder-style construction for the common cases.
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn endpoint(mut self, url: impl AsRef<str>) -> Self {
        self.config.endpoints.push(url.as_ref().to_string());
        self
    }

    pub fn endpoints<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.endpoints.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    pub fn routing(mut self, routing: RoutingPolicy) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn authentication(mut self, auth: crate::auth::Authentication) -> Self {
        self.config.authentication = auth;
        self
    }

    pub fn protocol(mut self, protocol: crate::config::HttpProtocol) -> Self {
        self.config.protocol = protocol;
        self
    }

    pub fn http2_cleartext(mut self, enabled: bool) -> Self {
        self.config.http2_cleartext = enabled;
        self
    }

    pub fn compression(mut self, compression: crate::config::CompressionConfig) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn queue_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.queue_timeout = Some(timeout);
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> SanchayaResult<SanchayaClient> {
        SanchayaClient::new(self.config)
    }
}

/// Handle for one named database. Calls through this handle carry the
/// database name as the routing key, so keyed endpoint selection pins
/// them to one node.
#[derive(Clone)]
pub struct Database {
    client: SanchayaClient,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &SanchayaClient {
        &self.client
    }

    /// Handle for one collection in this database.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    /// Create a collection. Thin wrapper over the collection endpoint.
    pub async fn create_collection(&self, name: &str) -> SanchayaResult<CollectionInfo> {
        let body = self
            .client
            .encoding()
            .encode(&serde_json::json!({ "name": name }))?;
        let request = self
            .request(Method::POST, ["collection"])
            .body_bytes(body);
        self.client.request_json(request).await
    }

    /// Drop a collection and everything in it.
    pub async fn drop_collection(&self, name: &str) -> SanchayaResult<()> {
        let request = self.request(Method::DELETE, ["collection", name]);
        let response = self.client.execute(request).await?;
        response.bytes().await?;
        Ok(())
    }

    /// Build a request under this database's path prefix, tagged with its
    /// routing key.
    pub(crate) fn request<S: AsRef<str>>(
        &self,
        method: Method,
        tail: impl IntoIterator<Item = S>,
    ) -> Request {
        let mut segments = vec!["api".to_string(), "db".to_string(), self.name.clone()];
        segments.extend(tail.into_iter().map(|s| s.as_ref().to_string()));
        Request::new(method, segments).routing_key(self.name.as_str())
    }
}
