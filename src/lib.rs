//! Sanchaya Rust Driver
//!
//! Client library for the Sanchaya distributed multi-model database.
//! Talks HTTP/1.1 or HTTP/2 to a set of server nodes, with JSON or Pack
//! (compact binary) payload encoding, endpoint failover, and streamed
//! multi-document results.
//!
//! # Quick Start
//!
//! ```no_run
//! use sanchaya_driver::{SanchayaClient, CreateOptions};
//!
//! #[tokio::main]
//! async fn main() -> sanchaya_driver::SanchayaResult<()> {
//!     let client = SanchayaClient::builder()
//!         .endpoint("http://localhost:8529")
//!         .build()?;
//!
//!     let parts = client.database("inventory").collection("parts");
//!
//!     // One call, many documents, per-item results in input order.
//!     let docs = vec![
//!         serde_json::json!({"_key": "a", "qty": 1}),
//!         serde_json::json!({"_key": "b", "qty": 2}),
//!     ];
//!     let mut reader = parts.create_documents(&docs, &CreateOptions::default()).await?;
//!     while let Ok(meta) = reader.read().await {
//!         println!("stored {} at revision {}", meta.key, meta.rev);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod batch;
pub mod client;
pub mod codec;
pub mod collection;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod lock;
pub mod models;
pub mod request;
pub mod transport;

mod dispatch;

// ============================================================
// Client surface
// ============================================================

pub use client::{ClientBuilder, Database, SanchayaClient, ServerInfo};
pub use collection::Collection;

// ============================================================
// Core types
// ============================================================

pub use auth::Authentication;
pub use batch::BatchReader;
pub use codec::{Encoding, Value, ValueDecoder};
pub use config::{ClientConfig, CompressionConfig, HttpProtocol, RoutingPolicy};
pub use endpoint::{Endpoint, EndpointResolver, MaglevResolver, RoundRobinResolver};
pub use error::{SanchayaError, SanchayaResult, ServerError};
pub use request::{Method, Request};
pub use transport::{Body, RawResponse};

// ============================================================
// Models and operation options
// ============================================================

pub use models::{
    CollectionInfo, CreateOptions, DeleteOptions, DocumentMeta, ReadOptions, ReplaceOptions,
    ServerStatus, UpdateOptions, VersionInfo,
};

// ============================================================
// Config store and distributed lock
// ============================================================

pub use lock::{ConfigStore, ConfigStoreClient, DistributedLock, WriteTransaction};

// ============================================================
// Error catalog
// ============================================================

pub use error::{
    ERROR_AUTH_TOKEN_EXPIRED, ERROR_DOCUMENT_NOT_FOUND, ERROR_PRECONDITION_FAILED,
    ERROR_QUEUE_TIME_VIOLATED, ERROR_REVISION_CONFLICT, ERROR_UNIQUE_CONSTRAINT_VIOLATED,
};
