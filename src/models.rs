//! Data models for the Sanchaya driver
//!
//! Response structures shared across the API surface, plus the option
//! structs for document operations. Options use explicit optional fields
//! with documented defaults; an unset field defers to the server default.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::request::Request;

/// Metadata record for one document operation result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Fully qualified handle, `collection/key`.
    #[serde(rename = "_id", default)]
    pub id: String,
    /// Document key within its collection.
    #[serde(rename = "_key", default)]
    pub key: String,
    /// Opaque revision token of the stored document.
    #[serde(rename = "_rev", default)]
    pub rev: String,
    /// Revision that was replaced, present on update/replace results.
    #[serde(rename = "_oldRev", default, skip_serializing_if = "Option::is_none")]
    pub old_rev: Option<String>,
}

/// Server identity, from `GET /api/version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub server: String,
    pub version: String,
    #[serde(default)]
    pub license: Option<String>,
}

/// Server health, from `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Health status (e.g., "healthy").
    pub status: String,
    pub version: String,
}

/// Collection description returned by the thin collection wrappers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(default)]
    pub count: Option<u64>,
}

fn with_deadline(request: Request, deadline: Option<Instant>) -> Request {
    match deadline {
        Some(deadline) => request.deadline(deadline),
        None => request,
    }
}

fn flag(request: Request, name: &str, value: Option<bool>) -> Request {
    match value {
        Some(v) => request.query(name, if v { "true" } else { "false" }),
        None => request,
    }
}

/// Options for document creation. All fields default to the server default.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Return the stored document under `new` in each result.
    /// Default: `false`.
    pub return_new: Option<bool>,
    /// When overwriting, return the prior document under `old`.
    /// Default: `false`.
    pub return_old: Option<bool>,
    /// Replace an existing document with the same key instead of failing
    /// with a unique-constraint violation. Default: `false`.
    pub overwrite: Option<bool>,
    /// Per-call deadline, overriding the client-level request timeout.
    pub deadline: Option<Instant>,
}

impl CreateOptions {
    pub(crate) fn apply(&self, request: Request) -> Request {
        let request = flag(request, "returnNew", self.return_new);
        let request = flag(request, "returnOld", self.return_old);
        let request = flag(request, "overwrite", self.overwrite);
        with_deadline(request, self.deadline)
    }
}

/// Options for document reads.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Fail with precondition-failed unless the stored revision matches.
    pub if_match: Option<String>,
    /// Allow a follower to answer, trading strict consistency for latency.
    /// Default: `false`.
    pub allow_dirty_read: Option<bool>,
    /// Per-call deadline, overriding the client-level request timeout.
    pub deadline: Option<Instant>,
}

impl ReadOptions {
    pub(crate) fn apply(&self, request: Request) -> Request {
        let request = match &self.if_match {
            Some(revision) => request.if_match(revision),
            None => request,
        };
        let request = match self.allow_dirty_read {
            Some(true) => request.header("x-sanchaya-allow-dirty-read", "true"),
            _ => request,
        };
        with_deadline(request, self.deadline)
    }
}

/// Options for partial document updates.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Fail with precondition-failed unless the stored revision matches.
    pub if_match: Option<String>,
    /// Return the updated document under `new`. Default: `false`.
    pub return_new: Option<bool>,
    /// Return the prior document under `old`. Default: `false`.
    pub return_old: Option<bool>,
    /// Keep attributes set to `null` instead of removing them.
    /// Default: `true`.
    pub keep_null: Option<bool>,
    /// Ignore `_rev` fields inside supplied documents instead of treating
    /// them as preconditions. Default: `true`.
    pub ignore_revs: Option<bool>,
    /// Per-call deadline, overriding the client-level request timeout.
    pub deadline: Option<Instant>,
}

impl UpdateOptions {
    pub(crate) fn apply(&self, request: Request) -> Request {
        let request = match &self.if_match {
            Some(revision) => request.if_match(revision),
            None => request,
        };
        let request = flag(request, "returnNew", self.return_new);
        let request = flag(request, "returnOld", self.return_old);
        let request = flag(request, "keepNull", self.keep_null);
        let request = flag(request, "ignoreRevs", self.ignore_revs);
        with_deadline(request, self.deadline)
    }
}

/// Options for full document replacement.
#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    /// Fail with precondition-failed unless the stored revision matches.
    pub if_match: Option<String>,
    /// Return the replacement document under `new`. Default: `false`.
    pub return_new: Option<bool>,
    /// Return the prior document under `old`. Default: `false`.
    pub return_old: Option<bool>,
    /// Ignore `_rev` fields inside supplied documents. Default: `true`.
    pub ignore_revs: Option<bool>,
    /// Per-call deadline, overriding the client-level request timeout.
    pub deadline: Option<Instant>,
}

impl ReplaceOptions {
    pub(crate) fn apply(&self, request: Request) -> Request {
        let request = match &self.if_match {
            Some(revision) => request.if_match(revision),
            None => request,
        };
        let request = flag(request, "returnNew", self.return_new);
        let request = flag(request, "returnOld", self.return_old);
        let request = flag(request, "ignoreRevs", self.ignore_revs);
        with_deadline(request, self.deadline)
    }
}

/// Options for document removal.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Fail with precondition-failed unless the stored revision matches.
    pub if_match: Option<String>,
    /// Return the removed document under `old`. Default: `false`.
    pub return_old: Option<bool>,
    /// Per-call deadline, overriding the client-level request timeout.
    pub deadline: Option<Instant>,
}

impl DeleteOptions {
    pub(crate) fn apply(&self, request: Request) -> Request {
        let request = match &self.if_match {
            Some(revision) => request.if_match(revision),
            None => request,
        };
        let request = flag(request, "returnOld", self.return_old);
        with_deadline(request, self.deadline)
    }
}
