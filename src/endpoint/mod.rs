//! Endpoint set and selection policies
//!
//! The resolver owns the set of known server base URLs and picks one per
//! outgoing call. Two policies are provided: round-robin with last-good
//! affinity, and Maglev consistent hashing keyed by database name. The set
//! is mutable under concurrent `resolve` calls from in-flight requests.

mod maglev;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use maglev::MaglevTable;

use crate::error::{SanchayaError, SanchayaResult};

/// One network address of a server node: a normalized base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self(raw.trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(raw: &str) -> Self {
        Endpoint::new(raw)
    }
}

/// Selection policy over a mutable endpoint set.
///
/// Implementations are safe under concurrent `resolve` calls; `update`
/// atomically replaces the whole set.
pub trait EndpointResolver: Send + Sync {
    /// Select the endpoint for a new call. `key` is the routing key
    /// (database name) for policies that use one.
    fn resolve(&self, key: Option<&str>) -> SanchayaResult<Endpoint>;

    /// Atomically replace the known set. An empty set is a configuration
    /// error and leaves the current set in place.
    fn update(&self, endpoints: Vec<Endpoint>) -> SanchayaResult<()>;

    /// The endpoint ordered after `prev`, wrapping at the end. Used by the
    /// failover controller to rotate away from a failing node.
    fn next_after(&self, prev: &Endpoint) -> SanchayaResult<Endpoint>;

    /// Record that a call succeeded against `endpoint` after a failover, so
    /// subsequent calls prefer it.
    fn note_success(&self, endpoint: &Endpoint);

    /// Record that `endpoint` failed, dropping any affinity to it.
    fn note_failure(&self, endpoint: &Endpoint);

    /// Snapshot of the current set.
    fn endpoints(&self) -> Vec<Endpoint>;
}

fn non_empty(endpoints: Vec<Endpoint>) -> SanchayaResult<Vec<Endpoint>> {
    if endpoints.is_empty() {
        return Err(SanchayaError::NoEndpoints);
    }
    Ok(endpoints)
}

fn ordinal_after(set: &[Endpoint], prev: &Endpoint) -> SanchayaResult<Endpoint> {
    if set.is_empty() {
        return Err(SanchayaError::NoEndpoints);
    }
    match set.iter().position(|e| e == prev) {
        Some(pos) => Ok(set[(pos + 1) % set.len()].clone()),
        // prev left the set in a topology update; start from the front
        None => Ok(set[0].clone()),
    }
}

/// Cycles deterministically through the set with a thread-safe counter.
/// After a successful failover, the last good endpoint is preferred until
/// it fails or leaves the set.
pub struct RoundRobinResolver {
    set: RwLock<Vec<Endpoint>>,
    cursor: AtomicUsize,
    preferred: RwLock<Option<Endpoint>>,
}

impl RoundRobinResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> SanchayaResult<Self> {
        Ok(Self {
            set: RwLock::new(non_empty(endpoints)?),
            cursor: AtomicUsize::new(0),
            preferred: RwLock::new(None),
        })
    }
}

impl EndpointResolver for RoundRobinResolver {
    fn resolve(&self, _key: Option<&str>) -> SanchayaResult<Endpoint> {
        if let Some(preferred) = self.preferred.read().unwrap().clone() {
            return Ok(preferred);
        }
        let set = self.set.read().unwrap();
        if set.is_empty() {
            return Err(SanchayaError::NoEndpoints);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % set.len();
        Ok(set[idx].clone())
    }

    fn update(&self, endpoints: Vec<Endpoint>) -> SanchayaResult<()> {
        let endpoints = non_empty(endpoints)?;
        let mut set = self.set.write().unwrap();
        let mut preferred = self.preferred.write().unwrap();
        if let Some(p) = preferred.as_ref() {
            if !endpoints.contains(p) {
                *preferred = None;
            }
        }
        *set = endpoints;
        Ok(())
    }

    fn next_after(&self, prev: &Endpoint) -> SanchayaResult<Endpoint> {
        ordinal_after(&self.set.read().unwrap(), prev)
    }

    fn note_success(&self, endpoint: &Endpoint) {
        if self.set.read().unwrap().contains(endpoint) {
            *self.preferred.write().unwrap() = Some(endpoint.clone());
        }
    }

    fn note_failure(&self, endpoint: &Endpoint) {
        let mut preferred = self.preferred.write().unwrap();
        if preferred.as_ref() == Some(endpoint) {
            *preferred = None;
        }
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.set.read().unwrap().clone()
    }
}

/// Consistent-hash policy: a routing key (database name) deterministically
/// maps to one endpoint through a Maglev table, minimizing key churn on
/// membership change. Keyless calls fall back to round-robin.
pub struct MaglevResolver {
    inner: RwLock<MaglevState>,
    cursor: AtomicUsize,
}

struct MaglevState {
    set: Vec<Endpoint>,
    table: MaglevTable,
}

impl MaglevState {
    fn build(set: Vec<Endpoint>) -> Self {
        let names: Vec<String> = set.iter().map(|e| e.as_str().to_string()).collect();
        let table = MaglevTable::build(&names);
        Self { set, table }
    }
}

impl MaglevResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> SanchayaResult<Self> {
        Ok(Self {
            inner: RwLock::new(MaglevState::build(non_empty(endpoints)?)),
            cursor: AtomicUsize::new(0),
        })
    }
}

impl EndpointResolver for MaglevResolver {
    fn resolve(&self, key: Option<&str>) -> SanchayaResult<Endpoint> {
        let inner = self.inner.read().unwrap();
        if inner.set.is_empty() {
            return Err(SanchayaError::NoEndpoints);
        }
        match key {
            Some(key) => {
                let idx = inner.table.lookup(key).ok_or(SanchayaError::NoEndpoints)?;
                Ok(inner.set[idx].clone())
            }
            None => {
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % inner.set.len();
                Ok(inner.set[idx].clone())
            }
        }
    }

    fn update(&self, endpoints: Vec<Endpoint>) -> SanchayaResult<()> {
        let endpoints = non_empty(endpoints)?;
        *self.inner.write().unwrap() = MaglevState::build(endpoints);
        Ok(())
    }

    fn next_after(&self, prev: &Endpoint) -> SanchayaResult<Endpoint> {
        ordinal_after(&self.inner.read().unwrap().set, prev)
    }

    // Keyed affinity is positional in the table; a transient failure does
    // not change the mapping.
    fn note_success(&self, _endpoint: &Endpoint) {}

    fn note_failure(&self, _endpoint: &Endpoint) {}

    fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.read().unwrap().set.clone()
    }
}
