//! Consensus config store and the distributed lock helper
//!
//! The config store is the deployment's consensus key-value space. Writes
//! carry compare-and-swap preconditions; a contacted follower answers with
//! a leader redirect, which the dispatch core follows transparently. The
//! lock helper layers retry-with-backoff acquisition on top and sits above
//! the core — nothing in the transport depends on it.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::client::SanchayaClient;
use crate::error::SanchayaResult;
use crate::request::{Method, Request};

/// One atomic config-store write: assignments, removals, and the
/// preconditions that must hold for any of it to apply.
#[derive(Debug, Default)]
pub struct WriteTransaction {
    set: Map<String, Value>,
    delete: Vec<String>,
    preconditions: Map<String, Value>,
}

impl WriteTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.set.insert(key.to_string(), value);
        self
    }

    pub fn delete(mut self, key: &str) -> Self {
        self.delete.push(key.to_string());
        self
    }

    /// Require that `key` holds no value.
    pub fn old_empty(mut self, key: &str) -> Self {
        self.preconditions
            .insert(key.to_string(), json!({ "oldEmpty": true }));
        self
    }

    /// Require that `key` currently holds exactly `value`.
    pub fn old_equals(mut self, key: &str, value: Value) -> Self {
        self.preconditions
            .insert(key.to_string(), json!({ "old": value }));
        self
    }

    fn into_body(self) -> Value {
        json!({
            "set": Value::Object(self.set),
            "delete": self.delete,
            "precondition": Value::Object(self.preconditions),
        })
    }
}

/// Capability interface over the consensus key-value space.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current values at the given keys. Missing keys are absent from the
    /// result.
    async fn read(&self, keys: &[&str]) -> SanchayaResult<Map<String, Value>>;

    /// Apply a transaction. `Ok(false)` means a precondition did not hold;
    /// nothing was changed.
    async fn write(&self, transaction: WriteTransaction) -> SanchayaResult<bool>;
}

/// Config-store client backed by a [`SanchayaClient`].
pub struct ConfigStoreClient {
    client: SanchayaClient,
}

impl ConfigStoreClient {
    pub(crate) fn new(client: SanchayaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigStore for ConfigStoreClient {
    async fn read(&self, keys: &[&str]) -> SanchayaResult<Map<String, Value>> {
        let body = self.client.encoding().encode(&json!({ "keys": keys }))?;
        let request = Request::new(Method::POST, ["api", "config", "read"]).body_bytes(body);
        self.client.request_json(request).await
    }

    async fn write(&self, transaction: WriteTransaction) -> SanchayaResult<bool> {
        let body = self.client.encoding().encode(&transaction.into_body())?;
        let request = Request::new(Method::POST, ["api", "config", "write"]).body_bytes(body);
        match self.client.execute(request).await {
            Ok(response) => {
                response.bytes().await?;
                Ok(true)
            }
            Err(e) if e.is_precondition_failed() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A named lock in the config store, held by compare-and-swap writes.
///
/// The holder entry records an owner id and an expiry, so a crashed holder
/// is displaced once its lease runs out.
pub struct DistributedLock<S: ConfigStore> {
    store: S,
    key: String,
    id: String,
    ttl: Duration,
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

impl<S: ConfigStore> DistributedLock<S> {
    pub fn new(store: S, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            id: format!("{:016x}", rand::thread_rng().gen::<u64>()),
            ttl,
        }
    }

    /// Unique owner id of this lock instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Try to take the lock, retrying with jittered backoff until `wait`
    /// elapses. `Ok(false)` means someone else held it the whole time.
    pub async fn acquire(&self, wait: Duration) -> SanchayaResult<bool> {
        let deadline = Instant::now() + wait;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.try_acquire().await? {
                debug!(key = %self.key, id = %self.id, "lock acquired");
                return Ok(true);
            }
            if Instant::now() + backoff >= deadline {
                return Ok(false);
            }
            let jitter = rand::thread_rng().gen_range(0..backoff.as_millis().max(1) as u64);
            tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn try_acquire(&self) -> SanchayaResult<bool> {
        let now = unix_now();
        let entry = json!({
            "owner": self.id,
            "expires": now + self.ttl.as_secs(),
        });

        // Common case: nobody holds the key.
        let fresh = WriteTransaction::new()
            .set(&self.key, entry.clone())
            .old_empty(&self.key);
        if self.store.write(fresh).await? {
            return Ok(true);
        }

        // Displace a holder whose lease expired, conditional on the exact
        // entry we observed.
        let current = self.store.read(&[&self.key]).await?;
        match current.get(&self.key) {
            Some(held) if lease_expired(held, now) => {
                let takeover = WriteTransaction::new()
                    .set(&self.key, entry)
                    .old_equals(&self.key, held.clone());
                self.store.write(takeover).await
            }
            _ => Ok(false),
        }
    }

    /// Release the lock if this instance still owns it. `Ok(false)` means
    /// the lock was not ours to release (expired and taken over, or never
    /// acquired).
    pub async fn release(&self) -> SanchayaResult<bool> {
        let current = self.store.read(&[&self.key]).await?;
        match current.get(&self.key) {
            Some(held) if held.get("owner").and_then(Value::as_str) == Some(&self.id) => {
                let removal = WriteTransaction::new()
                    .delete(&self.key)
                    .old_equals(&self.key, held.clone());
                self.store.write(removal).await
            }
            _ => Ok(false),
        }
    }
}

fn lease_expired(entry: &Value, now: u64) -> bool {
    entry
        .get("expires")
        .and_then(Value::as_u64)
        .map(|expires| expires <= now)
        .unwrap_or(true)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory config store with real CAS semantics.
    #[derive(Default)]
    struct MemoryStore {
        data: Mutex<Map<String, Value>>,
    }

    #[async_trait]
    impl ConfigStore for MemoryStore {
        async fn read(&self, keys: &[&str]) -> SanchayaResult<Map<String, Value>> {
            let data = self.data.lock().unwrap();
            Ok(keys
                .iter()
                .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect())
        }

        async fn write(&self, transaction: WriteTransaction) -> SanchayaResult<bool> {
            let mut data = self.data.lock().unwrap();
            for (key, condition) in &transaction.preconditions {
                let holds = if condition.get("oldEmpty").is_some() {
                    !data.contains_key(key)
                } else {
                    data.get(key) == condition.get("old")
                };
                if !holds {
                    return Ok(false);
                }
            }
            for (key, value) in transaction.set {
                data.insert(key, value);
            }
            for key in transaction.delete {
                data.remove(&key);
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_acquire_fresh_key() {
        let lock = DistributedLock::new(MemoryStore::default(), "locks/job", Duration::from_secs(60));
        assert!(lock.acquire(Duration::from_millis(100)).await.unwrap());
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let store = MemoryStore::default();
        store
            .write(
                WriteTransaction::new().set(
                    "locks/job",
                    json!({"owner": "someone-else", "expires": unix_now() + 3600}),
                ),
            )
            .await
            .unwrap();

        let lock = DistributedLock::new(store, "locks/job", Duration::from_secs(60));
        assert!(!lock.acquire(Duration::from_millis(120)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_holder_is_displaced() {
        let store = MemoryStore::default();
        store
            .write(
                WriteTransaction::new().set(
                    "locks/job",
                    json!({"owner": "crashed", "expires": unix_now() - 10}),
                ),
            )
            .await
            .unwrap();

        let lock = DistributedLock::new(store, "locks/job", Duration::from_secs(60));
        assert!(lock.acquire(Duration::from_millis(100)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let store = MemoryStore::default();
        store
            .write(
                WriteTransaction::new().set(
                    "locks/job",
                    json!({"owner": "someone-else", "expires": unix_now() + 3600}),
                ),
            )
            .await
            .unwrap();

        let lock = DistributedLock::new(store, "locks/job", Duration::from_secs(60));
        assert!(!lock.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_then_release_round_trip() {
        let lock = DistributedLock::new(MemoryStore::default(), "locks/job", Duration::from_secs(60));
        assert!(lock.acquire(Duration::from_millis(100)).await.unwrap());
        assert!(lock.release().await.unwrap());
        // Released: a second release has nothing to remove.
        assert!(!lock.release().await.unwrap());
    }
}
