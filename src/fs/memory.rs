//! In-memory object store.
//!
//! Behaves like a single-part S3 bucket: ETags are the quoted MD5 of the
//! stored bytes. Every call is recorded and failures can be injected per
//! key, so engine behaviour can be checked without a network.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::fs::backend::{Inventory, ObjectStore, Payload, RemoteObject, TransferHeaders};
use crate::sync::hash::fingerprint;

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub headers: TransferHeaders,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    puts: Vec<String>,
    deletes: Vec<String>,
    list_calls: usize,
    fail_list: Option<String>,
    fail_put: HashSet<String>,
    fail_delete: HashSet<String>,
    // Keys removed by someone else between listing and delete.
    vanished: HashSet<String>,
    // Remaining transient failures per key before a put succeeds.
    flaky_put: HashMap<String, u32>,
}

/// Object store double backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an object as if it had been uploaded with default headers.
    pub fn insert(&self, key: &str, data: &[u8]) {
        let etag = format!("\"{}\"", fingerprint(data));
        self.insert_with_etag(key, data, &etag);
    }

    /// Seed an object with an explicit ETag.
    pub fn insert_with_etag(&self, key: &str, data: &[u8], etag: &str) {
        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                etag: etag.to_string(),
                headers: TransferHeaders::default(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Keys passed to `put`, in call order (successful calls only).
    pub fn puts(&self) -> Vec<String> {
        self.lock().puts.clone()
    }

    /// Keys passed to `delete`, in call order (successful calls only).
    pub fn deletes(&self) -> Vec<String> {
        self.lock().deletes.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Make every listing fail with an auth error.
    pub fn fail_listing(&self, message: &str) {
        self.lock().fail_list = Some(message.to_string());
    }

    /// Make every put of `key` fail with an auth (non-retryable) error.
    pub fn fail_put(&self, key: &str) {
        self.lock().fail_put.insert(key.to_string());
    }

    /// Make every delete of `key` fail with an auth (non-retryable) error.
    pub fn fail_delete(&self, key: &str) {
        self.lock().fail_delete.insert(key.to_string());
    }

    /// Make the delete of `key` find nothing, as if another client removed
    /// it after the listing.
    pub fn vanish_before_delete(&self, key: &str) {
        self.lock().vanished.insert(key.to_string());
    }

    /// Fail the next `times` puts of `key` with a retryable error.
    pub fn flaky_put(&self, key: &str, times: u32) {
        self.lock().flaky_put.insert(key.to_string(), times);
    }

    /// Forget recorded calls, keeping objects and injected failures.
    pub fn reset_calls(&self) {
        let mut state = self.lock();
        state.puts.clear();
        state.deletes.clear();
        state.list_calls = 0;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_all(&self) -> Result<Inventory, StoreError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if let Some(message) = &state.fail_list {
            return Err(StoreError::Auth(message.clone()));
        }

        Ok(state
            .objects
            .iter()
            .map(|(key, object)| {
                (
                    key.clone(),
                    RemoteObject {
                        key: key.clone(),
                        fingerprint: object.etag.clone(),
                        size: object.data.len() as u64,
                    },
                )
            })
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        payload: &Payload,
        headers: &TransferHeaders,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.lock();
            if state.fail_put.contains(key) {
                return Err(StoreError::Auth(format!("put {} rejected", key)));
            }
            if let Some(remaining) = state.flaky_put.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Network(format!("put {} timed out", key)));
                }
            }
        }

        let data = payload.read_all().await?;
        let etag = format!("\"{}\"", fingerprint(&data));

        let mut state = self.lock();
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                etag,
                headers: headers.clone(),
            },
        );
        state.puts.push(key.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.fail_delete.contains(key) {
            return Err(StoreError::Auth(format!("delete {} rejected", key)));
        }
        if state.vanished.contains(key) {
            state.objects.remove(key);
            return Err(StoreError::NotFound(key.to_string()));
        }
        state.objects.remove(key);
        state.deletes.push(key.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
