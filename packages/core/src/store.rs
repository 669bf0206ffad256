//! Durable state store contract.
//!
//! Actor state is persisted as opaque bytes keyed by (kind, key, state name).
//! Writes are conditional on the etag returned by the previous read or write,
//! so two activations of the same key can never silently overwrite each other.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Boxed future returned by [`StateStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Address of one piece of durable actor state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// Entity kind, e.g. `tenant`.
    pub kind: String,
    /// Entity key, e.g. the tenant id.
    pub key: String,
    /// State name within the entity.
    pub name: String,
}

impl StateKey {
    pub fn new(kind: impl Into<String>, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.key, self.name)
    }
}

/// Bytes as last written, plus the etag identifying that write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    pub data: Vec<u8>,
    pub etag: String,
}

/// Errors returned by a state store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("etag conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("state store error: {0}")]
    Backend(String),
}

/// Key-value persistence for actor state.
///
/// Implementations must be safe to use from many actors at once.
pub trait StateStore: Send + Sync + 'static {
    /// Read the current value, or `None` if nothing was ever written.
    fn read<'a>(&'a self, key: &'a StateKey) -> StoreFuture<'a, Option<StoredState>>;

    /// Write `data` if the stored etag equals `expected`.
    ///
    /// `expected = None` means the key must not exist yet. Returns the new etag.
    fn write<'a>(
        &'a self,
        key: &'a StateKey,
        data: Vec<u8>,
        expected: Option<&'a str>,
    ) -> StoreFuture<'a, String>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// In-process state store with fault injection, for tests and single-node
/// development.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<StateKey, StoredState>>,
    next_etag: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail until turned off again.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored value for `key`, bypassing fault injection.
    pub fn raw(&self, key: &StateKey) -> Option<StoredState> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn read_sync(&self, key: &StateKey) -> Result<Option<StoredState>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected read failure for {key}")));
        }
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn write_sync(
        &self,
        key: &StateKey,
        data: Vec<u8>,
        expected: Option<&str>,
    ) -> Result<String, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected write failure for {key}")));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))?;

        let actual = entries.get(key).map(|s| s.etag.as_str());
        if actual != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.map(str::to_string),
                actual: actual.map(str::to_string),
            });
        }

        let etag = (self.next_etag.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        entries.insert(
            key.clone(),
            StoredState {
                data,
                etag: etag.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(etag)
    }
}

impl StateStore for MemoryStateStore {
    fn read<'a>(&'a self, key: &'a StateKey) -> StoreFuture<'a, Option<StoredState>> {
        Box::pin(async move { self.read_sync(key) })
    }

    fn write<'a>(
        &'a self,
        key: &'a StateKey,
        data: Vec<u8>,
        expected: Option<&'a str>,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move { self.write_sync(key, data, expected) })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
