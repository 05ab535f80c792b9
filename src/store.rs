//! Ordered Key-Value Storage Abstraction
//!
//! Trait-based storage contract for the stream service, with an in-memory
//! backend as the only implementation for now.
//!
//! The service keeps one shared namespace for stream metadata and one
//! namespace per stream for its record log. Keys are compared
//! byte-lexicographically, scans are forward-only with explicit bounds,
//! and batches apply atomically within a namespace.
//!
//! ## Implementations
//!
//! - `MemoryStore`: the only backend shipped. The emulated service's real
//!   storage engine is an external collaborator; everything here runs
//!   in-process.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Error type for store operations.
///
/// `Closed` and `NotFound` are the two tolerated failures for background
/// tasks; anything else is treated as fatal by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store has been closed; no further operations are possible.
    Closed,
    /// Namespace or key not found.
    NotFound(String),
    /// A stored value failed to decode.
    Corruption(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Closed => write!(f, "store is not open"),
            StoreError::NotFound(what) => write!(f, "not found: {}", what),
            StoreError::Corruption(msg) => write!(f, "store corruption: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// A single operation within an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Namespaced ordered key-value store.
///
/// Object-safe so services can hold `Arc<dyn OrderedStore>` and clone the
/// handle into background tasks.
pub trait OrderedStore: Send + Sync {
    /// Point read. `Ok(None)` when the key is absent.
    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Point write, creating the namespace if needed.
    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Point delete. Deleting an absent key is not an error.
    fn delete(&self, ns: &str, key: &[u8]) -> Result<(), StoreError>;

    /// Apply a batch of puts/deletes atomically within one namespace.
    fn write_batch(&self, ns: &str, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Forward range scan in byte-lexicographic key order.
    fn scan(
        &self,
        ns: &str,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// List keys in order, starting strictly after `start_after` when given.
    fn list_keys(
        &self,
        ns: &str,
        start_after: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Drop an entire namespace and its contents.
    fn delete_namespace(&self, ns: &str) -> Result<(), StoreError>;

    /// Close the store. All subsequent operations return `StoreError::Closed`.
    fn close(&self);

    fn is_open(&self) -> bool;
}

// ============================================================================
// MemoryStore
// ============================================================================

struct MemoryStoreInner {
    open: bool,
    namespaces: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// In-memory store backed by one `BTreeMap` per namespace.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                open: true,
                namespaces: HashMap::new(),
            })),
        }
    }

    /// Number of keys in a namespace (testing hook).
    pub fn key_count(&self, ns: &str) -> usize {
        let inner = self.inner.lock();
        inner.namespaces.get(ns).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_open(inner: &MemoryStoreInner) -> Result<(), StoreError> {
    if inner.open {
        Ok(())
    } else {
        Err(StoreError::Closed)
    }
}

impl OrderedStore for MemoryStore {
    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.lock();
        check_open(&inner)?;
        Ok(inner
            .namespaces
            .get(ns)
            .and_then(|m| m.get(key))
            .cloned())
    }

    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        check_open(&inner)?;
        inner
            .namespaces
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: &str, key: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        check_open(&inner)?;
        if let Some(m) = inner.namespaces.get_mut(ns) {
            m.remove(key);
        }
        Ok(())
    }

    fn write_batch(&self, ns: &str, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        check_open(&inner)?;
        let m = inner.namespaces.entry(ns.to_string()).or_default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    m.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    m.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan(
        &self,
        ns: &str,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let inner = self.inner.lock();
        check_open(&inner)?;
        let Some(m) = inner.namespaces.get(ns) else {
            return Ok(Vec::new());
        };
        let limit = limit.unwrap_or(usize::MAX);
        Ok(m.range((start, end))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn list_keys(
        &self,
        ns: &str,
        start_after: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let start = match start_after {
            Some(k) => Bound::Excluded(k.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(self
            .scan(ns, start, Bound::Unbounded, limit)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    fn delete_namespace(&self, ns: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        check_open(&inner)?;
        inner.namespaces.remove(ns);
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }
}
