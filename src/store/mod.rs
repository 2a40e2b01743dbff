//! Key-value store seam.
//!
//! The store table delegates all persistence to a [`Store`] implementation:
//! one `get` per GET request, one `put` per POST request, nothing else. The
//! trait carries the full contract this crate consumes from an external store
//! — value bytes, a MIME metadata string persisted alongside them, and an
//! optional expiration directive on writes.
//!
//! [`MemoryStore`] is the in-process implementation used by the tests and the
//! demo server; production deployments supply their own backend.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors surfaced by a store backend.
///
/// Neither the router nor the store table catches these; they propagate
/// through dispatch to the entry point, which decides how to answer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A value read from the store.
///
/// An absent key reads back as an empty value with no metadata; this layer
/// never asks the store to distinguish "absent" from "empty".
#[derive(Debug, Clone, Default)]
pub struct StoredEntry {
    /// Raw value bytes. Empty when the key is absent.
    pub value: Bytes,
    /// MIME type persisted alongside the value, if any.
    pub metadata: Option<String>,
}

/// Options accompanying a write.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// MIME type to persist alongside the value.
    pub metadata: Option<String>,
    /// Absolute expiration time in unix seconds.
    pub expiration: Option<u64>,
}

/// The get/put contract consumed from an external key-value store.
///
/// Implementations must be cheap to share (`&self` methods, `Send + Sync`);
/// one instance typically backs every store table in the handler tree.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the value and metadata for `key`.
    async fn get(&self, key: &str) -> Result<StoredEntry, StoreError>;

    /// Writes `value` under `key` with the given options.
    async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    metadata: Option<String>,
    expiration: Option<u64>,
}

/// An in-memory [`Store`] backed by a `HashMap` behind a tokio `RwLock`.
///
/// Honors the expiration directive on read: an entry whose expiration time
/// has passed reads back as absent.
///
/// # Examples
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use edgekv::store::{MemoryStore, PutOptions, Store};
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///     let opts = PutOptions {
///         metadata: Some("text/plain".to_owned()),
///         expiration: None,
///     };
///     store.put("greeting", Bytes::from_static(b"hello"), opts).await.unwrap();
///
///     let entry = store.get("greeting").await.unwrap();
///     assert_eq!(entry.metadata.as_deref(), Some("text/plain"));
/// }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<StoredEntry, StoreError> {
        let entries = self.entries.read().await;
        let entry = match entries.get(key) {
            Some(entry) => entry,
            None => return Ok(StoredEntry::default()),
        };

        if let Some(expiration) = entry.expiration {
            if expiration <= unix_now() {
                return Ok(StoredEntry::default());
            }
        }

        Ok(StoredEntry {
            value: entry.value.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_owned(),
            MemoryEntry {
                value,
                metadata: opts.metadata,
                expiration: opts.expiration,
            },
        );
        Ok(())
    }
}
