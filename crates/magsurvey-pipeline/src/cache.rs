//! Result caching for stage outputs.
//!
//! Values are bincode-encoded stage outputs. Keys are built from dataset ids
//! and the parameters that change the result, so a key identifies one output
//! for as long as the underlying files do not change.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use magsurvey_io::DatasetId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PipelineError;

/// A byte store with optional expiry.
///
/// Implementations must be safe to share between threads. A miss and an
/// expired entry look the same to the caller.
pub trait ResultCache: Send + Sync {
    /// Return the value stored under `key`, if present and not expired.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value. A `ttl` of
    /// `None` never expires.
    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ResultCache for NoCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) {}
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires: Option<Instant>,
}

/// A process-local [`ResultCache`] behind a mutex.
///
/// Expired entries are evicted when looked up, and every insert sweeps out
/// all entries that have expired.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of stored entries, including expired ones not yet
    /// evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Return true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // entries are replaced whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.lock();
        let expired = entries
            .get(key)?
            .expires
            .is_some_and(|at| Instant::now() >= at);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires = ttl.and_then(|ttl| now.checked_add(ttl));
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires.is_none_or(|at| now < at));
        let n_swept = before - entries.len();
        if n_swept > 0 {
            debug!(n_swept, "swept expired cache entries");
        }
        entries.insert(key.to_string(), Entry { value, expires });
    }
}

/// Decode the value under `key`.
///
/// # Errors
///
/// Returns [`PipelineError::Cache`] if an entry exists but cannot be decoded.
pub(crate) fn load<T: DeserializeOwned>(
    cache: &dyn ResultCache,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    let Some(bytes) = cache.get(key) else {
        debug!(key, "cache miss");
        return Ok(None);
    };
    let value = bincode::deserialize(&bytes).map_err(|e| PipelineError::Cache {
        key: key.to_string(),
        source: e,
    })?;
    debug!(key, n_bytes = bytes.len(), "cache hit");
    Ok(Some(value))
}

/// Encode `value` and store it under `key`.
///
/// # Errors
///
/// Returns [`PipelineError::Cache`] if the value cannot be encoded.
pub(crate) fn store<T: Serialize>(
    cache: &dyn ResultCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), PipelineError> {
    let bytes = bincode::serialize(value).map_err(|e| PipelineError::Cache {
        key: key.to_string(),
        source: e,
    })?;
    cache.put(key, bytes, ttl);
    Ok(())
}

/// Key of a diurnal correction: the survey id and the `;`-joined observatory
/// ids, in the order given.
#[must_use]
pub fn diurnal_key(survey: &DatasetId, observatories: &[DatasetId], window: usize) -> String {
    let joined: Vec<&str> = observatories.iter().map(DatasetId::as_str).collect();
    format!("diurnal:{survey}:{}:w{window}", joined.join(";"))
}

/// Key of a residual extraction over the series identified by `source`.
#[must_use]
pub fn residuals_key(source: &str, fingerprint: &str) -> String {
    format!("residuals:{source}:{fingerprint}")
}

/// Key of a masked grid built from the residuals under `residuals`.
#[must_use]
pub fn grid_key(residuals: &str, fingerprint: &str) -> String {
    format!("grid:{residuals}:{fingerprint}")
}
