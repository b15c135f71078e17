//! Concurrent property bag shared by every operation in a run.
//!
//! `PropertyBag` is backed by `DashMap`, so parallel branches can write
//! without external locking. Semantics are last-writer-wins. Values are
//! cloned on read so no `DashMap` guard is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::operation::OperationError;

/// Typed property access failed.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("property '{key}' could not be read as the requested type: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("property '{key}' could not be serialized: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<PropertyError> for OperationError {
    fn from(err: PropertyError) -> Self {
        OperationError::Property(err.to_string())
    }
}

/// Concurrent key-value store.
///
/// Cloning produces a shared view of the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    inner: Arc<DashMap<String, Value>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloned value at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    /// Insert or overwrite.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Snapshot of all current keys.
    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Deserialize the value at `key` into `T`. Absent keys yield `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PropertyError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| PropertyError::Deserialize {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Serialize `value` and store it at `key`.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), PropertyError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| PropertyError::Serialize {
            key: key.clone(),
            source,
        })?;
        self.inner.insert(key, value);
        Ok(())
    }

    /// Point-in-time copy of every entry.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Drop every entry and load `properties` in their place.
    pub fn replace(&self, properties: HashMap<String, Value>) {
        self.inner.clear();
        for (key, value) in properties {
            self.inner.insert(key, value);
        }
    }
}
