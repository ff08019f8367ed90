//! Process-lifetime memoization for cluster queries
//!
//! The collector is single-shot: list results never go stale within one run,
//! so entries are kept for the life of the process and never invalidated.

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};

/// In-memory cache for Kubernetes list responses
#[derive(Default)]
pub struct Cache {
    memory: DashMap<String, Vec<u8>>,
}

impl Cache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            memory: DashMap::new(),
        }
    }

    /// Get a value from the cache
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.memory
            .get(key)
            .and_then(|entry| serde_json::from_slice(&entry).ok())
    }

    /// Set a value in the cache
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        if let Ok(data) = serde_json::to_vec(value) {
            self.memory.insert(key.to_string(), data);
        }
    }

    /// Get the number of entries in the cache
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Generate a cache key for a list query
    pub fn list_key(
        operation: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> String {
        format!(
            "list:{}:{}:{}:{}",
            operation,
            namespace.unwrap_or("all"),
            label_selector.unwrap_or(""),
            field_selector.unwrap_or(""),
        )
    }
}
