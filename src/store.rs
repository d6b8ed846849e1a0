//! In-process message store.
//!
//! [`MemStore`] implements the substrate contract with a concurrent map so
//! two streams in the same process can form a loopback pair. It is also the
//! test harness substrate; wrappers that drop or mangle values layer on top
//! of it to simulate a hostile store.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::error::StoreError;
use crate::core::traits::{MessageStore, StoreKey};

/// A fixed-payload in-memory [`MessageStore`].
pub struct MemStore {
    payload_size: usize,
    values: DashMap<StoreKey, Vec<u8>>,
}

impl MemStore {
    /// Create a store whose values are all exactly `payload_size` bytes.
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload_size,
            values: DashMap::new(),
        }
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove the value under `key`, if any.
    pub fn remove(&self, key: &StoreKey) -> Option<Vec<u8>> {
        self.values.remove(key).map(|(_, value)| value)
    }
}

#[async_trait]
impl MessageStore for MemStore {
    fn payload_size(&self) -> usize {
        self.payload_size
    }

    async fn put(&self, key: StoreKey, value: Vec<u8>) -> Result<(), StoreError> {
        if value.len() != self.payload_size {
            return Err(StoreError::Fatal(format!(
                "value of {} bytes, store requires exactly {}",
                value.len(),
                self.payload_size
            )));
        }
        self.values.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: StoreKey) -> Result<Vec<u8>, StoreError> {
        self.values
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }
}
