use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{KeyedStore, StoreError};

/// In-memory backend. Nothing survives the process.
#[derive(Debug)]
pub struct MemoryStore<V> {
    records: RwLock<BTreeMap<String, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> KeyedStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, id: &str) -> Result<Option<V>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn put(&self, id: &str, value: &V) -> Result<(), StoreError> {
        self.records.write().insert(id.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(id).is_some())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().keys().cloned().collect())
    }
}
