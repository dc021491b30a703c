use crate::StoreError;

/// Record storage keyed by requirement ID.
///
/// Implementations give read-after-write consistency: a `get` issued after a
/// `put` returned sees the written record.
pub trait KeyedStore<V>: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<V>, StoreError>;

    /// Insert or replace the record under `id`.
    fn put(&self, id: &str, value: &V) -> Result<(), StoreError>;

    /// Returns whether a record existed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All stored IDs, sorted.
    fn ids(&self) -> Result<Vec<String>, StoreError>;
}
