//! In-memory identity map.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use ledgerkeep_core::error::PersistenceError;
use ledgerkeep_core::identity::{IdentityKey, IdentityMap, StreamId};

#[derive(Debug)]
struct Binding {
    value: Value,
    stream_id: StreamId,
}

/// Bindings for one (aggregate type, key type) pair, bucketed by the
/// comparer's hash.
type Table = HashMap<u64, Vec<Binding>>;

/// Identity map held in process memory. Bindings are never removed.
#[derive(Debug, Default)]
pub struct MemoryIdentityMap {
    tables: RwLock<HashMap<(String, String), Table>>,
}

impl MemoryIdentityMap {
    /// Creates an empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bindings held across all aggregate types.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Infrastructure` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, PersistenceError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum())
    }

    /// Returns `true` if no key has been bound.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Infrastructure` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, PersistenceError> {
        Ok(self.len()? == 0)
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Infrastructure("identity map lock poisoned".into())
}

fn table_key(key: &IdentityKey<'_>) -> (String, String) {
    (key.aggregate_type.to_owned(), key.key_type.to_owned())
}

fn find(
    tables: &HashMap<(String, String), Table>,
    key: &IdentityKey<'_>,
    hash: u64,
) -> Option<StreamId> {
    tables
        .get(&table_key(key))
        .and_then(|table| table.get(&hash))
        .and_then(|bucket| {
            bucket
                .iter()
                .find(|binding| key.comparer.equals(&binding.value, key.value))
        })
        .map(|binding| binding.stream_id)
}

#[async_trait]
impl IdentityMap for MemoryIdentityMap {
    async fn get_or_add(&self, key: IdentityKey<'_>) -> Result<StreamId, PersistenceError> {
        let hash = key.comparer.hash(key.value);
        {
            let tables = self.tables.read().map_err(|_| poisoned())?;
            if let Some(stream_id) = find(&tables, &key, hash) {
                return Ok(stream_id);
            }
        }

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        // Another writer may have bound the key between the two locks.
        if let Some(stream_id) = find(&tables, &key, hash) {
            return Ok(stream_id);
        }
        let stream_id = StreamId::new();
        tables
            .entry(table_key(&key))
            .or_default()
            .entry(hash)
            .or_default()
            .push(Binding {
                value: key.value.clone(),
                stream_id,
            });
        debug!(
            aggregate_type = key.aggregate_type,
            natural_key = %key.value,
            stream_id = %stream_id,
            "bound natural key"
        );
        Ok(stream_id)
    }

    async fn try_get(&self, key: IdentityKey<'_>) -> Result<Option<StreamId>, PersistenceError> {
        let hash = key.comparer.hash(key.value);
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(find(&tables, &key, hash))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ledgerkeep_core::identity::{CaseInsensitive, NaturalKeyComparer, ValueEquality};
    use serde_json::json;

    use super::*;

    fn key<'a>(value: &'a Value, comparer: &'a dyn NaturalKeyComparer) -> IdentityKey<'a> {
        IdentityKey {
            aggregate_type: "subject",
            key_type: "alloc::string::String",
            value,
            comparer,
        }
    }

    #[tokio::test]
    async fn test_get_or_add_returns_existing_binding() {
        // Arrange
        let map = MemoryIdentityMap::new();
        let value = json!("test");

        // Act
        let first = map.get_or_add(key(&value, &ValueEquality)).await.unwrap();
        let second = map.get_or_add(key(&value, &ValueEquality)).await.unwrap();

        // Assert
        assert_eq!(first, second);
        assert_eq!(map.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_try_get_does_not_create_binding() {
        let map = MemoryIdentityMap::new();
        let value = json!("missing");

        let found = map.try_get(key(&value, &ValueEquality)).await.unwrap();

        assert!(found.is_none());
        assert!(map.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_case_insensitive_keys_share_a_stream() {
        // Arrange
        let map = MemoryIdentityMap::new();
        let lower = json!("alice");
        let upper = json!("ALICE");

        // Act
        let bound = map.get_or_add(key(&lower, &CaseInsensitive)).await.unwrap();
        let found = map.try_get(key(&upper, &CaseInsensitive)).await.unwrap();

        // Assert
        assert_eq!(found, Some(bound));
    }

    #[tokio::test]
    async fn test_value_equality_keys_differing_in_case_get_separate_streams() {
        let map = MemoryIdentityMap::new();
        let lower = json!("alice");
        let upper = json!("ALICE");

        let a = map.get_or_add(key(&lower, &ValueEquality)).await.unwrap();
        let b = map.get_or_add(key(&upper, &ValueEquality)).await.unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_bindings_are_scoped_by_aggregate_type() {
        let map = MemoryIdentityMap::new();
        let value = json!("shared");
        let other = IdentityKey {
            aggregate_type: "other",
            ..key(&value, &ValueEquality)
        };

        let a = map.get_or_add(key(&value, &ValueEquality)).await.unwrap();
        let b = map.get_or_add(other).await.unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_add_converges_on_one_stream() {
        // Arrange
        let map = Arc::new(MemoryIdentityMap::new());

        // Act
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let map = Arc::clone(&map);
                tokio::spawn(async move {
                    let value = json!("contended");
                    map.get_or_add(key(&value, &ValueEquality)).await.unwrap()
                })
            })
            .collect();
        let mut winners = Vec::new();
        for handle in handles {
            winners.push(handle.await.unwrap());
        }

        // Assert
        assert!(winners.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(map.len().unwrap(), 1);
    }
}
