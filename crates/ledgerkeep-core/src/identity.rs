//! Natural key to stream identifier mapping.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PersistenceError;

/// Stable internal handle for one aggregate's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Generates a fresh, globally unique stream identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StreamId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Equality strategy for natural key values of one aggregate type.
///
/// Implementations must be consistent: keys that compare equal must hash
/// equal.
pub trait NaturalKeyComparer: Send + Sync + fmt::Debug {
    /// Returns `true` if both keys identify the same aggregate.
    fn equals(&self, a: &Value, b: &Value) -> bool;

    /// Hashes a key consistently with [`NaturalKeyComparer::equals`].
    fn hash(&self, key: &Value) -> u64;
}

/// Default comparer: structural JSON value equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueEquality;

impl NaturalKeyComparer for ValueEquality {
    fn equals(&self, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn hash(&self, key: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        hash_value(key, &mut hasher);
        hasher.finish()
    }
}

/// Hashes a JSON value structurally. Object members are visited in key order
/// whatever order the map keeps them in.
fn hash_value(value: &Value, hasher: &mut DefaultHasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            n.to_string().hash(hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(members) => {
            5u8.hash(hasher);
            members.len().hash(hasher);
            let mut sorted: Vec<_> = members.iter().collect();
            sorted.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            for (name, member) in sorted {
                name.hash(hasher);
                hash_value(member, hasher);
            }
        }
    }
}

/// Case-insensitive comparer for string keys. Non-string keys fall back to
/// [`ValueEquality`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitive;

impl NaturalKeyComparer for CaseInsensitive {
    fn equals(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => ValueEquality.equals(a, b),
        }
    }

    fn hash(&self, key: &Value) -> u64 {
        match key {
            Value::String(s) => {
                let mut hasher = DefaultHasher::new();
                s.to_lowercase().hash(&mut hasher);
                hasher.finish()
            }
            other => ValueEquality.hash(other),
        }
    }
}

/// Lookup key for the identity map.
#[derive(Debug, Clone, Copy)]
pub struct IdentityKey<'a> {
    /// Registered name of the aggregate type.
    pub aggregate_type: &'a str,
    /// Name of the natural key's Rust type.
    pub key_type: &'a str,
    /// The natural key, serialized to JSON.
    pub value: &'a Value,
    /// Equality strategy configured for the aggregate type.
    pub comparer: &'a dyn NaturalKeyComparer,
}

/// Binds natural keys to stream identifiers.
#[async_trait]
pub trait IdentityMap: Send + Sync {
    /// Returns the stream bound to `key`, binding a new one if none exists.
    /// Concurrent callers racing on the same key observe the same winner.
    async fn get_or_add(&self, key: IdentityKey<'_>) -> Result<StreamId, PersistenceError>;

    /// Returns the stream bound to `key` without creating one.
    async fn try_get(&self, key: IdentityKey<'_>) -> Result<Option<StreamId>, PersistenceError>;
}
