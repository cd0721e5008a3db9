//! Per-aggregate-type metadata and the registry that holds it.
//!
//! An [`AggregateType`] records everything the repository needs to persist
//! one aggregate type: how to read its natural key and compare key values,
//! how to build an uninitialized instance, how to capture and restore its
//! memento, and which decoder turns each stored event type tag back into the
//! aggregate's event enum. A [`TypeRegistry`] is the explicit context the
//! repository is constructed with; independent registries share nothing.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::aggregate::AggregateRoot;
use crate::error::PersistenceError;
use crate::identity::{NaturalKeyComparer, ValueEquality};

type KeySelector<A> = Box<dyn Fn(&A) -> Option<Result<Value, serde_json::Error>> + Send + Sync>;
type Factory<A> = Box<dyn Fn() -> A + Send + Sync>;
type Capture<A> = Box<dyn Fn(&A) -> Result<Value, serde_json::Error> + Send + Sync>;
type Restore<A> = Box<dyn Fn(&mut A, Value) -> Result<(), serde_json::Error> + Send + Sync>;
type Decoder<E> = Box<dyn Fn(Value) -> Result<E, serde_json::Error> + Send + Sync>;

struct NaturalKey<A> {
    key_type: &'static str,
    select: KeySelector<A>,
}

struct Memento<A> {
    capture: Capture<A>,
    restore: Restore<A>,
}

/// Persistence metadata for one aggregate type.
pub struct AggregateType<A: AggregateRoot> {
    name: String,
    natural_key: Option<NaturalKey<A>>,
    comparer: Arc<dyn NaturalKeyComparer>,
    factory: Option<Factory<A>>,
    memento: Option<Memento<A>>,
    decoders: HashMap<&'static str, Decoder<A::Event>>,
}

impl<A: AggregateRoot> AggregateType<A> {
    /// Starts a registration named after the Rust type.
    #[must_use]
    pub fn new() -> Self {
        Self::named(type_name::<A>())
    }

    /// Starts a registration under an explicit, build-stable name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            natural_key: None,
            comparer: Arc::new(ValueEquality),
            factory: None,
            memento: None,
            decoders: HashMap::new(),
        }
    }

    /// Declares the natural key. `select` returns `None` while the key has no
    /// value.
    #[must_use]
    pub fn natural_key<K, F>(mut self, select: F) -> Self
    where
        K: Serialize + 'static,
        F: Fn(&A) -> Option<K> + Send + Sync + 'static,
    {
        self.natural_key = Some(NaturalKey {
            key_type: type_name::<K>(),
            select: Box::new(move |aggregate| select(aggregate).map(serde_json::to_value)),
        });
        self
    }

    /// Overrides the natural key equality strategy.
    #[must_use]
    pub fn compare_keys_with(mut self, comparer: impl NaturalKeyComparer + 'static) -> Self {
        self.comparer = Arc::new(comparer);
        self
    }

    /// Registers the factory producing uninitialized instances for
    /// reconstitution.
    #[must_use]
    pub fn factory(mut self, factory: impl Fn() -> A + Send + Sync + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Registers the memento projection.
    #[must_use]
    pub fn memento<M, C, R>(mut self, capture: C, restore: R) -> Self
    where
        M: Serialize + DeserializeOwned,
        C: Fn(&A) -> M + Send + Sync + 'static,
        R: Fn(&mut A, M) + Send + Sync + 'static,
    {
        self.memento = Some(Memento {
            capture: Box::new(move |aggregate| serde_json::to_value(capture(aggregate))),
            restore: Box::new(move |aggregate, value| {
                restore(aggregate, serde_json::from_value(value)?);
                Ok(())
            }),
        });
        self
    }

    /// Maps an event type tag to the payload type stored under it and the
    /// variant that wraps it.
    #[must_use]
    pub fn event<P, F>(mut self, event_type: &'static str, wrap: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(P) -> A::Event + Send + Sync + 'static,
    {
        self.decoders.insert(
            event_type,
            Box::new(move |payload| serde_json::from_value::<P>(payload).map(&wrap)),
        );
        self
    }

    /// The registered name, used as the identity map's type discriminator.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The natural key's Rust type name, if a key is declared.
    #[must_use]
    pub fn key_type(&self) -> Option<&'static str> {
        self.natural_key.as_ref().map(|key| key.key_type)
    }

    /// The natural key equality strategy.
    #[must_use]
    pub fn comparer(&self) -> &dyn NaturalKeyComparer {
        self.comparer.as_ref()
    }

    /// Returns `true` if `event_type` can be decoded on load.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Reads the aggregate's natural key as JSON, along with the key's type
    /// name.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Configuration` if no natural key is
    /// declared, `PersistenceError::NullNaturalKey` if it has no value, and
    /// `PersistenceError::Serialization` if it cannot be serialized.
    pub fn natural_key_of(&self, aggregate: &A) -> Result<(&'static str, Value), PersistenceError> {
        let key = self.natural_key.as_ref().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "cannot save aggregate of type {} as there is no natural key defined",
                self.name
            ))
        })?;
        match (key.select)(aggregate) {
            Some(value) => Ok((key.key_type, value?)),
            None => Err(PersistenceError::NullNaturalKey {
                aggregate_type: self.name.clone(),
            }),
        }
    }

    /// Builds an uninitialized instance.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Configuration` if no factory is registered.
    pub fn create(&self) -> Result<A, PersistenceError> {
        let factory = self.factory.as_ref().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "aggregate of type {} does not have a factory registered",
                self.name
            ))
        })?;
        Ok(factory())
    }

    /// Captures the aggregate's memento.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Configuration` if no memento projection is
    /// registered and `PersistenceError::Serialization` if capture fails.
    pub fn capture(&self, aggregate: &A) -> Result<Value, PersistenceError> {
        let memento = self.memento_projection()?;
        Ok((memento.capture)(aggregate)?)
    }

    /// Restores a memento onto an uninitialized instance.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Configuration` if no memento projection is
    /// registered and `PersistenceError::Serialization` if the memento does
    /// not match the projection's shape.
    pub fn restore(&self, aggregate: &mut A, memento: Value) -> Result<(), PersistenceError> {
        let projection = self.memento_projection()?;
        Ok((projection.restore)(aggregate, memento)?)
    }

    /// Decodes a stored payload into the aggregate's event type.
    ///
    /// Returns `None` if the tag is not registered.
    #[must_use]
    pub fn decode(
        &self,
        event_type: &str,
        payload: Value,
    ) -> Option<Result<A::Event, serde_json::Error>> {
        self.decoders.get(event_type).map(|decode| decode(payload))
    }

    fn memento_projection(&self) -> Result<&Memento<A>, PersistenceError> {
        self.memento.as_ref().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "aggregate of type {} has no configured memento representing its state",
                self.name
            ))
        })
    }
}

impl<A: AggregateRoot> Default for AggregateType<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AggregateRoot> fmt::Debug for AggregateType<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<_> = self.decoders.keys().collect();
        event_types.sort_unstable();
        f.debug_struct("AggregateType")
            .field("name", &self.name)
            .field("key_type", &self.key_type())
            .field("comparer", &self.comparer)
            .field("has_factory", &self.factory.is_some())
            .field("has_memento", &self.memento.is_some())
            .field("event_types", &event_types)
            .finish()
    }
}

/// Registry of aggregate type metadata, passed explicitly to repositories.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the metadata for `A`.
    pub fn register<A: AggregateRoot>(&mut self, aggregate_type: AggregateType<A>) -> &mut Self {
        self.types.insert(TypeId::of::<A>(), Box::new(aggregate_type));
        self
    }

    /// Builder-style variant of [`TypeRegistry::register`].
    #[must_use]
    pub fn with<A: AggregateRoot>(mut self, aggregate_type: AggregateType<A>) -> Self {
        self.register(aggregate_type);
        self
    }

    /// Returns the metadata registered for `A`.
    #[must_use]
    pub fn get<A: AggregateRoot>(&self) -> Option<&AggregateType<A>> {
        self.types
            .get(&TypeId::of::<A>())
            .and_then(|entry| entry.downcast_ref())
    }

    /// Returns the metadata registered for `A`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Configuration` if `A` is not registered.
    pub fn require<A: AggregateRoot>(&self) -> Result<&AggregateType<A>, PersistenceError> {
        self.get::<A>().ok_or_else(|| {
            PersistenceError::Configuration(format!(
                "aggregate of type {} is not registered",
                type_name::<A>()
            ))
        })
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("registered", &self.types.len())
            .finish()
    }
}
