//! Identity map: one managed object per primary key.
//!
//! Within a session a database row corresponds to exactly one [`ObjectRef`].
//! Reading the same row twice hands out the same `Arc`, so `Arc::ptr_eq` is
//! object identity everywhere above this layer.
//!
//! # Keys
//!
//! Objects are keyed by the name of their inheritance root and their primary
//! key. A `Manager` and an `Employee` with the same key are the same row of
//! the same hierarchy, so they share one slot.
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new();
//! let key = ObjectKey::new("Employee", &[Value::BigInt(1)])?;
//!
//! let first = map.insert(key.clone(), employee);
//! let again = map.get(&key).unwrap();
//! assert!(Arc::ptr_eq(&first, &again));
//! ```

use indexmap::IndexMap;
use relmap_core::{MapKey, ObjectRef, Result, Value};
use std::sync::Arc;

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Inheritance root of the object's descriptor.
    entity: String,
    /// Primary key values as one hashable tuple.
    pk: MapKey,
}

impl ObjectKey {
    /// Key for `entity` with primary key `pk`. Integer widths are
    /// normalized, so `Int(1)` and `BigInt(1)` name the same object.
    pub fn new(entity: impl Into<String>, pk: &[Value]) -> Result<Self> {
        Ok(Self {
            entity: entity.into(),
            pk: MapKey::from_value(&Value::Array(pk.to_vec()))?,
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn pk(&self) -> &MapKey {
        &self.pk
    }
}

/// Identity map for managed objects.
///
/// Entries keep insertion order, so scans over the cache (conformance,
/// invalidation) are deterministic.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: IndexMap<ObjectKey, ObjectRef>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Insert an object.
    ///
    /// If an object with the same key already exists, returns the existing
    /// reference and drops the new one.
    pub fn insert(&mut self, key: ObjectKey, object: ObjectRef) -> ObjectRef {
        Arc::clone(self.entries.entry(key).or_insert(object))
    }

    /// Replace the object stored under `key`, returning the previous one.
    pub fn replace(&mut self, key: ObjectKey, object: ObjectRef) -> Option<ObjectRef> {
        self.entries.insert(key, object)
    }

    /// Get an object by key.
    pub fn get(&self, key: &ObjectKey) -> Option<ObjectRef> {
        self.entries.get(key).map(Arc::clone)
    }

    /// Check if an object with the given key exists in the map.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an object from the map.
    ///
    /// # Returns
    ///
    /// `true` if the object was removed, `false` if it wasn't in the map.
    pub fn remove(&mut self, key: &ObjectKey) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Get or build an object. `build` runs only on a miss.
    pub fn get_or_insert(
        &mut self,
        key: ObjectKey,
        build: impl FnOnce() -> Result<ObjectRef>,
    ) -> Result<ObjectRef> {
        if let Some(existing) = self.entries.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let object = build()?;
        Ok(self.insert(key, object))
    }

    /// Cached objects whose entity name is one of `entities`.
    pub fn objects_of(&self, entities: &[&str]) -> Vec<ObjectRef> {
        self.entries
            .values()
            .filter(|o| entities.contains(&o.entity_name()))
            .map(Arc::clone)
            .collect()
    }

    /// Drop every object whose entity name is one of `entities`. Returns the
    /// number of entries removed.
    pub fn invalidate(&mut self, entities: &[&str]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, o| !entities.contains(&o.entity_name()));
        before - self.entries.len()
    }

    /// Clear all entries from the identity map.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get the number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
