//! Session cache seen from the query layer.
//!
//! Query preparation and container building only need to ask the session a
//! few questions: is this primary key cached, which objects of a descriptor
//! are cached, and is an object new or deleted in the unit of work.

use crate::object::ObjectRef;
use crate::value::Value;

/// Read access to the session's identity map and unit of work.
pub trait SessionCache {
    /// Cached object with the given primary key, if any.
    fn get_by_primary_key(&self, entity: &str, primary_key: &[Value]) -> Option<ObjectRef>;

    /// Every cached object of `entity`, used for in-memory conformance.
    fn cached_objects(&self, entity: &str) -> Vec<ObjectRef>;

    /// Objects registered as new in the unit of work.
    fn new_objects(&self, entity: &str) -> Vec<ObjectRef>;

    fn is_new_object(&self, object: &ObjectRef) -> bool;

    fn is_deleted_object(&self, object: &ObjectRef) -> bool;
}

/// Resolves entity-valued map keys while a container is built.
pub trait KeyLookup {
    fn lookup_object(&self, entity: &str, primary_key: &[Value]) -> Option<ObjectRef>;
}

impl<T: SessionCache + ?Sized> KeyLookup for T {
    fn lookup_object(&self, entity: &str, primary_key: &[Value]) -> Option<ObjectRef> {
        self.get_by_primary_key(entity, primary_key)
    }
}

/// A cache that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl SessionCache for NoCache {
    fn get_by_primary_key(&self, _entity: &str, _primary_key: &[Value]) -> Option<ObjectRef> {
        None
    }

    fn cached_objects(&self, _entity: &str) -> Vec<ObjectRef> {
        Vec::new()
    }

    fn new_objects(&self, _entity: &str) -> Vec<ObjectRef> {
        Vec::new()
    }

    fn is_new_object(&self, _object: &ObjectRef) -> bool {
        false
    }

    fn is_deleted_object(&self, _object: &ObjectRef) -> bool {
        false
    }
}
