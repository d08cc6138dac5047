//! Unit-of-work membership.
//!
//! The unit of work records which managed objects are new (registered but
//! not yet inserted) and which have been deleted in this session. Queries
//! consult it through `SessionCache`: new objects can satisfy
//! `ConformInUnitOfWork` reads, and deleted objects are never returned.
//!
//! Membership is by reference identity (`Arc::ptr_eq`), not by value.

use relmap_core::ObjectRef;
use std::sync::Arc;

/// New and deleted objects of a session.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    new_objects: Vec<ObjectRef>,
    deleted_objects: Vec<ObjectRef>,
}

impl UnitOfWork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object that does not exist in the database yet.
    /// Registering the same object twice is a no-op.
    pub fn register_new(&mut self, object: &ObjectRef) {
        if !self.is_new(object) {
            self.new_objects.push(Arc::clone(object));
        }
    }

    /// The object has been inserted; it is no longer new.
    pub fn unregister_new(&mut self, object: &ObjectRef) -> bool {
        let before = self.new_objects.len();
        self.new_objects.retain(|o| !Arc::ptr_eq(o, object));
        before != self.new_objects.len()
    }

    /// Record a deletion. A new object that is deleted simply stops being
    /// new.
    pub fn register_deleted(&mut self, object: &ObjectRef) {
        if self.unregister_new(object) {
            return;
        }
        if !self.is_deleted(object) {
            self.deleted_objects.push(Arc::clone(object));
        }
    }

    pub fn is_new(&self, object: &ObjectRef) -> bool {
        self.new_objects.iter().any(|o| Arc::ptr_eq(o, object))
    }

    pub fn is_deleted(&self, object: &ObjectRef) -> bool {
        self.deleted_objects.iter().any(|o| Arc::ptr_eq(o, object))
    }

    /// New objects whose entity name is one of `entities`, in registration
    /// order.
    pub fn new_objects(&self, entities: &[&str]) -> Vec<ObjectRef> {
        self.new_objects
            .iter()
            .filter(|o| entities.contains(&o.entity_name()))
            .map(Arc::clone)
            .collect()
    }

    /// Get the count of tracked objects.
    #[must_use]
    pub fn pending_count(&self) -> PendingCounts {
        PendingCounts {
            new: self.new_objects.len(),
            deleted: self.deleted_objects.len(),
        }
    }

    pub fn clear(&mut self) {
        self.new_objects.clear();
        self.deleted_objects.clear();
    }
}

/// Count of tracked objects by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Objects registered as new.
    pub new: usize,
    /// Objects deleted in this session.
    pub deleted: usize,
}

impl PendingCounts {
    /// Total number of tracked objects.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new + self.deleted
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::Entity;

    fn object(entity: &str, id: i64) -> ObjectRef {
        Entity::new(entity).with_value("id", id).into_ref()
    }

    #[test]
    fn test_membership_is_by_identity() {
        let mut uow = UnitOfWork::new();
        let a = object("Employee", 1);
        let twin = object("Employee", 1);

        uow.register_new(&a);
        uow.register_new(&a);
        assert!(uow.is_new(&a));
        assert!(!uow.is_new(&twin));
        assert_eq!(uow.pending_count().new, 1);
    }

    #[test]
    fn test_deleting_a_new_object_forgets_it() {
        let mut uow = UnitOfWork::new();
        let a = object("Employee", 1);
        uow.register_new(&a);

        uow.register_deleted(&a);
        assert!(!uow.is_new(&a));
        assert!(!uow.is_deleted(&a));
        assert!(uow.pending_count().is_empty());
    }

    #[test]
    fn test_new_objects_filter_by_entity() {
        let mut uow = UnitOfWork::new();
        uow.register_new(&object("Employee", 1));
        uow.register_new(&object("Address", 1));
        uow.register_new(&object("Manager", 2));

        assert_eq!(uow.new_objects(&["Employee", "Manager"]).len(), 2);
        assert!(uow.new_objects(&["Phone"]).is_empty());
    }

    #[test]
    fn test_pending_counts() {
        let mut uow = UnitOfWork::new();
        let kept = object("Employee", 1);
        uow.register_new(&object("Employee", 2));
        uow.register_deleted(&kept);

        let counts = uow.pending_count();
        assert_eq!(counts, PendingCounts { new: 1, deleted: 1 });
        assert_eq!(counts.total(), 2);

        uow.clear();
        assert!(uow.pending_count().is_empty());
    }
}
