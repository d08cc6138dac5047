//! The session's identity map and unit of work, seen through `SessionCache`.

use crate::identity_map::{IdentityMap, ObjectKey};
use crate::unit_of_work::UnitOfWork;
use relmap_core::{ObjectRef, Project, SessionCache, Value};

/// `entity` followed by every descendant name.
pub(crate) fn hierarchy_names<'p>(project: &'p Project, entity: &'p str) -> Vec<&'p str> {
    std::iter::once(entity)
        .chain(project.descendants(entity).into_iter().map(|d| d.entity_name()))
        .collect()
}

/// Identity-map key for an object of `entity`: keyed by its hierarchy root.
pub(crate) fn object_key(project: &Project, entity: &str, pk: &[Value]) -> relmap_core::Result<ObjectKey> {
    let descriptor = project.require(entity)?;
    ObjectKey::new(project.root_of(descriptor).entity_name(), pk)
}

/// Borrowed view of a session's cache state.
#[derive(Clone, Copy)]
pub struct SessionView<'s> {
    pub(crate) project: &'s Project,
    pub(crate) identity_map: &'s IdentityMap,
    pub(crate) unit_of_work: &'s UnitOfWork,
}

impl std::fmt::Debug for SessionView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionView")
            .field("cached", &self.identity_map.len())
            .field("pending", &self.unit_of_work.pending_count())
            .finish()
    }
}

impl SessionCache for SessionView<'_> {
    fn get_by_primary_key(&self, entity: &str, primary_key: &[Value]) -> Option<ObjectRef> {
        let key = object_key(self.project, entity, primary_key).ok()?;
        let object = self.identity_map.get(&key)?;
        hierarchy_names(self.project, entity)
            .contains(&object.entity_name())
            .then_some(object)
    }

    fn cached_objects(&self, entity: &str) -> Vec<ObjectRef> {
        self.identity_map
            .objects_of(&hierarchy_names(self.project, entity))
    }

    fn new_objects(&self, entity: &str) -> Vec<ObjectRef> {
        self.unit_of_work
            .new_objects(&hierarchy_names(self.project, entity))
    }

    fn is_new_object(&self, object: &ObjectRef) -> bool {
        self.unit_of_work.is_new(object)
    }

    fn is_deleted_object(&self, object: &ObjectRef) -> bool {
        self.unit_of_work.is_deleted(object)
    }
}
