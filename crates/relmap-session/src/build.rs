//! Building managed objects from result rows.
//!
//! Rows arrive labelled with the selected fields. The queried object's
//! columns come first; each join-fetched mapping's columns follow at the
//! offsets its `JoinedAttributeManager` computed. An owner with a to-many
//! join spans several rows, so objects are built from the group of rows that
//! share the owner's primary key.

use crate::cache::SessionView;
use crate::identity_map::{IdentityMap, ObjectKey};
use crate::unit_of_work::UnitOfWork;
use indexmap::IndexMap;
use relmap_core::{
    Attribute, ClassDescriptor, DatabaseField, DatabaseMapping, Element, Entity, MapKey,
    MappingKind, ObjectRef, Project, Result, Row, Value, VectorItem,
};
use relmap_query::JoinedAttributeManager;

pub(crate) struct ObjectBuilder<'s> {
    project: &'s Project,
    identity_map: &'s mut IdentityMap,
    unit_of_work: &'s UnitOfWork,
}

impl<'s> ObjectBuilder<'s> {
    pub(crate) fn new(
        project: &'s Project,
        identity_map: &'s mut IdentityMap,
        unit_of_work: &'s UnitOfWork,
    ) -> Self {
        Self {
            project,
            identity_map,
            unit_of_work,
        }
    }

    /// One object per surviving slot, in row order. Slots without a primary
    /// key are skipped.
    pub(crate) fn build_all(
        &mut self,
        descriptor: &'s ClassDescriptor,
        joined: &JoinedAttributeManager,
        slots: &[Option<Row>],
    ) -> Result<Vec<ObjectRef>> {
        let mut objects = Vec::with_capacity(slots.len());
        for row in slots.iter().flatten() {
            let parent = joined.trim_parent_row(row);
            let Some(pk) = descriptor.extract_primary_key(&parent) else {
                continue;
            };
            let rows = if joined.is_to_many_join() {
                joined
                    .rows_for_primary_key(&pk)
                    .unwrap_or(std::slice::from_ref(row))
            } else {
                std::slice::from_ref(row)
            };
            if let Some(object) = self.build_object(descriptor, joined, rows)? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Object whose columns sit in `joined`'s parent slice of `rows[0]`.
    /// Every row in `rows` belongs to that object. Returns the cached object
    /// when the identity map already holds the key.
    fn build_object(
        &mut self,
        descriptor: &'s ClassDescriptor,
        joined: &JoinedAttributeManager,
        rows: &[Row],
    ) -> Result<Option<ObjectRef>> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let parent = joined.trim_parent_row(first);
        let Some(pk) = descriptor.extract_primary_key(&parent) else {
            return Ok(None);
        };
        let concrete = self.concrete_descriptor(descriptor, &parent);
        let key = ObjectKey::new(self.project.root_of(concrete).entity_name(), &pk)?;
        if let Some(existing) = self.identity_map.get(&key) {
            return Ok(Some(existing));
        }

        let mut entity = Entity::new(concrete.entity_name());
        for mapping in concrete.mappings() {
            let attribute = mapping.attribute();
            match mapping.kind() {
                MappingKind::DirectToField { field } => {
                    if let Some(data) = parent.get_field(field) {
                        let value = match mapping.converter() {
                            Some(converter) => converter.to_object(data)?,
                            None => data.clone(),
                        };
                        entity.set(attribute, Attribute::Value(value));
                    }
                }
                MappingKind::Aggregate { target, fields } => {
                    let mut aggregate = Entity::new(target.as_str());
                    for (name, field) in fields {
                        if let Some(value) = parent.get_field(field) {
                            aggregate.set(name.as_str(), Attribute::Value(value.clone()));
                        }
                    }
                    entity.set(attribute, Attribute::Aggregate(Box::new(aggregate)));
                }
                MappingKind::OneToOne {
                    reference,
                    foreign_keys,
                } => {
                    let related = match joined.joined_mapping_query(attribute) {
                        Some(nested) => {
                            let target = self.project.require(reference)?;
                            Attribute::Object(self.build_object(target, &nested.joined, rows)?)
                        }
                        None => self.referenced_object(reference, foreign_keys, &parent)?,
                    };
                    entity.set(attribute, related);
                }
                _ => {
                    let collection = if is_joined(joined, attribute) {
                        self.joined_collection(mapping, joined, rows)?
                    } else {
                        Attribute::Unfetched
                    };
                    entity.set(attribute, collection);
                }
            }
        }
        tracing::trace!(entity = concrete.entity_name(), pk = ?pk, "built object");
        Ok(Some(self.identity_map.insert(key, entity.into_ref())))
    }

    /// Subclass named by the row's class indicator, or `descriptor` itself.
    fn concrete_descriptor(&self, descriptor: &'s ClassDescriptor, row: &Row) -> &'s ClassDescriptor {
        let indicator = self
            .project
            .root_of(descriptor)
            .inheritance()
            .and_then(|policy| policy.class_indicator_field())
            .and_then(|field| row.get_field(field));
        let Some(indicator) = indicator else {
            return descriptor;
        };
        self.project
            .descendants(descriptor.entity_name())
            .into_iter()
            .find(|d| {
                d.inheritance()
                    .and_then(|policy| policy.class_indicator_value())
                    .is_some_and(|value| value.sql_eq(indicator))
            })
            .unwrap_or(descriptor)
    }

    /// One-to-one target resolved from the foreign key through the identity
    /// map. A target that is not cached stays unfetched.
    fn referenced_object(
        &self,
        reference: &str,
        foreign_keys: &[(DatabaseField, DatabaseField)],
        parent: &Row,
    ) -> Result<Attribute> {
        let values: Option<Vec<Value>> = foreign_keys
            .iter()
            .map(|(source, _)| parent.get_field(source).cloned())
            .collect();
        let Some(values) = values else {
            return Ok(Attribute::Unfetched);
        };
        if values.iter().all(Value::is_null) {
            return Ok(Attribute::Object(None));
        }
        let target = self.project.require(reference)?;
        let pk: Option<Vec<Value>> = target
            .primary_key_fields()
            .iter()
            .map(|pk_field| {
                foreign_keys
                    .iter()
                    .position(|(_, t)| t.name() == pk_field.name())
                    .map(|i| values[i].clone())
            })
            .collect();
        let Some(pk) = pk else {
            return Ok(Attribute::Unfetched);
        };
        let key = ObjectKey::new(self.project.root_of(target).entity_name(), &pk)?;
        Ok(match self.identity_map.get(&key) {
            Some(object) => Attribute::Object(Some(object)),
            None => Attribute::Unfetched,
        })
    }

    /// A join-fetched collection built through the mapping's container
    /// policy from the owner's rows.
    fn joined_collection(
        &mut self,
        mapping: &'s DatabaseMapping,
        joined: &JoinedAttributeManager,
        rows: &[Row],
    ) -> Result<Attribute> {
        let attribute = mapping.attribute();
        let Some(policy) = mapping.container_policy() else {
            return Ok(Attribute::Unfetched);
        };
        let mut items = Vec::new();

        match (mapping.reference_descriptor(), joined.joined_mapping_query(attribute)) {
            (Some(reference), Some(nested)) => {
                let target = self.project.require(reference)?;
                let mut groups: IndexMap<MapKey, Vec<Row>> = IndexMap::new();
                for row in rows {
                    let slice = nested.joined.trim_parent_row(row);
                    let Some(pk) = target.extract_primary_key(&slice) else {
                        continue;
                    };
                    groups
                        .entry(MapKey::from_value(&Value::Array(pk))?)
                        .or_default()
                        .push(row.clone());
                }
                for group in groups.values() {
                    let Some(object) = self.build_object(target, &nested.joined, group)? else {
                        continue;
                    };
                    let element = Element::Object(object);
                    items.push(match joined.trim_row_for_joined_mapping(attribute, &group[0]) {
                        Some(slice) if policy.is_map_policy() => VectorItem::ElementWithRow(element, slice),
                        _ => VectorItem::Element(element),
                    });
                }
            }
            _ => {
                for row in rows {
                    let Some(slice) = joined.trim_row_for_joined_mapping(attribute, row) else {
                        continue;
                    };
                    if slice.values().all(Value::is_null) {
                        continue;
                    }
                    items.push(VectorItem::Row(slice));
                }
            }
        }

        let lookup = SessionView {
            project: self.project,
            identity_map: &*self.identity_map,
            unit_of_work: self.unit_of_work,
        };
        let container = policy.build_container_from_vector(items, &lookup)?;
        Ok(Attribute::Collection(container))
    }
}

fn is_joined(joined: &JoinedAttributeManager, attribute: &str) -> bool {
    joined
        .joined_attributes()
        .iter()
        .any(|j| j.path.len() == 1 && j.path[0] == attribute)
}
