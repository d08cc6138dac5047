//! Project: the initialized set of descriptors.
//!
//! [`ProjectBuilder::build`] runs once, single threaded. It resolves
//! inheritance parent-first, validates the mappings, resolves container
//! classes and converters, and computes the derived fields of every
//! descriptor. The result is shared as `Arc<Project>` and never mutated.

use crate::classes::ClassRegistry;
use crate::descriptor::ClassDescriptor;
use crate::error::{ConfigError, ConfigErrorKind, QueryError};
use crate::field::{DatabaseField, DatabaseTable};
use crate::mapping::MappingKind;
use crate::object::{Attribute, Entity};
use crate::row::Row;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Collects descriptors before initialization.
#[derive(Debug, Default)]
pub struct ProjectBuilder {
    descriptors: Vec<ClassDescriptor>,
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor(mut self, descriptor: ClassDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Initialize every descriptor against `registry`.
    #[tracing::instrument(level = "debug", skip_all, fields(descriptors = self.descriptors.len()))]
    pub fn build(self, registry: &ClassRegistry) -> crate::Result<Arc<Project>> {
        let mut declared: IndexMap<String, ClassDescriptor> = IndexMap::new();
        for descriptor in self.descriptors {
            let name = descriptor.entity_name().to_string();
            if declared.contains_key(&name) {
                return Err(config(
                    ConfigErrorKind::InvalidMapping,
                    &name,
                    "descriptor declared twice".to_string(),
                ));
            }
            declared.insert(name, descriptor);
        }

        for descriptor in declared.values_mut() {
            resolve_embedded_id(descriptor)?;
        }

        let order = parent_first_order(&declared)?;
        let mut resolved: IndexMap<String, ClassDescriptor> = IndexMap::new();
        for name in &order {
            let Some(mut descriptor) = declared.swap_remove(name) else {
                continue;
            };
            if let Some(parent) = descriptor.inheritance().and_then(|i| i.parent()) {
                let parent = resolved.get(parent).ok_or_else(|| {
                    config(
                        ConfigErrorKind::UnknownDescriptor,
                        name,
                        format!("parent descriptor '{parent}' is not in the project"),
                    )
                })?;
                inherit_from(&mut descriptor, parent);
            }
            resolved.insert(name.clone(), descriptor);
        }
        let mut descriptors = resolved;
        link_children(&mut descriptors);
        for descriptor in descriptors.values() {
            validate(descriptor, &descriptors)?;
        }
        let snapshot = descriptors.clone();
        for descriptor in descriptors.values_mut() {
            initialize_mappings(descriptor, &snapshot, registry)?;
            compute_selection_fields(descriptor);
        }
        let snapshot = descriptors.clone();
        for descriptor in descriptors.values_mut() {
            compute_tree(descriptor, &snapshot);
        }

        tracing::debug!(count = descriptors.len(), "project initialized");
        Ok(Arc::new(Project { descriptors }))
    }
}

/// An initialized, immutable project.
#[derive(Debug)]
pub struct Project {
    descriptors: IndexMap<String, ClassDescriptor>,
}

impl Project {
    pub fn descriptor(&self, entity: &str) -> Option<&ClassDescriptor> {
        self.descriptors.get(entity)
    }

    /// Descriptor for a query; a missing one is a query error.
    pub fn require(&self, entity: &str) -> crate::Result<&ClassDescriptor> {
        self.descriptor(entity)
            .ok_or_else(|| QueryError::missing_descriptor(entity).into())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.descriptors.values()
    }

    /// Descendant descriptors of `entity`, parents first.
    pub fn descendants(&self, entity: &str) -> Vec<&ClassDescriptor> {
        self.descriptor(entity)
            .and_then(ClassDescriptor::inheritance)
            .map(|i| {
                i.descendants()
                    .iter()
                    .filter_map(|d| self.descriptor(d))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct child descriptors of `entity`.
    pub fn children(&self, entity: &str) -> Vec<&ClassDescriptor> {
        self.descriptor(entity)
            .and_then(ClassDescriptor::inheritance)
            .map(|i| i.children().iter().filter_map(|d| self.descriptor(d)).collect())
            .unwrap_or_default()
    }

    /// Root of the inheritance tree `entity` belongs to.
    pub fn root_of<'a>(&'a self, descriptor: &'a ClassDescriptor) -> &'a ClassDescriptor {
        let mut current = descriptor;
        while let Some(parent) = current
            .inheritance()
            .and_then(|i| i.parent())
            .and_then(|p| self.descriptor(p))
        {
            current = parent;
        }
        current
    }

    /// Column value the object holds for `field`: direct mappings through
    /// their converter, aggregate columns, and one-to-one foreign keys read
    /// from the target's primary key.
    pub fn value_for_field(
        &self,
        descriptor: &ClassDescriptor,
        entity: &Entity,
        field: &DatabaseField,
    ) -> crate::Result<Option<Value>> {
        for mapping in descriptor.mappings() {
            match mapping.kind() {
                MappingKind::DirectToField { field: f } if f == field => {
                    let Some(value) = entity.value(mapping.attribute()) else {
                        return Ok(None);
                    };
                    return match mapping.converter() {
                        Some(conv) => conv.to_data(value).map(Some),
                        None => Ok(Some(value.clone())),
                    };
                }
                MappingKind::Aggregate { fields, .. } => {
                    if let Some((attribute, _)) = fields.iter().find(|(_, f)| f == field) {
                        let value = entity
                            .aggregate(mapping.attribute())
                            .and_then(|a| a.value(attribute))
                            .cloned()
                            .unwrap_or(Value::Null);
                        return Ok(Some(value));
                    }
                }
                MappingKind::OneToOne {
                    reference,
                    foreign_keys,
                } => {
                    let Some((_, target_field)) = foreign_keys.iter().find(|(s, _)| s == field)
                    else {
                        continue;
                    };
                    return match entity.get(mapping.attribute()) {
                        Some(Attribute::Object(Some(target))) => {
                            let target_descriptor = self.require(reference)?;
                            self.value_for_field(target_descriptor, target, target_field)
                        }
                        Some(Attribute::Object(None)) => Ok(Some(Value::Null)),
                        _ => Ok(None),
                    };
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Row of the object's mapped columns, plus its class indicator.
    pub fn build_row(&self, descriptor: &ClassDescriptor, entity: &Entity) -> crate::Result<Row> {
        let mut row = Row::empty();
        for field in descriptor.selection_fields() {
            if let Some(value) = self.value_for_field(descriptor, entity, field)? {
                row.put(field, value);
            }
        }
        for table in descriptor.tables().iter().skip(1) {
            for (secondary, primary) in descriptor.additional_table_pk(table) {
                if let Some(value) = row.get_field(&primary).cloned() {
                    row.put(&secondary, value);
                }
            }
        }
        if let Some(policy) = descriptor.inheritance() {
            if let (Some(field), Some(value)) =
                (policy.class_indicator_field(), policy.class_indicator_value())
            {
                row.put(field, value.clone());
            }
        }
        Ok(row)
    }
}

fn config(kind: ConfigErrorKind, entity: &str, message: String) -> crate::Error {
    ConfigError::new(kind, message).for_entity(entity).into()
}

/// Derive the primary key from an embedded id aggregate.
fn resolve_embedded_id(descriptor: &mut ClassDescriptor) -> crate::Result<()> {
    let Some(id) = descriptor.embedded_id.clone() else {
        return Ok(());
    };
    if !descriptor.primary_key_fields.is_empty() {
        return Err(config(
            ConfigErrorKind::ConflictingPrimaryKey,
            descriptor.entity_name(),
            format!("embedded id '{id}' conflicts with an explicit primary key"),
        ));
    }
    let fields = match descriptor.mapping(&id).map(|m| m.kind()) {
        Some(MappingKind::Aggregate { fields, .. }) => {
            fields.iter().map(|(_, f)| f.clone()).collect()
        }
        _ => {
            return Err(config(
                ConfigErrorKind::InvalidMapping,
                descriptor.entity_name(),
                format!("embedded id '{id}' is not an aggregate mapping"),
            ));
        }
    };
    descriptor.primary_key_fields = fields;
    Ok(())
}

/// Descriptor names with every parent before its children.
fn parent_first_order(declared: &IndexMap<String, ClassDescriptor>) -> crate::Result<Vec<String>> {
    let mut order: Vec<String> = Vec::with_capacity(declared.len());
    let mut pending: Vec<&ClassDescriptor> = declared.values().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut remaining = Vec::new();
        for descriptor in pending {
            match descriptor.inheritance().and_then(|i| i.parent()) {
                Some(parent) if !declared.contains_key(parent) => {
                    return Err(config(
                        ConfigErrorKind::UnknownDescriptor,
                        descriptor.entity_name(),
                        format!("parent descriptor '{parent}' is not in the project"),
                    ));
                }
                Some(parent) if !order.iter().any(|o| o == parent) => remaining.push(descriptor),
                _ => order.push(descriptor.entity_name().to_string()),
            }
        }
        if remaining.len() == before {
            let names: Vec<_> = remaining.iter().map(|d| d.entity_name()).collect();
            return Err(config(
                ConfigErrorKind::InvalidMapping,
                names.first().copied().unwrap_or_default(),
                format!("inheritance cycle among {names:?}"),
            ));
        }
        pending = remaining;
    }
    Ok(order)
}

/// Copy the parent's tables, keys and mappings into a child.
fn inherit_from(child: &mut ClassDescriptor, parent: &ClassDescriptor) {
    let own_tables = std::mem::take(&mut child.tables);
    child.tables = parent.tables.clone();
    for table in own_tables {
        if !child.tables.contains(&table) {
            child.tables.push(table);
        }
    }
    if !child.insert_order.is_empty() || !parent.insert_order.is_empty() {
        let mut order = parent.multiple_table_insert_order().to_vec();
        for table in &child.tables {
            if !order.contains(table) {
                order.push(table.clone());
            }
        }
        child.insert_order = order;
    }
    if child.primary_key_fields.is_empty() {
        child.primary_key_fields = parent.primary_key_fields.clone();
        if child.embedded_id.is_none() {
            child.embedded_id = parent.embedded_id.clone();
        }
    }
    for (table, pairs) in &parent.additional_table_pk {
        child
            .additional_table_pk
            .entry(table.clone())
            .or_insert_with(|| pairs.clone());
    }
    let own = std::mem::take(&mut child.mappings);
    let mut mappings: Vec<_> = parent
        .mappings
        .iter()
        .filter(|m| !own.iter().any(|o| o.attribute() == m.attribute()))
        .cloned()
        .collect();
    mappings.extend(own);
    child.mappings = mappings;
    if child.version_field.is_none() {
        child.version_field = parent.version_field.clone();
    }
    if let (Some(child_policy), Some(parent_policy)) =
        (child.inheritance.as_mut(), parent.inheritance.as_ref())
    {
        if child_policy.class_indicator_field.is_none() {
            child_policy.class_indicator_field = parent_policy.class_indicator_field.clone();
        }
        if !child_policy.should_outer_join_subclasses {
            child_policy.should_outer_join_subclasses = parent_policy.should_outer_join_subclasses;
        }
    }
}

fn link_children(descriptors: &mut IndexMap<String, ClassDescriptor>) {
    let links: Vec<(String, String)> = descriptors
        .values()
        .filter_map(|d| {
            d.inheritance()
                .and_then(|i| i.parent())
                .map(|p| (p.to_string(), d.entity_name().to_string()))
        })
        .collect();
    for (parent, child) in links {
        if let Some(policy) = descriptors
            .get_mut(&parent)
            .and_then(|d| d.inheritance.as_mut())
        {
            policy.children.push(child);
        }
    }
}

fn validate(
    descriptor: &ClassDescriptor,
    descriptors: &IndexMap<String, ClassDescriptor>,
) -> crate::Result<()> {
    let entity = descriptor.entity_name();
    if descriptor.tables().is_empty() {
        return Err(config(
            ConfigErrorKind::InvalidMapping,
            entity,
            "descriptor maps no tables".to_string(),
        ));
    }
    if descriptor.primary_key_fields().is_empty() {
        return Err(config(
            ConfigErrorKind::InvalidMapping,
            entity,
            "descriptor has no primary key".to_string(),
        ));
    }
    let on_own_table = |field: &DatabaseField| {
        field
            .table()
            .is_some_and(|t| descriptor.owns_table(&t))
    };
    let mut fields: Vec<&DatabaseField> = descriptor.primary_key_fields().iter().collect();
    fields.extend(descriptor.version_field());
    for field in fields {
        if !on_own_table(field) {
            return Err(config(
                ConfigErrorKind::InvalidMapping,
                entity,
                format!("field {field} is not on a table of {entity}"),
            ));
        }
    }
    for table in descriptor.multiple_table_insert_order() {
        if !descriptor.owns_table(table) {
            return Err(config(
                ConfigErrorKind::InvalidMapping,
                entity,
                format!("insert order names unmapped table {table}"),
            ));
        }
    }
    for mapping in descriptor.mappings() {
        for field in mapping.owner_fields() {
            if !on_own_table(&field) {
                return Err(config(
                    ConfigErrorKind::InvalidMapping,
                    entity,
                    format!(
                        "mapping '{}' writes {field}, which is not on a table of {entity}",
                        mapping.attribute()
                    ),
                ));
            }
        }
        if let Some(reference) = mapping.reference_descriptor() {
            if !descriptors.contains_key(reference) {
                return Err(config(
                    ConfigErrorKind::UnknownDescriptor,
                    entity,
                    format!(
                        "mapping '{}' references unknown descriptor '{reference}'",
                        mapping.attribute()
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn initialize_mappings(
    descriptor: &mut ClassDescriptor,
    all: &IndexMap<String, ClassDescriptor>,
    registry: &ClassRegistry,
) -> crate::Result<()> {
    let entity = descriptor.entity_name.clone();
    let attributes: Vec<String> = descriptor
        .mappings()
        .iter()
        .map(|m| m.attribute().to_string())
        .collect();
    for attribute in attributes {
        let Some(mapping) = descriptor.mapping_mut(&attribute) else {
            continue;
        };
        if let Some(conv) = mapping.converter_mut() {
            *conv = conv.resolve(registry)?;
        }
        let element = mapping.reference_descriptor().and_then(|r| all.get(r)).cloned();
        if let Some(policy) = mapping.container_policy_mut() {
            policy.convert_class_names_to_classes(registry)?;
            policy.initialize(&entity, element.as_ref())?;
        }
    }
    Ok(())
}

/// Fields of one descriptor in table order, primary key first.
fn compute_selection_fields(descriptor: &mut ClassDescriptor) {
    let mut fields: Vec<DatabaseField> = Vec::new();
    let mut push = |field: &DatabaseField| {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    };
    for field in descriptor.primary_key_fields() {
        push(field);
    }
    if let Some(field) = descriptor
        .inheritance()
        .and_then(|i| i.class_indicator_field())
    {
        push(field);
    }
    let mut mapped: Vec<DatabaseField> = descriptor
        .mappings()
        .iter()
        .flat_map(|m| m.owner_fields())
        .collect();
    mapped.extend(descriptor.version_field().cloned());
    for table in descriptor.tables() {
        for field in mapped.iter().filter(|f| f.is_on(table)) {
            push(field);
        }
    }
    descriptor.selection_fields = fields;
}

/// Descendants, tree-wide fields and indicator values.
fn compute_tree(descriptor: &mut ClassDescriptor, all: &IndexMap<String, ClassDescriptor>) {
    let mut descendants = Vec::new();
    let mut frontier: Vec<String> = descriptor
        .inheritance()
        .map(|i| i.children().to_vec())
        .unwrap_or_default();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for name in frontier {
            if let Some(child) = all.get(&name) {
                next.extend(child.inheritance().map(|i| i.children().to_vec()).unwrap_or_default());
            }
            descendants.push(name);
        }
        frontier = next;
    }

    let mut tree_fields = descriptor.selection_fields.clone();
    let mut descendant_tables: Vec<DatabaseTable> = Vec::new();
    let mut indicator_values: Vec<Value> = descriptor
        .inheritance()
        .and_then(|i| i.class_indicator_value())
        .cloned()
        .into_iter()
        .collect();
    for name in &descendants {
        let Some(child) = all.get(name) else {
            continue;
        };
        for field in child.selection_fields() {
            if !tree_fields.contains(field) {
                tree_fields.push(field.clone());
            }
        }
        for table in child.tables() {
            if !descriptor.owns_table(table) && !descendant_tables.contains(table) {
                descendant_tables.push(table.clone());
            }
        }
        if let Some(value) = child.inheritance().and_then(|i| i.class_indicator_value()) {
            indicator_values.push(value.clone());
        }
    }

    descriptor.tree_fields = tree_fields;
    if let Some(policy) = descriptor.inheritance.as_mut() {
        policy.has_multiple_table_child = !descendant_tables.is_empty();
        policy.descendants = descendants;
        policy.indicator_values = indicator_values;
    }
    descriptor.descendant_tables = descendant_tables;
}
