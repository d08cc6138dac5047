//! Attribute mappings of a class descriptor.

use crate::container::ContainerPolicy;
use crate::converter::Converter;
use crate::field::{DatabaseField, DatabaseTable};

/// Whether a relationship is fetched in the same query as its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinFetch {
    #[default]
    None,
    Inner,
    Outer,
}

/// Field pairs are always `(this side, other side)`.
#[derive(Debug, Clone)]
pub enum MappingKind {
    DirectToField {
        field: DatabaseField,
    },
    /// Source foreign key → target primary key.
    OneToOne {
        reference: String,
        foreign_keys: Vec<(DatabaseField, DatabaseField)>,
    },
    /// Target foreign key → source primary key.
    OneToMany {
        reference: String,
        target_foreign_keys: Vec<(DatabaseField, DatabaseField)>,
        container: ContainerPolicy,
    },
    /// Relation table columns → source and target primary keys.
    ManyToMany {
        reference: String,
        relation_table: DatabaseTable,
        source_keys: Vec<(DatabaseField, DatabaseField)>,
        target_keys: Vec<(DatabaseField, DatabaseField)>,
        container: ContainerPolicy,
    },
    /// Plain values stored in a reference table.
    DirectCollection {
        reference_table: DatabaseTable,
        reference_keys: Vec<(DatabaseField, DatabaseField)>,
        value_field: DatabaseField,
        container: ContainerPolicy,
    },
    /// Key/value pairs stored in a reference table.
    DirectMap {
        reference_table: DatabaseTable,
        reference_keys: Vec<(DatabaseField, DatabaseField)>,
        key_field: DatabaseField,
        value_field: DatabaseField,
        container: ContainerPolicy,
    },
    /// Embedded value object stored in the owner's columns.
    Aggregate {
        target: String,
        fields: Vec<(String, DatabaseField)>,
    },
}

fn pairs(keys: &[(&str, &str)]) -> Vec<(DatabaseField, DatabaseField)> {
    keys.iter()
        .map(|(a, b)| (DatabaseField::new(a), DatabaseField::new(b)))
        .collect()
}

/// A mapped attribute.
#[derive(Debug, Clone)]
pub struct DatabaseMapping {
    attribute: String,
    kind: MappingKind,
    join_fetch: JoinFetch,
    converter: Option<Converter>,
}

impl DatabaseMapping {
    fn new(attribute: impl Into<String>, kind: MappingKind) -> Self {
        Self {
            attribute: attribute.into(),
            kind,
            join_fetch: JoinFetch::None,
            converter: None,
        }
    }

    pub fn direct(attribute: impl Into<String>, field: impl Into<DatabaseField>) -> Self {
        Self::new(
            attribute,
            MappingKind::DirectToField {
                field: field.into(),
            },
        )
    }

    pub fn one_to_one(
        attribute: impl Into<String>,
        reference: impl Into<String>,
        foreign_keys: &[(&str, &str)],
    ) -> Self {
        Self::new(
            attribute,
            MappingKind::OneToOne {
                reference: reference.into(),
                foreign_keys: pairs(foreign_keys),
            },
        )
    }

    /// One-to-many stored in a list by default.
    pub fn one_to_many(
        attribute: impl Into<String>,
        reference: impl Into<String>,
        target_foreign_keys: &[(&str, &str)],
    ) -> Self {
        let reference = reference.into();
        let container = ContainerPolicy::list().for_element(reference.clone());
        Self::new(
            attribute,
            MappingKind::OneToMany {
                reference,
                target_foreign_keys: pairs(target_foreign_keys),
                container,
            },
        )
    }

    pub fn many_to_many(
        attribute: impl Into<String>,
        reference: impl Into<String>,
        relation_table: impl Into<DatabaseTable>,
        source_keys: &[(&str, &str)],
        target_keys: &[(&str, &str)],
    ) -> Self {
        let reference = reference.into();
        let container = ContainerPolicy::list().for_element(reference.clone());
        Self::new(
            attribute,
            MappingKind::ManyToMany {
                reference,
                relation_table: relation_table.into(),
                source_keys: pairs(source_keys),
                target_keys: pairs(target_keys),
                container,
            },
        )
    }

    pub fn direct_collection(
        attribute: impl Into<String>,
        reference_table: impl Into<DatabaseTable>,
        reference_keys: &[(&str, &str)],
        value_field: impl Into<DatabaseField>,
    ) -> Self {
        let value_field = value_field.into();
        let container = ContainerPolicy::list().with_value_field(value_field.clone());
        Self::new(
            attribute,
            MappingKind::DirectCollection {
                reference_table: reference_table.into(),
                reference_keys: pairs(reference_keys),
                value_field,
                container,
            },
        )
    }

    pub fn direct_map(
        attribute: impl Into<String>,
        reference_table: impl Into<DatabaseTable>,
        reference_keys: &[(&str, &str)],
        key_field: impl Into<DatabaseField>,
        value_field: impl Into<DatabaseField>,
    ) -> Self {
        let key_field = key_field.into();
        let value_field = value_field.into();
        let container = ContainerPolicy::map_by_column(Some(key_field.clone()))
            .with_value_field(value_field.clone());
        Self::new(
            attribute,
            MappingKind::DirectMap {
                reference_table: reference_table.into(),
                reference_keys: pairs(reference_keys),
                key_field,
                value_field,
                container,
            },
        )
    }

    pub fn aggregate(
        attribute: impl Into<String>,
        target: impl Into<String>,
        fields: &[(&str, &str)],
    ) -> Self {
        Self::new(
            attribute,
            MappingKind::Aggregate {
                target: target.into(),
                fields: fields
                    .iter()
                    .map(|(a, f)| ((*a).to_string(), DatabaseField::new(f)))
                    .collect(),
            },
        )
    }

    /// Replace the container policy of a collection mapping.
    pub fn with_container(mut self, policy: ContainerPolicy) -> Self {
        match &mut self.kind {
            MappingKind::OneToMany {
                reference,
                container,
                ..
            }
            | MappingKind::ManyToMany {
                reference,
                container,
                ..
            } => {
                *container = policy.for_element(reference.clone());
            }
            MappingKind::DirectCollection {
                value_field,
                container,
                ..
            }
            | MappingKind::DirectMap {
                value_field,
                container,
                ..
            } => {
                *container = policy.with_value_field(value_field.clone());
            }
            _ => {}
        }
        self
    }

    pub fn join_fetch(mut self, join: JoinFetch) -> Self {
        self.join_fetch = join;
        self
    }

    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn kind(&self) -> &MappingKind {
        &self.kind
    }

    pub fn join_fetch_kind(&self) -> JoinFetch {
        self.join_fetch
    }

    pub fn is_join_fetched(&self) -> bool {
        self.join_fetch != JoinFetch::None
    }

    pub fn converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    pub(crate) fn converter_mut(&mut self) -> &mut Option<Converter> {
        &mut self.converter
    }

    pub fn container_policy(&self) -> Option<&ContainerPolicy> {
        match &self.kind {
            MappingKind::OneToMany { container, .. }
            | MappingKind::ManyToMany { container, .. }
            | MappingKind::DirectCollection { container, .. }
            | MappingKind::DirectMap { container, .. } => Some(container),
            _ => None,
        }
    }

    pub(crate) fn container_policy_mut(&mut self) -> Option<&mut ContainerPolicy> {
        match &mut self.kind {
            MappingKind::OneToMany { container, .. }
            | MappingKind::ManyToMany { container, .. }
            | MappingKind::DirectCollection { container, .. }
            | MappingKind::DirectMap { container, .. } => Some(container),
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.kind, MappingKind::DirectToField { .. })
    }

    pub fn is_one_to_one(&self) -> bool {
        matches!(self.kind, MappingKind::OneToOne { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, MappingKind::Aggregate { .. })
    }

    /// To-many mappings, including direct collections and maps.
    pub fn is_collection(&self) -> bool {
        self.container_policy().is_some()
    }

    pub fn is_direct_collection(&self) -> bool {
        matches!(
            self.kind,
            MappingKind::DirectCollection { .. } | MappingKind::DirectMap { .. }
        )
    }

    pub fn is_direct_map(&self) -> bool {
        matches!(self.kind, MappingKind::DirectMap { .. })
    }

    /// Anything a query key can traverse or join.
    pub fn is_relationship(&self) -> bool {
        self.is_one_to_one() || self.is_collection()
    }

    /// Entity on the other side of an object relationship.
    pub fn reference_descriptor(&self) -> Option<&str> {
        match &self.kind {
            MappingKind::OneToOne { reference, .. }
            | MappingKind::OneToMany { reference, .. }
            | MappingKind::ManyToMany { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Direct field, if this is a direct mapping.
    pub fn field(&self) -> Option<&DatabaseField> {
        match &self.kind {
            MappingKind::DirectToField { field } => Some(field),
            _ => None,
        }
    }

    /// Fields of the owner's own tables written by this mapping.
    pub fn owner_fields(&self) -> Vec<DatabaseField> {
        match &self.kind {
            MappingKind::DirectToField { field } => vec![field.clone()],
            MappingKind::OneToOne { foreign_keys, .. } => {
                foreign_keys.iter().map(|(source, _)| source.clone()).collect()
            }
            MappingKind::Aggregate { fields, .. } => fields.iter().map(|(_, f)| f.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Columns selected per row when the mapping is join-fetched as a
    /// direct collection: the value, and the key for direct maps.
    pub fn direct_collection_fields(&self) -> Vec<DatabaseField> {
        match &self.kind {
            MappingKind::DirectCollection { value_field, .. } => vec![value_field.clone()],
            MappingKind::DirectMap {
                key_field,
                value_field,
                ..
            } => vec![key_field.clone(), value_field.clone()],
            _ => Vec::new(),
        }
    }
}
