//! Map keys and the ways a map policy derives them.

use crate::cache::KeyLookup;
use crate::container::Element;
use crate::converter::Converter;
use crate::descriptor::ClassDescriptor;
use crate::error::{ConfigError, ConfigErrorKind, ContainerError, ContainerErrorKind};
use crate::field::DatabaseField;
use crate::object::{Attribute, Entity, ObjectRef};
use crate::row::Row;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A key usable in keyed containers.
///
/// Integer widths are normalized so `Int(1)` and `BigInt(1)` are the same
/// key. Objects are keyed by identity.
#[derive(Debug, Clone)]
pub enum MapKey {
    Null,
    Value(Value),
    /// Composite key, e.g. an embeddable key object.
    Tuple(Vec<MapKey>),
    Object(ObjectRef),
}

impl MapKey {
    pub fn from_value(value: &Value) -> crate::Result<MapKey> {
        let key = match value {
            Value::Null => MapKey::Null,
            Value::Float(f) if f.is_nan() => return Err(non_comparable("NaN")),
            Value::Double(f) if f.is_nan() => return Err(non_comparable("NaN")),
            Value::SmallInt(v) => MapKey::Value(Value::BigInt(i64::from(*v))),
            Value::Int(v) => MapKey::Value(Value::BigInt(i64::from(*v))),
            Value::Float(f) => MapKey::Value(Value::Double(f64::from(*f))),
            Value::Array(items) => MapKey::Tuple(
                items
                    .iter()
                    .map(MapKey::from_value)
                    .collect::<crate::Result<Vec<_>>>()?,
            ),
            other => MapKey::Value(other.clone()),
        };
        Ok(key)
    }

    /// Key identifying an element in a set.
    pub fn for_element(element: &Element) -> crate::Result<MapKey> {
        match element {
            Element::Value(value) => MapKey::from_value(value),
            Element::Object(object) => Ok(MapKey::Object(Arc::clone(object))),
        }
    }

    pub fn object(object: &ObjectRef) -> MapKey {
        MapKey::Object(Arc::clone(object))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, MapKey::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            MapKey::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the key can live in a sorted container.
    pub fn is_orderable(&self) -> bool {
        match self {
            MapKey::Value(value) => !matches!(value, Value::Array(_)),
            MapKey::Tuple(parts) => parts.iter().all(MapKey::is_orderable),
            MapKey::Null | MapKey::Object(_) => false,
        }
    }

    /// Ordering used by sorted containers.
    pub fn try_cmp(&self, other: &MapKey) -> Option<Ordering> {
        match (self, other) {
            (MapKey::Value(a), MapKey::Value(b)) => a.sql_cmp(b),
            (MapKey::Tuple(a), MapKey::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.try_cmp(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

fn non_comparable(what: &str) -> crate::Error {
    ContainerError::new(
        ContainerErrorKind::NonComparableKey,
        format!("{what} cannot be used as a map key"),
    )
    .into()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MapKey::Null, MapKey::Null) => true,
            (MapKey::Value(a), MapKey::Value(b)) => values_equal(a, b),
            (MapKey::Tuple(a), MapKey::Tuple(b)) => a == b,
            (MapKey::Object(a), MapKey::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            MapKey::Null => 0u8.hash(state),
            MapKey::Value(value) => {
                1u8.hash(state);
                hash_single_value(value, state);
            }
            MapKey::Tuple(parts) => {
                2u8.hash(state);
                parts.hash(state);
            }
            MapKey::Object(object) => {
                3u8.hash(state);
                std::ptr::hash(Arc::as_ptr(object), state);
            }
        }
    }
}

/// Hash a single Value, tagged by variant.
fn hash_single_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::SmallInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Int(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            4u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Float(f) => {
            5u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Double(f) => {
            6u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            7u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            8u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_single_value(item, hasher);
            }
        }
    }
}

/// Key described by its own mapping, independent of the value's mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyMapping {
    /// Single key column.
    Direct {
        field: DatabaseField,
        converter: Option<Converter>,
        /// Element attribute holding the same value, resolved at initialize.
        attribute: Option<String>,
    },
    /// Embeddable key spread over several columns.
    Embedded {
        fields: Vec<DatabaseField>,
        attributes: Vec<Option<String>>,
    },
    /// Key is another entity referenced by foreign key columns.
    Entity {
        reference: String,
        foreign_key: Vec<DatabaseField>,
        attribute: Option<String>,
    },
}

impl KeyMapping {
    pub fn direct(field: impl Into<DatabaseField>) -> Self {
        KeyMapping::Direct {
            field: field.into(),
            converter: None,
            attribute: None,
        }
    }

    pub fn embedded(fields: &[&str]) -> Self {
        KeyMapping::Embedded {
            fields: fields.iter().map(|f| DatabaseField::new(f)).collect(),
            attributes: Vec::new(),
        }
    }

    pub fn entity(reference: impl Into<String>, foreign_key: &[&str]) -> Self {
        KeyMapping::Entity {
            reference: reference.into(),
            foreign_key: foreign_key.iter().map(|f| DatabaseField::new(f)).collect(),
            attribute: None,
        }
    }

    /// Columns the key occupies in a row.
    pub fn fields(&self) -> Vec<DatabaseField> {
        match self {
            KeyMapping::Direct { field, .. } => vec![field.clone()],
            KeyMapping::Embedded { fields, .. } => fields.clone(),
            KeyMapping::Entity { foreign_key, .. } => foreign_key.clone(),
        }
    }

    /// Entity referenced by the key, when the key is an entity.
    pub fn reference(&self) -> Option<&str> {
        match self {
            KeyMapping::Entity { reference, .. } => Some(reference),
            _ => None,
        }
    }

    fn key_from_row(&self, row: &Row, lookup: &dyn KeyLookup) -> crate::Result<MapKey> {
        match self {
            KeyMapping::Direct {
                field, converter, ..
            } => {
                let data = column(row, field)?;
                match converter {
                    Some(conv) => MapKey::from_value(&conv.to_object(data)?),
                    None => MapKey::from_value(data),
                }
            }
            KeyMapping::Embedded { fields, .. } => Ok(MapKey::Tuple(
                fields
                    .iter()
                    .map(|field| column(row, field).and_then(MapKey::from_value))
                    .collect::<crate::Result<Vec<_>>>()?,
            )),
            KeyMapping::Entity {
                reference,
                foreign_key,
                ..
            } => {
                let values = foreign_key
                    .iter()
                    .map(|field| column(row, field).cloned())
                    .collect::<crate::Result<Vec<_>>>()?;
                if values.iter().any(Value::is_null) {
                    return Ok(MapKey::Null);
                }
                lookup
                    .lookup_object(reference, &values)
                    .map(MapKey::Object)
                    .ok_or_else(|| {
                        extraction(format!(
                            "key {reference} with primary key {values:?} is not loaded"
                        ))
                    })
            }
        }
    }

    fn key_from_object(&self, entity: &Entity) -> crate::Result<MapKey> {
        let missing = || {
            extraction(format!(
                "{} does not map the key of this map",
                entity.entity_name()
            ))
        };
        match self {
            KeyMapping::Direct { attribute, .. } => {
                let attribute = attribute.as_deref().ok_or_else(missing)?;
                key_of_attribute(entity, attribute)
            }
            KeyMapping::Embedded { attributes, .. } => {
                if attributes.is_empty() {
                    return Err(missing());
                }
                let parts = attributes
                    .iter()
                    .map(|a| {
                        a.as_deref()
                            .ok_or_else(missing)
                            .and_then(|a| key_of_attribute(entity, a))
                    })
                    .collect::<crate::Result<Vec<_>>>()?;
                Ok(MapKey::Tuple(parts))
            }
            KeyMapping::Entity { attribute, .. } => {
                let attribute = attribute.as_deref().ok_or_else(missing)?;
                key_of_attribute(entity, attribute)
            }
        }
    }

    /// Find the element attributes that carry the key, if the element
    /// descriptor maps them.
    fn resolve(&mut self, element: &ClassDescriptor) {
        match self {
            KeyMapping::Direct {
                field, attribute, ..
            } => {
                *attribute = element.direct_attribute_for_field(field).map(str::to_string);
            }
            KeyMapping::Embedded { fields, attributes } => {
                *attributes = fields
                    .iter()
                    .map(|f| element.direct_attribute_for_field(f).map(str::to_string))
                    .collect();
            }
            KeyMapping::Entity {
                foreign_key,
                attribute,
                ..
            } => {
                *attribute = element
                    .one_to_one_attribute_for_foreign_key(foreign_key)
                    .map(str::to_string);
            }
        }
    }
}

fn column<'r>(row: &'r Row, field: &DatabaseField) -> crate::Result<&'r Value> {
    row.get_field(field)
        .ok_or_else(|| extraction(format!("key column {field} is missing from the row")))
}

fn key_of_attribute(entity: &Entity, attribute: &str) -> crate::Result<MapKey> {
    match entity.get(attribute) {
        Some(Attribute::Value(value)) => MapKey::from_value(value),
        Some(Attribute::Object(Some(object))) => Ok(MapKey::object(object)),
        Some(Attribute::Object(None)) => Ok(MapKey::Null),
        Some(Attribute::Aggregate(embedded)) => Ok(MapKey::Tuple(
            embedded
                .attributes()
                .filter_map(|(_, a)| match a {
                    Attribute::Value(v) => Some(MapKey::from_value(v)),
                    _ => None,
                })
                .collect::<crate::Result<Vec<_>>>()?,
        )),
        _ => Err(extraction(format!(
            "{} has no value for key attribute '{attribute}'",
            entity.entity_name()
        ))),
    }
}

fn extraction(message: String) -> crate::Error {
    ContainerError::new(ContainerErrorKind::KeyExtraction, message).into()
}

/// Key accessor resolved once into a function over the element.
pub type AccessorFn = Arc<dyn Fn(&Entity) -> crate::Result<MapKey> + Send + Sync>;

/// How a map policy derives the key of an entry.
#[derive(Clone)]
pub enum KeyExtractor {
    /// Read a named attribute of the value object.
    ReflectiveAccessor { name: String, accessor: AccessorFn },
    /// Read a column of the row the value came from.
    ColumnBound {
        field: Option<DatabaseField>,
        converter: Option<Converter>,
    },
    /// Key has its own mapping.
    MappedKey(KeyMapping),
}

impl KeyExtractor {
    pub fn accessor(name: impl Into<String>) -> Self {
        let name = name.into();
        let attribute = name.clone();
        let accessor: AccessorFn =
            Arc::new(move |entity: &Entity| key_of_attribute(entity, &attribute));
        KeyExtractor::ReflectiveAccessor { name, accessor }
    }

    pub fn column(field: Option<DatabaseField>) -> Self {
        KeyExtractor::ColumnBound {
            field,
            converter: None,
        }
    }

    /// Columns the key reads from a row.
    pub fn fields(&self) -> Vec<DatabaseField> {
        match self {
            KeyExtractor::ReflectiveAccessor { .. } => Vec::new(),
            KeyExtractor::ColumnBound { field, .. } => field.iter().cloned().collect(),
            KeyExtractor::MappedKey(mapping) => mapping.fields(),
        }
    }

    /// Key of a value object.
    pub fn key_from_object(&self, entity: &Entity) -> crate::Result<MapKey> {
        match self {
            KeyExtractor::ReflectiveAccessor { accessor, .. } => accessor(entity),
            KeyExtractor::ColumnBound { .. } => Err(extraction(
                "a column-keyed map cannot derive a key from its value".to_string(),
            )),
            KeyExtractor::MappedKey(mapping) => mapping.key_from_object(entity),
        }
    }

    /// Key read from the raw row of an entry.
    pub fn key_from_row(&self, row: &Row, lookup: &dyn KeyLookup) -> crate::Result<MapKey> {
        match self {
            KeyExtractor::ReflectiveAccessor { name, .. } => Err(extraction(format!(
                "key accessor '{name}' reads the value object, not the row"
            ))),
            KeyExtractor::ColumnBound { field, converter } => {
                let field = field
                    .as_ref()
                    .ok_or_else(|| extraction("map has no key field".to_string()))?;
                let data = column(row, field)?;
                match converter {
                    Some(conv) => MapKey::from_value(&conv.to_object(data)?),
                    None => MapKey::from_value(data),
                }
            }
            KeyExtractor::MappedKey(mapping) => mapping.key_from_row(row, lookup),
        }
    }

    /// Validate against the element descriptor and resolve attribute links.
    pub(crate) fn resolve(
        &mut self,
        owner: &str,
        element: Option<&ClassDescriptor>,
    ) -> crate::Result<()> {
        match self {
            KeyExtractor::ReflectiveAccessor { name, .. } => {
                if let Some(element) = element {
                    let known = element
                        .mapping(name)
                        .is_some_and(|m| m.is_direct() || m.is_one_to_one() || m.is_aggregate());
                    if !known {
                        return Err(ConfigError::new(
                            ConfigErrorKind::InvalidKeyAccessor,
                            format!(
                                "map key accessor '{name}' is not a single-valued attribute of {}",
                                element.entity_name()
                            ),
                        )
                        .for_entity(owner)
                        .into());
                    }
                }
                Ok(())
            }
            KeyExtractor::ColumnBound { field: None, .. } => Err(ConfigError::new(
                ConfigErrorKind::MissingKeyField,
                "map keyed by column has no key field",
            )
            .for_entity(owner)
            .into()),
            KeyExtractor::ColumnBound { .. } => Ok(()),
            KeyExtractor::MappedKey(mapping) => {
                if let Some(element) = element {
                    mapping.resolve(element);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExtractor::ReflectiveAccessor { name, .. } => f
                .debug_struct("ReflectiveAccessor")
                .field("name", name)
                .finish_non_exhaustive(),
            KeyExtractor::ColumnBound { field, converter } => f
                .debug_struct("ColumnBound")
                .field("field", field)
                .field("converter", converter)
                .finish(),
            KeyExtractor::MappedKey(mapping) => f.debug_tuple("MappedKey").field(mapping).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use std::collections::HashSet;

    #[test]
    fn integer_widths_share_a_key() {
        let a = MapKey::from_value(&Value::Int(5)).unwrap();
        let b = MapKey::from_value(&Value::BigInt(5)).unwrap();
        assert_eq!(a, b);
        let set: HashSet<MapKey> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn rejects_unusable_values() {
        let err = MapKey::from_value(&Value::Double(f64::NAN)).unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::NonComparableKey));
        assert!(MapKey::from_value(&Value::Float(f32::NAN)).is_err());
        assert!(MapKey::from_value(&Value::Null).unwrap().is_null());
    }

    #[test]
    fn object_keys_use_identity() {
        let a = Entity::new("Dept").with_value("id", 1_i64).into_ref();
        let b = Entity::new("Dept").with_value("id", 1_i64).into_ref();
        assert_ne!(MapKey::object(&a), MapKey::object(&b));
        assert_eq!(MapKey::object(&a), MapKey::object(&Arc::clone(&a)));
        assert!(!MapKey::object(&a).is_orderable());
    }

    #[test]
    fn ordering_of_tuples() {
        let k1 = MapKey::from_value(&Value::Array(vec![Value::Int(1), Value::from("b")])).unwrap();
        let k2 = MapKey::from_value(&Value::Array(vec![Value::Int(1), Value::from("c")])).unwrap();
        assert_eq!(k1.try_cmp(&k2), Some(Ordering::Less));
        assert_eq!(MapKey::Null.try_cmp(&k1), None);
    }

    #[test]
    fn accessor_reads_value_object() {
        let extractor = KeyExtractor::accessor("code");
        let phone = Entity::new("Phone").with_value("code", "home");
        assert_eq!(
            extractor.key_from_object(&phone).unwrap(),
            MapKey::Value(Value::from("home"))
        );
        let err = extractor
            .key_from_object(&Entity::new("Phone"))
            .unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::KeyExtraction));
        assert!(extractor.key_from_row(&Row::empty(), &NoCache).is_err());
    }

    #[test]
    fn column_bound_reads_row_through_converter() {
        let extractor = KeyExtractor::ColumnBound {
            field: Some(DatabaseField::new("PHONE.TYPE")),
            converter: Some(Converter::object_type().mapping("H", "home")),
        };
        let row = Row::empty().with("PHONE.TYPE", "H");
        assert_eq!(
            extractor.key_from_row(&row, &NoCache).unwrap(),
            MapKey::Value(Value::from("home"))
        );
        assert_eq!(extractor.fields(), vec![DatabaseField::new("PHONE.TYPE")]);
    }

    #[test]
    fn entity_key_needs_lookup() {
        let extractor =
            KeyExtractor::MappedKey(KeyMapping::entity("Project", &["ASSIGNMENT.PROJ_ID"]));
        let row = Row::empty().with("ASSIGNMENT.PROJ_ID", 3_i64);
        let err = extractor.key_from_row(&row, &NoCache).unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::KeyExtraction));

        let null_row = Row::empty().with("ASSIGNMENT.PROJ_ID", Value::Null);
        assert!(extractor.key_from_row(&null_row, &NoCache).unwrap().is_null());
    }
}
