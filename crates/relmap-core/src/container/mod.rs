//! Container policies: how a relationship's collection is built and edited.
//!
//! A [`ContainerPolicy`] owns the shape of a collection mapping (list, set,
//! or one of the map shapes) and the concrete [`ContainerClass`] to build.
//! Every operation dispatches on the shape internally, so callers never
//! branch on the container type.

mod class;
mod iter;
mod key;
mod store;

pub use class::{ContainerClass, ContainerKind};
pub use iter::{ContainerCursor, IteratorResult, MapContainerPolicyIterator};
pub use key::{AccessorFn, KeyExtractor, KeyMapping, MapKey};
pub use store::{Container, ContainerBody, Element};

use crate::cache::KeyLookup;
use crate::classes::ClassRegistry;
use crate::converter::Converter;
use crate::descriptor::ClassDescriptor;
use crate::error::{ConfigError, ConfigErrorKind, ContainerError, ContainerErrorKind};
use crate::field::DatabaseField;
use crate::row::Row;
use std::cmp::Ordering;

/// Shape of a collection mapping.
#[derive(Debug, Clone)]
pub enum ContainerShape {
    List,
    Set,
    /// Map keyed by an attribute of the value object.
    MapByAttribute(KeyExtractor),
    /// Direct map: key and value are two columns of the reference table.
    MapByColumn(KeyExtractor),
    /// Map whose key has its own mapping.
    MapByMapping(KeyExtractor),
}

impl ContainerShape {
    fn expected_kind(&self) -> ContainerKind {
        match self {
            ContainerShape::List => ContainerKind::Sequence,
            ContainerShape::Set => ContainerKind::Set,
            _ => ContainerKind::Map,
        }
    }

    fn default_class(&self) -> ContainerClass {
        match self {
            ContainerShape::List => ContainerClass::Vec,
            ContainerShape::Set => ContainerClass::HashSet,
            _ => ContainerClass::HashMap,
        }
    }

    fn extractor(&self) -> Option<&KeyExtractor> {
        match self {
            ContainerShape::MapByAttribute(e)
            | ContainerShape::MapByColumn(e)
            | ContainerShape::MapByMapping(e) => Some(e),
            ContainerShape::List | ContainerShape::Set => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ContainerShape::List => "list",
            ContainerShape::Set => "set",
            ContainerShape::MapByAttribute(_) => "map by attribute",
            ContainerShape::MapByColumn(_) => "direct map",
            ContainerShape::MapByMapping(_) => "mapped-key map",
        }
    }
}

/// Raw material for [`ContainerPolicy::build_container_from_vector`].
#[derive(Debug, Clone)]
pub enum VectorItem {
    /// A reference-table row; the value (and key) are read from it.
    Row(Row),
    /// An already-built element.
    Element(Element),
    /// A built element plus the row it came from, for row-derived keys.
    ElementWithRow(Element, Row),
}

/// Strategy over a relationship's in-memory collection.
#[derive(Debug, Clone)]
pub struct ContainerPolicy {
    shape: ContainerShape,
    class: ContainerClass,
    class_name: Option<String>,
    element_descriptor: Option<String>,
    value_field: Option<DatabaseField>,
    value_converter: Option<Converter>,
}

impl ContainerPolicy {
    fn with_shape(shape: ContainerShape) -> Self {
        Self {
            class: shape.default_class(),
            shape,
            class_name: None,
            element_descriptor: None,
            value_field: None,
            value_converter: None,
        }
    }

    pub fn list() -> Self {
        Self::with_shape(ContainerShape::List)
    }

    pub fn set() -> Self {
        Self::with_shape(ContainerShape::Set)
    }

    /// Map keyed by the named attribute of each value object.
    pub fn map_by_attribute(key_name: impl Into<String>) -> Self {
        Self::with_shape(ContainerShape::MapByAttribute(KeyExtractor::accessor(
            key_name,
        )))
    }

    /// Direct map keyed by a column of the reference table.
    pub fn map_by_column(key_field: Option<DatabaseField>) -> Self {
        Self::with_shape(ContainerShape::MapByColumn(KeyExtractor::column(key_field)))
    }

    pub fn map_by_mapping(key: KeyMapping) -> Self {
        Self::with_shape(ContainerShape::MapByMapping(KeyExtractor::MappedKey(key)))
    }

    pub fn with_class(mut self, class: ContainerClass) -> Self {
        self.class = class;
        self.class_name = None;
        self
    }

    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.set_container_class_name(name);
        self
    }

    pub fn for_element(mut self, entity: impl Into<String>) -> Self {
        self.element_descriptor = Some(entity.into());
        self
    }

    pub fn with_value_field(mut self, field: impl Into<DatabaseField>) -> Self {
        self.value_field = Some(field.into());
        self
    }

    pub fn shape(&self) -> &ContainerShape {
        &self.shape
    }

    pub fn container_class(&self) -> ContainerClass {
        self.class
    }

    pub fn element_descriptor(&self) -> Option<&str> {
        self.element_descriptor.as_deref()
    }

    pub fn value_field(&self) -> Option<&DatabaseField> {
        self.value_field.as_ref()
    }

    pub fn is_map_policy(&self) -> bool {
        self.shape.extractor().is_some()
    }

    /// Whether the key is itself a managed entity.
    pub fn key_reference(&self) -> Option<&str> {
        match &self.shape {
            ContainerShape::MapByMapping(KeyExtractor::MappedKey(mapping)) => mapping.reference(),
            _ => None,
        }
    }

    // Configuration surface.

    pub fn set_key_name(&mut self, name: impl Into<String>) -> crate::Result<()> {
        match &mut self.shape {
            ContainerShape::MapByAttribute(extractor) => {
                *extractor = KeyExtractor::accessor(name);
                Ok(())
            }
            _ => Err(self.wrong_shape("a key attribute name")),
        }
    }

    pub fn set_key_field(&mut self, field: impl Into<DatabaseField>) -> crate::Result<()> {
        match &mut self.shape {
            ContainerShape::MapByColumn(KeyExtractor::ColumnBound { field: slot, .. }) => {
                *slot = Some(field.into());
                Ok(())
            }
            _ => Err(self.wrong_shape("a key column")),
        }
    }

    pub fn set_value_field(&mut self, field: impl Into<DatabaseField>) {
        self.value_field = Some(field.into());
    }

    pub fn set_key_converter(&mut self, converter: Converter) -> crate::Result<()> {
        match &mut self.shape {
            ContainerShape::MapByColumn(KeyExtractor::ColumnBound { converter: slot, .. })
            | ContainerShape::MapByMapping(KeyExtractor::MappedKey(KeyMapping::Direct {
                converter: slot,
                ..
            })) => {
                *slot = Some(converter);
                Ok(())
            }
            _ => Err(self.wrong_shape("a key converter")),
        }
    }

    pub fn set_key_converter_name(&mut self, name: impl Into<String>) -> crate::Result<()> {
        self.set_key_converter(Converter::named(name))
    }

    pub fn set_value_converter(&mut self, converter: Converter) {
        self.value_converter = Some(converter);
    }

    pub fn set_container_class_name(&mut self, name: impl Into<String>) {
        self.class_name = Some(name.into());
    }

    fn wrong_shape(&self, what: &str) -> crate::Error {
        ConfigError::new(
            ConfigErrorKind::InvalidMapping,
            format!("a {} container does not take {what}", self.shape.name()),
        )
        .into()
    }

    /// Resolve the container class name and named converters.
    pub fn convert_class_names_to_classes(&mut self, registry: &ClassRegistry) -> crate::Result<()> {
        if let Some(name) = self.class_name.take() {
            self.class = registry.container_class(&name)?;
        }
        if let Some(conv) = &self.value_converter {
            self.value_converter = Some(conv.resolve(registry)?);
        }
        match &mut self.shape {
            ContainerShape::MapByColumn(KeyExtractor::ColumnBound {
                converter: Some(conv),
                ..
            })
            | ContainerShape::MapByMapping(KeyExtractor::MappedKey(KeyMapping::Direct {
                converter: Some(conv),
                ..
            })) => {
                *conv = conv.resolve(registry)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Validate the policy against its owner and element descriptor.
    pub fn initialize(&mut self, owner: &str, element: Option<&ClassDescriptor>) -> crate::Result<()> {
        let config = |kind, message: String| -> crate::Error {
            ConfigError::new(kind, message).for_entity(owner).into()
        };
        if let Some(name) = &self.class_name {
            return Err(config(
                ConfigErrorKind::UnresolvableClass,
                format!("container class '{name}' was never resolved"),
            ));
        }
        if !self.class.is_instantiable() {
            return Err(config(
                ConfigErrorKind::NotInstantiable,
                format!("container class '{}' cannot be instantiated", self.class),
            ));
        }
        if self.class.kind() != self.shape.expected_kind() {
            return Err(config(
                ConfigErrorKind::InvalidMapping,
                format!(
                    "container class '{}' cannot hold a {}",
                    self.class,
                    self.shape.name()
                ),
            ));
        }
        if let ContainerShape::MapByAttribute(KeyExtractor::ReflectiveAccessor { name, .. }) =
            &self.shape
        {
            if name.is_empty() {
                return Err(config(
                    ConfigErrorKind::InvalidKeyAccessor,
                    "map keyed by attribute has no key name".to_string(),
                ));
            }
        }
        match &mut self.shape {
            ContainerShape::MapByAttribute(extractor)
            | ContainerShape::MapByColumn(extractor)
            | ContainerShape::MapByMapping(extractor) => extractor.resolve(owner, element)?,
            ContainerShape::List | ContainerShape::Set => {}
        }
        if let Some(element) = element {
            self.element_descriptor = Some(element.entity_name().to_string());
        }
        Ok(())
    }

    // Operations.

    pub fn container_instance(&self) -> Container {
        Container::with_capacity(self.class, 0)
    }

    pub fn container_instance_with_capacity(&self, capacity: usize) -> Container {
        Container::with_capacity(self.class, capacity)
    }

    /// Add `element`, keyed by `key` or by the policy's key extraction.
    /// Returns true when the container grew.
    pub fn add_into(
        &self,
        key: Option<MapKey>,
        element: Element,
        container: &mut Container,
    ) -> crate::Result<bool> {
        self.check_writable(container)?;
        self.add_unchecked(key, element, container)
    }

    /// Add an entry whose key (and, for direct maps, value) come from `row`.
    pub fn add_into_with_row(
        &self,
        element: Option<Element>,
        row: &Row,
        container: &mut Container,
        lookup: &dyn KeyLookup,
    ) -> crate::Result<bool> {
        self.check_writable(container)?;
        self.add_row_unchecked(element, row, container, lookup)
    }

    fn add_row_unchecked(
        &self,
        element: Option<Element>,
        row: &Row,
        container: &mut Container,
        lookup: &dyn KeyLookup,
    ) -> crate::Result<bool> {
        let element = match element {
            Some(element) => element,
            None => self.value_from_row(row)?,
        };
        let key = match &self.shape {
            ContainerShape::MapByColumn(_) | ContainerShape::MapByMapping(_) => {
                Some(self.build_key(row, lookup)?)
            }
            _ => None,
        };
        self.add_unchecked(key, element, container)
    }

    fn add_unchecked(
        &self,
        key: Option<MapKey>,
        element: Element,
        container: &mut Container,
    ) -> crate::Result<bool> {
        self.check_kind(container)?;
        let class = container.class();
        match container.body_mut() {
            ContainerBody::Sequence(items) => {
                items.push(element);
                Ok(true)
            }
            ContainerBody::Keyed(entries) => {
                let key = match (&self.shape, key) {
                    (ContainerShape::Set, _) => MapKey::for_element(&element)?,
                    (_, Some(key)) => key,
                    (_, None) => self.key_from(&element)?,
                };
                if key.is_null() && !class.allows_null_keys() {
                    return Err(ContainerError::new(
                        ContainerErrorKind::NullKey,
                        "container does not accept null keys",
                    )
                    .in_container(class.name())
                    .into());
                }
                if matches!(self.shape, ContainerShape::Set) && entries.contains_key(&key) {
                    return Ok(false);
                }
                if !class.is_sorted() {
                    return Ok(entries.insert(key, element).is_none());
                }
                if !key.is_orderable() {
                    return Err(ContainerError::new(
                        ContainerErrorKind::NonComparableKey,
                        "key cannot be ordered in a sorted container",
                    )
                    .in_container(class.name())
                    .into());
                }
                if let Some(existing) = entries.get_mut(&key) {
                    *existing = element;
                    return Ok(false);
                }
                let position = sorted_position(entries.keys(), &key)?;
                let (index, _) = entries.insert_full(key, element);
                entries.move_index(index, position);
                Ok(true)
            }
        }
    }

    /// Key of an element under this policy.
    pub fn key_from(&self, element: &Element) -> crate::Result<MapKey> {
        match &self.shape {
            ContainerShape::Set => MapKey::for_element(element),
            ContainerShape::MapByAttribute(extractor) | ContainerShape::MapByMapping(extractor) => {
                let object = element.as_object().ok_or_else(|| {
                    ContainerError::new(
                        ContainerErrorKind::TypeMismatch,
                        "map keyed by attribute holds objects, not direct values",
                    )
                })?;
                extractor.key_from_object(object)
            }
            ContainerShape::MapByColumn(_) => Err(ContainerError::new(
                ContainerErrorKind::KeyExtraction,
                "direct map keys come from the row, not the value",
            )
            .into()),
            ContainerShape::List => Err(not_keyed()),
        }
    }

    /// Key read from a raw row.
    pub fn build_key(&self, row: &Row, lookup: &dyn KeyLookup) -> crate::Result<MapKey> {
        match self.shape.extractor() {
            Some(extractor) => extractor.key_from_row(row, lookup),
            None => Err(not_keyed()),
        }
    }

    /// Direct value read from the configured value column.
    pub fn value_from_row(&self, row: &Row) -> crate::Result<Element> {
        let field = self.value_field.as_ref().ok_or_else(|| {
            ContainerError::new(
                ContainerErrorKind::KeyExtraction,
                "container has no value field to read rows from",
            )
        })?;
        let data = row.get_field(field).ok_or_else(|| {
            ContainerError::new(
                ContainerErrorKind::KeyExtraction,
                format!("value column {field} is missing from the row"),
            )
        })?;
        let value = match &self.value_converter {
            Some(conv) => conv.to_object(data)?,
            None => data.clone(),
        };
        Ok(Element::Value(value))
    }

    /// Remove by key (maps) or by element (lists and sets).
    pub fn remove_from(
        &self,
        key: Option<&MapKey>,
        element: Option<&Element>,
        container: &mut Container,
    ) -> crate::Result<bool> {
        self.check_writable(container)?;
        self.check_kind(container)?;
        let computed;
        let key = match (key, element, &self.shape) {
            (_, _, ContainerShape::List) => None,
            (Some(key), _, ContainerShape::MapByAttribute(_))
            | (Some(key), _, ContainerShape::MapByColumn(_))
            | (Some(key), _, ContainerShape::MapByMapping(_)) => Some(key),
            (_, Some(element), _) => {
                computed = self.key_from(element)?;
                Some(&computed)
            }
            (_, None, _) => return Ok(false),
        };
        match container.body_mut() {
            ContainerBody::Sequence(items) => {
                let Some(element) = element else {
                    return Ok(false);
                };
                match items.iter().position(|e| e == element) {
                    Some(index) => {
                        items.remove(index);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            ContainerBody::Keyed(entries) => {
                Ok(key.is_some_and(|key| entries.shift_remove(key).is_some()))
            }
        }
    }

    /// Remove the first entry whose value is `element` by identity.
    pub fn remove_from_with_identity(
        &self,
        element: &Element,
        container: &mut Container,
    ) -> crate::Result<bool> {
        self.check_writable(container)?;
        self.check_kind(container)?;
        match container.body_mut() {
            ContainerBody::Sequence(items) => {
                match items.iter().position(|e| e.same_identity(element)) {
                    Some(index) => {
                        items.remove(index);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            ContainerBody::Keyed(entries) => {
                match entries.values().position(|e| e.same_identity(element)) {
                    Some(index) => Ok(entries.shift_remove_index(index).is_some()),
                    None => Ok(false),
                }
            }
        }
    }

    pub fn iterator_for<'a>(&self, container: &'a Container) -> ContainerCursor<'a> {
        ContainerCursor::new(container)
    }

    pub fn map_iterator_for<'a>(
        &self,
        container: &'a mut Container,
    ) -> crate::Result<MapContainerPolicyIterator<'a>> {
        let read_only = container.class().is_read_only();
        match container.body_mut() {
            ContainerBody::Keyed(entries) if self.is_map_policy() => {
                Ok(MapContainerPolicyIterator::new(entries, read_only))
            }
            _ => Err(not_keyed()),
        }
    }

    pub fn unwrap_iterator_result(&self, result: IteratorResult) -> Element {
        result.into_element()
    }

    pub fn size_for(&self, container: &Container) -> usize {
        container.len()
    }

    pub fn is_empty(&self, container: &Container) -> bool {
        container.is_empty()
    }

    pub fn contains(&self, element: &Element, container: &Container) -> bool {
        match (&self.shape, container.body()) {
            (ContainerShape::Set, ContainerBody::Keyed(entries)) => MapKey::for_element(element)
                .is_ok_and(|key| entries.contains_key(&key)),
            _ => container.elements().any(|e| e == element),
        }
    }

    pub fn contains_key(&self, key: &MapKey, container: &Container) -> bool {
        self.is_map_policy() && container.get(key).is_some()
    }

    /// Same size, and every key of `a` maps to an equal value in `b`.
    pub fn compare_containers(&self, a: &Container, b: &Container) -> bool {
        if a.len() != b.len() {
            return false;
        }
        match (a.body(), b.body()) {
            (ContainerBody::Sequence(x), ContainerBody::Sequence(y)) => x == y,
            (ContainerBody::Keyed(x), ContainerBody::Keyed(y)) => {
                x.iter().all(|(key, value)| y.get(key) == Some(value))
            }
            _ => false,
        }
    }

    /// Build a container from rows or built elements. Read-only classes are
    /// filled here before being handed out.
    pub fn build_container_from_vector(
        &self,
        items: Vec<VectorItem>,
        lookup: &dyn KeyLookup,
    ) -> crate::Result<Container> {
        let mut container = self.container_instance_with_capacity(items.len());
        for item in items {
            match item {
                VectorItem::Row(row) => {
                    self.add_row_unchecked(None, &row, &mut container, lookup)?;
                }
                VectorItem::Element(element) => {
                    self.add_unchecked(None, element, &mut container)?;
                }
                VectorItem::ElementWithRow(element, row) => {
                    self.add_row_unchecked(Some(element), &row, &mut container, lookup)?;
                }
            }
        }
        Ok(container)
    }

    pub fn vector_for(&self, container: &Container) -> Vec<Element> {
        container.elements().cloned().collect()
    }

    /// New container holding the entries of `a` then `b`.
    pub fn concatenate_containers(&self, a: &Container, b: &Container) -> crate::Result<Container> {
        let mut result = self.container_instance_with_capacity(a.len() + b.len());
        for source in [a, b] {
            match source.body() {
                ContainerBody::Sequence(items) => {
                    for element in items {
                        self.add_unchecked(None, element.clone(), &mut result)?;
                    }
                }
                ContainerBody::Keyed(entries) => {
                    for (key, element) in entries {
                        self.add_unchecked(Some(key.clone()), element.clone(), &mut result)?;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Key columns selected in addition to the element when join-fetched.
    pub fn additional_fields_for_join(&self) -> Vec<DatabaseField> {
        match &self.shape {
            ContainerShape::MapByMapping(extractor) => extractor.fields(),
            _ => Vec::new(),
        }
    }

    fn check_kind(&self, container: &Container) -> crate::Result<()> {
        let expected = self.shape.expected_kind();
        if container.class().kind() == expected {
            Ok(())
        } else {
            Err(ContainerError::new(
                ContainerErrorKind::TypeMismatch,
                format!(
                    "a {} policy cannot operate on a {}",
                    self.shape.name(),
                    container.class()
                ),
            )
            .in_container(container.class().name())
            .into())
        }
    }

    fn check_writable(&self, container: &Container) -> crate::Result<()> {
        if container.class().is_read_only() {
            Err(ContainerError::new(
                ContainerErrorKind::UnsupportedOperation,
                "container is read-only",
            )
            .in_container(container.class().name())
            .into())
        } else {
            Ok(())
        }
    }
}

fn not_keyed() -> crate::Error {
    ContainerError::new(
        ContainerErrorKind::TypeMismatch,
        "operation needs a keyed map container",
    )
    .into()
}

fn sorted_position<'a>(
    keys: impl Iterator<Item = &'a MapKey>,
    key: &MapKey,
) -> crate::Result<usize> {
    let mut position = 0;
    for existing in keys {
        match existing.try_cmp(key) {
            Some(Ordering::Less) => position += 1,
            Some(_) => break,
            None => {
                return Err(ContainerError::new(
                    ContainerErrorKind::NonComparableKey,
                    "keys of different types cannot share a sorted container",
                )
                .into());
            }
        }
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use crate::object::Entity;
    use crate::value::Value;

    fn phone(kind: &str, number: &str) -> Element {
        Element::Object(
            Entity::new("Phone")
                .with_value("type", kind)
                .with_value("number", number)
                .into_ref(),
        )
    }

    fn text(key: &str) -> MapKey {
        MapKey::Value(Value::from(key))
    }

    #[test]
    fn list_round_trip() {
        let policy = ContainerPolicy::list();
        let mut c = policy.container_instance();
        for i in 0..3_i64 {
            assert!(policy.add_into(None, Value::from(i).into(), &mut c).unwrap());
        }
        assert!(policy.add_into(None, Value::from(1_i64).into(), &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 4);
        let seen: Vec<_> = policy
            .iterator_for(&c)
            .map(|r| policy.unwrap_iterator_result(r))
            .collect();
        assert_eq!(seen[2], Element::Value(Value::BigInt(2)));
        assert!(policy
            .remove_from(None, Some(&Value::from(1_i64).into()), &mut c)
            .unwrap());
        assert_eq!(policy.size_for(&c), 3);
        assert!(!policy
            .remove_from(None, Some(&Value::from(9_i64).into()), &mut c)
            .unwrap());
    }

    #[test]
    fn set_ignores_duplicates() {
        let policy = ContainerPolicy::set();
        let mut c = policy.container_instance();
        assert!(policy.add_into(None, Value::from("a").into(), &mut c).unwrap());
        assert!(!policy.add_into(None, Value::from("a").into(), &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 1);
        assert!(policy.contains(&Value::from("a").into(), &c));
        assert!(matches!(
            policy.iterator_for(&c).next(),
            Some(IteratorResult::Element(_))
        ));
    }

    #[test]
    fn map_by_attribute_extracts_keys() {
        let policy = ContainerPolicy::map_by_attribute("type");
        let mut c = policy.container_instance();
        assert!(policy.add_into(None, phone("home", "555"), &mut c).unwrap());
        assert!(policy.add_into(None, phone("work", "556"), &mut c).unwrap());
        // replacing an existing key does not grow the map
        assert!(!policy.add_into(None, phone("home", "557"), &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 2);
        assert!(policy.contains_key(&text("work"), &c));

        let entry = policy.iterator_for(&c).next().unwrap();
        assert_eq!(entry.key(), Some(&text("home")));

        assert!(policy.remove_from(Some(&text("home")), None, &mut c).unwrap());
        assert!(!policy.remove_from(Some(&text("home")), None, &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 1);

        let err = policy
            .add_into(None, Value::from("bare").into(), &mut c)
            .unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::TypeMismatch));
    }

    #[test]
    fn sorted_map_orders_keys_and_rejects_null() {
        let policy = ContainerPolicy::map_by_attribute("type").with_class(ContainerClass::BTreeMap);
        let mut c = policy.container_instance();
        for kind in ["work", "cell", "home"] {
            policy.add_into(None, phone(kind, "1"), &mut c).unwrap();
        }
        let keys: Vec<_> = c.keys().cloned().collect();
        assert_eq!(keys, vec![text("cell"), text("home"), text("work")]);

        let err = policy
            .add_into(Some(MapKey::Null), phone("x", "2"), &mut c)
            .unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::NullKey));
    }

    #[test]
    fn non_null_hash_map_rejects_null_key() {
        let policy =
            ContainerPolicy::map_by_attribute("type").with_class(ContainerClass::NonNullHashMap);
        let mut c = policy.container_instance();
        let untyped = Element::Object(Entity::new("Phone").with_value("type", Value::Null).into_ref());
        let err = policy.add_into(None, untyped, &mut c).unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::NullKey));
    }

    #[test]
    fn identity_removal_removes_first_identical_only() {
        let policy = ContainerPolicy::list();
        let shared = phone("home", "1");
        let twin = phone("home", "1");
        let mut c = policy.container_instance();
        policy.add_into(None, twin.clone(), &mut c).unwrap();
        policy.add_into(None, shared.clone(), &mut c).unwrap();
        policy.add_into(None, shared.clone(), &mut c).unwrap();

        assert!(policy.remove_from_with_identity(&shared, &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 2);
        let remaining = policy.vector_for(&c);
        assert!(remaining[0].same_identity(&twin));
        assert!(remaining[1].same_identity(&shared));
    }

    #[test]
    fn frozen_classes_are_built_but_not_edited() {
        let policy = ContainerPolicy::list().with_class(ContainerClass::FrozenVec);
        let mut c = policy
            .build_container_from_vector(
                vec![VectorItem::Element(Value::from(1_i64).into())],
                &NoCache,
            )
            .unwrap();
        assert_eq!(policy.size_for(&c), 1);
        let err = policy
            .add_into(None, Value::from(2_i64).into(), &mut c)
            .unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::UnsupportedOperation));
    }

    #[test]
    fn direct_map_from_rows() {
        let mut policy = ContainerPolicy::map_by_column(None);
        policy.set_key_field("EMP_PHONE.TYPE").unwrap();
        policy.set_value_field("EMP_PHONE.NUMBER");
        policy
            .set_key_converter(Converter::object_type().mapping("H", "home").mapping("W", "work"))
            .unwrap();
        let rows = vec![
            VectorItem::Row(Row::empty().with("EMP_PHONE.TYPE", "H").with("EMP_PHONE.NUMBER", "555")),
            VectorItem::Row(Row::empty().with("EMP_PHONE.TYPE", "W").with("EMP_PHONE.NUMBER", "556")),
        ];
        let c = policy.build_container_from_vector(rows, &NoCache).unwrap();
        assert_eq!(c.get(&text("work")), Some(&Element::Value(Value::from("556"))));
        assert!(policy.additional_fields_for_join().is_empty());
    }

    #[test]
    fn direct_map_removes_by_key_or_value() {
        let mut policy = ContainerPolicy::map_by_column(None);
        policy.set_key_field("EMP_PHONE.TYPE").unwrap();
        policy.set_value_field("EMP_PHONE.NUMBER");
        let rows = ["home", "work", "cell"]
            .into_iter()
            .zip(["555", "556", "557"])
            .map(|(kind, number)| {
                VectorItem::Row(Row::empty().with("EMP_PHONE.TYPE", kind).with("EMP_PHONE.NUMBER", number))
            })
            .collect();
        let mut c = policy.build_container_from_vector(rows, &NoCache).unwrap();

        assert!(policy.remove_from(Some(&text("work")), None, &mut c).unwrap());
        assert!(!policy.remove_from(Some(&text("work")), None, &mut c).unwrap());
        assert!(!policy.contains_key(&text("work"), &c));

        // a bare value carries no key
        let err = policy
            .remove_from(None, Some(&Value::from("555").into()), &mut c)
            .unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::KeyExtraction));

        assert!(policy.remove_from_with_identity(&Value::from("557").into(), &mut c).unwrap());
        assert!(!policy.remove_from_with_identity(&Value::from("557").into(), &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 1);
        assert_eq!(c.get(&text("home")), Some(&Element::Value(Value::from("555"))));
    }

    #[test]
    fn mapped_map_removes_by_key_element_or_identity() {
        let policy = ContainerPolicy::map_by_mapping(KeyMapping::Direct {
            field: DatabaseField::new("PHONE.TYPE"),
            converter: None,
            attribute: Some("type".to_string()),
        });
        let home = phone("home", "1");
        let work = phone("work", "2");
        let cell = phone("cell", "3");
        let rows = [(&home, "home"), (&work, "work"), (&cell, "cell")]
            .into_iter()
            .map(|(element, kind)| {
                VectorItem::ElementWithRow(element.clone(), Row::empty().with("PHONE.TYPE", kind))
            })
            .collect();
        let mut c = policy.build_container_from_vector(rows, &NoCache).unwrap();

        assert!(policy.remove_from(Some(&text("home")), None, &mut c).unwrap());
        assert!(policy.remove_from(None, Some(&work), &mut c).unwrap());
        assert!(!policy.remove_from(None, Some(&work), &mut c).unwrap());

        // an equal but distinct object is not the stored one
        assert!(!policy.remove_from_with_identity(&phone("cell", "3"), &mut c).unwrap());
        assert_eq!(policy.size_for(&c), 1);
        assert!(policy.remove_from_with_identity(&cell, &mut c).unwrap());
        assert!(policy.is_empty(&c));
    }

    #[test]
    fn mapped_key_consistency() {
        let policy = ContainerPolicy::map_by_mapping(KeyMapping::Direct {
            field: DatabaseField::new("PHONE.TYPE"),
            converter: None,
            attribute: Some("type".to_string()),
        });
        let rows: Vec<_> = ["home", "work"]
            .into_iter()
            .map(|kind| {
                VectorItem::ElementWithRow(phone(kind, "1"), Row::empty().with("PHONE.TYPE", kind))
            })
            .collect();
        let c = policy.build_container_from_vector(rows, &NoCache).unwrap();
        let mut cursor = policy.iterator_for(&c);
        while let Some((key, value)) = cursor.next_entry() {
            assert_eq!(Some(&policy.key_from(value).unwrap()), key);
        }
        assert_eq!(
            policy.additional_fields_for_join(),
            vec![DatabaseField::new("PHONE.TYPE")]
        );
    }

    #[test]
    fn map_iterator_removes_current_entry() {
        let policy = ContainerPolicy::map_by_attribute("type");
        let mut c = policy.container_instance();
        for kind in ["home", "work", "cell"] {
            policy.add_into(None, phone(kind, "1"), &mut c).unwrap();
        }
        let mut it = policy.map_iterator_for(&mut c).unwrap();
        while it.advance() {
            if it.current_key() == Some(&text("work")) {
                assert!(it.remove().unwrap().is_some());
            }
        }
        assert_eq!(policy.size_for(&c), 2);
        assert!(!policy.contains_key(&text("work"), &c));

        let list = ContainerPolicy::list();
        let mut l = list.container_instance();
        assert!(list.map_iterator_for(&mut l).is_err());
    }

    #[test]
    fn compare_containers_by_key_and_value() {
        let policy = ContainerPolicy::map_by_attribute("type");
        let home = phone("home", "1");
        let mut a = policy.container_instance();
        policy.add_into(None, home.clone(), &mut a).unwrap();
        policy.add_into(None, phone("work", "2"), &mut a).unwrap();
        assert!(policy.compare_containers(&a, &a));

        let mut b = policy.container_instance();
        policy.add_into(None, phone("work", "2"), &mut b).unwrap();
        policy.add_into(None, home, &mut b).unwrap();
        assert!(policy.compare_containers(&a, &b));
        assert!(policy.compare_containers(&b, &a));

        policy.add_into(None, phone("work", "3"), &mut b).unwrap();
        assert!(!policy.compare_containers(&a, &b));
    }

    #[test]
    fn wrong_container_kind_is_a_type_mismatch() {
        let set = ContainerPolicy::set();
        let mut list = ContainerPolicy::list().container_instance();
        let err = set
            .add_into(None, Value::from(1_i64).into(), &mut list)
            .unwrap_err();
        assert_eq!(err.container_kind(), Some(ContainerErrorKind::TypeMismatch));
    }

    #[test]
    fn initialize_validates_configuration() {
        let mut abstract_map =
            ContainerPolicy::map_by_attribute("type").with_class(ContainerClass::AbstractMap);
        let err = abstract_map.initialize("Employee", None).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::NotInstantiable));

        let mut keyless = ContainerPolicy::map_by_column(None);
        let err = keyless.initialize("Employee", None).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingKeyField));

        let mut mismatched = ContainerPolicy::set().with_class(ContainerClass::Vec);
        let err = mismatched.initialize("Employee", None).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidMapping));

        let mut named = ContainerPolicy::list().with_class_name("app::Bag");
        let err = named.initialize("Employee", None).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnresolvableClass));

        let mut registry = ClassRegistry::with_defaults();
        registry
            .register_container_class("app::Bag", ContainerClass::FrozenVec)
            .unwrap();
        named.convert_class_names_to_classes(&registry).unwrap();
        named.initialize("Employee", None).unwrap();
        assert_eq!(named.container_class(), ContainerClass::FrozenVec);
    }

    #[test]
    fn concatenation_keeps_both_sides() {
        let policy = ContainerPolicy::set().with_class(ContainerClass::IndexSet);
        let a = policy
            .build_container_from_vector(
                vec![
                    VectorItem::Element(Value::from("a").into()),
                    VectorItem::Element(Value::from("b").into()),
                ],
                &NoCache,
            )
            .unwrap();
        let b = policy
            .build_container_from_vector(
                vec![
                    VectorItem::Element(Value::from("b").into()),
                    VectorItem::Element(Value::from("c").into()),
                ],
                &NoCache,
            )
            .unwrap();
        let joined = policy.concatenate_containers(&a, &b).unwrap();
        assert_eq!(policy.size_for(&joined), 3);
    }
}
