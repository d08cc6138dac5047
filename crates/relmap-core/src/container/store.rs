//! In-memory container representation shared by every container class.

use crate::container::{ContainerClass, ContainerKind, MapKey};
use crate::object::ObjectRef;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// One member of a container: a direct value or a managed object.
#[derive(Debug, Clone)]
pub enum Element {
    Value(Value),
    Object(ObjectRef),
}

impl Element {
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Element::Object(object) => Some(object),
            Element::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Element::Value(value) => Some(value),
            Element::Object(_) => None,
        }
    }

    /// Reference identity for objects, SQL equality for values.
    pub fn same_identity(&self, other: &Element) -> bool {
        match (self, other) {
            (Element::Object(a), Element::Object(b)) => Arc::ptr_eq(a, b),
            (Element::Value(a), Element::Value(b)) => a.sql_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Element::Object(a), Element::Object(b)) => Arc::ptr_eq(a, b) || **a == **b,
            (Element::Value(a), Element::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for Element {
    fn from(value: Value) -> Self {
        Element::Value(value)
    }
}

impl From<ObjectRef> for Element {
    fn from(object: ObjectRef) -> Self {
        Element::Object(object)
    }
}

/// Storage behind a container.
///
/// Sets use the element's own key; maps use the extracted key.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerBody {
    Sequence(Vec<Element>),
    Keyed(IndexMap<MapKey, Element>),
}

/// A collection value built by a container policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    class: ContainerClass,
    body: ContainerBody,
}

impl Container {
    pub(crate) fn with_capacity(class: ContainerClass, capacity: usize) -> Self {
        let body = match class.kind() {
            ContainerKind::Sequence => ContainerBody::Sequence(Vec::with_capacity(capacity)),
            ContainerKind::Set | ContainerKind::Map => {
                ContainerBody::Keyed(IndexMap::with_capacity(capacity))
            }
        };
        Self { class, body }
    }

    pub fn class(&self) -> ContainerClass {
        self.class
    }

    pub fn body(&self) -> &ContainerBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut ContainerBody {
        &mut self.body
    }

    pub fn len(&self) -> usize {
        match &self.body {
            ContainerBody::Sequence(items) => items.len(),
            ContainerBody::Keyed(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in container order (map values for maps).
    pub fn elements(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        match &self.body {
            ContainerBody::Sequence(items) => Box::new(items.iter()),
            ContainerBody::Keyed(entries) => Box::new(entries.values()),
        }
    }

    /// Value stored under `key` in a set or map.
    pub fn get(&self, key: &MapKey) -> Option<&Element> {
        match &self.body {
            ContainerBody::Keyed(entries) => entries.get(key),
            ContainerBody::Sequence(_) => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        let entries = match &self.body {
            ContainerBody::Keyed(entries) => Some(entries),
            ContainerBody::Sequence(_) => None,
        };
        entries.into_iter().flat_map(IndexMap::keys)
    }
}
