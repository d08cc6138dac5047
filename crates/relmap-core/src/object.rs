//! Managed objects built from rows.
//!
//! An [`Entity`] is immutable once built and shared as an [`ObjectRef`].
//! The identity map hands out the same `ObjectRef` for the same primary key,
//! so reference identity (`Arc::ptr_eq`) is object identity.

use crate::container::Container;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// Shared handle to a managed object.
pub type ObjectRef = Arc<Entity>;

/// The state of one attribute of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Direct value
    Value(Value),
    /// Single related object (`None` when the relationship is empty)
    Object(Option<ObjectRef>),
    /// Related collection
    Collection(Container),
    /// Embedded value object without identity
    Aggregate(Box<Entity>),
    /// Relationship not fetched by the query that built this object
    Unfetched,
}

/// A managed object: an entity name plus ordered attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity_name: String,
    attributes: IndexMap<String, Attribute>,
}

impl Entity {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, Attribute::Value(value.into()));
        self
    }

    pub fn with_object(mut self, name: impl Into<String>, object: Option<ObjectRef>) -> Self {
        self.set(name, Attribute::Object(object));
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>, container: Container) -> Self {
        self.set(name, Attribute::Collection(container));
        self
    }

    pub fn set(&mut self, name: impl Into<String>, attribute: Attribute) {
        self.attributes.insert(name.into(), attribute);
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Direct value of an attribute.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.attributes.get(name)? {
            Attribute::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Related object of a single-valued relationship.
    pub fn object(&self, name: &str) -> Option<&ObjectRef> {
        match self.attributes.get(name)? {
            Attribute::Object(object) => object.as_ref(),
            _ => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&Container> {
        match self.attributes.get(name)? {
            Attribute::Collection(container) => Some(container),
            _ => None,
        }
    }

    pub fn aggregate(&self, name: &str) -> Option<&Entity> {
        match self.attributes.get(name)? {
            Attribute::Aggregate(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_ref(self) -> ObjectRef {
        Arc::new(self)
    }
}
