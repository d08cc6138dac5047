//! Value converters applied between column data and attribute values.

use crate::classes::ClassRegistry;
use crate::error::{ConfigError, ConfigErrorKind, Error, TypeError};
use crate::types::SqlType;
use crate::value::Value;

/// Converts a database value to its attribute representation and back.
#[derive(Debug, Clone, PartialEq)]
pub enum Converter {
    /// Fixed table of `(data, object)` pairs, e.g. `'M'` ↔ `"male"`.
    ObjectType {
        conversions: Vec<(Value, Value)>,
        default_object: Option<Value>,
    },
    /// Convert between two SQL representations.
    TypeConversion {
        data_type: SqlType,
        object_type: SqlType,
    },
    /// A converter registered by name, resolved during project
    /// initialization.
    Named(String),
}

impl Converter {
    /// Start an object-type converter.
    pub fn object_type() -> Self {
        Converter::ObjectType {
            conversions: Vec::new(),
            default_object: None,
        }
    }

    /// Add a `(data, object)` pair to an object-type converter.
    pub fn mapping(mut self, data: impl Into<Value>, object: impl Into<Value>) -> Self {
        if let Converter::ObjectType { conversions, .. } = &mut self {
            conversions.push((data.into(), object.into()));
        }
        self
    }

    /// Object value used for data values with no explicit pair.
    pub fn default_object(mut self, object: impl Into<Value>) -> Self {
        if let Converter::ObjectType { default_object, .. } = &mut self {
            *default_object = Some(object.into());
        }
        self
    }

    pub fn type_conversion(data_type: SqlType, object_type: SqlType) -> Self {
        Converter::TypeConversion {
            data_type,
            object_type,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Converter::Named(name.into())
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Converter::Named(_))
    }

    /// Replace a named converter with its registered definition.
    pub fn resolve(&self, registry: &ClassRegistry) -> crate::Result<Converter> {
        match self {
            Converter::Named(name) => registry.converter(name).cloned(),
            other => Ok(other.clone()),
        }
    }

    /// Database value → attribute value.
    pub fn to_object(&self, data: &Value) -> crate::Result<Value> {
        if data.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Converter::ObjectType {
                conversions,
                default_object,
            } => conversions
                .iter()
                .find(|(d, _)| d.sql_eq(data))
                .map(|(_, o)| o.clone())
                .or_else(|| default_object.clone())
                .ok_or_else(|| no_conversion(data)),
            Converter::TypeConversion { object_type, .. } => data.convert_to(object_type),
            Converter::Named(name) => Err(unresolved(name)),
        }
    }

    /// Attribute value → database value.
    pub fn to_data(&self, object: &Value) -> crate::Result<Value> {
        if object.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Converter::ObjectType { conversions, .. } => conversions
                .iter()
                .find(|(_, o)| o.sql_eq(object))
                .map(|(d, _)| d.clone())
                .ok_or_else(|| no_conversion(object)),
            Converter::TypeConversion { data_type, .. } => object.convert_to(data_type),
            Converter::Named(name) => Err(unresolved(name)),
        }
    }
}

fn no_conversion(value: &Value) -> Error {
    Error::Type(TypeError {
        expected: "value listed in object-type converter",
        actual: value.to_sql_literal(),
        column: None,
    })
}

fn unresolved(name: &str) -> Error {
    Error::Config(ConfigError::new(
        ConfigErrorKind::UnresolvableClass,
        format!("converter '{name}' used before class names were resolved"),
    ))
}
