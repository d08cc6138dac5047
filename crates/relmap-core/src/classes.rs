//! Name → implementation registry for container classes and converters.
//!
//! Mappings may name their container class or converter as a string; the
//! names are resolved once, during project initialization.

use crate::container::ContainerClass;
use crate::converter::Converter;
use crate::error::{ConfigError, ConfigErrorKind};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const CLASS_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$";

fn class_name_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(CLASS_NAME_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "invalid class name pattern, rejecting all names");
                None
            }
        })
        .as_ref()
}

/// Check that `name` is a valid class or converter name.
pub fn is_valid_class_name(name: &str) -> bool {
    class_name_regex().is_some_and(|regex| regex.is_match(name))
}

/// Registry of named container classes and converters.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    containers: HashMap<String, ContainerClass>,
    converters: HashMap<String, Converter>,
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in container class under its own name.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for class in ContainerClass::ALL {
            registry
                .containers
                .insert(class.name().to_string(), class);
        }
        registry
    }

    /// Register a container class under an additional name.
    pub fn register_container_class(
        &mut self,
        name: &str,
        class: ContainerClass,
    ) -> crate::Result<()> {
        validate_name(name)?;
        self.containers.insert(name.to_string(), class);
        Ok(())
    }

    pub fn register_converter(&mut self, name: &str, converter: Converter) -> crate::Result<()> {
        validate_name(name)?;
        if !converter.is_resolved() {
            return Err(ConfigError::new(
                ConfigErrorKind::InvalidMapping,
                format!("converter '{name}' cannot be registered as another named converter"),
            )
            .into());
        }
        self.converters.insert(name.to_string(), converter);
        Ok(())
    }

    /// Resolve a container class name.
    pub fn container_class(&self, name: &str) -> crate::Result<ContainerClass> {
        validate_name(name)?;
        self.containers.get(name).copied().ok_or_else(|| {
            ConfigError::new(
                ConfigErrorKind::UnresolvableClass,
                format!("container class '{name}' is not registered"),
            )
            .into()
        })
    }

    /// Resolve a converter name.
    pub fn converter(&self, name: &str) -> crate::Result<&Converter> {
        validate_name(name)?;
        self.converters.get(name).ok_or_else(|| {
            ConfigError::new(
                ConfigErrorKind::UnresolvableClass,
                format!("converter '{name}' is not registered"),
            )
            .into()
        })
    }
}

fn validate_name(name: &str) -> crate::Result<()> {
    if is_valid_class_name(name) {
        Ok(())
    } else {
        Err(ConfigError::new(
            ConfigErrorKind::InvalidName,
            format!("'{name}' is not a valid class name"),
        )
        .into())
    }
}
