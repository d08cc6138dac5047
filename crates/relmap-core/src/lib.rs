//! Core types for relmap.
//!
//! This crate provides the mapping model the query layer builds on:
//!
//! - `Value`, `Row`, `DatabaseField` for relational data
//! - `Entity` and `ObjectRef` for managed objects
//! - `ContainerPolicy` for the collections a relationship is stored in
//! - `ClassDescriptor`, `DatabaseMapping` and `Project` for mapping metadata
//! - `DatabasePlatform` for dialect and capability flags
//! - `Accessor` and `SqlCall` for execution
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod cache;
pub mod call;
pub mod classes;
pub mod connection;
pub mod container;
pub mod converter;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod mapping;
pub mod object;
pub mod platform;
pub mod project;
pub mod query_manager;
pub mod row;
pub mod types;
pub mod value;

pub use cache::{KeyLookup, NoCache, SessionCache};
pub use call::{CallFragment, CallParameter, SqlCall};
pub use classes::{ClassRegistry, is_valid_class_name};
pub use connection::Accessor;
pub use container::{
    Container, ContainerBody, ContainerClass, ContainerCursor, ContainerKind, ContainerPolicy,
    ContainerShape, Element, IteratorResult, KeyExtractor, KeyMapping, MapContainerPolicyIterator,
    MapKey, VectorItem,
};
pub use converter::Converter;
pub use descriptor::{ClassDescriptor, InheritancePolicy};
pub use error::{
    ConfigError, ConfigErrorKind, ConnectionError, ContainerError, ContainerErrorKind, Error,
    PlatformError, PlatformErrorKind, QueryError, QueryErrorKind, Result, TypeError,
};
pub use field::{DatabaseField, DatabaseTable};
pub use mapping::{DatabaseMapping, JoinFetch, MappingKind};
pub use object::{Attribute, Entity, ObjectRef};
pub use platform::{DatabasePlatform, Dialect, PlatformConfig, TempTableCleanup};
pub use project::{Project, ProjectBuilder};
pub use query_manager::{QueryManager, UpdateCallKey};
pub use row::{ColumnInfo, Row};
pub use types::SqlType;
pub use value::Value;
