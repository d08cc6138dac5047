//! Error types for relmap operations.
//!
//! Every fatal condition is a variant of [`Error`]. The in-memory
//! conformance path does not use this type; it reports
//! `ConformResult::TooComplexToEvaluate` instead and lets the caller decide.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Descriptor, mapping or container configuration errors
    Config(ConfigError),
    /// Query shape and execution errors
    Query(QueryError),
    /// Container mutation errors
    Container(ContainerError),
    /// Platform capability gaps
    Platform(PlatformError),
    /// Connection-related errors reported by an accessor
    Connection(ConnectionError),
    /// Value conversion errors
    Type(TypeError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
    /// Entity the failing configuration belongs to, if known.
    pub entity: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Container or converter class name not registered
    UnresolvableClass,
    /// Container class is abstract and cannot be instantiated
    NotInstantiable,
    /// Map policy keyed by column has no key field
    MissingKeyField,
    /// Map policy keyed by attribute names an unknown attribute
    InvalidKeyAccessor,
    /// Both primary-key fields and an embedded id were declared
    ConflictingPrimaryKey,
    /// A mapping or parent refers to an undefined descriptor
    UnknownDescriptor,
    /// Mapping declaration is inconsistent with the descriptor tables
    InvalidMapping,
    /// Class or converter name fails validation
    InvalidName,
    /// Platform configuration could not be parsed
    Parse,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    /// Entity the query targets.
    pub entity: Option<String>,
    /// Offending attribute, when the error is about one.
    pub attribute: Option<String>,
    /// Resolved column of the offending attribute.
    pub field: Option<String>,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Join requested on an expression that is not a relationship
    JoinOnNonRelationship,
    /// Update-all assignment outside the descriptor's tables
    UpdateAllFieldNotFound,
    /// Attribute name not mapped on the descriptor
    InvalidQueryKey,
    /// Expression shape not supported in this position
    InvalidExpression,
    /// Cache-only query with an expression too complex to evaluate in memory
    CannotConformExpression,
    /// No descriptor registered for the entity
    MissingDescriptor,
    /// Required translation or modify row value is missing
    MissingArgument,
    /// Error reported by the database
    Database,
    /// Versioned write matched no row
    OptimisticLock,
}

#[derive(Debug)]
pub struct ContainerError {
    pub kind: ContainerErrorKind,
    pub message: String,
    /// Container class involved.
    pub container: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerErrorKind {
    /// Null key offered to a container that rejects null keys
    NullKey,
    /// Key cannot be hashed or ordered as the container requires
    NonComparableKey,
    /// Container does not support the mutation
    UnsupportedOperation,
    /// Container or element of the wrong kind
    TypeMismatch,
    /// No key could be derived for the element
    KeyExtraction,
}

#[derive(Debug)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
    /// Platform name, e.g. `postgres`.
    pub platform: String,
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// Temp-table staging required but unavailable
    TempTablesNotSupported,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity: None,
            source: None,
        }
    }

    /// Attach the entity name this error belongs to.
    pub fn for_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity: None,
            attribute: None,
            field: None,
            sql: None,
            source: None,
        }
    }

    pub fn for_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// An update-all assignment whose attribute or column is not part of the
    /// descriptor's tables.
    pub fn update_all_field_not_found(
        entity: &str,
        attribute: &str,
        field: Option<&str>,
    ) -> Self {
        let message = match field {
            Some(field) => format!(
                "update-all on {entity}: attribute '{attribute}' resolves to column '{field}' which is not in the descriptor's tables"
            ),
            None => format!(
                "update-all on {entity}: attribute '{attribute}' is not mapped to a column"
            ),
        };
        let mut err = Self::new(QueryErrorKind::UpdateAllFieldNotFound, message)
            .for_entity(entity)
            .with_attribute(attribute);
        err.field = field.map(str::to_string);
        err
    }

    pub fn join_on_non_relationship(entity: &str, attribute: &str) -> Self {
        Self::new(
            QueryErrorKind::JoinOnNonRelationship,
            format!("joining is not supported on '{attribute}' of {entity}: not a relationship"),
        )
        .for_entity(entity)
        .with_attribute(attribute)
    }

    pub fn invalid_query_key(entity: &str, attribute: &str) -> Self {
        Self::new(
            QueryErrorKind::InvalidQueryKey,
            format!("'{attribute}' is not a mapped attribute of {entity}"),
        )
        .for_entity(entity)
        .with_attribute(attribute)
    }

    /// A versioned UPDATE or DELETE that matched no row.
    pub fn optimistic_lock(entity: &str, primary_key: &[crate::Value]) -> Self {
        Self::new(
            QueryErrorKind::OptimisticLock,
            format!("{entity} with primary key {primary_key:?} was changed or removed concurrently"),
        )
        .for_entity(entity)
    }

    pub fn missing_descriptor(entity: &str) -> Self {
        Self::new(
            QueryErrorKind::MissingDescriptor,
            format!("no descriptor registered for {entity}"),
        )
        .for_entity(entity)
    }
}

impl ContainerError {
    pub fn new(kind: ContainerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            container: None,
        }
    }

    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

impl PlatformError {
    pub fn temp_tables_not_supported(platform: &str, entity: &str) -> Self {
        Self {
            kind: PlatformErrorKind::TempTablesNotSupported,
            message: format!(
                "temp tables are required for this query on {entity} but {platform} does not support them"
            ),
            platform: platform.to_string(),
            entity: Some(entity.to_string()),
        }
    }
}

impl Error {
    /// Is this a configuration error detected at descriptor-build time?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Kind of a query error, if this is one.
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query(q) => Some(q.kind),
            _ => None,
        }
    }

    /// Kind of a container error, if this is one.
    pub fn container_kind(&self) -> Option<ContainerErrorKind> {
        match self {
            Error::Container(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Kind of a configuration error, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Is this the temp-tables-not-supported platform error?
    pub fn is_temp_tables_not_supported(&self) -> bool {
        matches!(
            self,
            Error::Platform(PlatformError {
                kind: PlatformErrorKind::TempTablesNotSupported,
                ..
            })
        )
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Container(e) => write!(f, "Container error: {}", e),
            Error::Platform(e) => write!(f, "Platform error: {}", e),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{} (entity {})", self.message, entity),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{} [{}]", self.message, container),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ContainerError> for Error {
    fn from(err: ContainerError) -> Self {
        Error::Container(err)
    }
}

impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        Error::Platform(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;
