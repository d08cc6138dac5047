//! relmap - descriptor-driven object-relational mapping for Rust.
//!
//! relmap maps entities onto tables through runtime metadata:
//!
//! - Class descriptors with direct, one-to-one, collection and aggregate
//!   mappings, multiple tables per class and inheritance hierarchies
//! - Container policies that decide how relationship collections are held
//!   (lists, sets, maps keyed by attribute, column or related entity)
//! - Object-level queries lowered to SQL, including join fetching
//! - Delete-all and update-all across every table of a class, planned with
//!   correlated sub-selects, temp tables or an Oracle anonymous block
//! - A session with an identity map, unit of work and in-memory conformance
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! let project = ProjectBuilder::new()
//!     .descriptor(
//!         ClassDescriptor::new("Employee")
//!             .table("EMPLOYEE")
//!             .primary_key("EMPLOYEE.EMP_ID")
//!             .with_mapping(DatabaseMapping::direct("id", "EMPLOYEE.EMP_ID"))
//!             .with_mapping(DatabaseMapping::direct("name", "EMPLOYEE.NAME")),
//!     )
//!     .build(&ClassRegistry::with_defaults())?;
//!
//! async fn example(cx: &Cx, session: &mut Session<impl Accessor>) {
//!     let emp = Expr::base("Employee");
//!     let query = ReadAllQuery::new("Employee")
//!         .with_builder(emp.clone())
//!         .filter(emp.get("name").eq("Bob"));
//!     let bobs = session.read_all(cx, &query, &Row::empty()).await;
//! }
//! ```
//!
//! # Features
//!
//! - **Structured concurrency**: execution is built on asupersync for
//!   cancel-correct operations
//! - **Prepared once**: update statements are cached per modified field set
//! - **Pluggable execution**: any `Accessor` can run the generated SQL

// Re-export all public types from sub-crates
pub use relmap_core::{
    // Execution
    Accessor,
    Attribute,
    CallFragment,
    CallParameter,
    ClassDescriptor,
    ClassRegistry,
    ColumnInfo,
    // Containers
    Container,
    ContainerClass,
    ContainerError,
    ContainerErrorKind,
    ContainerPolicy,
    ContainerShape,
    Converter,
    // asupersync re-exports
    Cx,
    DatabaseField,
    DatabaseMapping,
    DatabasePlatform,
    DatabaseTable,
    Dialect,
    Element,
    Entity,
    Error,
    InheritancePolicy,
    JoinFetch,
    KeyExtractor,
    KeyLookup,
    KeyMapping,
    MapKey,
    MappingKind,
    NoCache,
    ObjectRef,
    Outcome,
    PlatformConfig,
    // Metadata
    Project,
    ProjectBuilder,
    QueryError,
    QueryErrorKind,
    Result,
    Row,
    SessionCache,
    SqlCall,
    SqlType,
    TempTableCleanup,
    Value,
    VectorItem,
};

pub use relmap_query::{
    CacheLookup, CacheUsage, ConformResult, Conformer, DeleteAllQuery, Expr, ExpressionQueryMechanism,
    JoinedAttributeManager, OrderItem, PlanPhase, PlanStrategy, PlanSummary, ReadAllQuery,
    ReadObjectQuery, ReadPlan, ReportPlan, ReportQuery, StatementPlan, UpdateAllQuery, UpdateClauses,
    run_select,
};

pub use relmap_session::{IdentityMap, ObjectKey, PendingCounts, SessionConfig, SessionView, UnitOfWork};

// Session management
pub mod session;
pub use session::{Session, SessionBuilder};

/// Common imports for applications.
pub mod prelude {
    pub use crate::{
        // Execution
        Accessor,
        Attribute,
        CacheUsage,
        // Metadata
        ClassDescriptor,
        ClassRegistry,
        Container,
        ContainerPolicy,
        Cx,
        DatabaseMapping,
        DatabasePlatform,
        DeleteAllQuery,
        Entity,
        Error,
        // Query building
        Expr,
        JoinFetch,
        ObjectRef,
        OrderItem,
        Outcome,
        ProjectBuilder,
        ReadAllQuery,
        ReadObjectQuery,
        ReportQuery,
        Result,
        Row,
        // Session
        Session,
        SessionBuilder,
        UpdateAllQuery,
        Value,
    };
}
