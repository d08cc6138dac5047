//! Query objects.
//!
//! Queries are built fluently against a base expression and handed to an
//! [`ExpressionQueryMechanism`](crate::mechanism::ExpressionQueryMechanism)
//! to become statements.
//!
//! ```ignore
//! let emp = Expr::base("Employee");
//! let query = ReadAllQuery::new("Employee")
//!     .with_builder(emp.clone())
//!     .filter(emp.clone().get("salary").gt(50_000))
//!     .join(emp.clone().get_allowing_null("address"))
//!     .order_by(OrderItem::asc(emp.get("name")));
//! ```

use crate::expr::{CloneMap, Expr};
use crate::joined::JoinedAttributeManager;
use crate::statement::OrderItem;
use relmap_core::{ContainerPolicy, DatabaseField};

/// How a read consults the session cache before going to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheUsage {
    /// Always read from the database.
    #[default]
    DoNotCheck,
    /// Look the object up by the primary key in the criteria first.
    CheckCacheByPrimaryKey,
    /// Read from the database, then conform new and cached objects of the
    /// unit of work against the criteria.
    ConformInUnitOfWork,
    /// Answer from the cache alone.
    CheckCacheOnly,
}

/// FOR UPDATE request: all tables, or the tables of some nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockRequest {
    nodes: Vec<Expr>,
}

impl LockRequest {
    pub fn nodes(&self) -> &[Expr] {
        &self.nodes
    }

    pub fn locks_all(&self) -> bool {
        self.nodes.is_empty()
    }

    fn copied_version_from(&self, map: &mut CloneMap) -> Self {
        Self {
            nodes: self.nodes.iter().map(|n| n.copied_version_from(map)).collect(),
        }
    }
}

/// Reads every object matching a criteria.
#[derive(Debug, Clone)]
pub struct ReadAllQuery {
    /// Entity the query returns.
    entity: String,

    /// Base expression the criteria, orderings and joins are built on.
    builder: Expr,

    /// Selection criteria.
    criteria: Option<Expr>,

    /// ORDER BY items.
    order_by: Vec<OrderItem>,

    /// Joined attributes fetched in the same statement.
    joined: JoinedAttributeManager,

    /// SELECT DISTINCT.
    distinct: bool,

    /// FOR UPDATE.
    lock: Option<LockRequest>,

    /// Row limit.
    max_rows: Option<u64>,

    cache_usage: CacheUsage,

    /// Container the results are collected into.
    container: ContainerPolicy,
}

impl ReadAllQuery {
    /// Create a read of `entity` with a fresh base expression.
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            builder: Expr::base(entity.clone()),
            entity,
            criteria: None,
            order_by: Vec::new(),
            joined: JoinedAttributeManager::new(),
            distinct: false,
            lock: None,
            max_rows: None,
            cache_usage: CacheUsage::DoNotCheck,
            container: ContainerPolicy::list(),
        }
    }

    /// Use an existing base expression so that expressions built on it
    /// resolve to this query's base node.
    pub fn with_builder(mut self, builder: Expr) -> Self {
        self.builder = builder;
        self
    }

    /// Replace the criteria.
    pub fn with_criteria(mut self, criteria: Expr) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// AND a condition onto the criteria.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.criteria = Some(match self.criteria.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    /// Fetch a relationship in the same statement.
    pub fn join(mut self, attribute: Expr) -> Self {
        self.joined.add_joined_attribute_expression(attribute);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Lock every selected table.
    pub fn for_update(mut self) -> Self {
        self.lock = Some(LockRequest::default());
        self
    }

    /// Lock only the tables of `nodes` (and of the joined attributes under
    /// them).
    pub fn for_update_of(mut self, nodes: Vec<Expr>) -> Self {
        self.lock = Some(LockRequest { nodes });
        self
    }

    pub fn max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn cache_usage(mut self, usage: CacheUsage) -> Self {
        self.cache_usage = usage;
        self
    }

    /// Collect results with `policy` instead of a list.
    pub fn with_container(mut self, policy: ContainerPolicy) -> Self {
        self.container = policy;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn builder(&self) -> &Expr {
        &self.builder
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.criteria.as_ref()
    }

    pub fn order_items(&self) -> &[OrderItem] {
        &self.order_by
    }

    pub fn joined(&self) -> &JoinedAttributeManager {
        &self.joined
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn lock(&self) -> Option<&LockRequest> {
        self.lock.as_ref()
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.max_rows
    }

    pub fn cache_usage_kind(&self) -> CacheUsage {
        self.cache_usage
    }

    pub fn container_policy(&self) -> &ContainerPolicy {
        &self.container
    }

    /// Deep copy with fresh expression nodes. The builder, criteria,
    /// orderings, joins and lock nodes are copied through one map, so they
    /// still agree on shared nodes.
    pub fn copied(&self) -> Self {
        let mut map = CloneMap::new();
        Self {
            entity: self.entity.clone(),
            builder: self.builder.copied_version_from(&mut map),
            criteria: self.criteria.as_ref().map(|c| c.copied_version_from(&mut map)),
            order_by: self
                .order_by
                .iter()
                .map(|o| OrderItem {
                    expr: o.expr.copied_version_from(&mut map),
                    descending: o.descending,
                })
                .collect(),
            joined: self.joined.copied_version_from(&mut map),
            distinct: self.distinct,
            lock: self.lock.as_ref().map(|l| l.copied_version_from(&mut map)),
            max_rows: self.max_rows,
            cache_usage: self.cache_usage,
            container: self.container.clone(),
        }
    }
}

/// Reads a single object. Checks the session cache by primary key unless
/// told otherwise.
#[derive(Debug, Clone)]
pub struct ReadObjectQuery {
    query: ReadAllQuery,
}

impl ReadObjectQuery {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            query: ReadAllQuery::new(entity).cache_usage(CacheUsage::CheckCacheByPrimaryKey),
        }
    }

    pub fn with_builder(mut self, builder: Expr) -> Self {
        self.query = self.query.with_builder(builder);
        self
    }

    pub fn with_criteria(mut self, criteria: Expr) -> Self {
        self.query = self.query.with_criteria(criteria);
        self
    }

    pub fn filter(mut self, condition: Expr) -> Self {
        self.query = self.query.filter(condition);
        self
    }

    pub fn join(mut self, attribute: Expr) -> Self {
        self.query = self.query.join(attribute);
        self
    }

    pub fn for_update(mut self) -> Self {
        self.query = self.query.for_update();
        self
    }

    pub fn cache_usage(mut self, usage: CacheUsage) -> Self {
        self.query = self.query.cache_usage(usage);
        self
    }

    pub fn entity(&self) -> &str {
        self.query.entity()
    }

    pub fn builder(&self) -> &Expr {
        self.query.builder()
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.query.criteria()
    }

    pub fn cache_usage_kind(&self) -> CacheUsage {
        self.query.cache_usage_kind()
    }

    /// The same read as a multi-row query.
    pub fn as_read_all(&self) -> &ReadAllQuery {
        &self.query
    }

    pub fn copied(&self) -> Self {
        Self {
            query: self.query.copied(),
        }
    }
}

/// One column of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportItem {
    pub name: String,
    pub expr: Expr,
}

/// Reads computed rows instead of objects.
#[derive(Debug, Clone)]
pub struct ReportQuery {
    entity: String,
    builder: Expr,
    criteria: Option<Expr>,
    items: Vec<ReportItem>,
    group_by: Vec<Expr>,
    having: Option<Expr>,
    order_by: Vec<OrderItem>,
    distinct: bool,
    max_rows: Option<u64>,
}

impl ReportQuery {
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            builder: Expr::base(entity.clone()),
            entity,
            criteria: None,
            items: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            distinct: false,
            max_rows: None,
        }
    }

    pub fn with_builder(mut self, builder: Expr) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_criteria(mut self, criteria: Expr) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Add a report column named `name`.
    pub fn item(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.items.push(ReportItem {
            name: name.into(),
            expr,
        });
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(condition);
        self
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn builder(&self) -> &Expr {
        &self.builder
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.criteria.as_ref()
    }

    pub fn items(&self) -> &[ReportItem] {
        &self.items
    }

    pub fn group_by_items(&self) -> &[Expr] {
        &self.group_by
    }

    pub fn having_condition(&self) -> Option<&Expr> {
        self.having.as_ref()
    }

    pub fn order_items(&self) -> &[OrderItem] {
        &self.order_by
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.max_rows
    }
}

/// Deletes every row of an entity matching a criteria.
#[derive(Debug, Clone)]
pub struct DeleteAllQuery {
    entity: String,
    builder: Expr,
    criteria: Option<Expr>,
}

impl DeleteAllQuery {
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            builder: Expr::base(entity.clone()),
            entity,
            criteria: None,
        }
    }

    pub fn with_builder(mut self, builder: Expr) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_criteria(mut self, criteria: Expr) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn builder(&self) -> &Expr {
        &self.builder
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.criteria.as_ref()
    }
}

/// Left-hand side of an update clause.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateTarget {
    /// A mapped attribute, resolved to its fields at prepare time.
    Attribute(String),
    /// A raw column.
    Field(DatabaseField),
}

/// Ordered assignments of an update-all. Values are object-level
/// expressions over the query's base.
///
/// Clauses are never changed in place: every addition yields a new value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateClauses {
    clauses: Vec<(UpdateTarget, Expr)>,
}

impl UpdateClauses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` to the attribute `attribute`.
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.clauses
            .push((UpdateTarget::Attribute(attribute.into()), value.into()));
        self
    }

    /// Assign `value` to a raw column.
    pub fn set_field(mut self, field: impl Into<DatabaseField>, value: impl Into<Expr>) -> Self {
        self.clauses.push((UpdateTarget::Field(field.into()), value.into()));
        self
    }

    /// Copy with `version = version + 1` appended. No-op copy when the
    /// version is already assigned.
    pub fn with_version_increment(&self, builder: &Expr, version: &DatabaseField) -> Self {
        let mut copy = self.clone();
        if !self.assigns_field(version) {
            copy.clauses.push((
                UpdateTarget::Field(version.clone()),
                builder.clone().field(version.clone()).add(1),
            ));
        }
        copy
    }

    pub fn assigns_field(&self, field: &DatabaseField) -> bool {
        self.clauses
            .iter()
            .any(|(target, _)| matches!(target, UpdateTarget::Field(f) if f == field))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(UpdateTarget, Expr)> {
        self.clauses.iter()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn copied_version_from(&self, map: &mut CloneMap) -> Self {
        Self {
            clauses: self
                .clauses
                .iter()
                .map(|(target, value)| (target.clone(), value.copied_version_from(map)))
                .collect(),
        }
    }
}

/// Updates every row of an entity matching a criteria.
#[derive(Debug, Clone)]
pub struct UpdateAllQuery {
    entity: String,
    builder: Expr,
    criteria: Option<Expr>,
    clauses: UpdateClauses,
}

impl UpdateAllQuery {
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            builder: Expr::base(entity.clone()),
            entity,
            criteria: None,
            clauses: UpdateClauses::new(),
        }
    }

    pub fn with_builder(mut self, builder: Expr) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_criteria(mut self, criteria: Expr) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.clauses = self.clauses.set(attribute, value);
        self
    }

    pub fn set_field(mut self, field: impl Into<DatabaseField>, value: impl Into<Expr>) -> Self {
        self.clauses = self.clauses.set_field(field, value);
        self
    }

    pub fn with_clauses(mut self, clauses: UpdateClauses) -> Self {
        self.clauses = clauses;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn builder(&self) -> &Expr {
        &self.builder
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.criteria.as_ref()
    }

    pub fn clauses(&self) -> &UpdateClauses {
        &self.clauses
    }

    pub fn copied(&self) -> Self {
        let mut map = CloneMap::new();
        Self {
            entity: self.entity.clone(),
            builder: self.builder.copied_version_from(&mut map),
            criteria: self.criteria.as_ref().map(|c| c.copied_version_from(&mut map)),
            clauses: self.clauses.copied_version_from(&mut map),
        }
    }
}
