//! Object-level expression tree.
//!
//! Criteria are written against an entity: a [`Expr::Base`] node for the
//! queried entity, [`Expr::QueryKey`] nodes for attribute traversal, and
//! the usual SQL operators on top. The normalizer lowers this tree into
//! table columns before a statement is printed.

use crate::statement::SelectStatement;
use relmap_core::{DatabaseField, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a `Base` or `QueryKey` node.
///
/// Clones of an expression keep their ids, so the same node used twice in a
/// criteria is joined once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u64);

impl ExprId {
    pub fn next() -> Self {
        ExprId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Old id → new id map used while copying an expression.
#[derive(Debug, Default)]
pub struct CloneMap {
    ids: HashMap<ExprId, ExprId>,
}

impl CloneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// New id for `old`, allocated on first sight.
    pub fn map(&mut self, old: ExprId) -> ExprId {
        *self.ids.entry(old).or_insert_with(ExprId::next)
    }

    pub fn get(&self, old: ExprId) -> Option<ExprId> {
        self.ids.get(&old).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Comparison
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,

    // Logical
    And,
    Or,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    /// String concatenation (||)
    Concat,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
        }
    }

    /// Get the precedence of this operator (higher = binds tighter).
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 7,
            BinaryOp::Mul | BinaryOp::Div => 8,
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Concat
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Neg => "-",
        }
    }
}

/// An expression over an entity graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The queried entity.
    Base { id: ExprId, entity: String },

    /// Attribute of `base`. Relationship keys become joined nodes; direct
    /// keys become columns.
    QueryKey {
        id: ExprId,
        base: Box<Expr>,
        name: String,
        /// Keep rows whose relationship is empty (LEFT OUTER JOIN).
        outer_join: bool,
        /// Traverse a to-many relationship with its own join.
        any_of: bool,
    },

    /// Raw column of the table a node maps.
    Field {
        base: Box<Expr>,
        field: DatabaseField,
    },

    /// Resolved column. `node` is `None` for columns that are not owned by
    /// a node of the statement, such as the target of a correlated update.
    Column {
        node: Option<ExprId>,
        field: DatabaseField,
    },

    Literal(Value),

    /// Query argument bound from the translation row.
    Parameter(DatabaseField),

    /// Object value bound from the modify row of a write.
    Modify(DatabaseField),

    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    Unary { op: UnaryOp, expr: Box<Expr> },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },

    Function { name: String, args: Vec<Expr> },

    /// EXISTS / NOT EXISTS over a built sub-select.
    Exists {
        select: Box<SelectStatement>,
        negated: bool,
    },

    /// Scalar sub-select.
    Subselect(Box<SelectStatement>),

    /// Raw SQL fragment (escape hatch)
    Raw(String),
}

impl Expr {
    // ==================== Nodes ====================

    /// A fresh base node for `entity`.
    pub fn base(entity: impl Into<String>) -> Self {
        Expr::Base {
            id: ExprId::next(),
            entity: entity.into(),
        }
    }

    fn query_key(self, name: impl Into<String>, outer_join: bool, any_of: bool) -> Self {
        Expr::QueryKey {
            id: ExprId::next(),
            base: Box::new(self),
            name: name.into(),
            outer_join,
            any_of,
        }
    }

    /// Attribute traversal.
    pub fn get(self, name: impl Into<String>) -> Self {
        self.query_key(name, false, false)
    }

    /// Attribute traversal that keeps rows with an empty relationship.
    pub fn get_allowing_null(self, name: impl Into<String>) -> Self {
        self.query_key(name, true, false)
    }

    /// To-many traversal with its own join.
    pub fn any_of(self, name: impl Into<String>) -> Self {
        self.query_key(name, false, true)
    }

    pub fn any_of_allowing_none(self, name: impl Into<String>) -> Self {
        self.query_key(name, true, true)
    }

    /// Raw column of the table this node maps.
    pub fn field(self, field: impl Into<DatabaseField>) -> Self {
        Expr::Field {
            base: Box::new(self),
            field: field.into(),
        }
    }

    /// Column not bound to any node.
    pub fn col(field: impl Into<DatabaseField>) -> Self {
        Expr::Column {
            node: None,
            field: field.into(),
        }
    }

    /// Column of a known node.
    pub fn node_column(node: ExprId, field: impl Into<DatabaseField>) -> Self {
        Expr::Column {
            node: Some(node),
            field: field.into(),
        }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    pub fn param(field: impl Into<DatabaseField>) -> Self {
        Expr::Parameter(field.into())
    }

    pub fn modify(field: impl Into<DatabaseField>) -> Self {
        Expr::Modify(field.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    // ==================== Comparison ====================

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Logical ====================

    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    /// AND of all `parts`, or `None` when empty.
    pub fn and_all(parts: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        parts.into_iter().reduce(Expr::and)
    }

    /// OR of all `parts`, or `None` when empty.
    pub fn or_all(parts: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        parts.into_iter().reduce(Expr::or)
    }

    // ==================== Null / sets / patterns ====================

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into()),
            negated: false,
        }
    }

    pub fn not_like(self, pattern: impl Into<Expr>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into()),
            negated: true,
        }
    }

    // ==================== Arithmetic ====================

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Div, other)
    }

    pub fn concat(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Concat, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(self),
        }
    }

    // ==================== Functions ====================

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn count(self) -> Self {
        Expr::function("COUNT", vec![self])
    }

    pub fn sum(self) -> Self {
        Expr::function("SUM", vec![self])
    }

    pub fn avg(self) -> Self {
        Expr::function("AVG", vec![self])
    }

    pub fn min(self) -> Self {
        Expr::function("MIN", vec![self])
    }

    pub fn max(self) -> Self {
        Expr::function("MAX", vec![self])
    }

    pub fn upper(self) -> Self {
        Expr::function("UPPER", vec![self])
    }

    pub fn lower(self) -> Self {
        Expr::function("LOWER", vec![self])
    }

    // ==================== Sub-selects ====================

    pub fn exists(select: SelectStatement) -> Self {
        Expr::Exists {
            select: Box::new(select),
            negated: false,
        }
    }

    pub fn not_exists(select: SelectStatement) -> Self {
        Expr::Exists {
            select: Box::new(select),
            negated: true,
        }
    }

    pub fn subselect(select: SelectStatement) -> Self {
        Expr::Subselect(Box::new(select))
    }

    // ==================== Inspection ====================

    /// Node id of a `Base` or `QueryKey`.
    pub fn id(&self) -> Option<ExprId> {
        match self {
            Expr::Base { id, .. } | Expr::QueryKey { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// First base node reachable from this expression.
    pub fn find_base(&self) -> Option<(ExprId, &str)> {
        let mut found = None;
        self.walk(&mut |e| {
            if found.is_none() {
                if let Expr::Base { id, entity } = e {
                    found = Some((*id, entity.as_str()));
                }
            }
        });
        found
    }

    /// Attribute path of a query key chain, e.g. `["manager", "address"]`.
    pub fn attribute_path(&self) -> Option<Vec<&str>> {
        match self {
            Expr::Base { .. } => Some(Vec::new()),
            Expr::QueryKey { base, name, .. } => {
                let mut path = base.attribute_path()?;
                path.push(name.as_str());
                Some(path)
            }
            _ => None,
        }
    }

    pub fn is_literal_null(&self) -> bool {
        matches!(self, Expr::Literal(Value::Null))
    }

    /// Visit every node, parents first. Sub-selects are not entered.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::QueryKey { base, .. } | Expr::Field { base, .. } => base.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => expr.walk(f),
            Expr::In { expr, values, .. } => {
                expr.walk(f);
                for v in values {
                    v.walk(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.walk(f);
                pattern.walk(f);
            }
            Expr::Function { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Expr::Base { .. }
            | Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Parameter(_)
            | Expr::Modify(_)
            | Expr::Exists { .. }
            | Expr::Subselect(_)
            | Expr::Raw(_) => {}
        }
    }

    /// Columns of a normalized expression.
    pub fn columns(&self) -> Vec<(Option<ExprId>, &DatabaseField)> {
        let mut columns = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Column { node, field } = e {
                columns.push((*node, field));
            }
        });
        columns
    }

    /// Copy with fresh node ids. Nodes shared in `self` stay shared in the
    /// copy, and every expression copied through the same `map` agrees on
    /// the new ids.
    pub fn copied_version_from(&self, map: &mut CloneMap) -> Expr {
        let copy = |e: &Expr, map: &mut CloneMap| Box::new(e.copied_version_from(map));
        match self {
            Expr::Base { id, entity } => Expr::Base {
                id: map.map(*id),
                entity: entity.clone(),
            },
            Expr::QueryKey {
                id,
                base,
                name,
                outer_join,
                any_of,
            } => Expr::QueryKey {
                id: map.map(*id),
                base: copy(base, map),
                name: name.clone(),
                outer_join: *outer_join,
                any_of: *any_of,
            },
            Expr::Field { base, field } => Expr::Field {
                base: copy(base, map),
                field: field.clone(),
            },
            Expr::Column { node, field } => Expr::Column {
                node: node.map(|n| map.get(n).unwrap_or(n)),
                field: field.clone(),
            },
            Expr::Binary { left, op, right } => Expr::Binary {
                left: copy(left, map),
                op: *op,
                right: copy(right, map),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: copy(expr, map),
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: copy(expr, map),
                negated: *negated,
            },
            Expr::In {
                expr,
                values,
                negated,
            } => Expr::In {
                expr: copy(expr, map),
                values: values.iter().map(|v| v.copied_version_from(map)).collect(),
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: copy(expr, map),
                low: copy(low, map),
                high: copy(high, map),
                negated: *negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: copy(expr, map),
                pattern: copy(pattern, map),
                negated: *negated,
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.copied_version_from(map)).collect(),
            },
            Expr::Literal(_)
            | Expr::Parameter(_)
            | Expr::Modify(_)
            | Expr::Exists { .. }
            | Expr::Subselect(_)
            | Expr::Raw(_) => self.clone(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::from(s))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}
