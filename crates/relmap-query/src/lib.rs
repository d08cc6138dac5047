//! Query construction and statement planning for relmap.
//!
//! `relmap-query` is the **statement layer**. It turns object-level queries
//! over a `Project`'s descriptors into SQL statements and ordered plans.
//!
//! # Role In The Architecture
//!
//! - **Expressions**: `Expr` trees over an entity graph, lowered to columns
//!   and joins by the `Normalizer`.
//! - **Queries**: `ReadAllQuery`, `ReadObjectQuery`, `ReportQuery`,
//!   `DeleteAllQuery` and `UpdateAllQuery` describe what to run.
//! - **Mechanism**: `ExpressionQueryMechanism` decides how many statements a
//!   query needs, in which order, and whether they correlate through
//!   sub-selects or stage rows in temp tables.
//! - **Joined reads**: `JoinedAttributeManager` tracks join-fetched
//!   relationships and where their columns sit in a result row.
//! - **Conformance**: `Conformer` evaluates criteria against cached objects.
//!
//! Plans execute through the `Accessor` trait from `relmap-core`. Most users
//! reach these types through the `relmap` facade crate.

pub mod conform;
pub mod expr;
pub mod joined;
pub mod mechanism;
pub mod modify_all;
pub mod normalize;
pub mod plan;
pub mod query;
pub mod statement;

pub use conform::{ConformResult, Conformer};
pub use expr::{BinaryOp, CloneMap, Expr, ExprId, UnaryOp};
pub use joined::{JoinedAttribute, JoinedAttributeManager, JoinedMappingIndex, JoinedMappingQuery};
pub use mechanism::{CacheLookup, ExpressionQueryMechanism};
pub use normalize::Normalizer;
pub use plan::{PlanPhase, PlanStrategy, PlanSummary, PlannedStatement, ReadPlan, ReportPlan, StatementPlan};
pub use query::{
    CacheUsage, DeleteAllQuery, LockRequest, ReadAllQuery, ReadObjectQuery, ReportItem, ReportQuery,
    UpdateAllQuery, UpdateClauses, UpdateTarget,
};
pub use statement::{
    AnonymousBlock, BlockUpdate, BlockValue, FromClause, LockingClause, OrderItem, OuterJoin, SelectItem,
    SelectStatement, SqlStatement, TableRef,
};

use asupersync::{Cx, Outcome};
use relmap_core::{Accessor, DatabasePlatform, Error, Row};

/// Run a prepared select and return its rows unlabelled.
///
/// # Example
///
/// ```ignore
/// let plan = mechanism.prepare_select_all_rows(&query)?;
/// let rows = run_select(cx, &accessor, &platform, &plan.select, &Row::empty()).await;
/// ```
pub async fn run_select<A: Accessor>(
    cx: &Cx,
    accessor: &A,
    platform: &DatabasePlatform,
    select: &SelectStatement,
    translation_row: &Row,
) -> Outcome<Vec<Row>, Error> {
    let call = select.to_call(platform);
    let (sql, params) = match call.translate(Some(translation_row), None, platform.dialect()) {
        Ok(translated) => translated,
        Err(e) => return Outcome::Err(e),
    };
    tracing::trace!(sql = %sql, params = params.len(), "select");
    accessor.query(cx, &sql, &params).await
}
