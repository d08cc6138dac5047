//! Statement plans.
//!
//! A write or bulk operation prepares into a [`StatementPlan`]: the ordered
//! statements to run and the phase each belongs to. Reads prepare into a
//! [`ReadPlan`], which also carries the selected fields and the joined
//! attribute layout needed to cut result rows apart.

use crate::joined::JoinedAttributeManager;
use crate::statement::{SelectStatement, SqlStatement};
use asupersync::{Cx, Outcome};
use relmap_core::{Accessor, ColumnInfo, DatabaseField, DatabasePlatform, Error, Row, SqlCall};
use serde::Serialize;
use std::sync::Arc;

/// How a plan reaches its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// One statement, criteria inline.
    Simple,
    /// One statement per table, correlated with EXISTS or sub-selects.
    MultiTable,
    /// Matched rows are staged in temp tables first.
    TempTable,
    /// A PL/SQL block stages and updates in one call.
    AnonymousBlock,
}

/// Phase of a statement within its plan. Phases run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    Create,
    Populate,
    Action,
    Cleanup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStatement {
    pub phase: PlanPhase,
    pub statement: SqlStatement,
    /// Overrides the platform's binding for this statement.
    pub bind: Option<bool>,
}

/// Ordered statements of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementPlan {
    strategy: PlanStrategy,
    statements: Vec<PlannedStatement>,
}

/// Serializable view of a plan, for logs and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub strategy: PlanStrategy,
    pub statements: Vec<(PlanPhase, String)>,
}

impl StatementPlan {
    pub fn new(strategy: PlanStrategy) -> Self {
        Self {
            strategy,
            statements: Vec::new(),
        }
    }

    pub fn strategy(&self) -> PlanStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: PlanStrategy) {
        self.strategy = strategy;
    }

    pub fn push(&mut self, phase: PlanPhase, statement: SqlStatement) {
        self.statements.push(PlannedStatement {
            phase,
            statement,
            bind: None,
        });
    }

    /// Add a statement whose values are printed inline.
    pub fn push_unbound(&mut self, phase: PlanPhase, statement: SqlStatement) {
        self.statements.push(PlannedStatement {
            phase,
            statement,
            bind: Some(false),
        });
    }

    pub fn statements(&self) -> &[PlannedStatement] {
        &self.statements
    }

    pub fn phases(&self) -> Vec<PlanPhase> {
        self.statements.iter().map(|s| s.phase).collect()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Sort statements into phase order, keeping the order within a phase.
    pub(crate) fn order_by_phase(&mut self) {
        self.statements.sort_by_key(|s| s.phase);
    }

    /// Render every statement for `platform`.
    pub fn build_calls(&self, platform: &DatabasePlatform) -> Vec<SqlCall> {
        self.statements
            .iter()
            .map(|planned| {
                let mut call = planned.statement.to_call(platform);
                if let Some(bind) = planned.bind {
                    call.set_bind_parameters(bind);
                }
                call
            })
            .collect()
    }

    /// SQL text of every statement with `?` for bound values.
    pub fn sql_strings(&self, platform: &DatabasePlatform) -> Vec<String> {
        self.build_calls(platform).iter().map(SqlCall::sql_string).collect()
    }

    pub fn summary(&self, platform: &DatabasePlatform) -> PlanSummary {
        PlanSummary {
            strategy: self.strategy,
            statements: self
                .statements
                .iter()
                .map(|s| s.phase)
                .zip(self.sql_strings(platform))
                .collect(),
        }
    }

    /// Run the plan in order. Returns the rows affected by the action
    /// statements. If a statement fails, cleanup statements still run before
    /// the error is returned.
    #[tracing::instrument(level = "debug", skip_all, fields(strategy = ?self.strategy, statements = self.statements.len()))]
    pub async fn execute<A: Accessor>(
        &self,
        cx: &Cx,
        accessor: &A,
        platform: &DatabasePlatform,
        translation_row: Option<&Row>,
        modify_row: Option<&Row>,
    ) -> Outcome<u64, Error> {
        let calls = self.build_calls(platform);
        let mut affected = 0;
        for (index, (planned, call)) in self.statements.iter().zip(&calls).enumerate() {
            let (sql, params) = match call.translate(translation_row, modify_row, platform.dialect()) {
                Ok(translated) => translated,
                Err(e) => {
                    self.cleanup_after(cx, accessor, platform, index, &calls).await;
                    return Outcome::Err(e);
                }
            };
            tracing::trace!(phase = ?planned.phase, sql = %sql, "executing statement");
            match accessor.execute(cx, &sql, &params).await {
                Outcome::Ok(count) => {
                    if planned.phase == PlanPhase::Action {
                        affected += count;
                    }
                }
                Outcome::Err(e) => {
                    self.cleanup_after(cx, accessor, platform, index, &calls).await;
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        tracing::debug!(affected, "plan executed");
        Outcome::Ok(affected)
    }

    async fn cleanup_after<A: Accessor>(
        &self,
        cx: &Cx,
        accessor: &A,
        platform: &DatabasePlatform,
        failed: usize,
        calls: &[SqlCall],
    ) {
        for (planned, call) in self.statements.iter().zip(calls).skip(failed + 1) {
            if planned.phase != PlanPhase::Cleanup {
                continue;
            }
            let Ok((sql, params)) = call.translate(None, None, platform.dialect()) else {
                continue;
            };
            if let Outcome::Err(e) = accessor.execute(cx, &sql, &params).await {
                tracing::warn!(error = %e, sql = %sql, "cleanup after failed plan also failed");
            }
        }
    }
}

/// A prepared object read.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    pub select: SelectStatement,
    /// Selected fields in select-list order: the queried object's fields,
    /// then each joined attribute's.
    pub fields: Vec<DatabaseField>,
    /// Joins with their offsets computed.
    pub joined: JoinedAttributeManager,
}

impl ReadPlan {
    pub fn to_call(&self, platform: &DatabasePlatform) -> SqlCall {
        self.select.to_call(platform)
    }

    /// Column names for result rows, by position.
    pub fn columns(&self) -> Arc<ColumnInfo> {
        Arc::new(ColumnInfo::from_fields(&self.fields))
    }

    /// Relabel accessor rows with the selected fields.
    pub fn label_rows(&self, rows: Vec<Row>) -> Vec<Row> {
        let columns = self.columns();
        rows.into_iter()
            .map(|row| Row::with_columns(Arc::clone(&columns), row.values().cloned().collect()))
            .collect()
    }
}

/// A prepared report.
#[derive(Debug, Clone)]
pub struct ReportPlan {
    pub select: SelectStatement,
    /// Report item names, by position.
    pub names: Vec<String>,
}

impl ReportPlan {
    pub fn to_call(&self, platform: &DatabasePlatform) -> SqlCall {
        self.select.to_call(platform)
    }

    pub fn label_rows(&self, rows: Vec<Row>) -> Vec<Row> {
        let columns = Arc::new(ColumnInfo::new(self.names.clone()));
        rows.into_iter()
            .map(|row| Row::with_columns(Arc::clone(&columns), row.values().cloned().collect()))
            .collect()
    }
}
