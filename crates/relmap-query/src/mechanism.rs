//! Statement building for descriptor-driven queries.
//!
//! An [`ExpressionQueryMechanism`] turns a query against one descriptor
//! into SQL: a [`ReadPlan`] for object reads, a [`ReportPlan`] for reports,
//! and a [`StatementPlan`] for writes and bulk operations. It decides how
//! many statements are needed, their order, and whether they correlate
//! through EXISTS sub-selects or stage rows in temp tables.
//!
//! The update-all planner lives in [`crate::modify_all`].

use crate::conform::Conformer;
use crate::expr::{BinaryOp, Expr, ExprId};
use crate::normalize::{Normalizer, indicator_in};
use crate::plan::{PlanPhase, PlanStrategy, ReadPlan, ReportPlan, StatementPlan};
use crate::query::{DeleteAllQuery, ReadAllQuery, ReadObjectQuery, ReportQuery};
use crate::statement::{FromClause, LockingClause, OrderItem, SelectItem, SelectStatement, SqlStatement, TableRef};
use relmap_core::{
    ClassDescriptor, DatabaseField, DatabasePlatform, DatabaseTable, ObjectRef, Project, QueryError,
    QueryErrorKind, Result, Row, SessionCache, SqlCall, TempTableCleanup, UpdateCallKey, Value,
};
use std::sync::Arc;

pub(crate) fn invalid(message: impl Into<String>) -> relmap_core::Error {
    QueryError::new(QueryErrorKind::InvalidExpression, message).into()
}

/// Result of looking a read up in the session cache.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// The cached object matches the criteria.
    Found(ObjectRef),
    /// The object is cached but deleted in the unit of work.
    Deleted,
    /// The cache cannot answer; go to the database.
    Unknown,
}

/// Builds SQL for queries on one descriptor.
#[derive(Clone, Copy)]
pub struct ExpressionQueryMechanism<'a> {
    project: &'a Project,
    platform: &'a DatabasePlatform,
    descriptor: &'a ClassDescriptor,
}

impl std::fmt::Debug for ExpressionQueryMechanism<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionQueryMechanism")
            .field("entity", &self.descriptor.entity_name())
            .field("platform", &self.platform.name())
            .finish()
    }
}

impl<'a> ExpressionQueryMechanism<'a> {
    pub fn new(project: &'a Project, platform: &'a DatabasePlatform, entity: &str) -> Result<Self> {
        Ok(Self {
            project,
            platform,
            descriptor: project.require(entity)?,
        })
    }

    pub fn project(&self) -> &'a Project {
        self.project
    }

    pub fn platform(&self) -> &'a DatabasePlatform {
        self.platform
    }

    pub fn descriptor(&self) -> &'a ClassDescriptor {
        self.descriptor
    }

    pub(crate) fn primary_table(&self, descriptor: &ClassDescriptor) -> Result<DatabaseTable> {
        descriptor
            .primary_table()
            .cloned()
            .ok_or_else(|| invalid(format!("{} maps no tables", descriptor.entity_name())))
    }

    /// Normalized criteria ANDed with this descriptor's indicator
    /// restriction.
    pub(crate) fn selection_criteria(
        &self,
        n: &mut Normalizer<'a>,
        criteria: Option<&Expr>,
    ) -> Result<Option<Expr>> {
        self.selection_criteria_for(self.descriptor, n, criteria)
    }

    /// Criteria restricted to `descriptor`'s class indicator values.
    fn selection_criteria_for(
        &self,
        descriptor: &ClassDescriptor,
        n: &mut Normalizer<'a>,
        criteria: Option<&Expr>,
    ) -> Result<Option<Expr>> {
        let mut parts = Vec::new();
        if let Some(criteria) = criteria {
            parts.push(n.normalize(criteria)?);
        }
        if let Some((field, values)) = descriptor.indicator_restriction() {
            let base = n.base_id();
            n.column(base, field)?;
            parts.push(indicator_in(base, field, values));
        }
        Ok(Expr::and_all(parts))
    }

    // ==================== Reads ====================

    /// SELECT for a read-all: the descriptor's fields, then every joined
    /// attribute's fields in join order.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.descriptor.entity_name()))]
    pub fn prepare_select_all_rows(&self, query: &ReadAllQuery) -> Result<ReadPlan> {
        let builder = query.builder();
        let base = base_id_of(builder)?;
        let mut n = Normalizer::new(self.project, self.descriptor, base);

        let mut items = Vec::new();
        let mut fields = Vec::new();
        for field in self.descriptor.fields_for_select() {
            let column = n.column(base, field)?;
            fields.push(column_field(&column, field));
            items.push(SelectItem::new(column));
        }

        let mut joined = query.joined().clone();
        joined.reset();
        joined.add_descriptor_join_fetches(self.descriptor, builder);
        joined.prepare_join_expressions(self.project, self.descriptor)?;
        for attribute in joined.joined_attributes() {
            let node = n.register_node(&attribute.expr)?;
            for field in &attribute.fields {
                let column = n.column(node, field)?;
                fields.push(column_field(&column, field));
                items.push(SelectItem::new(column));
            }
        }
        joined.compute_joining_mapping_indexes(self.descriptor, 0);
        joined.compute_joining_mapping_queries();

        let condition = self.selection_criteria(&mut n, query.criteria())?;
        let order_by = normalize_order(&mut n, query.order_items())?;
        let lock = match query.lock() {
            None => None,
            Some(request) => {
                let mut clause = LockingClause::all();
                if !request.locks_all() {
                    for node in request.nodes() {
                        clause.add_node(n.register_node(node)?);
                    }
                    joined.setup_locking_clause_for_joined_expressions(&mut clause, &mut n)?;
                }
                Some(clause)
            }
        };

        let mut select = n.select(items, condition);
        select.order_by = order_by;
        select.distinct = query.is_distinct();
        select.max_rows = query.row_limit();
        select.lock = lock;
        tracing::debug!(
            tables = select.from.tables.len(),
            columns = fields.len(),
            joins = joined.joined_attributes().len(),
            "prepared select"
        );
        Ok(ReadPlan {
            select,
            fields,
            joined,
        })
    }

    /// SELECT for a single-object read. Same shape as a read-all; the
    /// caller keeps the first object.
    pub fn prepare_select_one_row(&self, query: &ReadObjectQuery) -> Result<ReadPlan> {
        self.prepare_select_all_rows(query.as_read_all())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.descriptor.entity_name()))]
    pub fn prepare_report_query_select_all_rows(&self, query: &ReportQuery) -> Result<ReportPlan> {
        let base = base_id_of(query.builder())?;
        let mut n = Normalizer::new(self.project, self.descriptor, base);
        let anchor = self
            .descriptor
            .primary_key_fields()
            .first()
            .ok_or_else(|| invalid(format!("{} has no primary key", self.descriptor.entity_name())))?;
        n.column(base, anchor)?;

        let mut items = Vec::with_capacity(query.items().len());
        let mut names = Vec::with_capacity(query.items().len());
        for item in query.items() {
            items.push(SelectItem::aliased(n.normalize(&item.expr)?, item.name.clone()));
            names.push(item.name.clone());
        }
        let group_by = query
            .group_by_items()
            .iter()
            .map(|e| n.normalize(e))
            .collect::<Result<Vec<_>>>()?;
        let having = query.having_condition().map(|h| n.normalize(h)).transpose()?;
        let order_by = normalize_order(&mut n, query.order_items())?;
        let condition = self.selection_criteria(&mut n, query.criteria())?;

        let mut select = n.select(items, condition);
        select.group_by = group_by;
        select.having = having;
        select.order_by = order_by;
        select.distinct = query.is_distinct();
        select.max_rows = query.row_limit();
        Ok(ReportPlan { select, names })
    }

    /// `SELECT pk FROM primary WHERE pk = ?`, bound from a row holding the
    /// primary key.
    pub fn prepare_does_exist(&self) -> Result<SelectStatement> {
        let primary = self.primary_table(self.descriptor)?;
        let pk = self.descriptor.primary_key_fields();
        let items = pk.iter().map(|f| SelectItem::new(Expr::col(f.clone()))).collect();
        let condition = Expr::and_all(pk.iter().map(|f| Expr::col(f.clone()).eq(Expr::param(f.clone()))))
            .ok_or_else(|| invalid(format!("{} has no primary key", self.descriptor.entity_name())))?;
        Ok(SelectStatement::new(items, FromClause::single(TableRef::unaliased(primary))).with_condition(condition))
    }

    // ==================== Object writes ====================

    /// `(pk on table, primary pk)` pairs.
    pub(crate) fn pk_pairs(
        descriptor: &ClassDescriptor,
        table: &DatabaseTable,
    ) -> Vec<(DatabaseField, DatabaseField)> {
        if descriptor.primary_table() == Some(table) {
            descriptor
                .primary_key_fields()
                .iter()
                .map(|f| (f.clone(), f.clone()))
                .collect()
        } else {
            descriptor.additional_table_pk(table)
        }
    }

    /// `pk = ?` for `table`, bound from the primary key in the translation
    /// row.
    fn pk_condition(&self, table: &DatabaseTable) -> Result<Expr> {
        Expr::and_all(
            Self::pk_pairs(self.descriptor, table)
                .into_iter()
                .map(|(on_table, primary)| Expr::col(on_table).eq(Expr::param(primary))),
        )
        .ok_or_else(|| invalid(format!("no primary key for {table}")))
    }

    fn version_on(&self, table: &DatabaseTable) -> Option<&'a DatabaseField> {
        self.descriptor.version_field().filter(|v| v.is_on(table))
    }

    /// One INSERT per table in insert order. Values are bound from the
    /// modify row; secondary tables take their key from the primary key.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.descriptor.entity_name()))]
    pub fn prepare_insert_object(&self) -> Result<StatementPlan> {
        let tables = self.descriptor.multiple_table_insert_order();
        let mut plan = StatementPlan::new(if tables.len() > 1 {
            PlanStrategy::MultiTable
        } else {
            PlanStrategy::Simple
        });
        for table in tables {
            let mut values: Vec<(DatabaseField, Expr)> = self
                .descriptor
                .additional_table_pk(table)
                .into_iter()
                .map(|(secondary, primary)| (secondary, Expr::modify(primary)))
                .collect();
            for field in self.descriptor.selection_fields().iter().filter(|f| f.is_on(table)) {
                if !values.iter().any(|(f, _)| f == field) {
                    values.push((field.clone(), Expr::modify(field.clone())));
                }
            }
            plan.push(
                PlanPhase::Action,
                SqlStatement::Insert {
                    table: table.clone(),
                    values,
                },
            );
        }
        Ok(plan)
    }

    /// UPDATE calls for an object whose `modified` fields changed, cached on
    /// the descriptor's query manager per field set.
    ///
    /// The version column, if any, is set from the modify row and checked
    /// against the translation row on its table.
    pub fn prepare_update_object(&self, modified: &[DatabaseField]) -> Result<Arc<Vec<SqlCall>>> {
        let key = UpdateCallKey::new(modified);
        self.descriptor.query_manager().get_or_build_update_calls(key, || {
            tracing::debug!(
                entity = self.descriptor.entity_name(),
                fields = modified.len(),
                "building update calls"
            );
            Ok(self
                .update_object_statements(modified)?
                .iter()
                .map(|s| s.to_call(self.platform))
                .collect())
        })
    }

    pub(crate) fn update_object_statements(&self, modified: &[DatabaseField]) -> Result<Vec<SqlStatement>> {
        if modified.is_empty() {
            return Ok(Vec::new());
        }
        for field in modified {
            if !self.descriptor.tables().iter().any(|t| field.is_on(t)) {
                return Err(QueryError::new(
                    QueryErrorKind::InvalidExpression,
                    format!("{field} is not mapped by {}", self.descriptor.entity_name()),
                )
                .for_entity(self.descriptor.entity_name())
                .with_field(field.qualified_name())
                .into());
            }
        }
        let mut statements = Vec::new();
        for table in self.descriptor.multiple_table_insert_order() {
            let version = self.version_on(table);
            let mut assignments: Vec<(DatabaseField, Expr)> = modified
                .iter()
                .filter(|f| f.is_on(table) && Some(*f) != version)
                .map(|f| (f.clone(), Expr::modify(f.clone())))
                .collect();
            if assignments.is_empty() && version.is_none() {
                continue;
            }
            let mut condition = self.pk_condition(table)?;
            if let Some(version) = version {
                assignments.push((version.clone(), Expr::modify(version.clone())));
                condition = condition.and(Expr::col(version.clone()).eq(Expr::param(version.clone())));
            }
            statements.push(SqlStatement::Update {
                table: table.clone(),
                assignments,
                where_clause: Some(condition),
            });
        }
        Ok(statements)
    }

    /// One DELETE per table in reverse insert order.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.descriptor.entity_name()))]
    pub fn prepare_delete_object(&self) -> Result<StatementPlan> {
        let tables = self.descriptor.multiple_table_insert_order();
        let mut plan = StatementPlan::new(if tables.len() > 1 {
            PlanStrategy::MultiTable
        } else {
            PlanStrategy::Simple
        });
        for table in tables.iter().rev() {
            let mut condition = self.pk_condition(table)?;
            if let Some(version) = self.version_on(table) {
                condition = condition.and(Expr::col(version.clone()).eq(Expr::param(version.clone())));
            }
            plan.push(
                PlanPhase::Action,
                SqlStatement::Delete {
                    table: table.clone(),
                    where_clause: Some(condition),
                },
            );
        }
        Ok(plan)
    }

    // ==================== Delete-all ====================

    /// Statements deleting every object matching the query's criteria, in
    /// every table of the descriptor and of its subclasses.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.descriptor.entity_name()))]
    pub fn prepare_delete_all(&self, query: &DeleteAllQuery) -> Result<StatementPlan> {
        let base = base_id_of(query.builder())?;
        let mut plan = StatementPlan::new(PlanStrategy::Simple);
        let mut correlated = false;
        self.delete_all_for(self.descriptor, query.criteria(), base, &[], true, &mut plan, &mut correlated)?;
        let strategy = if plan.phases().contains(&PlanPhase::Create) {
            PlanStrategy::TempTable
        } else if correlated || plan.len() > 1 {
            PlanStrategy::MultiTable
        } else {
            PlanStrategy::Simple
        };
        plan.set_strategy(strategy);
        tracing::debug!(?strategy, statements = plan.len(), "prepared delete-all");
        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn delete_all_for(
        &self,
        descriptor: &'a ClassDescriptor,
        criteria: Option<&Expr>,
        base: ExprId,
        tables_to_ignore: &[DatabaseTable],
        top: bool,
        plan: &mut StatementPlan,
        correlated: &mut bool,
    ) -> Result<()> {
        if descriptor.has_multiple_table_child() {
            let mut ignore = tables_to_ignore.to_vec();
            for table in descriptor.tables() {
                if !ignore.contains(table) {
                    ignore.push(table.clone());
                }
            }
            for child in self.project.children(descriptor.entity_name()) {
                self.delete_all_for(child, criteria, base, &ignore, false, plan, correlated)?;
            }
        }

        let tables: Vec<DatabaseTable> = descriptor
            .multiple_table_insert_order()
            .iter()
            .filter(|t| !tables_to_ignore.contains(t))
            .rev()
            .cloned()
            .collect();
        if tables.is_empty() {
            return Ok(());
        }

        let mut n = Normalizer::new(self.project, descriptor, base);
        let Some(condition) = self.selection_criteria_for(descriptor, &mut n, criteria)? else {
            for table in tables {
                tracing::trace!(table = %table, "unconditional delete");
                plan.push(
                    PlanPhase::Action,
                    SqlStatement::Delete {
                        table,
                        where_clause: None,
                    },
                );
            }
            return Ok(());
        };

        let referenced = referenced_tables(&condition, base);
        let has_joins = n.has_joins();
        let reads_only = |table: &DatabaseTable| !has_joins && referenced.iter().all(|r| r == table);

        if tables.len() == 1 && reads_only(&tables[0]) {
            plan.push(
                PlanPhase::Action,
                SqlStatement::Delete {
                    table: tables[0].clone(),
                    where_clause: Some(condition),
                },
            );
            return Ok(());
        }

        let primary = self.primary_table(descriptor)?;
        let primary_pk = descriptor.primary_key_fields();
        let first_pk = primary_pk
            .first()
            .ok_or_else(|| invalid(format!("{} has no primary key", descriptor.entity_name())))?;

        if top && self.platform.should_always_use_temp_storage_for_modify_all() {
            if self.platform.supports_temp_tables() {
                return self.delete_all_through_temp_table(
                    descriptor, &mut n, condition, &tables, &primary, plan,
                );
            }
            tracing::warn!(
                platform = self.platform.name(),
                "temp storage requested but not supported; correlating deletes instead"
            );
        }

        let pk_column = n.column(base, first_pk)?;
        let select_for_exist = n.select(vec![SelectItem::new(pk_column)], Some(condition.clone()));
        let mut deleted: Vec<DatabaseTable> = Vec::new();
        for table in tables {
            let evaluable = !referenced.iter().any(|r| deleted.contains(r));
            let where_clause = if evaluable && reads_only(&table) {
                condition.clone()
            } else if evaluable {
                *correlated = true;
                let correlation = Expr::and_all(
                    Self::pk_pairs(descriptor, &table)
                        .into_iter()
                        .map(|(on_table, primary)| Expr::node_column(base, primary).eq(Expr::col(on_table))),
                )
                .ok_or_else(|| invalid(format!("no primary key for {table}")))?;
                Expr::exists(select_for_exist.with_condition(correlation))
            } else {
                *correlated = true;
                let anchor = deleted
                    .first()
                    .cloned()
                    .ok_or_else(|| invalid("criteria reads a table that was never deleted"))?;
                let gone = Expr::not_exists(still_present(descriptor, &anchor, &table)?);
                // rows of sibling classes share this table
                match descriptor.indicator_restriction() {
                    Some((field, values)) if field.is_on(&table) => gone.and(
                        Expr::col(field.clone()).in_list(values.iter().cloned().map(Expr::Literal).collect::<Vec<_>>()),
                    ),
                    _ => gone,
                }
            };
            tracing::trace!(table = %table, evaluable, "delete-all statement");
            plan.push(
                PlanPhase::Action,
                SqlStatement::Delete {
                    table: table.clone(),
                    where_clause: Some(where_clause),
                },
            );
            deleted.push(table);
        }
        Ok(())
    }

    fn delete_all_through_temp_table(
        &self,
        descriptor: &'a ClassDescriptor,
        n: &mut Normalizer<'a>,
        condition: Expr,
        tables: &[DatabaseTable],
        primary: &DatabaseTable,
        plan: &mut StatementPlan,
    ) -> Result<()> {
        let base = n.base_id();
        let primary_pk = descriptor.primary_key_fields();
        let temp = DatabaseTable::new(self.platform.temp_table_name(primary.name()));
        let temp_pk: Vec<DatabaseField> = primary_pk.iter().map(|f| f.on_table(&temp)).collect();
        tracing::debug!(temp = %temp, "staging delete-all keys in a temp table");

        let items = primary_pk
            .iter()
            .map(|f| Ok(SelectItem::new(n.column(base, f)?)))
            .collect::<Result<Vec<_>>>()?;
        plan.push(
            PlanPhase::Create,
            SqlStatement::CreateTempTable {
                name: temp.clone(),
                source: primary.clone(),
                columns: primary_pk.to_vec(),
            },
        );
        plan.push(
            PlanPhase::Populate,
            SqlStatement::InsertSelect {
                table: temp.clone(),
                columns: temp_pk.clone(),
                select: n.select(items, Some(condition)),
            },
        );
        for table in tables {
            let correlation = Expr::and_all(
                Self::pk_pairs(descriptor, table)
                    .into_iter()
                    .map(|(on_table, primary)| Expr::col(primary.on_table(&temp)).eq(Expr::col(on_table))),
            )
            .ok_or_else(|| invalid(format!("no primary key for {table}")))?;
            let staged = SelectStatement::new(
                vec![SelectItem::new(Expr::col(temp_pk[0].clone()))],
                FromClause::single(TableRef::unaliased(temp.clone())),
            )
            .with_condition(correlation);
            plan.push(
                PlanPhase::Action,
                SqlStatement::Delete {
                    table: table.clone(),
                    where_clause: Some(Expr::exists(staged)),
                },
            );
        }
        plan.push(PlanPhase::Cleanup, self.temp_cleanup(temp));
        Ok(())
    }

    pub(crate) fn temp_cleanup(&self, temp: DatabaseTable) -> SqlStatement {
        match self.platform.temp_table_cleanup() {
            TempTableCleanup::Drop => SqlStatement::DropTempTable { name: temp },
            TempTableCleanup::DeleteRows => SqlStatement::ClearTempTable { name: temp },
        }
    }

    // ==================== Cache ====================

    /// Answer a single-object read from the session cache when its criteria
    /// fixes every primary key attribute.
    pub fn check_cache_for_object(
        &self,
        criteria: Option<&Expr>,
        translation_row: Option<&Row>,
        cache: &dyn SessionCache,
    ) -> CacheLookup {
        let Some(criteria) = criteria else {
            return CacheLookup::Unknown;
        };
        let Some(pk) = self.primary_key_from_criteria(criteria, translation_row) else {
            return CacheLookup::Unknown;
        };
        let candidates = std::iter::once(self.descriptor)
            .chain(self.project.descendants(self.descriptor.entity_name()));
        for descriptor in candidates {
            let Some(object) = cache.get_by_primary_key(descriptor.entity_name(), &pk) else {
                continue;
            };
            if cache.is_deleted_object(&object) {
                tracing::trace!(entity = descriptor.entity_name(), "cache hit is deleted");
                return CacheLookup::Deleted;
            }
            return if Conformer::new(self.project)
                .conforms(criteria, &object, translation_row)
                .conforms()
            {
                CacheLookup::Found(object)
            } else {
                CacheLookup::Unknown
            };
        }
        CacheLookup::Unknown
    }

    /// Primary key fixed by `pk = value` conjuncts of `criteria`.
    pub fn primary_key_from_criteria(&self, criteria: &Expr, translation_row: Option<&Row>) -> Option<Vec<Value>> {
        let pk = self.descriptor.primary_key_fields();
        let mut found: Vec<Option<Value>> = vec![None; pk.len()];
        let mut conjuncts = Vec::new();
        collect_conjuncts(criteria, &mut conjuncts);
        for conjunct in conjuncts {
            let Expr::Binary {
                left,
                op: BinaryOp::Eq,
                right,
            } = conjunct
            else {
                continue;
            };
            for (key, value) in [(left, right), (right, left)] {
                let Some(value) = bound_value(value, translation_row) else {
                    continue;
                };
                for (slot, field) in found.iter_mut().zip(pk) {
                    if self.is_key_for(key, field) {
                        *slot = Some(value.clone());
                    }
                }
            }
        }
        found.into_iter().collect()
    }

    fn is_key_for(&self, key: &Expr, field: &DatabaseField) -> bool {
        match key {
            Expr::QueryKey { base, name, .. } if matches!(base.as_ref(), Expr::Base { .. }) => {
                self.descriptor.pk_attribute_for_field(field) == Some(name.as_str())
            }
            Expr::Field { base, field: f } if matches!(base.as_ref(), Expr::Base { .. }) => f == field,
            _ => false,
        }
    }
}

pub(crate) fn base_id_of(builder: &Expr) -> Result<ExprId> {
    match builder {
        Expr::Base { id, .. } => Ok(*id),
        _ => Err(invalid("query builder must be a base expression")),
    }
}

fn column_field(column: &Expr, fallback: &DatabaseField) -> DatabaseField {
    match column {
        Expr::Column { field, .. } => field.clone(),
        _ => fallback.clone(),
    }
}

fn normalize_order(n: &mut Normalizer<'_>, items: &[OrderItem]) -> Result<Vec<OrderItem>> {
    items
        .iter()
        .map(|o| {
            Ok(OrderItem {
                expr: n.normalize(&o.expr)?,
                descending: o.descending,
            })
        })
        .collect()
}

/// Tables of the base node read by a normalized condition.
pub(crate) fn referenced_tables(condition: &Expr, base: ExprId) -> Vec<DatabaseTable> {
    let mut tables = Vec::new();
    for (node, field) in condition.columns() {
        if node != Some(base) {
            continue;
        }
        if let Some(table) = field.table() {
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
    }
    tables
}

/// `SELECT anchor.pk FROM anchor WHERE anchor.pk = table.pk`: rows of
/// `table` whose counterpart in `anchor` is gone are the matched rows.
fn still_present(
    descriptor: &ClassDescriptor,
    anchor: &DatabaseTable,
    table: &DatabaseTable,
) -> Result<SelectStatement> {
    let anchor_pairs = ExpressionQueryMechanism::pk_pairs(descriptor, anchor);
    let table_pairs = ExpressionQueryMechanism::pk_pairs(descriptor, table);
    let correlation = Expr::and_all(anchor_pairs.iter().filter_map(|(on_anchor, primary)| {
        table_pairs
            .iter()
            .find(|(_, p)| p == primary)
            .map(|(on_table, _)| Expr::col(on_anchor.clone()).eq(Expr::col(on_table.clone())))
    }))
    .ok_or_else(|| invalid(format!("no primary key joins {anchor} and {table}")))?;
    let (first, _) = anchor_pairs
        .first()
        .ok_or_else(|| invalid(format!("no primary key for {anchor}")))?;
    Ok(SelectStatement::new(
        vec![SelectItem::new(Expr::col(first.clone()))],
        FromClause::single(TableRef::unaliased(anchor.clone())),
    )
    .with_condition(correlation))
}

fn collect_conjuncts<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        other => out.push(other),
    }
}

fn bound_value(expr: &Expr, translation_row: Option<&Row>) -> Option<Value> {
    match expr {
        Expr::Literal(value) if !value.is_null() => Some(value.clone()),
        Expr::Parameter(field) => translation_row
            .and_then(|r| r.get_field(field))
            .filter(|v| !v.is_null())
            .cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{
        ClassRegistry, DatabaseMapping, Entity, JoinFetch, NoCache, PlatformConfig, ProjectBuilder,
    };

    fn project() -> Arc<Project> {
        ProjectBuilder::new()
            .descriptor(
                ClassDescriptor::new("Employee")
                    .table("EMPLOYEE")
                    .table("SALARY")
                    .primary_key("EMPLOYEE.EMP_ID")
                    .with_version_field("EMPLOYEE.VERSION")
                    .with_mapping(DatabaseMapping::direct("id", "EMPLOYEE.EMP_ID"))
                    .with_mapping(DatabaseMapping::direct("name", "EMPLOYEE.NAME"))
                    .with_mapping(DatabaseMapping::direct("salary", "SALARY.AMOUNT"))
                    .with_mapping(
                        DatabaseMapping::one_to_one(
                            "address",
                            "Address",
                            &[("EMPLOYEE.ADDR_ID", "ADDRESS.ADDRESS_ID")],
                        )
                        .join_fetch(JoinFetch::Outer),
                    )
                    .with_mapping(DatabaseMapping::one_to_many(
                        "phones",
                        "Phone",
                        &[("PHONE.EMP_ID", "EMPLOYEE.EMP_ID")],
                    )),
            )
            .descriptor(
                ClassDescriptor::new("Address")
                    .table("ADDRESS")
                    .primary_key("ADDRESS.ADDRESS_ID")
                    .with_mapping(DatabaseMapping::direct("id", "ADDRESS.ADDRESS_ID"))
                    .with_mapping(DatabaseMapping::direct("city", "ADDRESS.CITY")),
            )
            .descriptor(
                ClassDescriptor::new("Phone")
                    .table("PHONE")
                    .primary_key("PHONE.PHONE_ID")
                    .with_mapping(DatabaseMapping::direct("id", "PHONE.PHONE_ID"))
                    .with_mapping(DatabaseMapping::direct("number", "PHONE.NUM")),
            )
            .build(&ClassRegistry::with_defaults())
            .unwrap()
    }

    fn mechanism<'a>(
        project: &'a Project,
        platform: &'a DatabasePlatform,
    ) -> ExpressionQueryMechanism<'a> {
        ExpressionQueryMechanism::new(project, platform, "Employee").unwrap()
    }

    #[test]
    fn select_includes_join_fetched_address() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = ReadAllQuery::new("Employee")
            .with_builder(emp.clone())
            .filter(emp.clone().get("name").eq("Bob"))
            .order_by(OrderItem::asc(emp.clone().get("id")));
        let plan = mechanism(&project, &platform).prepare_select_all_rows(&query).unwrap();
        assert_eq!(
            plan.to_call(&platform).sql_string(),
            "SELECT t0.EMP_ID, t0.NAME, t0.ADDR_ID, t0.VERSION, t1.AMOUNT, t2.ADDRESS_ID, t2.CITY \
             FROM EMPLOYEE t0 LEFT OUTER JOIN ADDRESS t2 ON (t0.ADDR_ID = t2.ADDRESS_ID), SALARY t1 \
             WHERE t0.NAME = ? AND t1.EMP_ID = t0.EMP_ID ORDER BY t0.EMP_ID"
        );
        assert_eq!(plan.fields.len(), 7);
        assert_eq!(plan.joined.joined_mapping_indexes()["address"].offset, 5);
    }

    #[test]
    fn delete_all_correlates_secondary_table_first() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = DeleteAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.clone().get("name").eq("Bob"));
        let plan = mechanism(&project, &platform).prepare_delete_all(&query).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::MultiTable);
        assert_eq!(
            plan.sql_strings(&platform),
            vec![
                "DELETE FROM SALARY WHERE EXISTS (SELECT t0.EMP_ID FROM EMPLOYEE t0 WHERE t0.NAME = ? AND t0.EMP_ID = SALARY.EMP_ID)",
                "DELETE FROM EMPLOYEE WHERE NAME = ?",
            ]
        );
    }

    #[test]
    fn delete_all_after_deleting_the_criteria_table_uses_not_exists() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = DeleteAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.clone().get("salary").gt(100));
        let plan = mechanism(&project, &platform).prepare_delete_all(&query).unwrap();
        assert_eq!(
            plan.sql_strings(&platform),
            vec![
                "DELETE FROM SALARY WHERE AMOUNT > ?",
                "DELETE FROM EMPLOYEE WHERE NOT EXISTS (SELECT SALARY.EMP_ID FROM SALARY WHERE SALARY.EMP_ID = EMPLOYEE.EMP_ID)",
            ]
        );
    }

    #[test]
    fn delete_all_without_criteria_is_unconditional() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let plan = mechanism(&project, &platform)
            .prepare_delete_all(&DeleteAllQuery::new("Employee"))
            .unwrap();
        assert_eq!(
            plan.sql_strings(&platform),
            vec!["DELETE FROM SALARY", "DELETE FROM EMPLOYEE"]
        );
    }

    #[test]
    fn delete_all_stages_keys_when_platform_asks_for_temp_storage() {
        let project = project();
        let platform = DatabasePlatform::new(PlatformConfig {
            should_always_use_temp_storage_for_modify_all: true,
            ..DatabasePlatform::postgres().config().clone()
        });
        let emp = Expr::base("Employee");
        let query = DeleteAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.clone().get("name").eq("Bob"));
        let plan = mechanism(&project, &platform).prepare_delete_all(&query).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::TempTable);
        assert_eq!(
            plan.phases(),
            vec![
                PlanPhase::Create,
                PlanPhase::Populate,
                PlanPhase::Action,
                PlanPhase::Action,
                PlanPhase::Cleanup
            ]
        );
        let sql = plan.sql_strings(&platform);
        assert_eq!(
            sql[1],
            "INSERT INTO TL_EMPLOYEE (EMP_ID) SELECT t0.EMP_ID FROM EMPLOYEE t0 WHERE t0.NAME = ?"
        );
        assert_eq!(
            sql[2],
            "DELETE FROM SALARY WHERE EXISTS (SELECT TL_EMPLOYEE.EMP_ID FROM TL_EMPLOYEE WHERE TL_EMPLOYEE.EMP_ID = SALARY.EMP_ID)"
        );
    }

    fn projects() -> Arc<Project> {
        ProjectBuilder::new()
            .descriptor(
                ClassDescriptor::new("Project")
                    .table("PROJECT")
                    .primary_key("PROJECT.PROJ_ID")
                    .class_indicator("PROJECT.PROJ_TYPE")
                    .indicator_value("P")
                    .with_mapping(DatabaseMapping::direct("id", "PROJECT.PROJ_ID"))
                    .with_mapping(DatabaseMapping::direct("name", "PROJECT.NAME")),
            )
            .descriptor(
                ClassDescriptor::new("LargeProject")
                    .inherits_from("Project")
                    .table("LPROJECT")
                    .indicator_value("L")
                    .with_mapping(DatabaseMapping::direct("budget", "LPROJECT.BUDGET")),
            )
            .descriptor(ClassDescriptor::new("SmallProject").inherits_from("Project").indicator_value("S"))
            .build(&ClassRegistry::with_defaults())
            .unwrap()
    }

    fn inline_literals() -> DatabasePlatform {
        DatabasePlatform::new(PlatformConfig {
            should_bind_all_parameters: false,
            ..DatabasePlatform::postgres().config().clone()
        })
    }

    #[test]
    fn delete_all_clears_child_tables_before_the_root() {
        let project = projects();
        let platform = inline_literals();
        let p = Expr::base("Project");
        let query = DeleteAllQuery::new("Project")
            .with_builder(p.clone())
            .with_criteria(p.get("name").eq("Bob"));
        let plan = ExpressionQueryMechanism::new(&project, &platform, "Project")
            .unwrap()
            .prepare_delete_all(&query)
            .unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::MultiTable);
        assert_eq!(
            plan.sql_strings(&platform),
            vec![
                "DELETE FROM LPROJECT WHERE EXISTS (SELECT t0.PROJ_ID FROM PROJECT t0 \
                 WHERE t0.NAME = 'Bob' AND t0.PROJ_TYPE IN ('L') AND t0.PROJ_ID = LPROJECT.PROJ_ID)",
                "DELETE FROM PROJECT WHERE NAME = 'Bob'",
            ]
        );
    }

    #[test]
    fn delete_all_on_a_child_keeps_sibling_rows() {
        let project = projects();
        let platform = inline_literals();
        let lp = Expr::base("LargeProject");
        let query = DeleteAllQuery::new("LargeProject")
            .with_builder(lp.clone())
            .with_criteria(lp.get("budget").gt(100));
        let plan = ExpressionQueryMechanism::new(&project, &platform, "LargeProject")
            .unwrap()
            .prepare_delete_all(&query)
            .unwrap();
        let sql = plan.sql_strings(&platform);
        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("DELETE FROM LPROJECT WHERE EXISTS (SELECT "), "{}", sql[0]);
        assert!(sql[0].contains("BUDGET > 100"), "{}", sql[0]);
        assert!(sql[0].contains("PROJ_TYPE IN ('L')"), "{}", sql[0]);
        // the budget can no longer be read once LPROJECT rows are gone
        assert_eq!(
            sql[1],
            "DELETE FROM PROJECT WHERE NOT EXISTS (SELECT LPROJECT.PROJ_ID FROM LPROJECT \
             WHERE LPROJECT.PROJ_ID = PROJECT.PROJ_ID) AND PROJ_TYPE IN ('L')"
        );
    }

    #[test]
    fn object_writes_follow_insert_order() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let m = mechanism(&project, &platform);
        let insert = m.prepare_insert_object().unwrap();
        assert_eq!(
            insert.sql_strings(&platform),
            vec![
                "INSERT INTO EMPLOYEE (EMP_ID, NAME, ADDR_ID, VERSION) VALUES (?, ?, ?, ?)",
                "INSERT INTO SALARY (EMP_ID, AMOUNT) VALUES (?, ?)",
            ]
        );
        let delete = m.prepare_delete_object().unwrap();
        assert_eq!(
            delete.sql_strings(&platform),
            vec![
                "DELETE FROM SALARY WHERE EMP_ID = ?",
                "DELETE FROM EMPLOYEE WHERE EMP_ID = ? AND VERSION = ?",
            ]
        );
    }

    #[test]
    fn update_calls_are_cached_per_field_set() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let m = mechanism(&project, &platform);
        let amount = DatabaseField::new("SALARY.AMOUNT");
        let calls = m.prepare_update_object(std::slice::from_ref(&amount)).unwrap();
        let sql: Vec<String> = calls.iter().map(SqlCall::sql_string).collect();
        assert_eq!(
            sql,
            vec![
                "UPDATE EMPLOYEE SET VERSION = ? WHERE EMP_ID = ? AND VERSION = ?",
                "UPDATE SALARY SET AMOUNT = ? WHERE EMP_ID = ?",
            ]
        );
        let again = m.prepare_update_object(&[amount]).unwrap();
        assert!(Arc::ptr_eq(&calls, &again));
        let manager = project.descriptor("Employee").unwrap().query_manager();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.hit_count(), 1);
    }

    #[test]
    fn does_exist_selects_the_primary_key() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let select = mechanism(&project, &platform).prepare_does_exist().unwrap();
        assert_eq!(
            select.to_call(&platform).sql_string(),
            "SELECT EMPLOYEE.EMP_ID FROM EMPLOYEE WHERE EMPLOYEE.EMP_ID = ?"
        );
    }

    #[test]
    fn report_groups_and_aliases() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = ReportQuery::new("Employee")
            .with_builder(emp.clone())
            .item("city", emp.clone().get("address").get("city"))
            .item("total", emp.clone().get("salary").sum())
            .group_by(emp.clone().get("address").get("city"));
        let plan = mechanism(&project, &platform)
            .prepare_report_query_select_all_rows(&query)
            .unwrap();
        assert_eq!(plan.names, vec!["city", "total"]);
        assert_eq!(
            plan.to_call(&platform).sql_string(),
            "SELECT t1.CITY AS city, SUM(t2.AMOUNT) AS total FROM EMPLOYEE t0, ADDRESS t1, SALARY t2 \
             WHERE t0.ADDR_ID = t1.ADDRESS_ID AND t2.EMP_ID = t0.EMP_ID GROUP BY t1.CITY"
        );
    }

    struct MapCache(Vec<(Vec<Value>, ObjectRef)>, bool);

    impl SessionCache for MapCache {
        fn get_by_primary_key(&self, entity: &str, primary_key: &[Value]) -> Option<ObjectRef> {
            if entity != "Employee" {
                return None;
            }
            self.0
                .iter()
                .find(|(pk, _)| pk.as_slice() == primary_key)
                .map(|(_, object)| Arc::clone(object))
        }

        fn cached_objects(&self, _entity: &str) -> Vec<ObjectRef> {
            self.0.iter().map(|(_, object)| Arc::clone(object)).collect()
        }

        fn new_objects(&self, _entity: &str) -> Vec<ObjectRef> {
            Vec::new()
        }

        fn is_new_object(&self, _object: &ObjectRef) -> bool {
            false
        }

        fn is_deleted_object(&self, _object: &ObjectRef) -> bool {
            self.1
        }
    }

    #[test]
    fn cache_lookup_by_primary_key() {
        let project = project();
        let platform = DatabasePlatform::postgres();
        let m = mechanism(&project, &platform);
        let bob = Entity::new("Employee")
            .with_value("id", 1_i64)
            .with_value("name", "Bob")
            .into_ref();
        let cache = MapCache(vec![(vec![Value::BigInt(1)], Arc::clone(&bob))], false);

        let emp = Expr::base("Employee");
        let by_id = emp.clone().get("id").eq(1_i64).and(emp.clone().get("name").eq("Bob"));
        assert!(matches!(
            m.check_cache_for_object(Some(&by_id), None, &cache),
            CacheLookup::Found(found) if Arc::ptr_eq(&found, &bob)
        ));

        let by_param = emp.clone().get("id").eq(Expr::param("EMPLOYEE.EMP_ID"));
        let row = Row::empty().with("EMPLOYEE.EMP_ID", 1_i64);
        assert!(matches!(
            m.check_cache_for_object(Some(&by_param), Some(&row), &cache),
            CacheLookup::Found(_)
        ));

        let by_name = emp.clone().get("name").eq("Bob");
        assert!(matches!(
            m.check_cache_for_object(Some(&by_name), None, &cache),
            CacheLookup::Unknown
        ));
        assert!(matches!(
            m.check_cache_for_object(Some(&by_id), None, &NoCache),
            CacheLookup::Unknown
        ));

        let deleted = MapCache(cache.0.clone(), true);
        assert!(matches!(
            m.check_cache_for_object(Some(&by_id), None, &deleted),
            CacheLookup::Deleted
        ));
    }
}
