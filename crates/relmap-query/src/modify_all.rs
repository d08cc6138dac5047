//! Update-all planning.
//!
//! Assignments are grouped per table. A table whose values and criteria
//! read only its own columns is updated inline; otherwise values become
//! correlated sub-selects and the criteria an `EXISTS`. When one table's
//! update would change what another still has to read, and no order avoids
//! that, the matched rows are staged first: in temp tables, or in an
//! anonymous block on Oracle.

use crate::expr::{Expr, ExprId};
use crate::mechanism::{ExpressionQueryMechanism, base_id_of, invalid};
use crate::normalize::{Normalizer, convert_literal};
use crate::plan::{PlanPhase, PlanStrategy, StatementPlan};
use crate::query::{UpdateAllQuery, UpdateClauses, UpdateTarget};
use crate::statement::{
    AnonymousBlock, BlockUpdate, BlockValue, FromClause, SelectItem, SelectStatement, SqlStatement,
    TableRef,
};
use indexmap::IndexMap;
use relmap_core::{Converter, DatabaseField, DatabaseTable, PlatformError, QueryError, Result};

/// One column assignment.
#[derive(Debug, Clone)]
struct Assigned<'a> {
    field: DatabaseField,
    /// Object-level value; `None` assigns NULL.
    value: Option<Expr>,
    converter: Option<&'a Converter>,
}

#[derive(Debug)]
struct TableAssignments<'a> {
    table: DatabaseTable,
    assigned: Vec<Assigned<'a>>,
}

impl<'a> TableAssignments<'a> {
    fn left_fields(&self) -> Vec<DatabaseField> {
        self.assigned.iter().map(|a| a.field.clone()).collect()
    }

    /// Assignments whose values go through a temp table. NULL is assigned
    /// in place unless the platform can select it.
    fn staged(&self, nulls_in_select: bool) -> impl Iterator<Item = &Assigned<'a>> {
        self.assigned.iter().filter(move |a| a.value.is_some() || nulls_in_select)
    }
}

/// Does `expr` read nothing but `table`'s columns of the base node?
fn reads_only(n: &Normalizer<'_>, expr: &Expr, base: ExprId, table: &DatabaseTable) -> bool {
    !n.has_joins()
        && expr
            .columns()
            .iter()
            .all(|(node, field)| *node == Some(base) && field.is_on(table))
}

/// Order in which tables can be updated in place, or `None` when staging is
/// required. `left[i]` holds the columns table `i` assigns and `right[i]`
/// the columns its statement reads. Ties go to the table met first.
pub(crate) fn update_order(left: &[Vec<DatabaseField>], right: &[Vec<DatabaseField>]) -> Option<Vec<usize>> {
    // x must wait for y when y reads something x writes
    let waits_for = |x: usize, y: usize| x != y && left[x].iter().any(|f| right[y].contains(f));
    let count = left.len();
    for x in 0..count {
        for y in x + 1..count {
            if waits_for(x, y) && waits_for(y, x) {
                return None;
            }
        }
    }
    let mut pending: Vec<usize> = (0..count).collect();
    let mut order = Vec::with_capacity(count);
    while !pending.is_empty() {
        let pick = pending
            .iter()
            .position(|&x| pending.iter().all(|&y| !waits_for(x, y)))?;
        order.push(pending.remove(pick));
    }
    Some(order)
}

impl<'a> ExpressionQueryMechanism<'a> {
    /// Statements applying `query`'s assignments to every matching object.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.descriptor().entity_name()))]
    pub fn prepare_update_all(&self, query: &UpdateAllQuery) -> Result<StatementPlan> {
        let descriptor = self.descriptor();
        let builder = query.builder();
        let base = base_id_of(builder)?;
        if query.clauses().is_empty() {
            tracing::debug!("update-all without assignments");
            return Ok(StatementPlan::new(PlanStrategy::Simple));
        }
        let clauses = match descriptor.version_field() {
            Some(version) => query.clauses().with_version_increment(builder, version),
            None => query.clauses().clone(),
        };
        let tables = self.group_assignments(&clauses)?;

        let mut cn = Normalizer::new(self.project(), descriptor, base);
        let criteria = self.selection_criteria(&mut cn, query.criteria())?;

        if let [only] = tables.as_slice() {
            if self.is_simple_update(only, base, &cn, criteria.as_ref())? {
                let assignments = only
                    .assigned
                    .iter()
                    .map(|a| Ok((a.field.clone(), self.inline_value(base, a)?)))
                    .collect::<Result<Vec<_>>>()?;
                let mut plan = StatementPlan::new(PlanStrategy::Simple);
                plan.push(
                    PlanPhase::Action,
                    SqlStatement::Update {
                        table: only.table.clone(),
                        assignments,
                        where_clause: criteria,
                    },
                );
                return Ok(plan);
            }
        }

        let criteria_fields = criteria.as_ref().map(|c| cn.fields_read(c)).unwrap_or_default();
        let left: Vec<Vec<DatabaseField>> = tables.iter().map(TableAssignments::left_fields).collect();
        let right = tables
            .iter()
            .map(|t| {
                let mut fields = criteria_fields.clone();
                for assigned in &t.assigned {
                    if let Some((n, expr)) = self.normalize_assigned(base, assigned)? {
                        fields.extend(n.base_fields_read(&expr));
                    }
                }
                Ok(fields)
            })
            .collect::<Result<Vec<_>>>()?;
        let order = if self.platform().should_always_use_temp_storage_for_modify_all() {
            None
        } else {
            update_order(&left, &right)
        };

        let Some(order) = order else {
            return self.staged_update_all(&tables, base, query.criteria());
        };
        tracing::debug!(?order, "updating tables in place");

        let mut plan = StatementPlan::new(PlanStrategy::MultiTable);
        for index in order {
            let t = &tables[index];
            let mut assignments = Vec::with_capacity(t.assigned.len());
            for assigned in &t.assigned {
                let value = match self.normalize_assigned(base, assigned)? {
                    None => Expr::null(),
                    Some((n, expr)) if reads_only(&n, &expr, base, &t.table) => expr,
                    Some((mut n, expr)) => Expr::subselect(self.correlated(&mut n, expr, None, &t.table)?),
                };
                assignments.push((assigned.field.clone(), value));
            }
            let where_clause = match &criteria {
                None => None,
                Some(c) if reads_only(&cn, c, base, &t.table) => Some(c.clone()),
                Some(c) => {
                    let pk = self.first_pk_column(&mut cn)?;
                    Some(Expr::exists(self.correlated(&mut cn, pk, Some(c.clone()), &t.table)?))
                }
            };
            plan.push(
                PlanPhase::Action,
                SqlStatement::Update {
                    table: t.table.clone(),
                    assignments,
                    where_clause,
                },
            );
        }
        Ok(plan)
    }

    /// Resolve every clause to columns, grouped per table in encounter
    /// order. A column assigned twice keeps the last value.
    fn group_assignments(&self, clauses: &UpdateClauses) -> Result<Vec<TableAssignments<'a>>> {
        let descriptor = self.descriptor();
        let entity = descriptor.entity_name();
        let mut groups: IndexMap<DatabaseTable, Vec<Assigned<'a>>> = IndexMap::new();
        for (target, value) in clauses.iter() {
            let (name, resolved) = match target {
                UpdateTarget::Field(field) => (
                    field.qualified_name(),
                    vec![Assigned {
                        field: field.clone(),
                        value: (!value.is_literal_null()).then(|| value.clone()),
                        converter: None,
                    }],
                ),
                UpdateTarget::Attribute(attribute) => (attribute.clone(), self.resolve_attribute(attribute, value)?),
            };
            for assigned in resolved {
                let table = descriptor
                    .tables()
                    .iter()
                    .find(|t| assigned.field.is_on(t))
                    .cloned()
                    .ok_or_else(|| {
                        relmap_core::Error::from(QueryError::update_all_field_not_found(
                            entity,
                            &name,
                            Some(&assigned.field.qualified_name()),
                        ))
                    })?;
                let slot = groups.entry(table).or_default();
                match slot.iter_mut().find(|a| a.field == assigned.field) {
                    Some(existing) => *existing = assigned,
                    None => slot.push(assigned),
                }
            }
        }
        Ok(groups
            .into_iter()
            .map(|(table, assigned)| TableAssignments { table, assigned })
            .collect())
    }

    /// Columns an attribute assignment writes: a direct mapping's column,
    /// or the foreign keys of a one-to-one.
    fn resolve_attribute(&self, attribute: &str, value: &Expr) -> Result<Vec<Assigned<'a>>> {
        let descriptor = self.descriptor();
        let not_found = || {
            relmap_core::Error::from(QueryError::update_all_field_not_found(
                descriptor.entity_name(),
                attribute,
                None,
            ))
        };
        let mapping = descriptor.mapping(attribute).ok_or_else(not_found)?;
        let null = value.is_literal_null();
        if mapping.is_direct() {
            let field = mapping.field().cloned().ok_or_else(not_found)?;
            return Ok(vec![Assigned {
                field,
                value: (!null).then(|| value.clone()),
                converter: mapping.converter(),
            }]);
        }
        if mapping.is_one_to_one() {
            let keys = mapping.owner_fields();
            if null {
                return Ok(keys
                    .into_iter()
                    .map(|field| Assigned {
                        field,
                        value: None,
                        converter: None,
                    })
                    .collect());
            }
            if let [field] = keys.as_slice() {
                return Ok(vec![Assigned {
                    field: field.clone(),
                    value: Some(value.clone()),
                    converter: None,
                }]);
            }
            return Err(invalid(format!(
                "'{attribute}' has a composite foreign key and can only be set to NULL"
            )));
        }
        Err(not_found())
    }

    fn normalize_assigned(&self, base: ExprId, assigned: &Assigned<'a>) -> Result<Option<(Normalizer<'a>, Expr)>> {
        let Some(value) = &assigned.value else {
            return Ok(None);
        };
        let mut n = Normalizer::new(self.project(), self.descriptor(), base);
        let expr = convert_literal(n.normalize(value)?, assigned.converter)?;
        Ok(Some((n, expr)))
    }

    fn inline_value(&self, base: ExprId, assigned: &Assigned<'a>) -> Result<Expr> {
        Ok(self
            .normalize_assigned(base, assigned)?
            .map_or_else(Expr::null, |(_, expr)| expr))
    }

    fn is_simple_update(
        &self,
        t: &TableAssignments<'a>,
        base: ExprId,
        cn: &Normalizer<'a>,
        criteria: Option<&Expr>,
    ) -> Result<bool> {
        if criteria.is_some_and(|c| !reads_only(cn, c, base, &t.table)) {
            return Ok(false);
        }
        for assigned in &t.assigned {
            if let Some((n, expr)) = self.normalize_assigned(base, assigned)? {
                if !reads_only(&n, &expr, base, &t.table) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn first_pk_column(&self, n: &mut Normalizer<'a>) -> Result<Expr> {
        let first = self
            .descriptor()
            .primary_key_fields()
            .first()
            .ok_or_else(|| invalid(format!("{} has no primary key", self.descriptor().entity_name())))?;
        n.column(n.base_id(), first)
    }

    /// `SELECT item FROM … WHERE condition AND <base pk = table pk>`.
    fn correlated(
        &self,
        n: &mut Normalizer<'a>,
        item: Expr,
        condition: Option<Expr>,
        table: &DatabaseTable,
    ) -> Result<SelectStatement> {
        let base = n.base_id();
        let mut parts = Vec::new();
        for (on_table, primary) in Self::pk_pairs(self.descriptor(), table) {
            parts.push(n.column(base, &primary)?.eq(Expr::col(on_table)));
        }
        let correlation = Expr::and_all(parts).ok_or_else(|| invalid(format!("no primary key for {table}")))?;
        Ok(n.select(vec![SelectItem::new(item)], condition).with_condition(correlation))
    }

    /// Stage matched keys and new values before any table is touched.
    fn staged_update_all(
        &self,
        tables: &[TableAssignments<'a>],
        base: ExprId,
        criteria: Option<&Expr>,
    ) -> Result<StatementPlan> {
        let platform = self.platform();
        if platform.supports_temp_tables() {
            return self.update_all_through_temp_tables(tables, base, criteria);
        }
        if platform.is_oracle() {
            return self.update_all_in_anonymous_block(tables, base, criteria);
        }
        let entity = self.descriptor().entity_name();
        tracing::warn!(
            platform = platform.name(),
            entity,
            "update-all needs temp storage the platform cannot provide"
        );
        Err(PlatformError::temp_tables_not_supported(platform.name(), entity).into())
    }

    fn update_all_through_temp_tables(
        &self,
        tables: &[TableAssignments<'a>],
        base: ExprId,
        criteria: Option<&Expr>,
    ) -> Result<StatementPlan> {
        let descriptor = self.descriptor();
        let platform = self.platform();
        let unbound = platform.dont_bind_update_all_query_using_temp_tables();
        let nulls_in_select = platform.is_null_allowed_in_select_clause();
        let mut plan = StatementPlan::new(PlanStrategy::TempTable);
        let push = |plan: &mut StatementPlan, phase: PlanPhase, statement: SqlStatement| {
            if unbound {
                plan.push_unbound(phase, statement);
            } else {
                plan.push(phase, statement);
            }
        };

        for t in tables {
            let temp = DatabaseTable::new(platform.temp_table_name(t.table.name()));
            let pairs = Self::pk_pairs(descriptor, &t.table);
            let staged: Vec<&Assigned<'a>> = t.staged(nulls_in_select).collect();
            tracing::debug!(table = %t.table, temp = %temp, columns = staged.len(), "staging update-all");

            let mut columns: Vec<DatabaseField> = pairs.iter().map(|(on_table, _)| on_table.clone()).collect();
            columns.extend(staged.iter().map(|a| a.field.clone()));
            push(
                &mut plan,
                PlanPhase::Create,
                SqlStatement::CreateTempTable {
                    name: temp.clone(),
                    source: t.table.clone(),
                    columns: columns.clone(),
                },
            );

            let mut pn = Normalizer::new(self.project(), descriptor, base);
            let mut items = Vec::with_capacity(columns.len());
            for (_, primary) in &pairs {
                items.push(SelectItem::new(pn.column(base, primary)?));
            }
            for assigned in &staged {
                let item = match &assigned.value {
                    Some(value) => convert_literal(pn.normalize(value)?, assigned.converter)?,
                    None => Expr::null(),
                };
                items.push(SelectItem::new(item));
            }
            let condition = self.selection_criteria(&mut pn, criteria)?;
            push(
                &mut plan,
                PlanPhase::Populate,
                SqlStatement::InsertSelect {
                    table: temp.clone(),
                    columns,
                    select: pn.select(items, condition),
                },
            );

            let correlation = Expr::and_all(
                pairs
                    .iter()
                    .map(|(on_table, _)| Expr::col(on_table.on_table(&temp)).eq(Expr::col(on_table.clone()))),
            )
            .ok_or_else(|| invalid(format!("no primary key for {}", t.table)))?;
            let from_temp = |column: &DatabaseField| {
                SelectStatement::new(
                    vec![SelectItem::new(Expr::col(column.on_table(&temp)))],
                    FromClause::single(TableRef::unaliased(temp.clone())),
                )
                .with_condition(correlation.clone())
            };
            let assignments = t
                .assigned
                .iter()
                .map(|a| {
                    let value = if a.value.is_some() || nulls_in_select {
                        Expr::subselect(from_temp(&a.field))
                    } else {
                        Expr::null()
                    };
                    (a.field.clone(), value)
                })
                .collect();
            let (first_pk, _) = pairs
                .first()
                .ok_or_else(|| invalid(format!("no primary key for {}", t.table)))?;
            push(
                &mut plan,
                PlanPhase::Action,
                SqlStatement::Update {
                    table: t.table.clone(),
                    assignments,
                    where_clause: Some(Expr::exists(from_temp(first_pk))),
                },
            );
            push(&mut plan, PlanPhase::Cleanup, self.temp_cleanup(temp));
        }
        plan.order_by_phase();
        Ok(plan)
    }

    /// Oracle: bulk-collect keys and values, then one FORALL update per
    /// table.
    fn update_all_in_anonymous_block(
        &self,
        tables: &[TableAssignments<'a>],
        base: ExprId,
        criteria: Option<&Expr>,
    ) -> Result<StatementPlan> {
        let descriptor = self.descriptor();
        let pk = descriptor.primary_key_fields();
        let mut bn = Normalizer::new(self.project(), descriptor, base);
        let mut items = Vec::new();
        for field in pk {
            items.push(SelectItem::new(bn.column(base, field)?));
        }

        let mut value_fields = Vec::new();
        let mut updates = Vec::with_capacity(tables.len());
        for t in tables {
            let pairs = Self::pk_pairs(descriptor, &t.table);
            let pk_fields = pk
                .iter()
                .filter_map(|p| pairs.iter().find(|(_, primary)| primary == p).map(|(on, _)| on.clone()))
                .collect();
            let mut assignments = Vec::with_capacity(t.assigned.len());
            for assigned in &t.assigned {
                let value = match &assigned.value {
                    None => BlockValue::Null,
                    Some(value) => {
                        items.push(SelectItem::new(convert_literal(bn.normalize(value)?, assigned.converter)?));
                        value_fields.push(assigned.field.clone());
                        BlockValue::Staged(value_fields.len() - 1)
                    }
                };
                assignments.push((assigned.field.clone(), value));
            }
            updates.push(BlockUpdate {
                table: t.table.clone(),
                pk_fields,
                assignments,
            });
        }

        let condition = self.selection_criteria(&mut bn, criteria)?;
        let mut select = bn.select(items, condition);
        select.bulk_collect_into = (0..pk.len())
            .map(AnonymousBlock::pk_collection)
            .chain((0..value_fields.len()).map(AnonymousBlock::value_collection))
            .collect();
        tracing::debug!(tables = updates.len(), values = value_fields.len(), "update-all as anonymous block");

        let mut plan = StatementPlan::new(PlanStrategy::AnonymousBlock);
        plan.push(
            PlanPhase::Action,
            SqlStatement::AnonymousBlock(AnonymousBlock {
                pk_fields: pk.to_vec(),
                value_fields,
                select,
                updates,
            }),
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{
        ClassDescriptor, ClassRegistry, DatabaseMapping, DatabasePlatform, PlatformConfig, Project, ProjectBuilder,
        QueryErrorKind,
    };
    use std::sync::Arc;

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
                    .with_mapping(DatabaseMapping::one_to_one(
                        "address",
                        "Address",
                        &[("EMPLOYEE.ADDR_ID", "ADDRESS.ADDRESS_ID")],
                    )),
            )
            .descriptor(
                ClassDescriptor::new("Address")
                    .table("ADDRESS")
                    .primary_key("ADDRESS.ADDRESS_ID")
                    .with_mapping(DatabaseMapping::direct("id", "ADDRESS.ADDRESS_ID"))
                    .with_mapping(DatabaseMapping::direct("city", "ADDRESS.CITY")),
            )
            .build(&ClassRegistry::with_defaults())
            .unwrap()
    }

    fn plan(platform: &DatabasePlatform, query: &UpdateAllQuery) -> Result<StatementPlan> {
        let project = project();
        ExpressionQueryMechanism::new(&project, platform, "Employee")?.prepare_update_all(query)
    }

    /// Raise salaries and rename, restricted on both tables.
    fn crossed_query() -> UpdateAllQuery {
        let emp = Expr::base("Employee");
        UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.clone().get("name").eq("Bob").and(emp.clone().get("salary").gt(5)))
            .set("name", "Robert")
            .set("salary", 10)
    }

    #[test]
    fn single_table_update_is_inline() {
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.clone().get("name").eq("Bob"))
            .set("name", "Robert");
        let plan = plan(&platform, &query).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::Simple);
        assert_eq!(
            plan.sql_strings(&platform),
            vec!["UPDATE EMPLOYEE SET NAME = ?, VERSION = VERSION + ? WHERE NAME = ?"]
        );
    }

    #[test]
    fn null_one_to_one_clears_foreign_key() {
        let platform = DatabasePlatform::postgres();
        let query = UpdateAllQuery::new("Employee").set("address", Expr::null());
        let plan = plan(&platform, &query).unwrap();
        assert_eq!(
            plan.sql_strings(&platform),
            vec!["UPDATE EMPLOYEE SET ADDR_ID = NULL, VERSION = VERSION + ?"]
        );
    }

    #[test]
    fn value_from_joined_object_is_correlated() {
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .set("name", emp.clone().get("address").get("city"));
        let plan = plan(&platform, &query).unwrap();
        assert_eq!(
            plan.sql_strings(&platform),
            vec![
                "UPDATE EMPLOYEE SET NAME = (SELECT t1.CITY FROM EMPLOYEE t0, ADDRESS t1 \
                 WHERE t0.ADDR_ID = t1.ADDRESS_ID AND t0.EMP_ID = EMPLOYEE.EMP_ID), VERSION = VERSION + ?"
            ]
        );
    }

    #[test]
    fn reader_of_assigned_column_runs_first() {
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.clone().get("name").eq("Bob"))
            .set("name", "Robert")
            .set("salary", 10);
        let plan = plan(&platform, &query).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::MultiTable);
        assert_eq!(
            plan.sql_strings(&platform),
            vec![
                "UPDATE SALARY SET AMOUNT = ? WHERE EXISTS (SELECT t0.EMP_ID FROM EMPLOYEE t0 \
                 WHERE t0.NAME = ? AND t0.EMP_ID = SALARY.EMP_ID)",
                "UPDATE EMPLOYEE SET NAME = ?, VERSION = VERSION + ? WHERE NAME = ?",
            ]
        );
    }

    #[test]
    fn independent_tables_keep_encounter_order() {
        let f = |name: &str| DatabaseField::new(name);
        let left = vec![vec![f("EMPLOYEE.NAME")], vec![f("SALARY.AMOUNT")]];
        let right = vec![vec![f("EMPLOYEE.EMP_ID")], vec![f("EMPLOYEE.EMP_ID")]];
        assert_eq!(update_order(&left, &right), Some(vec![0, 1]));

        let swapped = vec![left[1].clone(), left[0].clone()];
        assert_eq!(update_order(&swapped, &right), Some(vec![0, 1]));

        // SALARY reads NAME, so it goes before EMPLOYEE writes it
        let right = vec![vec![], vec![f("EMPLOYEE.NAME")]];
        assert_eq!(update_order(&left, &right), Some(vec![1, 0]));

        let crossed = vec![vec![f("SALARY.AMOUNT")], vec![f("EMPLOYEE.NAME")]];
        assert_eq!(update_order(&left, &crossed), None);
    }

    #[test]
    fn mutual_dependency_stages_through_temp_tables() {
        let platform = DatabasePlatform::postgres();
        let plan = plan(&platform, &crossed_query()).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::TempTable);
        assert_eq!(
            plan.phases(),
            vec![
                PlanPhase::Create,
                PlanPhase::Create,
                PlanPhase::Populate,
                PlanPhase::Populate,
                PlanPhase::Action,
                PlanPhase::Action,
                PlanPhase::Cleanup,
                PlanPhase::Cleanup,
            ]
        );
        let sql = plan.sql_strings(&platform);
        assert_eq!(
            sql[0],
            "CREATE TEMPORARY TABLE TL_EMPLOYEE AS SELECT EMP_ID, NAME, VERSION FROM EMPLOYEE WHERE 1 = 0"
        );
        assert_eq!(
            sql[3],
            "INSERT INTO TL_SALARY (EMP_ID, AMOUNT) SELECT t0.EMP_ID, ? FROM EMPLOYEE t0, SALARY t1 \
             WHERE t0.NAME = ? AND t1.AMOUNT > ? AND t1.EMP_ID = t0.EMP_ID"
        );
        assert_eq!(
            sql[5],
            "UPDATE SALARY SET AMOUNT = (SELECT TL_SALARY.AMOUNT FROM TL_SALARY WHERE TL_SALARY.EMP_ID = SALARY.EMP_ID) \
             WHERE EXISTS (SELECT TL_SALARY.EMP_ID FROM TL_SALARY WHERE TL_SALARY.EMP_ID = SALARY.EMP_ID)"
        );
        assert_eq!(sql[7], "DROP TABLE TL_SALARY");
    }

    #[test]
    fn rotation_through_three_tables_has_no_order() {
        let f = |name: &str| vec![DatabaseField::new(name)];
        let left = vec![f("EMPLOYEE.NAME"), f("SALARY.AMOUNT"), f("BONUS.AMOUNT")];
        // each table reads what the next one writes
        let right = vec![f("BONUS.AMOUNT"), f("EMPLOYEE.NAME"), f("SALARY.AMOUNT")];
        assert_eq!(update_order(&left, &right), None);
    }

    fn staged_phases(tables: usize) -> Vec<PlanPhase> {
        [PlanPhase::Create, PlanPhase::Populate, PlanPhase::Action, PlanPhase::Cleanup]
            .into_iter()
            .flat_map(|phase| std::iter::repeat_n(phase, tables))
            .collect()
    }

    #[test]
    fn swapped_columns_stage_through_temp_tables() {
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .set("name", emp.clone().get("salary"))
            .set("salary", emp.clone().get("name"));
        let plan = plan(&platform, &query).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::TempTable);
        assert_eq!(plan.phases(), staged_phases(2));
        let sql = plan.sql_strings(&platform);
        assert!(sql[2].starts_with("INSERT INTO TL_EMPLOYEE (EMP_ID, NAME, VERSION) SELECT t0.EMP_ID, t1.AMOUNT"));
        assert!(sql[3].starts_with("INSERT INTO TL_SALARY (EMP_ID, AMOUNT) SELECT t0.EMP_ID, t0.NAME"));
    }

    #[test]
    fn three_table_rotation_stages_every_table() {
        let project = ProjectBuilder::new()
            .descriptor(
                ClassDescriptor::new("Employee")
                    .table("EMPLOYEE")
                    .table("SALARY")
                    .table("BONUS")
                    .primary_key("EMPLOYEE.EMP_ID")
                    .with_mapping(DatabaseMapping::direct("id", "EMPLOYEE.EMP_ID"))
                    .with_mapping(DatabaseMapping::direct("name", "EMPLOYEE.NAME"))
                    .with_mapping(DatabaseMapping::direct("salary", "SALARY.AMOUNT"))
                    .with_mapping(DatabaseMapping::direct("bonus", "BONUS.AMOUNT")),
            )
            .build(&ClassRegistry::with_defaults())
            .unwrap();
        let platform = DatabasePlatform::postgres();
        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .set("name", emp.clone().get("bonus"))
            .set("salary", emp.clone().get("name"))
            .set("bonus", emp.clone().get("salary"));
        let plan = ExpressionQueryMechanism::new(&project, &platform, "Employee")
            .unwrap()
            .prepare_update_all(&query)
            .unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::TempTable);
        assert_eq!(plan.phases(), staged_phases(3));
        let sql = plan.sql_strings(&platform);
        let created: Vec<&str> = sql[..3].iter().map(String::as_str).collect();
        assert_eq!(
            created,
            vec![
                "CREATE TEMPORARY TABLE TL_EMPLOYEE AS SELECT EMP_ID, NAME FROM EMPLOYEE WHERE 1 = 0",
                "CREATE TEMPORARY TABLE TL_SALARY AS SELECT EMP_ID, AMOUNT FROM SALARY WHERE 1 = 0",
                "CREATE TEMPORARY TABLE TL_BONUS AS SELECT EMP_ID, AMOUNT FROM BONUS WHERE 1 = 0",
            ]
        );
    }

    #[test]
    fn null_is_staged_only_where_the_platform_selects_it() {
        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .set("name", emp.clone().get("salary"))
            .set("salary", emp.clone().get("name"))
            .set("address", Expr::null());

        let platform = DatabasePlatform::postgres();
        let sql = plan(&platform, &query).unwrap().sql_strings(&platform);
        assert_eq!(
            sql[0],
            "CREATE TEMPORARY TABLE TL_EMPLOYEE AS SELECT EMP_ID, NAME, ADDR_ID, VERSION FROM EMPLOYEE WHERE 1 = 0"
        );
        assert!(sql[2].contains("t1.AMOUNT, NULL, "), "{}", sql[2]);

        let platform = DatabasePlatform::new(PlatformConfig {
            is_null_allowed_in_select_clause: false,
            ..DatabasePlatform::postgres().config().clone()
        });
        let sql = plan(&platform, &query).unwrap().sql_strings(&platform);
        assert_eq!(
            sql[0],
            "CREATE TEMPORARY TABLE TL_EMPLOYEE AS SELECT EMP_ID, NAME, VERSION FROM EMPLOYEE WHERE 1 = 0"
        );
        assert!(!sql[2].contains("NULL"), "{}", sql[2]);
        assert!(sql[4].contains(", ADDR_ID = NULL, "), "{}", sql[4]);
    }

    #[test]
    fn unbound_temp_statements_inline_literals() {
        let platform = DatabasePlatform::new(PlatformConfig {
            dont_bind_update_all_query_using_temp_tables: true,
            ..DatabasePlatform::postgres().config().clone()
        });
        let plan = plan(&platform, &crossed_query()).unwrap();
        assert!(plan.statements().iter().all(|s| s.bind == Some(false)));
        assert!(plan.sql_strings(&platform)[2].contains("'Robert'"));
    }

    #[test]
    fn missing_temp_tables_is_an_error() {
        let platform = DatabasePlatform::generic();
        let err = plan(&platform, &crossed_query()).unwrap_err();
        assert!(err.is_temp_tables_not_supported());
    }

    #[test]
    fn oracle_stages_in_an_anonymous_block() {
        let platform = DatabasePlatform::oracle();
        let plan = plan(&platform, &crossed_query()).unwrap();
        assert_eq!(plan.strategy(), PlanStrategy::AnonymousBlock);
        assert_eq!(plan.len(), 1);
        let sql = &plan.sql_strings(&platform)[0];
        assert!(sql.starts_with("DECLARE TYPE PK1_T IS TABLE OF EMPLOYEE.EMP_ID%TYPE; PK1_V PK1_T; "));
        assert!(sql.contains("BULK COLLECT INTO PK1_V, V1_V, V2_V, V3_V FROM EMPLOYEE t0, SALARY t1"));
        assert!(sql.contains(
            "FORALL i IN 1..PK1_V.COUNT UPDATE EMPLOYEE SET NAME = V1_V(i), VERSION = V2_V(i) WHERE EMP_ID = PK1_V(i); "
        ));
        assert!(sql.ends_with("UPDATE SALARY SET AMOUNT = V3_V(i) WHERE EMP_ID = PK1_V(i); END;"));
    }

    #[test]
    fn unknown_attribute_is_reported() {
        let platform = DatabasePlatform::postgres();
        let query = UpdateAllQuery::new("Employee").set("bonus", 1);
        let err = plan(&platform, &query).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::UpdateAllFieldNotFound));

        let query = UpdateAllQuery::new("Employee").set_field("BONUS.AMOUNT", 1);
        let err = plan(&platform, &query).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::UpdateAllFieldNotFound));
        assert!(err.to_string().contains("BONUS.AMOUNT"));
    }
}
