//! SQL statements and their printer.
//!
//! Statements are kept unprinted until a plan is rendered against a
//! platform. The printer assigns table aliases `t0, t1, …` in FROM order,
//! continuing the numbering into nested selects so an inner scope never
//! shadows an outer alias. Columns of the target table of a direct
//! statement (UPDATE/DELETE/INSERT) print unqualified; columns that belong
//! to no alias in scope print as `TABLE.COLUMN`.

use crate::expr::{BinaryOp, Expr, ExprId, UnaryOp};
use relmap_core::{DatabaseField, DatabasePlatform, DatabaseTable, SqlCall, Value};
use std::collections::HashMap;

/// A table as used by one node of a statement. `node == None` prints
/// without an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub node: Option<ExprId>,
    pub table: DatabaseTable,
}

impl TableRef {
    pub fn new(node: ExprId, table: DatabaseTable) -> Self {
        Self {
            node: Some(node),
            table,
        }
    }

    pub fn unaliased(table: DatabaseTable) -> Self {
        Self { node: None, table }
    }
}

/// `LEFT OUTER JOIN target ON (on)`, printed right after `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct OuterJoin {
    pub source: TableRef,
    pub target: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FromClause {
    /// Every table of the statement in alias order, outer-join targets
    /// included.
    pub tables: Vec<TableRef>,
    pub outer_joins: Vec<OuterJoin>,
}

impl FromClause {
    pub fn single(table: TableRef) -> Self {
        Self {
            tables: vec![table],
            outer_joins: Vec::new(),
        }
    }

    fn is_outer_target(&self, table: &TableRef) -> bool {
        self.outer_joins.iter().any(|j| &j.target == table)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

impl OrderItem {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }
}

/// FOR UPDATE, optionally restricted to the tables of some nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockingClause {
    nodes: Vec<ExprId>,
}

impl LockingClause {
    /// Lock every table of the statement.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ExprId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    pub fn nodes(&self) -> &[ExprId] {
        &self.nodes
    }

    pub fn locks_all(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectStatement {
    pub items: Vec<SelectItem>,
    pub from: FromClause,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub distinct: bool,
    pub max_rows: Option<u64>,
    pub lock: Option<LockingClause>,
    /// PL/SQL collections the select list is bulk-collected into.
    pub bulk_collect_into: Vec<String>,
}

impl SelectStatement {
    pub fn new(items: Vec<SelectItem>, from: FromClause) -> Self {
        Self {
            items,
            from,
            ..Self::default()
        }
    }

    /// AND `condition` onto the WHERE clause.
    pub fn and_where(&mut self, condition: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
    }

    /// Copy with an extra WHERE condition.
    pub fn with_condition(&self, condition: Expr) -> Self {
        let mut copy = self.clone();
        copy.and_where(condition);
        copy
    }

    pub fn to_call(&self, platform: &DatabasePlatform) -> SqlCall {
        let mut printer = Printer::new(platform);
        printer.select(self);
        printer.call
    }
}

/// Value assigned by a FORALL update of an anonymous block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValue {
    /// Index into the staged value collections.
    Staged(usize),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockUpdate {
    pub table: DatabaseTable,
    /// Primary key columns of `table`, matched positionally against the
    /// staged primary keys.
    pub pk_fields: Vec<DatabaseField>,
    pub assignments: Vec<(DatabaseField, BlockValue)>,
}

/// `DECLARE … BEGIN SELECT … BULK COLLECT INTO …; FORALL … UPDATE …; END;`
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymousBlock {
    /// Primary key columns, staged into `PK1_V, PK2_V, …`.
    pub pk_fields: Vec<DatabaseField>,
    /// Target columns of the staged values, staged into `V1_V, V2_V, …`.
    pub value_fields: Vec<DatabaseField>,
    /// Selects the primary keys, then the values.
    pub select: SelectStatement,
    pub updates: Vec<BlockUpdate>,
}

impl AnonymousBlock {
    pub fn pk_collection(index: usize) -> String {
        format!("PK{}_V", index + 1)
    }

    pub fn value_collection(index: usize) -> String {
        format!("V{}_V", index + 1)
    }
}

/// One SQL statement of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    Select(SelectStatement),
    Insert {
        table: DatabaseTable,
        values: Vec<(DatabaseField, Expr)>,
    },
    InsertSelect {
        table: DatabaseTable,
        columns: Vec<DatabaseField>,
        select: SelectStatement,
    },
    Update {
        table: DatabaseTable,
        assignments: Vec<(DatabaseField, Expr)>,
        where_clause: Option<Expr>,
    },
    Delete {
        table: DatabaseTable,
        where_clause: Option<Expr>,
    },
    /// Temp table shaped like `columns` of `source`.
    CreateTempTable {
        name: DatabaseTable,
        source: DatabaseTable,
        columns: Vec<DatabaseField>,
    },
    DropTempTable {
        name: DatabaseTable,
    },
    ClearTempTable {
        name: DatabaseTable,
    },
    AnonymousBlock(AnonymousBlock),
}

impl SqlStatement {
    /// Table the statement writes, if any.
    pub fn target_table(&self) -> Option<&DatabaseTable> {
        match self {
            SqlStatement::Select(_) | SqlStatement::AnonymousBlock(_) => None,
            SqlStatement::Insert { table, .. }
            | SqlStatement::InsertSelect { table, .. }
            | SqlStatement::Update { table, .. }
            | SqlStatement::Delete { table, .. } => Some(table),
            SqlStatement::CreateTempTable { name, .. }
            | SqlStatement::DropTempTable { name }
            | SqlStatement::ClearTempTable { name } => Some(name),
        }
    }

    pub fn to_call(&self, platform: &DatabasePlatform) -> SqlCall {
        let mut printer = Printer::new(platform);
        printer.statement(self);
        printer.call
    }
}

enum Scope {
    Direct(DatabaseTable),
    Select(HashMap<TableRef, String>),
}

struct Printer<'a> {
    platform: &'a DatabasePlatform,
    call: SqlCall,
    scopes: Vec<Scope>,
    next_alias: usize,
}

impl<'a> Printer<'a> {
    fn new(platform: &'a DatabasePlatform) -> Self {
        Self {
            platform,
            call: SqlCall::new().with_bind_parameters(platform.should_bind_all_parameters()),
            scopes: Vec::new(),
            next_alias: 0,
        }
    }

    fn text(&mut self, sql: &str) {
        self.call.push_text(sql);
    }

    fn statement(&mut self, statement: &SqlStatement) {
        match statement {
            SqlStatement::Select(select) => self.select(select),
            SqlStatement::Insert { table, values } => {
                self.scopes.push(Scope::Direct(table.clone()));
                self.text(&format!("INSERT INTO {} (", table.name()));
                self.text(&column_list(values.iter().map(|(f, _)| f)));
                self.text(") VALUES (");
                for (i, (_, value)) in values.iter().enumerate() {
                    if i > 0 {
                        self.text(", ");
                    }
                    self.expr(value, 0);
                }
                self.text(")");
                self.scopes.pop();
            }
            SqlStatement::InsertSelect {
                table,
                columns,
                select,
            } => {
                self.text(&format!(
                    "INSERT INTO {} ({}) ",
                    table.name(),
                    column_list(columns.iter())
                ));
                self.select(select);
            }
            SqlStatement::Update {
                table,
                assignments,
                where_clause,
            } => {
                self.scopes.push(Scope::Direct(table.clone()));
                self.text(&format!("UPDATE {} SET ", table.name()));
                for (i, (field, value)) in assignments.iter().enumerate() {
                    if i > 0 {
                        self.text(", ");
                    }
                    self.text(&format!("{} = ", field.name()));
                    self.expr(value, 0);
                }
                self.where_clause(where_clause.as_ref());
                self.scopes.pop();
            }
            SqlStatement::Delete {
                table,
                where_clause,
            } => {
                self.scopes.push(Scope::Direct(table.clone()));
                self.text(&format!("DELETE FROM {}", table.name()));
                self.where_clause(where_clause.as_ref());
                self.scopes.pop();
            }
            SqlStatement::CreateTempTable {
                name,
                source,
                columns,
            } => {
                self.text(&format!(
                    "CREATE TEMPORARY TABLE {} AS SELECT {} FROM {} WHERE 1 = 0",
                    name.name(),
                    column_list(columns.iter()),
                    source.name()
                ));
            }
            SqlStatement::DropTempTable { name } => {
                self.text(&format!("DROP TABLE {}", name.name()));
            }
            SqlStatement::ClearTempTable { name } => {
                self.text(&format!("DELETE FROM {}", name.name()));
            }
            SqlStatement::AnonymousBlock(block) => self.anonymous_block(block),
        }
    }

    fn where_clause(&mut self, where_clause: Option<&Expr>) {
        if let Some(condition) = where_clause {
            self.text(" WHERE ");
            self.expr(condition, 0);
        }
    }

    fn select(&mut self, select: &SelectStatement) {
        let mut aliases = HashMap::new();
        for table in &select.from.tables {
            if table.node.is_some() && !aliases.contains_key(table) {
                aliases.insert(table.clone(), format!("t{}", self.next_alias));
                self.next_alias += 1;
            }
        }
        self.scopes.push(Scope::Select(aliases));

        self.text("SELECT ");
        if select.distinct {
            self.text("DISTINCT ");
        }
        for (i, item) in select.items.iter().enumerate() {
            if i > 0 {
                self.text(", ");
            }
            self.expr(&item.expr, 0);
            if let Some(alias) = &item.alias {
                self.text(&format!(" AS {alias}"));
            }
        }
        if !select.bulk_collect_into.is_empty() {
            self.text(&format!(
                " BULK COLLECT INTO {}",
                select.bulk_collect_into.join(", ")
            ));
        }

        self.text(" FROM ");
        let mut first = true;
        for table in &select.from.tables {
            if select.from.is_outer_target(table) {
                continue;
            }
            if !first {
                self.text(", ");
            }
            first = false;
            self.table_ref(table);
            self.outer_joins_from(&select.from, table);
        }

        self.where_clause(select.where_clause.as_ref());
        if !select.group_by.is_empty() {
            self.text(" GROUP BY ");
            for (i, expr) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.text(", ");
                }
                self.expr(expr, 0);
            }
        }
        if let Some(having) = &select.having {
            self.text(" HAVING ");
            self.expr(having, 0);
        }
        if !select.order_by.is_empty() {
            self.text(" ORDER BY ");
            for (i, item) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.text(", ");
                }
                self.expr(&item.expr, 0);
                if item.descending {
                    self.text(" DESC");
                }
            }
        }
        if let Some(max_rows) = select.max_rows {
            let limit = self.platform.dialect().row_limit(max_rows);
            self.text(&format!(" {limit}"));
        }
        if let Some(lock) = &select.lock {
            if self.platform.supports_for_update() {
                self.text(" FOR UPDATE");
                let locked: Vec<String> = select
                    .from
                    .tables
                    .iter()
                    .filter(|t| t.node.is_some_and(|n| lock.nodes().contains(&n)))
                    .filter_map(|t| self.alias_of(t))
                    .collect();
                if !lock.locks_all() && !locked.is_empty() {
                    self.text(&format!(" OF {}", locked.join(", ")));
                }
            }
        }

        self.scopes.pop();
    }

    fn outer_joins_from(&mut self, from: &FromClause, source: &TableRef) {
        for join in from.outer_joins.iter().filter(|j| &j.source == source) {
            self.text(" LEFT OUTER JOIN ");
            self.table_ref(&join.target);
            self.text(" ON (");
            self.expr(&join.on, 0);
            self.text(")");
            self.outer_joins_from(from, &join.target);
        }
    }

    fn alias_of(&self, table: &TableRef) -> Option<String> {
        match self.scopes.last() {
            Some(Scope::Select(aliases)) => aliases.get(table).cloned(),
            _ => None,
        }
    }

    fn table_ref(&mut self, table: &TableRef) {
        match self.alias_of(table) {
            Some(alias) => self.text(&format!("{} {}", table.table.name(), alias)),
            None => self.text(table.table.name()),
        }
    }

    fn column(&mut self, node: Option<ExprId>, field: &DatabaseField) {
        let table = field.table();
        let innermost = self.scopes.len().saturating_sub(1);
        let mut rendered = None;
        for (depth, scope) in self.scopes.iter().enumerate().rev() {
            match scope {
                Scope::Select(aliases) => {
                    if let (Some(node), Some(table)) = (node, table.as_ref()) {
                        let key = TableRef::new(node, table.clone());
                        if let Some(alias) = aliases.get(&key) {
                            rendered = Some(format!("{alias}.{}", field.name()));
                            break;
                        }
                    }
                }
                Scope::Direct(target) => {
                    if table.as_ref().is_none_or(|t| t == target) {
                        rendered = Some(if depth == innermost {
                            field.name().to_string()
                        } else {
                            field.qualified_name()
                        });
                        break;
                    }
                }
            }
        }
        let sql = rendered.unwrap_or_else(|| field.qualified_name());
        self.text(&sql);
    }

    fn expr(&mut self, expr: &Expr, parent_precedence: u8) {
        match expr {
            Expr::Column { node, field } => self.column(*node, field),
            Expr::Field { field, .. } => self.column(None, field),
            Expr::Base { entity, .. } => self.text(entity),
            Expr::QueryKey { .. } => {
                let path = expr.attribute_path().unwrap_or_default().join(".");
                self.text(&path);
            }
            Expr::Literal(Value::Null) => self.text("NULL"),
            Expr::Literal(value) => self.call.push_literal(value.clone()),
            Expr::Parameter(field) => self.call.push_translation(field.clone()),
            Expr::Modify(field) => self.call.push_modify(field.clone()),
            Expr::Raw(sql) => self.text(sql),
            Expr::Binary { left, op, right } => {
                let precedence = op.precedence();
                let paren = precedence < parent_precedence;
                if paren {
                    self.text("(");
                }
                self.expr(left, precedence);
                self.text(&format!(" {} ", op.as_str()));
                let right_precedence = match op {
                    BinaryOp::And | BinaryOp::Or | BinaryOp::Add | BinaryOp::Mul | BinaryOp::Concat => {
                        precedence
                    }
                    _ => precedence + 1,
                };
                self.expr(right, right_precedence);
                if paren {
                    self.text(")");
                }
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => {
                    self.text("NOT (");
                    self.expr(expr, 0);
                    self.text(")");
                }
                UnaryOp::Neg => {
                    self.text("-");
                    self.expr(expr, 9);
                }
            },
            Expr::IsNull { expr, negated } => {
                self.predicate(parent_precedence, |p| {
                    p.expr(expr, 4);
                    p.text(if *negated { " IS NOT NULL" } else { " IS NULL" });
                });
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    self.text(if *negated { "1 = 1" } else { "1 = 0" });
                    return;
                }
                self.predicate(parent_precedence, |p| {
                    p.expr(expr, 4);
                    p.text(if *negated { " NOT IN (" } else { " IN (" });
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            p.text(", ");
                        }
                        p.expr(value, 0);
                    }
                    p.text(")");
                });
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.predicate(parent_precedence, |p| {
                    p.expr(expr, 4);
                    p.text(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                    p.expr(low, 4);
                    p.text(" AND ");
                    p.expr(high, 4);
                });
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                self.predicate(parent_precedence, |p| {
                    p.expr(expr, 4);
                    p.text(if *negated { " NOT LIKE " } else { " LIKE " });
                    p.expr(pattern, 4);
                });
            }
            Expr::Function { name, args } => {
                self.text(&format!("{name}("));
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.text(", ");
                    }
                    self.expr(arg, 0);
                }
                self.text(")");
            }
            Expr::Exists { select, negated } => {
                self.text(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.select(select);
                self.text(")");
            }
            Expr::Subselect(select) => {
                self.text("(");
                self.select(select);
                self.text(")");
            }
        }
    }

    /// Comparison-level predicate, parenthesized under tighter operators.
    fn predicate(&mut self, parent_precedence: u8, body: impl FnOnce(&mut Self)) {
        let paren = parent_precedence > 3;
        if paren {
            self.text("(");
        }
        body(self);
        if paren {
            self.text(")");
        }
    }

    fn anonymous_block(&mut self, block: &AnonymousBlock) {
        self.text("DECLARE ");
        for (i, field) in block.pk_fields.iter().enumerate() {
            self.text(&format!(
                "TYPE PK{n}_T IS TABLE OF {}%TYPE; PK{n}_V PK{n}_T; ",
                field.qualified_name(),
                n = i + 1
            ));
        }
        for (i, field) in block.value_fields.iter().enumerate() {
            self.text(&format!(
                "TYPE V{n}_T IS TABLE OF {}%TYPE; V{n}_V V{n}_T; ",
                field.qualified_name(),
                n = i + 1
            ));
        }
        self.text("BEGIN ");
        self.select(&block.select);
        self.text("; ");
        for update in &block.updates {
            self.text(&format!(
                "FORALL i IN 1..{}.COUNT UPDATE {} SET ",
                AnonymousBlock::pk_collection(0),
                update.table.name()
            ));
            let sets: Vec<String> = update
                .assignments
                .iter()
                .map(|(field, value)| match value {
                    BlockValue::Staged(index) => {
                        format!("{} = {}(i)", field.name(), AnonymousBlock::value_collection(*index))
                    }
                    BlockValue::Null => format!("{} = NULL", field.name()),
                })
                .collect();
            self.text(&sets.join(", "));
            let conditions: Vec<String> = update
                .pk_fields
                .iter()
                .enumerate()
                .map(|(i, field)| format!("{} = {}(i)", field.name(), AnonymousBlock::pk_collection(i)))
                .collect();
            self.text(&format!(" WHERE {}; ", conditions.join(" AND ")));
        }
        self.text("END;");
    }
}

fn column_list<'f>(fields: impl Iterator<Item = &'f DatabaseField>) -> String {
    fields.map(DatabaseField::name).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> DatabasePlatform {
        DatabasePlatform::postgres()
    }

    #[test]
    fn select_aliases_follow_from_order() {
        let base = ExprId::next();
        let address = ExprId::next();
        let emp = TableRef::new(base, DatabaseTable::new("EMPLOYEE"));
        let addr = TableRef::new(address, DatabaseTable::new("ADDRESS"));
        let mut select = SelectStatement::new(
            vec![
                SelectItem::new(Expr::node_column(base, "EMPLOYEE.EMP_ID")),
                SelectItem::new(Expr::node_column(address, "ADDRESS.CITY")),
            ],
            FromClause {
                tables: vec![emp, addr],
                outer_joins: Vec::new(),
            },
        );
        select.and_where(Expr::node_column(address, "ADDRESS.CITY").eq("Ottawa"));
        select.and_where(
            Expr::node_column(address, "ADDRESS.ADDRESS_ID")
                .eq(Expr::node_column(base, "EMPLOYEE.ADDR_ID")),
        );
        let call = select.to_call(&platform());
        assert_eq!(
            call.sql_string(),
            "SELECT t0.EMP_ID, t1.CITY FROM EMPLOYEE t0, ADDRESS t1 WHERE t1.CITY = ? AND t1.ADDRESS_ID = t0.ADDR_ID"
        );
    }

    #[test]
    fn outer_join_is_anchored_on_its_source() {
        let base = ExprId::next();
        let manager = ExprId::next();
        let emp = TableRef::new(base, DatabaseTable::new("EMPLOYEE"));
        let mgr = TableRef::new(manager, DatabaseTable::new("EMPLOYEE"));
        let select = SelectStatement::new(
            vec![SelectItem::new(Expr::node_column(manager, "EMPLOYEE.NAME"))],
            FromClause {
                tables: vec![emp.clone(), mgr.clone()],
                outer_joins: vec![OuterJoin {
                    source: emp,
                    target: mgr,
                    on: Expr::node_column(manager, "EMPLOYEE.EMP_ID")
                        .eq(Expr::node_column(base, "EMPLOYEE.MANAGER_ID")),
                }],
            },
        );
        assert_eq!(
            select.to_call(&platform()).sql_string(),
            "SELECT t1.NAME FROM EMPLOYEE t0 LEFT OUTER JOIN EMPLOYEE t1 ON (t1.EMP_ID = t0.MANAGER_ID)"
        );
    }

    #[test]
    fn direct_statement_columns_are_unqualified_and_correlations_qualified() {
        let base = ExprId::next();
        let exists = SelectStatement::new(
            vec![SelectItem::new(Expr::node_column(base, "EMPLOYEE.EMP_ID"))],
            FromClause::single(TableRef::new(base, DatabaseTable::new("EMPLOYEE"))),
        )
        .with_condition(Expr::node_column(base, "EMPLOYEE.NAME").eq(Expr::param("EMPLOYEE.NAME")))
        .with_condition(Expr::node_column(base, "EMPLOYEE.EMP_ID").eq(Expr::col("SALARY.EMP_ID")));
        let delete = SqlStatement::Delete {
            table: DatabaseTable::new("SALARY"),
            where_clause: Some(Expr::exists(exists)),
        };
        assert_eq!(
            delete.to_call(&platform()).sql_string(),
            "DELETE FROM SALARY WHERE EXISTS (SELECT t0.EMP_ID FROM EMPLOYEE t0 WHERE t0.NAME = ? AND t0.EMP_ID = SALARY.EMP_ID)"
        );

        let update = SqlStatement::Update {
            table: DatabaseTable::new("EMPLOYEE"),
            assignments: vec![
                (
                    DatabaseField::new("EMPLOYEE.SALARY"),
                    Expr::node_column(base, "EMPLOYEE.SALARY").mul(2),
                ),
                (DatabaseField::new("EMPLOYEE.MANAGER_ID"), Expr::null()),
            ],
            where_clause: Some(Expr::node_column(base, "EMPLOYEE.NAME").like("A%")),
        };
        assert_eq!(
            update.to_call(&platform()).sql_string(),
            "UPDATE EMPLOYEE SET SALARY = SALARY * ?, MANAGER_ID = NULL WHERE NAME LIKE ?"
        );
    }

    #[test]
    fn precedence_parenthesizes_or_under_and() {
        let base = ExprId::next();
        let delete = SqlStatement::Delete {
            table: DatabaseTable::new("EMPLOYEE"),
            where_clause: Some(
                Expr::node_column(base, "EMPLOYEE.A")
                    .eq(1)
                    .and(Expr::node_column(base, "EMPLOYEE.B").eq(2).or(Expr::node_column(base, "EMPLOYEE.C").is_null())),
            ),
        };
        assert_eq!(
            delete.to_call(&platform()).sql_string(),
            "DELETE FROM EMPLOYEE WHERE A = ? AND (B = ? OR C IS NULL)"
        );
    }

    #[test]
    fn nested_selects_continue_alias_numbering() {
        let outer = ExprId::next();
        let inner = ExprId::next();
        let sub = SelectStatement::new(
            vec![SelectItem::new(Expr::node_column(inner, "PHONE.EMP_ID"))],
            FromClause::single(TableRef::new(inner, DatabaseTable::new("PHONE"))),
        )
        .with_condition(
            Expr::node_column(inner, "PHONE.EMP_ID").eq(Expr::node_column(outer, "EMPLOYEE.EMP_ID")),
        );
        let mut select = SelectStatement::new(
            vec![SelectItem::new(Expr::node_column(outer, "EMPLOYEE.EMP_ID"))],
            FromClause::single(TableRef::new(outer, DatabaseTable::new("EMPLOYEE"))),
        );
        select.and_where(Expr::exists(sub));
        select.max_rows = Some(5);
        assert_eq!(
            select.to_call(&platform()).sql_string(),
            "SELECT t0.EMP_ID FROM EMPLOYEE t0 WHERE EXISTS (SELECT t1.EMP_ID FROM PHONE t1 WHERE t1.EMP_ID = t0.EMP_ID) LIMIT 5"
        );
    }

    #[test]
    fn temp_table_statements() {
        let create = SqlStatement::CreateTempTable {
            name: DatabaseTable::new("TL_EMPLOYEE"),
            source: DatabaseTable::new("EMPLOYEE"),
            columns: vec![
                DatabaseField::new("EMPLOYEE.EMP_ID"),
                DatabaseField::new("EMPLOYEE.SALARY"),
            ],
        };
        assert_eq!(
            create.to_call(&platform()).sql_string(),
            "CREATE TEMPORARY TABLE TL_EMPLOYEE AS SELECT EMP_ID, SALARY FROM EMPLOYEE WHERE 1 = 0"
        );
        let drop = SqlStatement::DropTempTable {
            name: DatabaseTable::new("TL_EMPLOYEE"),
        };
        assert_eq!(drop.to_call(&platform()).sql_string(), "DROP TABLE TL_EMPLOYEE");
    }

    #[test]
    fn empty_in_list_prints_constant_predicate() {
        let base = ExprId::next();
        let delete = SqlStatement::Delete {
            table: DatabaseTable::new("EMPLOYEE"),
            where_clause: Some(Expr::node_column(base, "EMPLOYEE.EMP_ID").in_list(Vec::<Expr>::new())),
        };
        assert_eq!(
            delete.to_call(&platform()).sql_string(),
            "DELETE FROM EMPLOYEE WHERE 1 = 0"
        );
    }
}
