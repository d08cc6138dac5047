//! Lowering of object-level expressions to table columns.
//!
//! A [`Normalizer`] owns the node registry of one statement scope: the base
//! node, every relationship node reached through query keys, and the tables
//! each node uses. Resolving a relationship key registers its join: inner
//! joins become WHERE criteria, outer joins become `LEFT OUTER JOIN` steps
//! anchored on the source table. Secondary tables of a node are joined to its
//! primary table by primary key when first used.

use crate::expr::{Expr, ExprId};
use crate::statement::{FromClause, OuterJoin, SelectItem, SelectStatement, TableRef};
use indexmap::IndexMap;
use relmap_core::{
    ClassDescriptor, Converter, DatabaseField, DatabaseMapping, DatabaseTable, MappingKind,
    Project, QueryError, QueryErrorKind, Result, Value,
};
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum NodeKind<'a> {
    Entity(&'a ClassDescriptor),
    /// Reference table of a direct collection or direct map; `fields` are
    /// the selected columns, value last.
    Direct {
        table: DatabaseTable,
        fields: Vec<DatabaseField>,
    },
    /// Embedded object stored in its owner's columns.
    Aggregate {
        owner: ExprId,
        fields: &'a [(String, DatabaseField)],
    },
}

#[derive(Debug, Clone)]
struct Node<'a> {
    kind: NodeKind<'a>,
    outer: bool,
    parent: Option<ExprId>,
    mapping: Option<&'a DatabaseMapping>,
}

enum Resolved<'a> {
    Node(ExprId),
    Value(Expr, Option<&'a Converter>),
}

struct JoinStep {
    source: TableRef,
    target: TableRef,
    on: Expr,
}

/// Node registry and table bookkeeping for one statement scope.
pub struct Normalizer<'a> {
    project: &'a Project,
    base_id: ExprId,
    nodes: IndexMap<ExprId, Node<'a>>,
    paths: HashMap<(ExprId, String), ExprId>,
    aliases: HashMap<ExprId, ExprId>,
    tables: Vec<TableRef>,
    join_criteria: Vec<Expr>,
    outer_joins: Vec<OuterJoin>,
    /// Owner-side columns read by relationship joins.
    relationship_columns: Vec<(ExprId, DatabaseField)>,
}

fn invalid(message: impl Into<String>) -> relmap_core::Error {
    QueryError::new(QueryErrorKind::InvalidExpression, message).into()
}

fn table_of(field: &DatabaseField, default: Option<&DatabaseTable>) -> Option<DatabaseTable> {
    field.table().or_else(|| default.cloned())
}

impl<'a> Normalizer<'a> {
    pub fn new(project: &'a Project, descriptor: &'a ClassDescriptor, base_id: ExprId) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(
            base_id,
            Node {
                kind: NodeKind::Entity(descriptor),
                outer: false,
                parent: None,
                mapping: None,
            },
        );
        Self {
            project,
            base_id,
            nodes,
            paths: HashMap::new(),
            aliases: HashMap::new(),
            tables: Vec::new(),
            join_criteria: Vec::new(),
            outer_joins: Vec::new(),
            relationship_columns: Vec::new(),
        }
    }

    pub fn base_id(&self) -> ExprId {
        self.base_id
    }

    pub fn project(&self) -> &'a Project {
        self.project
    }

    /// Node id every alias of `id` resolves to.
    pub fn canonical(&self, id: ExprId) -> ExprId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    /// Descriptor of an entity node.
    pub fn descriptor_of(&self, node: ExprId) -> Option<&'a ClassDescriptor> {
        match self.nodes.get(&self.canonical(node))?.kind {
            NodeKind::Entity(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// Mapping a node was reached through.
    pub fn mapping_of(&self, node: ExprId) -> Option<&'a DatabaseMapping> {
        self.nodes.get(&self.canonical(node))?.mapping
    }

    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    pub fn join_criteria(&self) -> &[Expr] {
        &self.join_criteria
    }

    pub fn outer_joins(&self) -> &[OuterJoin] {
        &self.outer_joins
    }

    /// Whether any relationship has been joined.
    pub fn has_joins(&self) -> bool {
        self.nodes
            .values()
            .any(|n| n.parent.is_some() && !matches!(n.kind, NodeKind::Aggregate { .. }))
    }

    /// Resolve a `Base`/`QueryKey` chain to its node, registering joins.
    pub fn register_node(&mut self, expr: &Expr) -> Result<ExprId> {
        match self.resolve(expr)? {
            Resolved::Node(node) => Ok(node),
            Resolved::Value(..) => Err(invalid(format!(
                "'{}' is not a relationship",
                expr.attribute_path().unwrap_or_default().join(".")
            ))),
        }
    }

    /// Column of `node`, registering the table it lives on.
    pub fn column(&mut self, node: ExprId, field: &DatabaseField) -> Result<Expr> {
        let mut node = self.canonical(node);
        if let Some(Node {
            kind: NodeKind::Aggregate { owner, .. },
            ..
        }) = self.nodes.get(&node)
        {
            node = *owner;
        }
        let default = self.default_table(node)?;
        let table = table_of(field, default.as_ref())
            .ok_or_else(|| invalid(format!("column {field} has no table")))?;
        self.register_table(node, &table)?;
        let field = if field.table().is_some() {
            field.clone()
        } else {
            field.on_table(&table)
        };
        Ok(Expr::Column {
            node: Some(node),
            field,
        })
    }

    /// Lower an expression to columns.
    pub fn normalize(&mut self, expr: &Expr) -> Result<Expr> {
        self.normalize_value(expr).map(|(e, _)| e)
    }

    /// Select over everything registered so far. Join criteria are ANDed
    /// after `condition`.
    pub fn select(&self, items: Vec<SelectItem>, condition: Option<Expr>) -> SelectStatement {
        let mut select = SelectStatement::new(
            items,
            FromClause {
                tables: self.tables.clone(),
                outer_joins: self.outer_joins.clone(),
            },
        );
        select.where_clause =
            Expr::and_all(condition.into_iter().chain(self.join_criteria.iter().cloned()));
        select
    }

    /// Fields of the base node read by `normalized` or by the joins
    /// registered so far.
    pub fn base_fields_read(&self, normalized: &Expr) -> Vec<DatabaseField> {
        let mut fields: Vec<DatabaseField> = Vec::new();
        let columns = normalized
            .columns()
            .into_iter()
            .filter(|(node, _)| *node == Some(self.base_id))
            .map(|(_, f)| f)
            .chain(
                self.relationship_columns
                    .iter()
                    .filter(|(node, _)| *node == self.base_id)
                    .map(|(_, f)| f),
            );
        for field in columns {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    /// Every column read by `normalized` or by relationship joins.
    pub fn fields_read(&self, normalized: &Expr) -> Vec<DatabaseField> {
        let mut fields: Vec<DatabaseField> = Vec::new();
        let columns = normalized
            .columns()
            .into_iter()
            .map(|(_, f)| f)
            .chain(self.relationship_columns.iter().map(|(_, f)| f));
        for field in columns {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    fn default_table(&self, node: ExprId) -> Result<Option<DatabaseTable>> {
        match self.nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Entity(descriptor)) => Ok(descriptor.primary_table().cloned()),
            Some(NodeKind::Direct { table, .. }) => Ok(Some(table.clone())),
            Some(NodeKind::Aggregate { owner, .. }) => self.default_table(*owner),
            None => Err(invalid("column refers to a node outside this query")),
        }
    }

    fn register_table(&mut self, node: ExprId, table: &DatabaseTable) -> Result<()> {
        let table_ref = TableRef::new(node, table.clone());
        if self.tables.contains(&table_ref) {
            return Ok(());
        }
        let Some(entry) = self.nodes.get(&node).cloned() else {
            return Err(invalid("column refers to a node outside this query"));
        };
        match entry.kind {
            NodeKind::Entity(descriptor) => {
                let Some(primary) = descriptor.primary_table().cloned() else {
                    return Err(invalid(format!("{} maps no tables", descriptor.entity_name())));
                };
                if *table == primary {
                    self.tables.push(table_ref);
                    return Ok(());
                }
                let (pairs, outer) = if descriptor.owns_table(table) {
                    (descriptor.additional_table_pk(table), entry.outer)
                } else if descriptor.descendant_tables().contains(table) {
                    let owner = self
                        .project
                        .descendants(descriptor.entity_name())
                        .into_iter()
                        .find(|d| d.owns_table(table))
                        .ok_or_else(|| invalid(format!("no descendant maps {table}")))?;
                    (owner.additional_table_pk(table), true)
                } else {
                    return Err(invalid(format!(
                        "table {table} is not mapped by {}",
                        descriptor.entity_name()
                    )));
                };
                self.register_table(node, &primary)?;
                let on = Expr::and_all(pairs.iter().map(|(secondary, primary)| {
                    Expr::node_column(node, secondary.clone())
                        .eq(Expr::node_column(node, primary.clone()))
                }))
                .ok_or_else(|| invalid(format!("no primary key joins {table}")))?;
                self.tables.push(table_ref.clone());
                if outer {
                    self.outer_joins.push(OuterJoin {
                        source: TableRef::new(node, primary),
                        target: table_ref,
                        on,
                    });
                } else {
                    self.join_criteria.push(on);
                }
                Ok(())
            }
            NodeKind::Direct { table: own, .. } if own == *table => {
                self.tables.push(table_ref);
                Ok(())
            }
            NodeKind::Direct { .. } => Err(invalid(format!("table {table} is not part of this collection"))),
            NodeKind::Aggregate { owner, .. } => self.register_table(owner, table),
        }
    }

    fn resolve(&mut self, expr: &Expr) -> Result<Resolved<'a>> {
        match expr {
            Expr::Base { id, entity } => {
                let canonical = self.canonical(*id);
                if canonical == self.base_id {
                    return Ok(Resolved::Node(canonical));
                }
                let base_entity = self.descriptor_of(self.base_id).map(ClassDescriptor::entity_name);
                if base_entity == Some(entity.as_str()) {
                    self.aliases.insert(*id, self.base_id);
                    Ok(Resolved::Node(self.base_id))
                } else {
                    Err(invalid(format!(
                        "expression built on {entity} used in a query on {}",
                        base_entity.unwrap_or("?")
                    )))
                }
            }
            Expr::QueryKey {
                id,
                base,
                name,
                outer_join,
                any_of,
            } => {
                if let Some(node) = self.aliases.get(id) {
                    return Ok(Resolved::Node(*node));
                }
                if self.nodes.contains_key(id) {
                    return Ok(Resolved::Node(*id));
                }
                let parent = self.register_node(base)?;
                self.resolve_key(parent, *id, name, *outer_join, *any_of)
            }
            other => Err(invalid(format!("{other:?} is not an attribute path"))),
        }
    }

    fn resolve_key(
        &mut self,
        parent: ExprId,
        id: ExprId,
        name: &str,
        outer: bool,
        any_of: bool,
    ) -> Result<Resolved<'a>> {
        let kind = self.nodes[&parent].kind.clone();
        let descriptor = match kind {
            NodeKind::Entity(descriptor) => descriptor,
            NodeKind::Aggregate { owner, fields } => {
                let Some((_, field)) = fields.iter().find(|(attribute, _)| attribute == name) else {
                    let owner_name = self.nodes[&parent].mapping.map_or("aggregate", DatabaseMapping::attribute);
                    return Err(QueryError::invalid_query_key(owner_name, name).into());
                };
                let column = self.column(owner, field)?;
                return Ok(Resolved::Value(column, None));
            }
            NodeKind::Direct { .. } => {
                let owner_name = self.nodes[&parent].mapping.map_or("collection", DatabaseMapping::attribute);
                return Err(QueryError::invalid_query_key(owner_name, name).into());
            }
        };
        let mapping = descriptor
            .mapping(name)
            .ok_or_else(|| QueryError::invalid_query_key(descriptor.entity_name(), name))?;

        match mapping.kind() {
            MappingKind::DirectToField { field } => {
                let column = self.column(parent, field)?;
                Ok(Resolved::Value(column, mapping.converter()))
            }
            MappingKind::Aggregate { fields, .. } => {
                let key = (parent, name.to_string());
                if let Some(existing) = self.paths.get(&key).copied() {
                    self.aliases.insert(id, existing);
                    return Ok(Resolved::Node(existing));
                }
                self.nodes.insert(
                    id,
                    Node {
                        kind: NodeKind::Aggregate {
                            owner: parent,
                            fields,
                        },
                        outer: false,
                        parent: Some(parent),
                        mapping: Some(mapping),
                    },
                );
                self.paths.insert(key, id);
                Ok(Resolved::Node(id))
            }
            _ => {
                let key = (parent, name.to_string());
                if !any_of {
                    if let Some(existing) = self.paths.get(&key).copied() {
                        self.aliases.insert(id, existing);
                        return Ok(Resolved::Node(existing));
                    }
                }
                self.create_join(parent, id, mapping, outer)?;
                if !any_of {
                    self.paths.insert(key, id);
                }
                Ok(Resolved::Node(id))
            }
        }
    }

    fn create_join(
        &mut self,
        parent: ExprId,
        node: ExprId,
        mapping: &'a DatabaseMapping,
        outer: bool,
    ) -> Result<()> {
        let parent_table = self.default_table(parent)?;
        let parent_table = parent_table.as_ref();
        let col = |n: ExprId, f: &DatabaseField| Expr::node_column(n, f.clone());
        let missing = || invalid(format!("relationship '{}' has no join keys", mapping.attribute()));

        let (kind, steps) = match mapping.kind() {
            MappingKind::OneToOne {
                reference,
                foreign_keys,
            } => {
                let target = self.project.require(reference)?;
                let (source, target_key) = foreign_keys.first().ok_or_else(missing)?;
                let on = Expr::and_all(foreign_keys.iter().map(|(s, t)| col(parent, s).eq(col(node, t))))
                    .ok_or_else(missing)?;
                let step = JoinStep {
                    source: TableRef::new(parent, table_of(source, parent_table).ok_or_else(missing)?),
                    target: TableRef::new(
                        node,
                        table_of(target_key, target.primary_table()).ok_or_else(missing)?,
                    ),
                    on,
                };
                (NodeKind::Entity(target), vec![step])
            }
            MappingKind::OneToMany {
                reference,
                target_foreign_keys,
                ..
            } => {
                let target = self.project.require(reference)?;
                let (target_key, source) = target_foreign_keys.first().ok_or_else(missing)?;
                let on = Expr::and_all(
                    target_foreign_keys
                        .iter()
                        .map(|(t, s)| col(node, t).eq(col(parent, s))),
                )
                .ok_or_else(missing)?;
                let step = JoinStep {
                    source: TableRef::new(parent, table_of(source, parent_table).ok_or_else(missing)?),
                    target: TableRef::new(
                        node,
                        table_of(target_key, target.primary_table()).ok_or_else(missing)?,
                    ),
                    on,
                };
                (NodeKind::Entity(target), vec![step])
            }
            MappingKind::ManyToMany {
                reference,
                relation_table,
                source_keys,
                target_keys,
                ..
            } => {
                let target = self.project.require(reference)?;
                let (_, source) = source_keys.first().ok_or_else(missing)?;
                let (_, target_key) = target_keys.first().ok_or_else(missing)?;
                let relation = TableRef::new(node, relation_table.clone());
                let to_relation = Expr::and_all(
                    source_keys
                        .iter()
                        .map(|(r, s)| col(node, &r.on_table(relation_table)).eq(col(parent, s))),
                )
                .ok_or_else(missing)?;
                let to_target = Expr::and_all(
                    target_keys
                        .iter()
                        .map(|(r, t)| col(node, &r.on_table(relation_table)).eq(col(node, t))),
                )
                .ok_or_else(missing)?;
                let steps = vec![
                    JoinStep {
                        source: TableRef::new(parent, table_of(source, parent_table).ok_or_else(missing)?),
                        target: relation.clone(),
                        on: to_relation,
                    },
                    JoinStep {
                        source: relation,
                        target: TableRef::new(
                            node,
                            table_of(target_key, target.primary_table()).ok_or_else(missing)?,
                        ),
                        on: to_target,
                    },
                ];
                (NodeKind::Entity(target), steps)
            }
            MappingKind::DirectCollection {
                reference_table,
                reference_keys,
                ..
            }
            | MappingKind::DirectMap {
                reference_table,
                reference_keys,
                ..
            } => {
                let (_, source) = reference_keys.first().ok_or_else(missing)?;
                let on = Expr::and_all(
                    reference_keys
                        .iter()
                        .map(|(r, s)| col(node, &r.on_table(reference_table)).eq(col(parent, s))),
                )
                .ok_or_else(missing)?;
                let fields = mapping
                    .direct_collection_fields()
                    .iter()
                    .map(|f| f.on_table(reference_table))
                    .collect();
                let step = JoinStep {
                    source: TableRef::new(parent, table_of(source, parent_table).ok_or_else(missing)?),
                    target: TableRef::new(node, reference_table.clone()),
                    on,
                };
                (
                    NodeKind::Direct {
                        table: reference_table.clone(),
                        fields,
                    },
                    vec![step],
                )
            }
            MappingKind::DirectToField { .. } | MappingKind::Aggregate { .. } => {
                return Err(QueryError::join_on_non_relationship(
                    self.descriptor_of(parent).map_or("?", ClassDescriptor::entity_name),
                    mapping.attribute(),
                )
                .into());
            }
        };

        let mut restriction = match &kind {
            NodeKind::Entity(target) => target
                .indicator_restriction()
                .map(|(field, values)| indicator_in(node, field, values)),
            _ => None,
        };

        self.nodes.insert(
            node,
            Node {
                kind,
                outer,
                parent: Some(parent),
                mapping: Some(mapping),
            },
        );

        let last = steps.len() - 1;
        for (i, step) in steps.into_iter().enumerate() {
            let mut on = step.on;
            if i == last && outer {
                if let Some(r) = restriction.take() {
                    on = on.and(r);
                }
            }
            if let Some(source_node) = step.source.node {
                self.register_table(source_node, &step.source.table)?;
            }
            if i == 0 {
                for (n, field) in on.columns() {
                    if n == Some(parent) {
                        self.relationship_columns.push((parent, field.clone()));
                    }
                }
            }
            if !self.tables.contains(&step.target) {
                self.tables.push(step.target.clone());
                if outer {
                    self.outer_joins.push(OuterJoin {
                        source: step.source,
                        target: step.target,
                        on,
                    });
                } else {
                    self.join_criteria.push(on);
                }
            }
        }
        if let Some(r) = restriction {
            self.join_criteria.push(r);
        }
        Ok(())
    }

    fn normalize_value(&mut self, expr: &Expr) -> Result<(Expr, Option<&'a Converter>)> {
        let boxed = |e: Expr| Box::new(e);
        match expr {
            Expr::Base { .. } | Expr::QueryKey { .. } => match self.resolve(expr)? {
                Resolved::Value(column, converter) => Ok((column, converter)),
                Resolved::Node(node) => {
                    let node = self.canonical(node);
                    let value = match &self.nodes[&node].kind {
                        NodeKind::Direct { fields, .. } => fields.last().cloned(),
                        _ => None,
                    };
                    match value {
                        Some(field) => Ok((self.column(node, &field)?, None)),
                        None => Err(invalid(format!(
                            "'{}' is an object and cannot be compared as a value",
                            expr.attribute_path().unwrap_or_default().join(".")
                        ))),
                    }
                }
            },
            Expr::Field { base, field } => {
                let node = self.register_node(base)?;
                Ok((self.column(node, field)?, None))
            }
            Expr::Column {
                node: Some(node),
                field,
            } => Ok((self.column(*node, field)?, None)),
            Expr::Column { node: None, .. }
            | Expr::Literal(_)
            | Expr::Parameter(_)
            | Expr::Modify(_)
            | Expr::Raw(_)
            | Expr::Exists { .. }
            | Expr::Subselect(_) => Ok((expr.clone(), None)),
            Expr::Binary { left, op, right } => {
                let (mut l, lc) = self.normalize_value(left)?;
                let (mut r, rc) = self.normalize_value(right)?;
                if op.is_comparison() {
                    r = convert_literal(r, lc)?;
                    l = convert_literal(l, rc)?;
                }
                Ok((
                    Expr::Binary {
                        left: boxed(l),
                        op: *op,
                        right: boxed(r),
                    },
                    None,
                ))
            }
            Expr::Unary { op, expr } => Ok((
                Expr::Unary {
                    op: *op,
                    expr: boxed(self.normalize(expr)?),
                },
                None,
            )),
            Expr::IsNull { expr, negated } => {
                if let Some(test) = self.foreign_key_null_test(expr, *negated)? {
                    return Ok((test, None));
                }
                Ok((
                    Expr::IsNull {
                        expr: boxed(self.normalize(expr)?),
                        negated: *negated,
                    },
                    None,
                ))
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let (e, converter) = self.normalize_value(expr)?;
                let values = values
                    .iter()
                    .map(|v| {
                        let v = self.normalize(v)?;
                        convert_literal(v, converter)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((
                    Expr::In {
                        expr: boxed(e),
                        values,
                        negated: *negated,
                    },
                    None,
                ))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let (e, converter) = self.normalize_value(expr)?;
                let low = convert_literal(self.normalize(low)?, converter)?;
                let high = convert_literal(self.normalize(high)?, converter)?;
                Ok((
                    Expr::Between {
                        expr: boxed(e),
                        low: boxed(low),
                        high: boxed(high),
                        negated: *negated,
                    },
                    None,
                ))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Ok((
                Expr::Like {
                    expr: boxed(self.normalize(expr)?),
                    pattern: boxed(self.normalize(pattern)?),
                    negated: *negated,
                },
                None,
            )),
            Expr::Function { name, args } => Ok((
                Expr::Function {
                    name: name.clone(),
                    args: args
                        .iter()
                        .map(|a| self.normalize(a))
                        .collect::<Result<Vec<_>>>()?,
                },
                None,
            )),
        }
    }

    /// `relationship IS [NOT] NULL` on a one-to-one tests the owner's
    /// foreign key instead of joining the target.
    fn foreign_key_null_test(&mut self, expr: &Expr, negated: bool) -> Result<Option<Expr>> {
        let Expr::QueryKey { base, name, .. } = expr else {
            return Ok(None);
        };
        let parent = self.register_node(base)?;
        let Some(descriptor) = self.descriptor_of(parent) else {
            return Ok(None);
        };
        let Some(MappingKind::OneToOne { foreign_keys, .. }) = descriptor.mapping(name).map(DatabaseMapping::kind)
        else {
            return Ok(None);
        };
        let mut tests = Vec::with_capacity(foreign_keys.len());
        for (source, _) in foreign_keys {
            let column = self.column(parent, source)?;
            tests.push(Expr::IsNull {
                expr: Box::new(column),
                negated,
            });
        }
        Ok(Expr::and_all(tests))
    }
}

pub(crate) fn convert_literal(expr: Expr, converter: Option<&Converter>) -> Result<Expr> {
    match (expr, converter) {
        (Expr::Literal(value), Some(converter)) if !value.is_null() => {
            Ok(Expr::Literal(converter.to_data(&value)?))
        }
        (expr, _) => Ok(expr),
    }
}

/// Literal list for an indicator restriction.
pub(crate) fn indicator_in(node: ExprId, field: &DatabaseField, values: &[Value]) -> Expr {
    Expr::node_column(node, field.clone()).in_list(values.iter().cloned().map(Expr::Literal).collect::<Vec<_>>())
}
