//! Joined attribute reading.
//!
//! A [`JoinedAttributeManager`] tracks the relationships a read fetches in
//! the same statement as the queried objects. Once the join expressions are
//! prepared it knows how wide each joined object's slice of a result row is,
//! and after `compute_joining_mapping_indexes` where each slice starts. The
//! session uses those offsets to cut joined rows back into per-object rows.
//!
//! Lifecycle: add expressions, `prepare_join_expressions`,
//! `compute_joining_mapping_indexes`, `compute_joining_mapping_queries`,
//! `process_data_results`. `reset` goes back to the first step.

use crate::expr::{CloneMap, Expr};
use crate::normalize::Normalizer;
use crate::statement::LockingClause;
use indexmap::IndexMap;
use relmap_core::{
    ClassDescriptor, DatabaseField, DatabaseMapping, JoinFetch, MapKey, Project, QueryError,
    Result, Row,
};
use std::sync::Arc;

/// A prepared join: the expression, the mapping it traverses and the
/// columns it contributes to each result row.
#[derive(Debug, Clone)]
pub struct JoinedAttribute {
    pub expr: Expr,
    /// Attribute names from the queried entity, e.g. `["manager", "address"]`.
    pub path: Vec<String>,
    pub mapping: DatabaseMapping,
    /// Target entity; `None` for direct collections and maps.
    pub reference: Option<String>,
    /// The path crosses a to-many mapping.
    pub to_many: bool,
    pub outer: bool,
    /// Columns selected for the joined object, in select order.
    pub fields: Vec<DatabaseField>,
}

impl JoinedAttribute {
    pub fn key(&self) -> String {
        self.path.join(".")
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn is_nested(&self) -> bool {
        self.path.len() > 1
    }

    pub fn is_direct_collection(&self) -> bool {
        self.mapping.is_direct_collection()
    }
}

/// Where a joined mapping's columns start in a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedMappingIndex {
    pub offset: usize,
    pub width: usize,
}

/// Nested read for one top-level joined mapping. Its manager holds the
/// joins below that mapping with the first path segment stripped and the
/// absolute offsets of the parent row kept.
#[derive(Debug, Clone)]
pub struct JoinedMappingQuery {
    pub attribute: String,
    pub reference: String,
    pub joined: JoinedAttributeManager,
}

#[derive(Debug, Clone)]
pub struct JoinedAttributeManager {
    joined_attribute_expressions: Vec<Expr>,
    joined_mapping_expressions: Vec<Expr>,
    prepared: Vec<JoinedAttribute>,
    is_to_many_join: bool,
    has_outer_join: bool,
    joined_mapping_indexes: IndexMap<String, JoinedMappingIndex>,
    joined_mapping_queries: IndexMap<String, JoinedMappingQuery>,
    parent_result_index: usize,
    parent_width: usize,
    data_results: Option<Arc<Vec<Option<Row>>>>,
    data_results_by_primary_key: Arc<IndexMap<MapKey, Vec<Row>>>,
    should_filter_duplicates: bool,
}

impl Default for JoinedAttributeManager {
    fn default() -> Self {
        Self {
            joined_attribute_expressions: Vec::new(),
            joined_mapping_expressions: Vec::new(),
            prepared: Vec::new(),
            is_to_many_join: false,
            has_outer_join: false,
            joined_mapping_indexes: IndexMap::new(),
            joined_mapping_queries: IndexMap::new(),
            parent_result_index: 0,
            parent_width: 0,
            data_results: None,
            data_results_by_primary_key: Arc::new(IndexMap::new()),
            should_filter_duplicates: true,
        }
    }
}

fn path_of(expr: &Expr) -> Option<Vec<&str>> {
    expr.attribute_path().filter(|p| !p.is_empty())
}

fn contains_path(list: &[Expr], expr: &Expr) -> bool {
    match path_of(expr) {
        Some(path) => list.iter().any(|e| path_of(e).as_ref() == Some(&path)),
        None => false,
    }
}

fn crosses_outer_join(expr: &Expr) -> bool {
    let mut outer = false;
    expr.walk(&mut |e| {
        if let Expr::QueryKey { outer_join: true, .. } = e {
            outer = true;
        }
    });
    outer
}

impl JoinedAttributeManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Expressions ====================

    /// Join requested by the query. Paths already joined are ignored.
    pub fn add_joined_attribute_expression(&mut self, expr: Expr) {
        if !contains_path(&self.joined_attribute_expressions, &expr) {
            self.joined_attribute_expressions.push(expr);
        }
    }

    /// Join defaulted from a mapping's join-fetch setting.
    pub fn add_joined_mapping_expression(&mut self, expr: Expr) {
        if !contains_path(&self.joined_mapping_expressions, &expr)
            && !contains_path(&self.joined_attribute_expressions, &expr)
        {
            self.joined_mapping_expressions.push(expr);
        }
    }

    /// Add a join for every join-fetched mapping of `descriptor`.
    pub fn add_descriptor_join_fetches(&mut self, descriptor: &ClassDescriptor, base: &Expr) {
        for mapping in descriptor.join_fetched_mappings() {
            let expr = match mapping.join_fetch_kind() {
                JoinFetch::Outer => base.clone().get_allowing_null(mapping.attribute()),
                _ => base.clone().get(mapping.attribute()),
            };
            self.add_joined_mapping_expression(expr);
        }
    }

    pub fn joined_attribute_expressions(&self) -> &[Expr] {
        &self.joined_attribute_expressions
    }

    pub fn joined_mapping_expressions(&self) -> &[Expr] {
        &self.joined_mapping_expressions
    }

    pub fn has_joined_expressions(&self) -> bool {
        !self.joined_attribute_expressions.is_empty() || !self.joined_mapping_expressions.is_empty()
    }

    // ==================== Preparation ====================

    /// Validate every join expression against `descriptor` and record the
    /// columns each joined object contributes. Prefixes of nested paths are
    /// joined first.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = descriptor.entity_name()))]
    pub fn prepare_join_expressions(
        &mut self,
        project: &Project,
        descriptor: &ClassDescriptor,
    ) -> Result<()> {
        self.prepared.clear();
        let expressions: Vec<Expr> = self
            .joined_attribute_expressions
            .iter()
            .chain(self.joined_mapping_expressions.iter())
            .cloned()
            .collect();
        for expr in &expressions {
            self.prepare_one(project, descriptor, expr)?;
        }
        self.is_to_many_join = self.prepared.iter().any(|j| j.to_many);
        self.has_outer_join = self.prepared.iter().any(|j| j.outer);
        tracing::debug!(
            joins = self.prepared.len(),
            to_many = self.is_to_many_join,
            "prepared joined attributes"
        );
        Ok(())
    }

    fn prepare_one(
        &mut self,
        project: &Project,
        descriptor: &ClassDescriptor,
        expr: &Expr,
    ) -> Result<()> {
        let Some(path) = path_of(expr) else {
            return Err(QueryError::join_on_non_relationship(
                descriptor.entity_name(),
                &format!("{expr:?}"),
            )
            .into());
        };
        let path: Vec<String> = path.into_iter().map(str::to_string).collect();
        if self.prepared.iter().any(|j| j.path == path) {
            return Ok(());
        }
        if let Expr::QueryKey { base, .. } = expr {
            if path.len() > 1 {
                self.prepare_one(project, descriptor, base)?;
            }
        }

        let mut current = descriptor;
        let mut to_many = false;
        let mut last = None;
        for (i, name) in path.iter().enumerate() {
            let mapping = current
                .mapping(name)
                .filter(|m| m.is_relationship())
                .ok_or_else(|| QueryError::join_on_non_relationship(current.entity_name(), name))?;
            to_many |= mapping.is_collection();
            match mapping.reference_descriptor() {
                Some(reference) => current = project.require(reference)?,
                None if i + 1 < path.len() => {
                    return Err(
                        QueryError::join_on_non_relationship(mapping.attribute(), &path[i + 1]).into(),
                    );
                }
                None => {}
            }
            last = Some(mapping);
        }
        let Some(mapping) = last else {
            return Ok(());
        };

        let mut fields = if mapping.is_direct_collection() {
            mapping.direct_collection_fields()
        } else {
            current.fields_for_select().to_vec()
        };
        if let Some(policy) = mapping.container_policy() {
            for field in policy.additional_fields_for_join() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }

        self.prepared.push(JoinedAttribute {
            expr: expr.clone(),
            path,
            mapping: mapping.clone(),
            reference: mapping.reference_descriptor().map(str::to_string),
            to_many,
            outer: crosses_outer_join(expr),
            fields,
        });
        Ok(())
    }

    /// Prepared joins in select order.
    pub fn joined_attributes(&self) -> &[JoinedAttribute] {
        &self.prepared
    }

    /// Record each joined mapping's offset starting at `start`. Returns the
    /// offset one past the last joined column.
    pub fn compute_indexes_for_joined_expressions(&mut self, start: usize) -> usize {
        self.joined_mapping_indexes.clear();
        let mut offset = start;
        for joined in &self.prepared {
            self.joined_mapping_indexes.insert(
                joined.key(),
                JoinedMappingIndex {
                    offset,
                    width: joined.width(),
                },
            );
            offset += joined.width();
        }
        offset
    }

    /// The queried object's columns start at `start`; joined columns follow.
    pub fn compute_joining_mapping_indexes(
        &mut self,
        descriptor: &ClassDescriptor,
        start: usize,
    ) -> usize {
        self.parent_result_index = start;
        self.parent_width = descriptor.fields_for_select().len();
        self.compute_indexes_for_joined_expressions(start + self.parent_width)
    }

    /// Build the nested read of every top-level joined object mapping.
    pub fn compute_joining_mapping_queries(&mut self) {
        self.joined_mapping_queries.clear();
        for joined in self.prepared.iter().filter(|j| !j.is_nested()) {
            let Some(reference) = joined.reference.clone() else {
                continue;
            };
            let key = joined.key();
            let Some(index) = self.joined_mapping_indexes.get(&key).copied() else {
                continue;
            };
            let mut nested = JoinedAttributeManager {
                parent_result_index: index.offset,
                parent_width: index.width,
                should_filter_duplicates: self.should_filter_duplicates,
                ..Self::default()
            };
            for child in self
                .prepared
                .iter()
                .filter(|j| j.is_nested() && j.path[0] == key)
            {
                let mut stripped = child.clone();
                stripped.path.remove(0);
                if let Some(child_index) = self.joined_mapping_indexes.get(&child.key()) {
                    nested
                        .joined_mapping_indexes
                        .insert(stripped.key(), *child_index);
                }
                nested.prepared.push(stripped);
            }
            nested.is_to_many_join = nested.prepared.iter().any(|j| j.to_many);
            nested.has_outer_join = nested.prepared.iter().any(|j| j.outer);
            self.joined_mapping_queries.insert(
                key.clone(),
                JoinedMappingQuery {
                    attribute: key,
                    reference,
                    joined: nested,
                },
            );
        }
    }

    pub fn joined_mapping_indexes(&self) -> &IndexMap<String, JoinedMappingIndex> {
        &self.joined_mapping_indexes
    }

    pub fn joined_mapping_queries(&self) -> &IndexMap<String, JoinedMappingQuery> {
        &self.joined_mapping_queries
    }

    pub fn joined_mapping_query(&self, attribute: &str) -> Option<&JoinedMappingQuery> {
        self.joined_mapping_queries.get(attribute)
    }

    pub fn parent_result_index(&self) -> usize {
        self.parent_result_index
    }

    /// Columns of the object that owns the joins.
    pub fn trim_parent_row(&self, row: &Row) -> Row {
        row.slice(self.parent_result_index, self.parent_width)
    }

    /// Columns of the joined mapping at `path`.
    pub fn trim_row_for_joined_mapping(&self, path: &str, row: &Row) -> Option<Row> {
        self.joined_mapping_indexes
            .get(path)
            .map(|index| row.slice(index.offset, index.width))
    }

    pub fn is_to_many_join(&self) -> bool {
        self.is_to_many_join
    }

    pub fn has_outer_joined_attribute(&self) -> bool {
        self.has_outer_join
    }

    // ==================== Result processing ====================

    pub fn set_should_filter_duplicates(&mut self, filter: bool) {
        self.should_filter_duplicates = filter;
    }

    /// Group to-many joined rows by the owner's primary key.
    ///
    /// Each owner keeps the slot of its first row; later rows of the same
    /// owner are set to `None` unless duplicate filtering is off. Rows with
    /// a null owner key are dropped.
    pub fn process_data_results(
        &mut self,
        descriptor: &ClassDescriptor,
        rows: Vec<Row>,
    ) -> Result<Arc<Vec<Option<Row>>>> {
        if !self.is_to_many_join {
            let slots = Arc::new(rows.into_iter().map(Some).collect::<Vec<_>>());
            self.data_results = Some(Arc::clone(&slots));
            return Ok(slots);
        }
        let mut by_key: IndexMap<MapKey, Vec<Row>> = IndexMap::new();
        let mut slots = Vec::with_capacity(rows.len());
        for row in rows {
            let parent = self.trim_parent_row(&row);
            let Some(pk) = descriptor.extract_primary_key(&parent) else {
                slots.push(None);
                continue;
            };
            let key = MapKey::from_value(&relmap_core::Value::Array(pk))?;
            match by_key.get_mut(&key) {
                Some(group) => {
                    group.push(row.clone());
                    slots.push(if self.should_filter_duplicates { None } else { Some(row) });
                }
                None => {
                    by_key.insert(key, vec![row.clone()]);
                    slots.push(Some(row));
                }
            }
        }
        tracing::trace!(rows = slots.len(), owners = by_key.len(), "grouped joined rows");
        let slots = Arc::new(slots);
        self.data_results = Some(Arc::clone(&slots));
        self.data_results_by_primary_key = Arc::new(by_key);
        Ok(slots)
    }

    pub fn data_results(&self) -> Option<&[Option<Row>]> {
        self.data_results.as_deref().map(Vec::as_slice)
    }

    pub fn data_results_by_primary_key(&self) -> &IndexMap<MapKey, Vec<Row>> {
        &self.data_results_by_primary_key
    }

    /// Rows of the owner with primary key `pk`.
    pub fn rows_for_primary_key(&self, pk: &[relmap_core::Value]) -> Option<&[Row]> {
        let key = MapKey::from_value(&relmap_core::Value::Array(pk.to_vec())).ok()?;
        self.data_results_by_primary_key.get(&key).map(Vec::as_slice)
    }

    // ==================== Locking ====================

    /// Add each joined object's node to a FOR UPDATE OF clause. Stops at the
    /// first join whose target has no descriptor.
    pub fn setup_locking_clause_for_joined_expressions(
        &self,
        lock: &mut LockingClause,
        normalizer: &mut Normalizer<'_>,
    ) -> Result<()> {
        for joined in &self.prepared {
            let Some(reference) = joined.reference.as_deref() else {
                return Ok(());
            };
            if normalizer.project().descriptor(reference).is_none() {
                return Ok(());
            }
            let node = normalizer.register_node(&joined.expr)?;
            lock.add_node(node);
        }
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Forget everything computed from the expressions.
    pub fn reset(&mut self) {
        self.prepared.clear();
        self.is_to_many_join = false;
        self.has_outer_join = false;
        self.joined_mapping_indexes.clear();
        self.joined_mapping_queries.clear();
        self.parent_result_index = 0;
        self.parent_width = 0;
        self.data_results = None;
        self.data_results_by_primary_key = Arc::new(IndexMap::new());
    }

    /// Forget the expressions too.
    pub fn clear(&mut self) {
        self.reset();
        self.joined_attribute_expressions.clear();
        self.joined_mapping_expressions.clear();
    }

    /// Copy for a cloned query. Expressions are copied through `map` so the
    /// clone's joins agree with its criteria; results are shared.
    pub fn copied_version_from(&self, map: &mut CloneMap) -> Self {
        let mut copy = self.clone();
        copy.joined_attribute_expressions = self
            .joined_attribute_expressions
            .iter()
            .map(|e| e.copied_version_from(map))
            .collect();
        copy.joined_mapping_expressions = self
            .joined_mapping_expressions
            .iter()
            .map(|e| e.copied_version_from(map))
            .collect();
        for joined in &mut copy.prepared {
            joined.expr = joined.expr.copied_version_from(map);
        }
        copy
    }
}
