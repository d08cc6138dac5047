//! Class descriptors: how an entity maps onto tables.
//!
//! Descriptors are declared with a builder and completed by
//! [`ProjectBuilder::build`](crate::project::ProjectBuilder::build), which
//! resolves inheritance and fills in the computed fields. After that they
//! are immutable and shared through the project.

use crate::field::{DatabaseField, DatabaseTable};
use crate::mapping::{DatabaseMapping, MappingKind};
use crate::object::{Attribute, Entity};
use crate::query_manager::QueryManager;
use crate::row::Row;
use crate::value::Value;
use indexmap::IndexMap;

/// Inheritance settings of a descriptor.
#[derive(Debug, Clone, Default)]
pub struct InheritancePolicy {
    pub(crate) parent: Option<String>,
    pub(crate) children: Vec<String>,
    pub(crate) descendants: Vec<String>,
    pub(crate) class_indicator_field: Option<DatabaseField>,
    pub(crate) class_indicator_value: Option<Value>,
    pub(crate) read_all_subclasses_view: Option<DatabaseTable>,
    pub(crate) should_outer_join_subclasses: bool,
    pub(crate) has_multiple_table_child: bool,
    pub(crate) indicator_values: Vec<Value>,
}

impl InheritancePolicy {
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Direct children, in declaration order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// All descendants, parents before their children.
    pub fn descendants(&self) -> &[String] {
        &self.descendants
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn class_indicator_field(&self) -> Option<&DatabaseField> {
        self.class_indicator_field.as_ref()
    }

    pub fn class_indicator_value(&self) -> Option<&Value> {
        self.class_indicator_value.as_ref()
    }

    pub fn read_all_subclasses_view(&self) -> Option<&DatabaseTable> {
        self.read_all_subclasses_view.as_ref()
    }

    pub fn should_outer_join_subclasses(&self) -> bool {
        self.should_outer_join_subclasses
    }

    /// Some descendant maps tables this descriptor does not have.
    pub fn has_multiple_table_child(&self) -> bool {
        self.has_multiple_table_child
    }

    /// Indicator values of this class and its descendants.
    pub fn indicator_values(&self) -> &[Value] {
        &self.indicator_values
    }
}

/// Metadata describing how an entity maps to tables and columns.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub(crate) entity_name: String,
    pub(crate) tables: Vec<DatabaseTable>,
    pub(crate) insert_order: Vec<DatabaseTable>,
    pub(crate) primary_key_fields: Vec<DatabaseField>,
    pub(crate) additional_table_pk: IndexMap<DatabaseTable, Vec<(DatabaseField, DatabaseField)>>,
    pub(crate) mappings: Vec<DatabaseMapping>,
    pub(crate) inheritance: Option<InheritancePolicy>,
    pub(crate) version_field: Option<DatabaseField>,
    pub(crate) embedded_id: Option<String>,
    pub(crate) query_manager: QueryManager,
    pub(crate) selection_fields: Vec<DatabaseField>,
    pub(crate) tree_fields: Vec<DatabaseField>,
    pub(crate) descendant_tables: Vec<DatabaseTable>,
}

impl ClassDescriptor {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            tables: Vec::new(),
            insert_order: Vec::new(),
            primary_key_fields: Vec::new(),
            additional_table_pk: IndexMap::new(),
            mappings: Vec::new(),
            inheritance: None,
            version_field: None,
            embedded_id: None,
            query_manager: QueryManager::new(),
            selection_fields: Vec::new(),
            tree_fields: Vec::new(),
            descendant_tables: Vec::new(),
        }
    }

    // Builder.

    /// Add a table; the first table is the primary table.
    pub fn table(mut self, name: impl Into<DatabaseTable>) -> Self {
        let table = name.into();
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
        self
    }

    pub fn primary_key(mut self, field: impl Into<DatabaseField>) -> Self {
        self.primary_key_fields.push(field.into());
        self
    }

    /// Join columns of a secondary table: `(secondary pk, primary pk)`.
    pub fn additional_table_key(mut self, table: impl Into<DatabaseTable>, keys: &[(&str, &str)]) -> Self {
        let pairs = keys
            .iter()
            .map(|(s, p)| (DatabaseField::new(s), DatabaseField::new(p)))
            .collect();
        self.additional_table_pk.insert(table.into(), pairs);
        self
    }

    /// Explicit multiple-table insert order.
    pub fn insert_order(mut self, tables: &[&str]) -> Self {
        self.insert_order = tables.iter().map(|t| DatabaseTable::new(*t)).collect();
        self
    }

    pub fn with_mapping(mut self, mapping: DatabaseMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Optimistic-lock version column.
    pub fn with_version_field(mut self, field: impl Into<DatabaseField>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    /// Use an aggregate mapping as the primary key.
    pub fn with_embedded_id(mut self, attribute: impl Into<String>) -> Self {
        self.embedded_id = Some(attribute.into());
        self
    }

    pub fn inherits_from(mut self, parent: impl Into<String>) -> Self {
        self.inheritance_mut().parent = Some(parent.into());
        self
    }

    pub fn class_indicator(mut self, field: impl Into<DatabaseField>) -> Self {
        self.inheritance_mut().class_indicator_field = Some(field.into());
        self
    }

    pub fn indicator_value(mut self, value: impl Into<Value>) -> Self {
        self.inheritance_mut().class_indicator_value = Some(value.into());
        self
    }

    pub fn read_all_subclasses_view(mut self, view: impl Into<DatabaseTable>) -> Self {
        self.inheritance_mut().read_all_subclasses_view = Some(view.into());
        self
    }

    pub fn outer_join_subclasses(mut self, outer: bool) -> Self {
        self.inheritance_mut().should_outer_join_subclasses = outer;
        self
    }

    fn inheritance_mut(&mut self) -> &mut InheritancePolicy {
        self.inheritance.get_or_insert_with(InheritancePolicy::default)
    }

    // Accessors.

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn tables(&self) -> &[DatabaseTable] {
        &self.tables
    }

    pub fn primary_table(&self) -> Option<&DatabaseTable> {
        self.tables.first()
    }

    pub fn has_multiple_tables(&self) -> bool {
        self.tables.len() > 1
    }

    pub fn owns_table(&self, table: &DatabaseTable) -> bool {
        self.tables.contains(table)
    }

    /// Tables in dependency order for inserts.
    pub fn multiple_table_insert_order(&self) -> &[DatabaseTable] {
        if self.insert_order.is_empty() {
            &self.tables
        } else {
            &self.insert_order
        }
    }

    pub fn primary_key_fields(&self) -> &[DatabaseField] {
        &self.primary_key_fields
    }

    /// Primary key columns as they appear on `table`.
    pub fn pk_fields_for_table(&self, table: &DatabaseTable) -> Vec<DatabaseField> {
        if self.primary_table() == Some(table) {
            return self.primary_key_fields.clone();
        }
        match self.additional_table_pk.get(table) {
            Some(pairs) => pairs.iter().map(|(secondary, _)| secondary.clone()).collect(),
            None => self
                .primary_key_fields
                .iter()
                .map(|f| f.on_table(table))
                .collect(),
        }
    }

    /// `(secondary pk, primary pk)` pairs joining `table` to the primary
    /// table. Empty for the primary table itself.
    pub fn additional_table_pk(&self, table: &DatabaseTable) -> Vec<(DatabaseField, DatabaseField)> {
        if self.primary_table() == Some(table) {
            return Vec::new();
        }
        match self.additional_table_pk.get(table) {
            Some(pairs) => pairs.clone(),
            None => self
                .primary_key_fields
                .iter()
                .map(|f| (f.on_table(table), f.clone()))
                .collect(),
        }
    }

    pub fn mappings(&self) -> &[DatabaseMapping] {
        &self.mappings
    }

    pub fn mapping(&self, attribute: &str) -> Option<&DatabaseMapping> {
        self.mappings.iter().find(|m| m.attribute() == attribute)
    }

    pub(crate) fn mapping_mut(&mut self, attribute: &str) -> Option<&mut DatabaseMapping> {
        self.mappings.iter_mut().find(|m| m.attribute() == attribute)
    }

    /// Mappings fetched by join unless a query says otherwise.
    pub fn join_fetched_mappings(&self) -> impl Iterator<Item = &DatabaseMapping> {
        self.mappings.iter().filter(|m| m.is_join_fetched())
    }

    /// Attribute of the direct mapping writing `field`.
    pub fn direct_attribute_for_field(&self, field: &DatabaseField) -> Option<&str> {
        self.mappings
            .iter()
            .find(|m| m.field() == Some(field))
            .map(DatabaseMapping::attribute)
    }

    /// Attribute of the one-to-one whose source foreign key is `fields`.
    pub fn one_to_one_attribute_for_foreign_key(&self, fields: &[DatabaseField]) -> Option<&str> {
        self.mappings
            .iter()
            .find(|m| match m.kind() {
                MappingKind::OneToOne { foreign_keys, .. } => {
                    foreign_keys.len() == fields.len()
                        && foreign_keys.iter().all(|(source, _)| fields.contains(source))
                }
                _ => false,
            })
            .map(DatabaseMapping::attribute)
    }

    pub fn inheritance(&self) -> Option<&InheritancePolicy> {
        self.inheritance.as_ref()
    }

    pub fn is_child(&self) -> bool {
        self.inheritance.as_ref().is_some_and(InheritancePolicy::is_child)
    }

    pub fn has_inheritance(&self) -> bool {
        self.inheritance.is_some()
    }

    pub fn has_multiple_table_child(&self) -> bool {
        self.inheritance
            .as_ref()
            .is_some_and(InheritancePolicy::has_multiple_table_child)
    }

    pub fn should_outer_join_subclasses(&self) -> bool {
        self.inheritance
            .as_ref()
            .is_some_and(InheritancePolicy::should_outer_join_subclasses)
    }

    /// Indicator restriction for reads and bulk operations: the indicator
    /// field and the values of this class and its descendants. `None` for
    /// roots and classes outside a hierarchy.
    pub fn indicator_restriction(&self) -> Option<(&DatabaseField, &[Value])> {
        let policy = self.inheritance.as_ref()?;
        if !policy.is_child() {
            return None;
        }
        let field = policy.class_indicator_field()?;
        if policy.indicator_values.is_empty() {
            None
        } else {
            Some((field, policy.indicator_values()))
        }
    }

    pub fn version_field(&self) -> Option<&DatabaseField> {
        self.version_field.as_ref()
    }

    pub fn embedded_id(&self) -> Option<&str> {
        self.embedded_id.as_deref()
    }

    pub fn query_manager(&self) -> &QueryManager {
        &self.query_manager
    }

    /// Fields read by a select of this descriptor, in table order.
    pub fn selection_fields(&self) -> &[DatabaseField] {
        &self.selection_fields
    }

    /// Selection fields of the whole subtree, used when outer-joining
    /// subclasses.
    pub fn tree_fields(&self) -> &[DatabaseField] {
        &self.tree_fields
    }

    /// Tables mapped only by descendants.
    pub fn descendant_tables(&self) -> &[DatabaseTable] {
        &self.descendant_tables
    }

    /// Fields a plain read of this descriptor selects.
    pub fn fields_for_select(&self) -> &[DatabaseField] {
        if self.should_outer_join_subclasses() {
            &self.tree_fields
        } else {
            &self.selection_fields
        }
    }

    /// Primary key values from a row; `None` if any is missing or null.
    pub fn extract_primary_key(&self, row: &Row) -> Option<Vec<Value>> {
        let values = row.values_for(&self.primary_key_fields)?;
        if values.iter().any(Value::is_null) {
            None
        } else {
            Some(values)
        }
    }

    /// Attribute holding the primary key column `field`.
    pub fn pk_attribute_for_field(&self, field: &DatabaseField) -> Option<&str> {
        self.direct_attribute_for_field(field)
    }

    /// Primary key values of a built object.
    pub fn primary_key_of(&self, entity: &Entity) -> Option<Vec<Value>> {
        if let Some(id) = &self.embedded_id {
            let key = entity.aggregate(id)?;
            let MappingKind::Aggregate { fields, .. } = self.mapping(id)?.kind() else {
                return None;
            };
            return fields
                .iter()
                .map(|(attribute, _)| key.value(attribute).cloned())
                .collect();
        }
        self.primary_key_fields
            .iter()
            .map(|field| {
                let attribute = self.direct_attribute_for_field(field)?;
                match entity.get(attribute)? {
                    Attribute::Value(value) => Some(value.clone()),
                    _ => None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee() -> ClassDescriptor {
        ClassDescriptor::new("Employee")
            .table("EMPLOYEE")
            .table("SALARY")
            .primary_key("EMPLOYEE.EMP_ID")
            .with_mapping(DatabaseMapping::direct("id", "EMPLOYEE.EMP_ID"))
            .with_mapping(DatabaseMapping::direct("salary", "SALARY.AMOUNT"))
    }

    #[test]
    fn secondary_table_keys_default_to_same_column() {
        let d = employee();
        let salary = DatabaseTable::new("SALARY");
        assert_eq!(d.pk_fields_for_table(&salary), vec![DatabaseField::new("SALARY.EMP_ID")]);
        assert_eq!(
            d.additional_table_pk(&salary),
            vec![(DatabaseField::new("SALARY.EMP_ID"), DatabaseField::new("EMPLOYEE.EMP_ID"))]
        );
        assert!(d.additional_table_pk(&DatabaseTable::new("EMPLOYEE")).is_empty());

        let explicit = employee().additional_table_key("SALARY", &[("SALARY.OWNER", "EMPLOYEE.EMP_ID")]);
        assert_eq!(explicit.pk_fields_for_table(&salary), vec![DatabaseField::new("SALARY.OWNER")]);
    }

    #[test]
    fn primary_key_from_row_and_object() {
        let d = employee();
        let row = Row::empty().with("EMPLOYEE.EMP_ID", 4_i64);
        assert_eq!(d.extract_primary_key(&row), Some(vec![Value::BigInt(4)]));
        assert_eq!(d.extract_primary_key(&Row::empty().with("EMPLOYEE.EMP_ID", Value::Null)), None);

        let bob = Entity::new("Employee").with_value("id", 4_i64);
        assert_eq!(d.primary_key_of(&bob), Some(vec![Value::BigInt(4)]));
        assert_eq!(d.direct_attribute_for_field(&DatabaseField::new("SALARY.AMOUNT")), Some("salary"));
        assert_eq!(d.multiple_table_insert_order().len(), 2);
    }
}
