//! Database row representation.
//!
//! Columns are named by qualified field name (`TABLE.COLUMN`) so a joined
//! row can carry the same column name from several tables. Lookups by
//! [`DatabaseField`] try the qualified name first and fall back to the bare
//! column name.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::field::DatabaseField;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
    /// Bare column name -> first index, for unqualified lookups
    bare_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let mut info = Self::default();
        for name in names {
            info.push(name);
        }
        info
    }

    /// Build column info naming each column by the qualified field name.
    pub fn from_fields(fields: &[DatabaseField]) -> Self {
        Self::new(fields.iter().map(DatabaseField::qualified_name).collect())
    }

    fn push(&mut self, name: String) {
        let index = self.names.len();
        let bare = name.rsplit_once('.').map_or(name.as_str(), |(_, c)| c).to_string();
        self.bare_to_index.entry(bare).or_insert(index);
        self.name_to_index.entry(name.clone()).or_insert(index);
        self.names.push(name);
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Index of a field: qualified name first, then bare column name.
    pub fn index_of_field(&self, field: &DatabaseField) -> Option<usize> {
        self.index_of(&field.qualified_name())
            .or_else(|| self.bare_to_index.get(field.name()).copied())
    }

    /// Get the name of a column by index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query, or a translation/modify
/// row assembled in memory.
#[derive(Debug, Clone, Default)]
pub struct Row {
    /// Column values in order
    values: Vec<Value>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Create a row whose columns are the given fields.
    pub fn from_fields(fields: &[DatabaseField], values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::from_fields(fields)), values)
    }

    /// An empty row with no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a column, returning the extended row.
    pub fn with(mut self, field: impl Into<DatabaseField>, value: impl Into<Value>) -> Self {
        self.put(&field.into(), value.into());
        self
    }

    /// Set a field's value, replacing it when already present.
    ///
    /// Columns without a value (a row built with fewer values than names)
    /// read as NULL once a later column is set.
    pub fn put(&mut self, field: &DatabaseField, value: Value) {
        let name = field.qualified_name();
        let index = match self.columns.index_of(&name) {
            Some(index) => index,
            None => {
                let columns = Arc::make_mut(&mut self.columns);
                columns.push(name);
                columns.len() - 1
            }
        };
        if self.values.len() <= index {
            self.values.resize(index + 1, Value::Null);
        }
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index. O(1) operation.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name. O(1) operation via HashMap lookup.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a value by field.
    pub fn get_field(&self, field: &DatabaseField) -> Option<&Value> {
        self.columns
            .index_of_field(field)
            .and_then(|i| self.values.get(i))
    }

    /// Check if the row carries a value for `field`.
    pub fn contains_field(&self, field: &DatabaseField) -> bool {
        self.columns.index_of_field(field).is_some()
    }

    /// Get a typed value by field.
    pub fn get_field_as<T>(&self, field: &DatabaseField) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get_field(field).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "missing column".to_string(),
                column: Some(field.qualified_name()),
            })
        })?;
        T::try_from(value.clone()).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(field.qualified_name());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// The `len` columns starting at `offset`, as a new row.
    ///
    /// Out-of-range requests are clamped to the row width.
    pub fn slice(&self, offset: usize, len: usize) -> Row {
        let start = offset.min(self.values.len());
        let end = offset.saturating_add(len).min(self.values.len());
        let names = self.columns.names()[start..end].to_vec();
        Row::new(names, self.values[start..end].to_vec())
    }

    /// Values of `fields` in order; missing fields yield `None`.
    pub fn values_for(&self, fields: &[DatabaseField]) -> Option<Vec<Value>> {
        fields
            .iter()
            .map(|field| self.get_field(field).cloned())
            .collect()
    }

    /// Get all column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    /// Iterate over all values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee_row() -> Row {
        Row::new(
            vec![
                "EMPLOYEE.EMP_ID".into(),
                "EMPLOYEE.NAME".into(),
                "ADDRESS.ADDRESS_ID".into(),
                "ADDRESS.CITY".into(),
            ],
            vec![
                Value::BigInt(1),
                Value::Text("Ada".into()),
                Value::BigInt(10),
                Value::Text("Ottawa".into()),
            ],
        )
    }

    #[test]
    fn test_row_field_access() {
        let row = employee_row();
        assert_eq!(
            row.get_field(&DatabaseField::new("EMPLOYEE.NAME")),
            Some(&Value::Text("Ada".into()))
        );
        assert_eq!(
            row.get_field(&DatabaseField::new("CITY")),
            Some(&Value::Text("Ottawa".into()))
        );
        assert!(row.get_field(&DatabaseField::new("EMPLOYEE.CITY")).is_none());
        assert_eq!(
            row.get_field_as::<i64>(&DatabaseField::new("ADDRESS.ADDRESS_ID")).unwrap(),
            10
        );
        let err = row
            .get_field_as::<i64>(&DatabaseField::new("EMPLOYEE.NAME"))
            .unwrap_err();
        assert!(err.to_string().contains("EMPLOYEE.NAME"));
    }

    #[test]
    fn test_row_slice() {
        let row = employee_row();
        let address = row.slice(2, 2);
        assert_eq!(address.len(), 2);
        assert_eq!(
            address.column_names().collect::<Vec<_>>(),
            vec!["ADDRESS.ADDRESS_ID", "ADDRESS.CITY"]
        );
        assert_eq!(row.slice(3, 10).len(), 1);
        assert!(row.slice(9, 2).is_empty());
    }

    #[test]
    fn test_row_put_replaces() {
        let mut row = Row::empty()
            .with("EMPLOYEE.EMP_ID", 7_i64)
            .with("EMPLOYEE.VERSION", 1_i64);
        row.put(&DatabaseField::new("EMPLOYEE.VERSION"), Value::BigInt(2));
        assert_eq!(row.len(), 2);
        assert_eq!(
            row.get_by_name("EMPLOYEE.VERSION"),
            Some(&Value::BigInt(2))
        );
        assert_eq!(
            row.values_for(&[DatabaseField::new("EMPLOYEE.EMP_ID")]),
            Some(vec![Value::BigInt(7)])
        );
        assert_eq!(row.values_for(&[DatabaseField::new("EMPLOYEE.MISSING")]), None);
    }

    #[test]
    fn test_row_put_past_missing_values() {
        let mut row = Row::new(
            vec!["EMPLOYEE.EMP_ID".into(), "EMPLOYEE.NAME".into()],
            vec![Value::BigInt(7)],
        );
        row.put(&DatabaseField::new("EMPLOYEE.NAME"), Value::Text("Ada".into()));
        assert_eq!(row.get_by_name("EMPLOYEE.NAME"), Some(&Value::Text("Ada".into())));

        let mut row = Row::new(
            vec!["EMPLOYEE.EMP_ID".into(), "EMPLOYEE.NAME".into()],
            vec![Value::BigInt(7)],
        );
        row.put(&DatabaseField::new("EMPLOYEE.VERSION"), Value::BigInt(1));
        assert_eq!(row.len(), 3);
        assert_eq!(row.get_by_name("EMPLOYEE.NAME"), Some(&Value::Null));
        assert_eq!(row.get_by_name("EMPLOYEE.VERSION"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn test_shared_columns() {
        let columns = Arc::new(ColumnInfo::new(vec!["A.X".into()]));
        let r1 = Row::with_columns(Arc::clone(&columns), vec![Value::Int(1)]);
        let r2 = Row::with_columns(Arc::clone(&columns), vec![Value::Int(2)]);
        assert!(Arc::ptr_eq(&r1.column_info(), &r2.column_info()));
    }
}
