//! Tables and fields as they appear in descriptor metadata.

use crate::types::SqlType;
use std::fmt;

/// A database table referenced by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseTable {
    name: String,
}

impl DatabaseTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DatabaseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for DatabaseTable {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A column, optionally qualified by its table.
///
/// Equality and hashing use the table and column name only; the declared
/// SQL type is descriptive.
#[derive(Debug, Clone)]
pub struct DatabaseField {
    table: Option<String>,
    name: String,
    sql_type: Option<SqlType>,
}

impl DatabaseField {
    /// Parse `"TABLE.COLUMN"` or a bare `"COLUMN"`.
    pub fn new(qualified: impl AsRef<str>) -> Self {
        let qualified = qualified.as_ref();
        match qualified.rsplit_once('.') {
            Some((table, name)) => Self {
                table: Some(table.to_string()),
                name: name.to_string(),
                sql_type: None,
            },
            None => Self {
                table: None,
                name: qualified.to_string(),
                sql_type: None,
            },
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
            sql_type: None,
        }
    }

    /// Declare the SQL type, used when the field is staged in a temp table.
    pub fn with_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn table(&self) -> Option<DatabaseTable> {
        self.table.as_deref().map(DatabaseTable::new)
    }

    pub fn sql_type(&self) -> Option<&SqlType> {
        self.sql_type.as_ref()
    }

    /// Check whether this field lives on `table`.
    pub fn is_on(&self, table: &DatabaseTable) -> bool {
        self.table.as_deref() == Some(table.name())
    }

    /// `TABLE.COLUMN`, or the bare column when unqualified.
    pub fn qualified_name(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", table, self.name),
            None => self.name.clone(),
        }
    }

    /// The same column on another table (used for temp-table mirrors).
    pub fn on_table(&self, table: &DatabaseTable) -> Self {
        Self {
            table: Some(table.name().to_string()),
            name: self.name.clone(),
            sql_type: self.sql_type.clone(),
        }
    }
}

impl PartialEq for DatabaseField {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.name == other.name
    }
}

impl Eq for DatabaseField {}

impl std::hash::Hash for DatabaseField {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for DatabaseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

impl From<&str> for DatabaseField {
    fn from(qualified: &str) -> Self {
        Self::new(qualified)
    }
}

impl From<&DatabaseField> for DatabaseField {
    fn from(field: &DatabaseField) -> Self {
        field.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_names() {
        let field = DatabaseField::new("EMPLOYEE.EMP_ID");
        assert_eq!(field.table_name(), Some("EMPLOYEE"));
        assert_eq!(field.name(), "EMP_ID");
        assert_eq!(field.qualified_name(), "EMPLOYEE.EMP_ID");
        assert!(field.is_on(&DatabaseTable::new("EMPLOYEE")));

        let bare = DatabaseField::new("EMP_ID");
        assert_eq!(bare.table_name(), None);
        assert_eq!(bare.to_string(), "EMP_ID");
    }

    #[test]
    fn equality_ignores_type() {
        let typed = DatabaseField::new("SALARY.AMOUNT").with_type(SqlType::BigInt);
        assert_eq!(typed, DatabaseField::new("SALARY.AMOUNT"));
        assert_ne!(typed, DatabaseField::new("BONUS.AMOUNT"));

        let mirrored = typed.on_table(&DatabaseTable::new("TL_SALARY"));
        assert_eq!(mirrored.qualified_name(), "TL_SALARY.AMOUNT");
        assert_eq!(mirrored.sql_type(), Some(&SqlType::BigInt));
    }
}
