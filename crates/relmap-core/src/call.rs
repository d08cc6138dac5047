//! Rendered SQL calls.
//!
//! A [`SqlCall`] is SQL text interleaved with parameters. Parameters are
//! literals fixed at prepare time, or fields filled in at execution from the
//! translation row (query arguments) or the modify row (object values).

use crate::error::{QueryError, QueryErrorKind};
use crate::field::DatabaseField;
use crate::platform::Dialect;
use crate::row::Row;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum CallParameter {
    Literal(Value),
    /// Query argument read from the translation row.
    Translation(DatabaseField),
    /// Object value read from the modify row.
    Modify(DatabaseField),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallFragment {
    Text(String),
    Parameter(CallParameter),
}

/// SQL text with deferred parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCall {
    fragments: Vec<CallFragment>,
    bind_parameters: bool,
}

impl Default for SqlCall {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCall {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            bind_parameters: true,
        }
    }

    /// A call with fixed text and no parameters.
    pub fn text(sql: impl Into<String>) -> Self {
        let mut call = Self::new();
        call.push_text(sql);
        call
    }

    pub fn with_bind_parameters(mut self, bind: bool) -> Self {
        self.bind_parameters = bind;
        self
    }

    pub fn set_bind_parameters(&mut self, bind: bool) {
        self.bind_parameters = bind;
    }

    pub fn binds_parameters(&self) -> bool {
        self.bind_parameters
    }

    pub fn push_text(&mut self, sql: impl Into<String>) {
        let sql = sql.into();
        if sql.is_empty() {
            return;
        }
        if let Some(CallFragment::Text(last)) = self.fragments.last_mut() {
            last.push_str(&sql);
        } else {
            self.fragments.push(CallFragment::Text(sql));
        }
    }

    pub fn push_parameter(&mut self, parameter: CallParameter) {
        self.fragments.push(CallFragment::Parameter(parameter));
    }

    pub fn push_literal(&mut self, value: Value) {
        self.push_parameter(CallParameter::Literal(value));
    }

    pub fn push_translation(&mut self, field: DatabaseField) {
        self.push_parameter(CallParameter::Translation(field));
    }

    pub fn push_modify(&mut self, field: DatabaseField) {
        self.push_parameter(CallParameter::Modify(field));
    }

    /// Append another call's fragments.
    pub fn append(&mut self, other: SqlCall) {
        for fragment in other.fragments {
            match fragment {
                CallFragment::Text(text) => self.push_text(text),
                CallFragment::Parameter(p) => self.push_parameter(p),
            }
        }
    }

    pub fn fragments(&self) -> &[CallFragment] {
        &self.fragments
    }

    pub fn parameters(&self) -> impl Iterator<Item = &CallParameter> {
        self.fragments.iter().filter_map(|f| match f {
            CallFragment::Parameter(p) => Some(p),
            CallFragment::Text(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// SQL with `?` for every bound parameter and literals inlined when
    /// binding is off.
    pub fn sql_string(&self) -> String {
        let mut sql = String::new();
        for fragment in &self.fragments {
            match fragment {
                CallFragment::Text(text) => sql.push_str(text),
                CallFragment::Parameter(CallParameter::Literal(value)) if !self.bind_parameters => {
                    sql.push_str(&value.to_sql_literal());
                }
                CallFragment::Parameter(_) => sql.push('?'),
            }
        }
        sql
    }

    /// Final SQL in `dialect` and the values to bind, in order.
    pub fn translate(
        &self,
        translation_row: Option<&Row>,
        modify_row: Option<&Row>,
        dialect: Dialect,
    ) -> crate::Result<(String, Vec<Value>)> {
        let mut sql = String::new();
        let mut values = Vec::new();
        for fragment in &self.fragments {
            let parameter = match fragment {
                CallFragment::Text(text) => {
                    sql.push_str(text);
                    continue;
                }
                CallFragment::Parameter(parameter) => parameter,
            };
            let value = match parameter {
                CallParameter::Literal(value) => value.clone(),
                CallParameter::Translation(field) => lookup(translation_row, field, "query argument")?,
                CallParameter::Modify(field) => lookup(modify_row, field, "object value")?,
            };
            if self.bind_parameters {
                values.push(value);
                sql.push_str(&dialect.placeholder(values.len()));
            } else {
                sql.push_str(&value.to_sql_literal());
            }
        }
        Ok((sql, values))
    }
}

fn lookup(row: Option<&Row>, field: &DatabaseField, what: &str) -> crate::Result<Value> {
    row.and_then(|r| r.get_field(field)).cloned().ok_or_else(|| {
        QueryError::new(
            QueryErrorKind::MissingArgument,
            format!("no {what} for {field}"),
        )
        .with_field(field.qualified_name())
        .into()
    })
}
