//! Execution boundary.
//!
//! An [`Accessor`] runs the SQL produced by statement plans. Operations take
//! an asupersync `Cx` for cancellation and timeouts and report an `Outcome`.

use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Runs translated SQL against a database.
///
/// Statements of a plan arrive in plan order; the accessor must not reorder
/// them.
///
/// # Example
///
/// ```rust,ignore
/// let rows = accessor.query(&cx, "SELECT EMP_ID FROM EMPLOYEE WHERE EMP_ID = $1", &[Value::BigInt(1)]).await;
/// ```
pub trait Accessor: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement and return the number of rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, crate::Error>> + Send {
        async move {
            match self.query(cx, sql, params).await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}
