//! In-memory conformance.
//!
//! Evaluates a selection criteria against an already built object, so that
//! reads can be answered from, or merged with, the session cache. Only
//! object-level expressions are understood; anything that needs the
//! database (raw columns, functions, sub-selects, to-many traversal) makes
//! the result [`ConformResult::TooComplexToEvaluate`].

use crate::expr::{BinaryOp, Expr, UnaryOp};
use regex::Regex;
use relmap_core::{Attribute, Entity, Project, QueryError, QueryErrorKind, Result, Row, Value};
use std::cmp::Ordering;

/// Outcome of evaluating a criteria in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConformResult {
    Conforms,
    DoesNotConform,
    TooComplexToEvaluate,
}

impl ConformResult {
    pub fn conforms(self) -> bool {
        self == ConformResult::Conforms
    }

    /// Decide a too-complex result. Cache-only reads cannot fall back to
    /// the database, so for them it is an error; otherwise the object is
    /// treated as not conforming.
    pub fn into_result(self, cache_only: bool, entity: &str) -> Result<bool> {
        match self {
            ConformResult::Conforms => Ok(true),
            ConformResult::DoesNotConform => Ok(false),
            ConformResult::TooComplexToEvaluate if cache_only => Err(QueryError::new(
                QueryErrorKind::CannotConformExpression,
                format!("criteria on {entity} cannot be evaluated against cached objects"),
            )
            .for_entity(entity)
            .into()),
            ConformResult::TooComplexToEvaluate => Ok(false),
        }
    }
}

struct TooComplex;

type Eval<T> = std::result::Result<T, TooComplex>;

/// What an attribute path reaches on an object.
enum Reached<'e> {
    Object(&'e Entity),
    /// An empty one-to-one somewhere along the path.
    Absent,
    Value(Value),
}

/// Evaluates criteria against entities of a project.
pub struct Conformer<'a> {
    project: &'a Project,
}

impl<'a> Conformer<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self { project }
    }

    /// Does `object` satisfy `criteria`? Parameters are read from
    /// `translation_row`.
    pub fn conforms(
        &self,
        criteria: &Expr,
        object: &Entity,
        translation_row: Option<&Row>,
    ) -> ConformResult {
        match self.truth(criteria, object, translation_row) {
            Ok(Some(true)) => ConformResult::Conforms,
            Ok(_) => ConformResult::DoesNotConform,
            Err(TooComplex) => ConformResult::TooComplexToEvaluate,
        }
    }

    /// Three-valued truth of a predicate; `None` is SQL unknown.
    fn truth(&self, expr: &Expr, object: &Entity, row: Option<&Row>) -> Eval<Option<bool>> {
        match expr {
            Expr::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let l = self.truth(left, object, row)?;
                let r = self.truth(right, object, row)?;
                Ok(match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                })
            }
            Expr::Binary {
                left,
                op: BinaryOp::Or,
                right,
            } => {
                let l = self.truth(left, object, row)?;
                let r = self.truth(right, object, row)?;
                Ok(match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                })
            }
            Expr::Binary { left, op, right } if op.is_comparison() => {
                let l = self.value(left, object, row)?;
                let r = self.value(right, object, row)?;
                compare(&l, *op, &r)
            }
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => Ok(self.truth(expr, object, row)?.map(|b| !b)),
            Expr::IsNull { expr, negated } => {
                let is_null = match expr.as_ref() {
                    Expr::Base { .. } | Expr::QueryKey { .. } => match self.reach(expr, object)? {
                        Reached::Absent => true,
                        Reached::Object(_) => false,
                        Reached::Value(v) => v.is_null(),
                    },
                    other => self.value(other, object, row)?.is_null(),
                };
                Ok(Some(is_null != *negated))
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let v = self.value(expr, object, row)?;
                if v.is_null() {
                    return Ok(None);
                }
                let mut saw_null = false;
                for candidate in values {
                    let c = self.value(candidate, object, row)?;
                    if c.is_null() {
                        saw_null = true;
                    } else if v.sql_eq(&c) {
                        return Ok(Some(!*negated));
                    }
                }
                Ok(if saw_null { None } else { Some(*negated) })
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = self.value(expr, object, row)?;
                let low = self.value(low, object, row)?;
                let high = self.value(high, object, row)?;
                let above = compare(&v, BinaryOp::Ge, &low)?;
                let below = compare(&v, BinaryOp::Le, &high)?;
                Ok(match (above, below) {
                    (Some(a), Some(b)) => Some((a && b) != *negated),
                    _ => None,
                })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let v = self.value(expr, object, row)?;
                let pattern = self.value(pattern, object, row)?;
                match (v.as_str(), pattern.as_str()) {
                    (Some(text), Some(pattern)) => {
                        let regex = like_regex(pattern).ok_or(TooComplex)?;
                        Ok(Some(regex.is_match(text) != *negated))
                    }
                    _ if v.is_null() || pattern.is_null() => Ok(None),
                    _ => Err(TooComplex),
                }
            }
            Expr::Literal(Value::Bool(b)) => Ok(Some(*b)),
            Expr::Literal(Value::Null) => Ok(None),
            _ => Err(TooComplex),
        }
    }

    fn value(&self, expr: &Expr, object: &Entity, row: Option<&Row>) -> Eval<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Parameter(field) => row
                .and_then(|r| r.get_field(field))
                .cloned()
                .ok_or(TooComplex),
            Expr::Base { .. } | Expr::QueryKey { .. } => match self.reach(expr, object)? {
                Reached::Value(v) => Ok(v),
                Reached::Absent => Ok(Value::Null),
                Reached::Object(_) => Err(TooComplex),
            },
            Expr::Binary { left, op, right } if op.is_arithmetic() => {
                let l = self.value(left, object, row)?;
                let r = self.value(right, object, row)?;
                arithmetic(&l, *op, &r)
            }
            Expr::Unary {
                op: UnaryOp::Neg,
                expr,
            } => match self.value(expr, object, row)? {
                Value::Null => Ok(Value::Null),
                v => match v.as_i64() {
                    Some(i) if !matches!(v, Value::Bool(_)) => Ok(Value::BigInt(-i)),
                    _ => v.as_f64().map(|f| Value::Double(-f)).ok_or(TooComplex),
                },
            },
            _ => Err(TooComplex),
        }
    }

    fn reach<'e>(&self, expr: &Expr, root: &'e Entity) -> Eval<Reached<'e>> {
        match expr {
            Expr::Base { .. } => Ok(Reached::Object(root)),
            Expr::QueryKey {
                base, name, any_of, ..
            } => {
                if *any_of {
                    return Err(TooComplex);
                }
                let owner = match self.reach(base, root)? {
                    Reached::Object(owner) => owner,
                    Reached::Absent => return Ok(Reached::Absent),
                    Reached::Value(_) => return Err(TooComplex),
                };
                let mapping = self
                    .project
                    .descriptor(owner.entity_name())
                    .and_then(|d| d.mapping(name));
                if mapping.is_some_and(|m| m.is_collection()) {
                    return Err(TooComplex);
                }
                match owner.get(name) {
                    Some(Attribute::Value(v)) => Ok(Reached::Value(v.clone())),
                    Some(Attribute::Object(Some(target))) => Ok(Reached::Object(target.as_ref())),
                    Some(Attribute::Object(None)) => Ok(Reached::Absent),
                    Some(Attribute::Aggregate(aggregate)) => Ok(Reached::Object(aggregate.as_ref())),
                    Some(Attribute::Collection(_) | Attribute::Unfetched) => Err(TooComplex),
                    None => match mapping {
                        Some(m) if m.is_direct() => Ok(Reached::Value(Value::Null)),
                        Some(m) if m.is_one_to_one() || m.is_aggregate() => Ok(Reached::Absent),
                        _ => Err(TooComplex),
                    },
                }
            }
            _ => Err(TooComplex),
        }
    }
}

fn compare(l: &Value, op: BinaryOp, r: &Value) -> Eval<Option<bool>> {
    if l.is_null() || r.is_null() {
        return Ok(None);
    }
    let result = match op {
        BinaryOp::Eq => l.sql_eq(r),
        BinaryOp::Ne => !l.sql_eq(r),
        _ => {
            let ordering = l.sql_cmp(r).ok_or(TooComplex)?;
            match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => return Err(TooComplex),
            }
        }
    };
    Ok(Some(result))
}

fn arithmetic(l: &Value, op: BinaryOp, r: &Value) -> Eval<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    if op == BinaryOp::Concat {
        return match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => Ok(Value::Text(format!("{a}{b}"))),
            _ => Err(TooComplex),
        };
    }
    let integers = |v: &Value| matches!(v, Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_));
    if integers(l) && integers(r) && op != BinaryOp::Div {
        let (a, b) = (l.as_i64().ok_or(TooComplex)?, r.as_i64().ok_or(TooComplex)?);
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            _ => None,
        };
        return result.map(Value::BigInt).ok_or(TooComplex);
    }
    let (a, b) = (l.as_f64().ok_or(TooComplex)?, r.as_f64().ok_or(TooComplex)?);
    match op {
        BinaryOp::Add => Ok(Value::Double(a + b)),
        BinaryOp::Sub => Ok(Value::Double(a - b)),
        BinaryOp::Mul => Ok(Value::Double(a * b)),
        BinaryOp::Div if b != 0.0 => Ok(Value::Double(a / b)),
        _ => Err(TooComplex),
    }
}

/// Anchored regex for a SQL LIKE pattern.
fn like_regex(pattern: &str) -> Option<Regex> {
    let mut body = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => body.push_str(".*"),
            '_' => body.push('.'),
            other => body.push_str(&regex::escape(&other.to_string())),
        }
    }
    body.push('$');
    Regex::new(&body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{ClassDescriptor, ClassRegistry, ContainerPolicy, DatabaseMapping, ProjectBuilder};
    use std::sync::Arc;

    fn project() -> Arc<Project> {
        ProjectBuilder::new()
            .descriptor(
                ClassDescriptor::new("Employee")
                    .table("EMPLOYEE")
                    .primary_key("EMPLOYEE.EMP_ID")
                    .with_mapping(DatabaseMapping::direct("id", "EMPLOYEE.EMP_ID"))
                    .with_mapping(DatabaseMapping::direct("name", "EMPLOYEE.NAME"))
                    .with_mapping(DatabaseMapping::direct("salary", "EMPLOYEE.SALARY"))
                    .with_mapping(DatabaseMapping::one_to_one(
                        "address",
                        "Address",
                        &[("EMPLOYEE.ADDR_ID", "ADDRESS.ADDRESS_ID")],
                    ))
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
                    .with_mapping(DatabaseMapping::direct("id", "PHONE.PHONE_ID")),
            )
            .build(&ClassRegistry::with_defaults())
            .unwrap()
    }

    fn bob() -> Entity {
        let address = Entity::new("Address")
            .with_value("id", 7_i64)
            .with_value("city", "Ottawa")
            .into_ref();
        Entity::new("Employee")
            .with_value("id", 1_i64)
            .with_value("name", "Bob")
            .with_value("salary", 50_000_i64)
            .with_object("address", Some(address))
            .with_collection("phones", ContainerPolicy::list().container_instance())
    }

    #[test]
    fn direct_and_one_to_one_comparisons() {
        let project = project();
        let conformer = Conformer::new(&project);
        let emp = Expr::base("Employee");
        let criteria = emp
            .clone()
            .get("name")
            .like("B%")
            .and(emp.clone().get("address").get("city").eq("Ottawa"))
            .and(emp.clone().get("salary").mul(2).gt(90_000));
        assert_eq!(conformer.conforms(&criteria, &bob(), None), ConformResult::Conforms);

        let miss = emp.clone().get("salary").between(1, 10);
        assert_eq!(conformer.conforms(&miss, &bob(), None), ConformResult::DoesNotConform);
    }

    #[test]
    fn null_relationships_and_unknowns() {
        let project = project();
        let conformer = Conformer::new(&project);
        let emp = Expr::base("Employee");
        let lonely = Entity::new("Employee")
            .with_value("id", 2_i64)
            .with_object("address", None);
        assert!(conformer
            .conforms(&emp.clone().get("address").is_null(), &lonely, None)
            .conforms());
        // city of a missing address is NULL, so the comparison is unknown
        assert_eq!(
            conformer.conforms(&emp.clone().get("address").get("city").eq("Ottawa"), &lonely, None),
            ConformResult::DoesNotConform
        );
        let either = emp
            .clone()
            .get("address")
            .get("city")
            .eq("Ottawa")
            .or(emp.clone().get("id").eq(2));
        assert!(conformer.conforms(&either, &lonely, None).conforms());
    }

    #[test]
    fn parameters_come_from_the_translation_row() {
        let project = project();
        let conformer = Conformer::new(&project);
        let emp = Expr::base("Employee");
        let criteria = emp.clone().get("id").eq(Expr::param("EMPLOYEE.EMP_ID"));
        let row = Row::empty().with("EMPLOYEE.EMP_ID", 1_i64);
        assert!(conformer.conforms(&criteria, &bob(), Some(&row)).conforms());
        assert_eq!(
            conformer.conforms(&criteria, &bob(), None),
            ConformResult::TooComplexToEvaluate
        );
    }

    #[test]
    fn to_many_and_functions_are_too_complex() {
        let project = project();
        let conformer = Conformer::new(&project);
        let emp = Expr::base("Employee");
        let to_many = emp.clone().any_of("phones").get("id").eq(1);
        assert_eq!(
            conformer.conforms(&to_many, &bob(), None),
            ConformResult::TooComplexToEvaluate
        );
        let function = emp.clone().get("name").upper().eq("BOB");
        let result = conformer.conforms(&function, &bob(), None);
        assert_eq!(result, ConformResult::TooComplexToEvaluate);
        assert!(!result.into_result(false, "Employee").unwrap());
        let err = result.into_result(true, "Employee").unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::CannotConformExpression));
    }

    #[test]
    fn like_escapes_regex_metacharacters() {
        let regex = like_regex("a.b%").unwrap();
        assert!(regex.is_match("a.bcd"));
        assert!(!regex.is_match("axbcd"));
    }
}
