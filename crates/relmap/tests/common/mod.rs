//! Shared fixtures for the relmap integration tests.

#![allow(dead_code)]

use indexmap::IndexMap;
use relmap::prelude::*;
use relmap::{ContainerPolicy, ExpressionQueryMechanism, KeyMapping, Project};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Default)]
struct ScriptState {
    /// Canned results by SQL prefix, consumed in order.
    responses: IndexMap<String, VecDeque<Vec<Row>>>,
    executed: Vec<(String, Vec<Value>)>,
}

/// Accessor that records every statement and answers selects from canned
/// results. Every statement reports one affected row.
#[derive(Default)]
pub struct ScriptedAccessor {
    state: Mutex<ScriptState>,
}

impl ScriptedAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next select starting with `prefix` with `rows`.
    pub fn respond(&self, prefix: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(prefix.to_string())
            .or_default()
            .push_back(rows);
    }

    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|(sql, _)| sql).collect()
    }
}

impl Accessor for ScriptedAccessor {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let mut state = self.state.lock().unwrap();
        state.executed.push((sql.to_string(), params.to_vec()));
        let rows = state
            .responses
            .iter_mut()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_default();
        async move { Outcome::Ok(rows) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.state
            .lock()
            .unwrap()
            .executed
            .push((sql.to_string(), params.to_vec()));
        async { Outcome::Ok(1) }
    }
}

/// Employees on two tables with an address, phones keyed by phone type, and
/// a small vehicle hierarchy.
pub fn project() -> Arc<Project> {
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
                ))
                .with_mapping(
                    DatabaseMapping::one_to_many(
                        "phones",
                        "Phone",
                        &[("PHONE.EMP_ID", "EMPLOYEE.EMP_ID")],
                    )
                    .with_container(ContainerPolicy::map_by_mapping(KeyMapping::entity(
                        "PhoneType",
                        &["PHONE.TYPE_ID"],
                    ))),
                ),
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
                .with_mapping(DatabaseMapping::direct("id", "PHONE.PHONE_ID"))
                .with_mapping(DatabaseMapping::direct("number", "PHONE.NUM"))
                .with_mapping(DatabaseMapping::one_to_one(
                    "kind",
                    "PhoneType",
                    &[("PHONE.TYPE_ID", "PHONE_TYPE.TYPE_ID")],
                )),
        )
        .descriptor(
            ClassDescriptor::new("PhoneType")
                .table("PHONE_TYPE")
                .primary_key("PHONE_TYPE.TYPE_ID")
                .with_mapping(DatabaseMapping::direct("id", "PHONE_TYPE.TYPE_ID"))
                .with_mapping(DatabaseMapping::direct("label", "PHONE_TYPE.LABEL")),
        )
        .descriptor(
            ClassDescriptor::new("Vehicle")
                .table("VEHICLE")
                .primary_key("VEHICLE.VEH_ID")
                .class_indicator("VEHICLE.KIND")
                .indicator_value("V")
                .with_mapping(DatabaseMapping::direct("id", "VEHICLE.VEH_ID"))
                .with_mapping(DatabaseMapping::direct("make", "VEHICLE.MAKE")),
        )
        .descriptor(ClassDescriptor::new("Car").inherits_from("Vehicle").indicator_value("C"))
        .build(&ClassRegistry::with_defaults())
        .expect("fixture project is valid")
}

/// Result rows laid out in the select-list order of `query`'s plan. Columns
/// not named in `data` are null.
pub fn rows_for(project: &Project, query: &ReadAllQuery, data: &[&[(&str, Value)]]) -> Vec<Row> {
    let platform = DatabasePlatform::postgres();
    let plan = ExpressionQueryMechanism::new(project, &platform, query.entity())
        .and_then(|m| m.prepare_select_all_rows(query))
        .expect("fixture query prepares");
    data.iter()
        .map(|columns| {
            let values = plan
                .fields
                .iter()
                .map(|f| {
                    columns
                        .iter()
                        .find(|(name, _)| *name == f.qualified_name())
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null)
                })
                .collect();
            Row::from_fields(&plan.fields, values)
        })
        .collect()
}

pub fn objects(container: &Container) -> Vec<ObjectRef> {
    container
        .elements()
        .filter_map(|e| e.as_object().cloned())
        .collect()
}
