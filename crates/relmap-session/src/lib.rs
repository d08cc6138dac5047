//! Session, identity map and unit of work for relmap.
//!
//! `relmap-session` is the **execution layer**. It runs the statements the
//! query mechanism prepares through an `Accessor` and turns result rows back
//! into managed objects.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one `ObjectRef` per (hierarchy root, primary key).
//! - **Unit of work**: new and deleted objects, by reference identity.
//! - **Object building**: entities from rows, join-fetched one-to-one
//!   objects from trimmed sub-rows, join-fetched collections through the
//!   mapping's container policy.
//! - **Cache semantics**: primary-key short-circuits, in-memory conformance,
//!   invalidation after bulk operations.
//!
//! # Design Philosophy
//!
//! - **Immutable objects**: an update stores a new `ObjectRef` under the
//!   same key; callers holding the old one keep a consistent snapshot.
//! - **Explicit execution**: every write runs immediately; there is no flush.
//! - **Cancel-correct**: all async operations take `Cx` and return `Outcome`.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(project, DatabasePlatform::postgres(), accessor);
//!
//! let emp = Expr::base("Employee");
//! let query = ReadAllQuery::new("Employee")
//!     .with_builder(emp.clone())
//!     .filter(emp.get("name").eq("Bob"));
//! let employees = session.read_all(&cx, &query, &Row::empty()).await;
//! ```

mod build;
pub mod cache;
pub mod identity_map;
pub mod unit_of_work;

pub use cache::SessionView;
pub use identity_map::{IdentityMap, ObjectKey};
pub use unit_of_work::{PendingCounts, UnitOfWork};

use asupersync::{Cx, Outcome};
use build::ObjectBuilder;
use cache::{hierarchy_names, object_key};
use relmap_core::{
    Accessor, Attribute, ClassDescriptor, Container, ContainerPolicy, DatabaseField,
    DatabasePlatform, Element, Entity, Error, ObjectRef, Project, QueryError, QueryErrorKind,
    Result, Row, SessionCache, TypeError, Value, VectorItem,
};
use relmap_query::{
    CacheLookup, CacheUsage, Conformer, DeleteAllQuery, Expr, ExpressionQueryMechanism,
    ReadAllQuery, ReadObjectQuery, ReadPlan, ReportQuery, UpdateAllQuery, run_select,
};
use std::sync::Arc;

/// Unwrap an `Outcome`, returning early on anything but `Ok`.
macro_rules! try_outcome {
    ($e:expr) => {
        match $e {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside an `Outcome`-returning function.
macro_rules! try_result {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        }
    };
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Keep one row per owner in reads with a to-many join.
    pub filter_duplicates: bool,
    /// Read entity map keys that are not cached before building a joined
    /// map keyed by them.
    pub prefetch_map_keys: bool,
    /// Drop cached objects of the target hierarchy after delete-all and
    /// update-all.
    pub invalidate_after_bulk: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            filter_duplicates: true,
            prefetch_map_keys: true,
            invalidate_after_bulk: true,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Executes queries against one accessor and keeps the objects it builds.
pub struct Session<A: Accessor> {
    project: Arc<Project>,
    platform: DatabasePlatform,
    accessor: A,
    identity_map: IdentityMap,
    unit_of_work: UnitOfWork,
    config: SessionConfig,
}

impl<A: Accessor> std::fmt::Debug for Session<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("platform", &self.platform.name())
            .field("cached", &self.identity_map.len())
            .field("pending", &self.unit_of_work.pending_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A: Accessor> Session<A> {
    /// Create a new session.
    pub fn new(project: Arc<Project>, platform: DatabasePlatform, accessor: A) -> Self {
        Self::with_config(project, platform, accessor, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(
        project: Arc<Project>,
        platform: DatabasePlatform,
        accessor: A,
        config: SessionConfig,
    ) -> Self {
        Self {
            project,
            platform,
            accessor,
            identity_map: IdentityMap::new(),
            unit_of_work: UnitOfWork::new(),
            config,
        }
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn platform(&self) -> &DatabasePlatform {
        &self.platform
    }

    /// Get a reference to the underlying accessor.
    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    /// The cache as the query layer sees it.
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            project: &self.project,
            identity_map: &self.identity_map,
            unit_of_work: &self.unit_of_work,
        }
    }

    /// Register an object that is not in the database yet. It takes part in
    /// `ConformInUnitOfWork` and cache-only reads until it is inserted.
    pub fn register_new(&mut self, object: Entity) -> ObjectRef {
        let object = object.into_ref();
        self.unit_of_work.register_new(&object);
        object
    }

    /// Is `object` the instance this session holds for its key?
    pub fn contains(&self, object: &ObjectRef) -> bool {
        let Some(key) = self.key_of(object).ok().flatten() else {
            return false;
        };
        self.identity_map
            .get(&key)
            .is_some_and(|cached| Arc::ptr_eq(&cached, object))
    }

    /// Forget every cached object and all unit-of-work membership.
    pub fn expunge_all(&mut self) {
        self.identity_map.clear();
        self.unit_of_work.clear();
    }

    fn key_of(&self, object: &Entity) -> Result<Option<ObjectKey>> {
        let descriptor = self.project.require(object.entity_name())?;
        match descriptor.primary_key_of(object) {
            Some(pk) => object_key(&self.project, object.entity_name(), &pk).map(Some),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read every object matching the query, collected by the query's
    /// container policy.
    ///
    /// `args` is the translation row for query parameters.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = query.entity()))]
    pub async fn read_all(&mut self, cx: &Cx, query: &ReadAllQuery, args: &Row) -> Outcome<Container, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, query.entity()));
        let usage = query.cache_usage_kind();

        if usage == CacheUsage::CheckCacheOnly {
            let objects = try_result!(self.conforming(&project, query.entity(), query.criteria(), args, true));
            tracing::debug!(objects = objects.len(), "answered from cache");
            return Outcome::Ok(try_result!(self.container_for(query.container_policy(), objects)));
        }

        let plan = try_result!(mechanism.prepare_select_all_rows(query));
        let mut objects = try_outcome!(self.select_objects(cx, mechanism, plan, args).await);

        if usage == CacheUsage::ConformInUnitOfWork {
            let registered = try_result!(self.conforming(&project, query.entity(), query.criteria(), args, false));
            for object in registered {
                if !objects.iter().any(|o| Arc::ptr_eq(o, &object)) {
                    objects.push(object);
                }
            }
        }
        tracing::debug!(objects = objects.len(), "read objects");
        Outcome::Ok(try_result!(self.container_for(query.container_policy(), objects)))
    }

    /// Read one object. With a primary-key cache usage the identity map is
    /// consulted first; an object deleted in this session reads as `None`.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = query.entity()))]
    pub async fn read_object(
        &mut self,
        cx: &Cx,
        query: &ReadObjectQuery,
        args: &Row,
    ) -> Outcome<Option<ObjectRef>, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, query.entity()));
        let usage = query.cache_usage_kind();

        if matches!(usage, CacheUsage::CheckCacheByPrimaryKey | CacheUsage::CheckCacheOnly) {
            match mechanism.check_cache_for_object(query.criteria(), Some(args), &self.view()) {
                CacheLookup::Found(object) => {
                    tracing::trace!("cache hit");
                    return Outcome::Ok(Some(object));
                }
                CacheLookup::Deleted => return Outcome::Ok(None),
                CacheLookup::Unknown => {}
            }
        }
        if usage == CacheUsage::CheckCacheOnly {
            let objects = try_result!(self.conforming(&project, query.entity(), query.criteria(), args, true));
            return Outcome::Ok(objects.into_iter().next());
        }

        let plan = try_result!(mechanism.prepare_select_one_row(query));
        let objects = try_outcome!(self.select_objects(cx, mechanism, plan, args).await);
        Outcome::Ok(objects.into_iter().next())
    }

    /// Does a row with the object's primary key exist? A cached object
    /// answers without a query.
    pub async fn does_exist(&mut self, cx: &Cx, object: &Entity) -> Outcome<bool, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let descriptor = try_result!(project.require(object.entity_name()));
        let Some(key) = try_result!(self.key_of(object)) else {
            return Outcome::Ok(false);
        };
        if let Some(cached) = self.identity_map.get(&key) {
            return Outcome::Ok(!self.unit_of_work.is_deleted(&cached));
        }
        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, object.entity_name()));
        let select = try_result!(mechanism.prepare_does_exist());
        let row = try_result!(project.build_row(descriptor, object));
        let rows = try_outcome!(run_select(cx, &self.accessor, &platform, &select, &row).await);
        Outcome::Ok(!rows.is_empty())
    }

    /// Run a report query. Rows are labelled with the report item names.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = query.entity()))]
    pub async fn report(&mut self, cx: &Cx, query: &ReportQuery, args: &Row) -> Outcome<Vec<Row>, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, query.entity()));
        let plan = try_result!(mechanism.prepare_report_query_select_all_rows(query));
        let rows = try_outcome!(run_select(cx, &self.accessor, &platform, &plan.select, args).await);
        Outcome::Ok(plan.label_rows(rows))
    }

    /// Execute a prepared read and build its objects. Objects deleted in
    /// this session are left out.
    async fn select_objects(
        &mut self,
        cx: &Cx,
        mechanism: ExpressionQueryMechanism<'_>,
        mut plan: ReadPlan,
        args: &Row,
    ) -> Outcome<Vec<ObjectRef>, Error> {
        let project = mechanism.project();
        let platform = mechanism.platform();
        let descriptor = mechanism.descriptor();
        plan.joined.set_should_filter_duplicates(self.config.filter_duplicates);

        let rows = try_outcome!(run_select(cx, &self.accessor, platform, &plan.select, args).await);
        let rows = plan.label_rows(rows);
        if self.config.prefetch_map_keys {
            try_outcome!(self.prefetch_map_keys(cx, project, platform, &plan, &rows).await);
        }
        let slots = try_result!(plan.joined.process_data_results(descriptor, rows));

        let mut builder = ObjectBuilder::new(project, &mut self.identity_map, &self.unit_of_work);
        let mut objects = try_result!(builder.build_all(descriptor, &plan.joined, &slots));
        objects.retain(|o| !self.unit_of_work.is_deleted(o));
        Outcome::Ok(objects)
    }

    /// Read the entity keys of join-fetched maps that the identity map does
    /// not hold yet, with one `pk IN (...)` select per map.
    async fn prefetch_map_keys(
        &mut self,
        cx: &Cx,
        project: &Project,
        platform: &DatabasePlatform,
        plan: &ReadPlan,
        rows: &[Row],
    ) -> Outcome<(), Error> {
        for joined in plan.joined.joined_attributes() {
            let Some(policy) = joined.mapping.container_policy() else {
                continue;
            };
            let Some(reference) = policy.key_reference() else {
                continue;
            };
            let Some(index) = plan.joined.joined_mapping_indexes().get(&joined.key()).copied() else {
                continue;
            };
            let key_fields = policy.additional_fields_for_join();
            let mut missing: Vec<Vec<Value>> = Vec::new();
            for row in rows {
                let slice = row.slice(index.offset, index.width);
                let Some(values) = slice.values_for(&key_fields) else {
                    continue;
                };
                if values.iter().any(Value::is_null)
                    || missing.contains(&values)
                    || self.view().get_by_primary_key(reference, &values).is_some()
                {
                    continue;
                }
                missing.push(values);
            }
            if missing.is_empty() {
                continue;
            }

            let target = try_result!(project.require(reference));
            let query = ReadAllQuery::new(reference);
            let Some(condition) = key_condition(query.builder(), target.primary_key_fields(), &missing) else {
                continue;
            };
            let query = query.filter(condition);
            tracing::debug!(entity = reference, keys = missing.len(), "prefetching map keys");

            let mechanism = try_result!(ExpressionQueryMechanism::new(project, platform, reference));
            let mut key_plan = try_result!(mechanism.prepare_select_all_rows(&query));
            let key_rows = try_outcome!(run_select(cx, &self.accessor, platform, &key_plan.select, &Row::empty()).await);
            let key_rows = key_plan.label_rows(key_rows);
            let slots = try_result!(key_plan.joined.process_data_results(target, key_rows));
            let mut builder = ObjectBuilder::new(project, &mut self.identity_map, &self.unit_of_work);
            try_result!(builder.build_all(target, &key_plan.joined, &slots));
        }
        Outcome::Ok(())
    }

    /// Cached (optionally) and new objects of `entity` that satisfy
    /// `criteria`. Deleted objects never conform.
    fn conforming(
        &self,
        project: &Project,
        entity: &str,
        criteria: Option<&Expr>,
        args: &Row,
        include_cached: bool,
    ) -> Result<Vec<ObjectRef>> {
        let view = self.view();
        let mut candidates = if include_cached {
            view.cached_objects(entity)
        } else {
            Vec::new()
        };
        for object in view.new_objects(entity) {
            if !candidates.iter().any(|c| Arc::ptr_eq(c, &object)) {
                candidates.push(object);
            }
        }

        let conformer = Conformer::new(project);
        let mut matched = Vec::new();
        for object in candidates {
            if view.is_deleted_object(&object) {
                continue;
            }
            let conforms = match criteria {
                None => true,
                Some(criteria) => conformer
                    .conforms(criteria, &object, Some(args))
                    .into_result(include_cached, entity)?,
            };
            if conforms {
                matched.push(object);
            }
        }
        Ok(matched)
    }

    fn container_for(&self, policy: &ContainerPolicy, objects: Vec<ObjectRef>) -> Result<Container> {
        let items = objects
            .into_iter()
            .map(|o| VectorItem::Element(Element::Object(o)))
            .collect();
        policy.build_container_from_vector(items, &self.view())
    }

    // ========================================================================
    // Object writes
    // ========================================================================

    /// Insert an object and cache it. A missing version starts at 1.
    /// Returns the managed instance, which differs from `object` when the
    /// version had to be filled in.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = object.entity_name()))]
    pub async fn insert(&mut self, cx: &Cx, object: &ObjectRef) -> Outcome<ObjectRef, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let descriptor = try_result!(project.require(object.entity_name()));
        let Some(key) = try_result!(self.key_of(object)) else {
            return Outcome::Err(missing_primary_key(descriptor));
        };

        let mut stored = Arc::clone(object);
        let mut row = try_result!(project.build_row(descriptor, object));
        if let Some(version) = descriptor.version_field() {
            if row.get_field(version).is_none_or(Value::is_null) {
                let initial = Value::BigInt(1);
                row.put(version, initial.clone());
                if let Some(attribute) = descriptor.direct_attribute_for_field(version) {
                    let mut versioned = (**object).clone();
                    versioned.set(attribute, Attribute::Value(initial));
                    stored = versioned.into_ref();
                }
            }
        }

        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, object.entity_name()));
        let plan = try_result!(mechanism.prepare_insert_object());
        try_outcome!(plan.execute(cx, &self.accessor, &platform, None, Some(&row)).await);

        self.unit_of_work.unregister_new(object);
        self.identity_map.replace(key, Arc::clone(&stored));
        Outcome::Ok(stored)
    }

    /// Write the fields of `object` that differ from the cached instance and
    /// cache the new version. A versioned update that matches no row fails
    /// with `QueryErrorKind::OptimisticLock`.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = object.entity_name()))]
    pub async fn update(&mut self, cx: &Cx, object: Entity) -> Outcome<ObjectRef, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let descriptor = try_result!(project.require(object.entity_name()));
        let Some(key) = try_result!(self.key_of(&object)) else {
            return Outcome::Err(missing_primary_key(descriptor));
        };
        let original = self.identity_map.get(&key);

        let original_row = try_result!(project.build_row(descriptor, original.as_deref().unwrap_or(&object)));
        let mut modify_row = try_result!(project.build_row(descriptor, &object));
        let modified: Vec<DatabaseField> = descriptor
            .selection_fields()
            .iter()
            .filter(|f| !is_key_or_version(descriptor, f))
            .filter(|f| match modify_row.get_field(f) {
                None => false,
                Some(_) if original.is_none() => true,
                Some(value) => original_row.get_field(f) != Some(value),
            })
            .cloned()
            .collect();
        if modified.is_empty() {
            tracing::trace!("nothing to update");
            return Outcome::Ok(original.unwrap_or_else(|| object.into_ref()));
        }

        let mut object = object;
        if let Some(version) = descriptor.version_field() {
            let current = original_row.get_field(version).cloned().unwrap_or(Value::Null);
            let next = try_result!(next_version(version, &current));
            modify_row.put(version, next.clone());
            if let Some(attribute) = descriptor.direct_attribute_for_field(version) {
                object.set(attribute, Attribute::Value(next));
            }
        }

        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, object.entity_name()));
        let calls = try_result!(mechanism.prepare_update_object(&modified));
        let mut affected = 0;
        for call in calls.iter() {
            let (sql, params) = try_result!(call.translate(Some(&original_row), Some(&modify_row), platform.dialect()));
            tracing::trace!(sql = %sql, "update");
            affected += try_outcome!(self.accessor.execute(cx, &sql, &params).await);
        }
        if descriptor.version_field().is_some() && affected == 0 {
            let pk = descriptor.primary_key_of(&object).unwrap_or_default();
            return Outcome::Err(QueryError::optimistic_lock(descriptor.entity_name(), &pk).into());
        }

        let stored = object.into_ref();
        self.identity_map.replace(key, Arc::clone(&stored));
        Outcome::Ok(stored)
    }

    /// Delete an object. A new object that was never inserted is only
    /// forgotten. Returns the rows deleted.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = object.entity_name()))]
    pub async fn delete(&mut self, cx: &Cx, object: &ObjectRef) -> Outcome<u64, Error> {
        if self.unit_of_work.is_new(object) {
            self.unit_of_work.register_deleted(object);
            return Outcome::Ok(0);
        }
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let descriptor = try_result!(project.require(object.entity_name()));
        let row = try_result!(project.build_row(descriptor, object));

        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, object.entity_name()));
        let plan = try_result!(mechanism.prepare_delete_object());
        let affected = try_outcome!(plan.execute(cx, &self.accessor, &platform, Some(&row), None).await);
        if descriptor.version_field().is_some() && affected == 0 {
            let pk = descriptor.primary_key_of(object).unwrap_or_default();
            return Outcome::Err(QueryError::optimistic_lock(descriptor.entity_name(), &pk).into());
        }
        self.unit_of_work.register_deleted(object);
        Outcome::Ok(affected)
    }

    // ========================================================================
    // Bulk writes
    // ========================================================================

    /// Delete every object matching the query's criteria. Cached objects of
    /// the entity and its subclasses are dropped afterwards.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = query.entity()))]
    pub async fn delete_all(&mut self, cx: &Cx, query: &DeleteAllQuery, args: &Row) -> Outcome<u64, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, query.entity()));
        let plan = try_result!(mechanism.prepare_delete_all(query));
        let affected = try_outcome!(plan.execute(cx, &self.accessor, &platform, Some(args), None).await);
        let invalidated = self.invalidate(&project, query.entity());
        tracing::info!(
            entity = query.entity(),
            strategy = ?plan.strategy(),
            affected,
            invalidated,
            "delete-all"
        );
        Outcome::Ok(affected)
    }

    /// Apply the query's assignments to every matching row. Cached objects
    /// of the entity and its subclasses are dropped afterwards.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = query.entity()))]
    pub async fn update_all(&mut self, cx: &Cx, query: &UpdateAllQuery, args: &Row) -> Outcome<u64, Error> {
        let project = Arc::clone(&self.project);
        let platform = self.platform.clone();
        let mechanism = try_result!(ExpressionQueryMechanism::new(&project, &platform, query.entity()));
        let plan = try_result!(mechanism.prepare_update_all(query));
        let affected = try_outcome!(plan.execute(cx, &self.accessor, &platform, Some(args), None).await);
        let invalidated = self.invalidate(&project, query.entity());
        tracing::info!(
            entity = query.entity(),
            strategy = ?plan.strategy(),
            affected,
            invalidated,
            "update-all"
        );
        Outcome::Ok(affected)
    }

    fn invalidate(&mut self, project: &Project, entity: &str) -> usize {
        if !self.config.invalidate_after_bulk {
            return 0;
        }
        self.identity_map.invalidate(&hierarchy_names(project, entity))
    }
}

impl<A: Accessor> SessionCache for Session<A> {
    fn get_by_primary_key(&self, entity: &str, primary_key: &[Value]) -> Option<ObjectRef> {
        self.view().get_by_primary_key(entity, primary_key)
    }

    fn cached_objects(&self, entity: &str) -> Vec<ObjectRef> {
        self.view().cached_objects(entity)
    }

    fn new_objects(&self, entity: &str) -> Vec<ObjectRef> {
        self.view().new_objects(entity)
    }

    fn is_new_object(&self, object: &ObjectRef) -> bool {
        self.unit_of_work.is_new(object)
    }

    fn is_deleted_object(&self, object: &ObjectRef) -> bool {
        self.unit_of_work.is_deleted(object)
    }
}

/// `pk IN (...)` for a single-column key, an OR of conjunctions otherwise.
fn key_condition(builder: &Expr, pk: &[DatabaseField], keys: &[Vec<Value>]) -> Option<Expr> {
    if let [field] = pk {
        let values: Vec<Value> = keys.iter().filter_map(|k| k.first().cloned()).collect();
        return Some(builder.clone().field(field.clone()).in_list(values));
    }
    Expr::or_all(keys.iter().filter_map(|key| {
        Expr::and_all(
            pk.iter()
                .zip(key)
                .map(|(field, value)| builder.clone().field(field.clone()).eq(Expr::lit(value.clone()))),
        )
    }))
}

fn is_key_or_version(descriptor: &ClassDescriptor, field: &DatabaseField) -> bool {
    descriptor.primary_key_fields().contains(field)
        || descriptor.version_field() == Some(field)
        || descriptor
            .tables()
            .iter()
            .skip(1)
            .any(|t| descriptor.additional_table_pk(t).iter().any(|(secondary, _)| secondary == field))
}

fn next_version(field: &DatabaseField, current: &Value) -> Result<Value> {
    let next = match current {
        Value::Null => Some(Value::BigInt(1)),
        Value::SmallInt(v) => v.checked_add(1).map(Value::SmallInt),
        Value::Int(v) => v.checked_add(1).map(Value::Int),
        Value::BigInt(v) => v.checked_add(1).map(Value::BigInt),
        _ => None,
    };
    next.ok_or_else(|| {
        Error::Type(TypeError {
            expected: "integer version below its type's maximum",
            actual: format!("{current:?}"),
            column: Some(field.qualified_name()),
        })
    })
}

fn missing_primary_key(descriptor: &ClassDescriptor) -> Error {
    QueryError::new(
        QueryErrorKind::InvalidExpression,
        format!("{} object has no primary key", descriptor.entity_name()),
    )
    .for_entity(descriptor.entity_name())
    .into()
}


#[cfg(test)]
#[allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use relmap_core::{ClassRegistry, DatabaseMapping, JoinFetch, ProjectBuilder};
    use relmap_query::OrderItem;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        results: VecDeque<Vec<Row>>,
        executed: Vec<(String, Vec<Value>)>,
        affected: u64,
    }

    struct MockAccessor {
        state: Mutex<MockState>,
    }

    impl MockAccessor {
        fn new() -> Self {
            Self {
                state: Mutex::new(MockState {
                    affected: 1,
                    ..MockState::default()
                }),
            }
        }

        fn push_result(&self, rows: Vec<Row>) {
            self.state.lock().unwrap().results.push_back(rows);
        }

        fn set_affected(&self, affected: u64) {
            self.state.lock().unwrap().affected = affected;
        }

        fn executed(&self) -> Vec<(String, Vec<Value>)> {
            self.state.lock().unwrap().executed.clone()
        }
    }

    impl Accessor for MockAccessor {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            let mut state = self.state.lock().unwrap();
            state.executed.push((sql.to_string(), params.to_vec()));
            let rows = state.results.pop_front().unwrap_or_default();
            async move { Outcome::Ok(rows) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            let mut state = self.state.lock().unwrap();
            state.executed.push((sql.to_string(), params.to_vec()));
            let affected = state.affected;
            async move { Outcome::Ok(affected) }
        }
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn project() -> Arc<Project> {
        ProjectBuilder::new()
            .descriptor(
                ClassDescriptor::new("Employee")
                    .table("EMPLOYEE")
                    .table("SALARY")
                    .primary_key("EMPLOYEE.EMP_ID")
                    .with_version_field("EMPLOYEE.VERSION")
                    .with_mapping(DatabaseMapping::direct("id", "EMPLOYEE.EMP_ID"))
                    .with_mapping(DatabaseMapping::direct("name", "EMPLOYEE.NAME"))
                    .with_mapping(DatabaseMapping::direct("version", "EMPLOYEE.VERSION"))
                    .with_mapping(DatabaseMapping::direct("salary", "SALARY.AMOUNT"))
                    .with_mapping(
                        DatabaseMapping::one_to_one(
                            "address",
                            "Address",
                            &[("EMPLOYEE.ADDR_ID", "ADDRESS.ADDRESS_ID")],
                        )
                        .join_fetch(JoinFetch::Outer),
                    )
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
                    .with_mapping(DatabaseMapping::direct("id", "PHONE.PHONE_ID"))
                    .with_mapping(DatabaseMapping::direct("number", "PHONE.NUM")),
            )
            .build(&ClassRegistry::with_defaults())
            .unwrap()
    }

    fn session() -> Session<MockAccessor> {
        Session::new(project(), DatabasePlatform::postgres(), MockAccessor::new())
    }

    /// Result rows in the select-list order of `query`'s plan. Columns not
    /// named in `data` are null.
    fn rows_for(project: &Project, query: &ReadAllQuery, data: &[&[(&str, Value)]]) -> Vec<Row> {
        let platform = DatabasePlatform::postgres();
        let plan = ExpressionQueryMechanism::new(project, &platform, query.entity())
            .unwrap()
            .prepare_select_all_rows(query)
            .unwrap();
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

    fn bob() -> Vec<(&'static str, Value)> {
        vec![
            ("EMPLOYEE.EMP_ID", 1_i64.into()),
            ("EMPLOYEE.NAME", "Bob".into()),
            ("EMPLOYEE.ADDR_ID", 10_i64.into()),
            ("EMPLOYEE.VERSION", 1_i64.into()),
            ("SALARY.AMOUNT", 500_i64.into()),
            ("ADDRESS.ADDRESS_ID", 10_i64.into()),
            ("ADDRESS.CITY", "Ottawa".into()),
        ]
    }

    fn by_name(name: &str) -> ReadAllQuery {
        let emp = Expr::base("Employee");
        ReadAllQuery::new("Employee")
            .with_builder(emp.clone())
            .filter(emp.get("name").eq(name))
    }

    fn by_id(id: i64) -> ReadObjectQuery {
        let emp = Expr::base("Employee");
        ReadObjectQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.get("id").eq(id))
    }

    fn objects(container: &Container) -> Vec<ObjectRef> {
        container
            .elements()
            .filter_map(|e| e.as_object().cloned())
            .collect()
    }

    /// Read Bob through `session` so he is cached.
    async fn load_bob(cx: &Cx, session: &mut Session<MockAccessor>) -> ObjectRef {
        let query = by_name("Bob");
        let project = Arc::clone(session.project());
        session.accessor().push_result(rows_for(&project, &query, &[&bob()]));
        let container = unwrap_outcome(session.read_all(cx, &query, &Row::empty()).await);
        objects(&container).remove(0)
    }

    #[test]
    fn test_read_all_builds_joined_address_and_keeps_identity() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();

        let first = rt.block_on(load_bob(&cx, &mut session));
        assert_eq!(first.value("name"), Some(&Value::Text("Bob".into())));
        let address = first.object("address").expect("address is join-fetched");
        assert_eq!(address.value("city"), Some(&Value::Text("Ottawa".into())));
        assert!(matches!(first.get("phones"), Some(Attribute::Unfetched)));
        assert_eq!(session.identity_map().len(), 2);

        let again = rt.block_on(load_bob(&cx, &mut session));
        assert!(Arc::ptr_eq(&first, &again));
        assert!(session.contains(&first));

        let executed = session.accessor().executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].0.starts_with("SELECT t0.EMP_ID, t0.NAME"));
        assert_eq!(executed[0].1, vec![Value::Text("Bob".into())]);
    }

    #[test]
    fn test_to_many_join_groups_rows_by_owner() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let emp = Expr::base("Employee");
        let query = ReadAllQuery::new("Employee")
            .with_builder(emp.clone())
            .join(emp.clone().any_of_allowing_none("phones"))
            .order_by(OrderItem::asc(emp.get("id")));

        let mut first = bob();
        first.push(("PHONE.PHONE_ID", 100_i64.into()));
        first.push(("PHONE.NUM", "555-0100".into()));
        let mut second = bob();
        second.push(("PHONE.PHONE_ID", 101_i64.into()));
        second.push(("PHONE.NUM", "555-0101".into()));
        let project = Arc::clone(session.project());
        session
            .accessor()
            .push_result(rows_for(&project, &query, &[&first, &second]));

        let container = unwrap_outcome(rt.block_on(session.read_all(&cx, &query, &Row::empty())));
        let employees = objects(&container);
        assert_eq!(employees.len(), 1);
        let phones = employees[0].collection("phones").expect("phones are join-fetched");
        assert_eq!(phones.len(), 2);
        let numbers: Vec<_> = objects(phones)
            .iter()
            .map(|p| p.value("number").cloned())
            .collect();
        assert_eq!(
            numbers,
            vec![
                Some(Value::Text("555-0100".into())),
                Some(Value::Text("555-0101".into()))
            ]
        );
    }

    #[test]
    fn test_read_object_hits_the_cache_until_deleted() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let bob = rt.block_on(load_bob(&cx, &mut session));

        let found = unwrap_outcome(rt.block_on(session.read_object(&cx, &by_id(1), &Row::empty())));
        assert!(Arc::ptr_eq(&found.unwrap(), &bob));
        assert_eq!(session.accessor().executed().len(), 1);

        let deleted = unwrap_outcome(rt.block_on(session.delete(&cx, &bob)));
        assert_eq!(deleted, 2);
        assert!(session.unit_of_work().is_deleted(&bob));

        let after = unwrap_outcome(rt.block_on(session.read_object(&cx, &by_id(1), &Row::empty())));
        assert!(after.is_none());
        let executed = session.accessor().executed();
        assert_eq!(executed.len(), 3);
        assert!(executed[1].0.starts_with("DELETE FROM SALARY"));
        assert!(executed[2].0.starts_with("DELETE FROM EMPLOYEE"));
    }

    #[test]
    fn test_check_cache_only_never_queries() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let carol = session.register_new(
            Entity::new("Employee")
                .with_value("id", 5_i64)
                .with_value("name", "Carol"),
        );

        let query = by_name("Carol").cache_usage(CacheUsage::CheckCacheOnly);
        let container = unwrap_outcome(rt.block_on(session.read_all(&cx, &query, &Row::empty())));
        let found = objects(&container);
        assert_eq!(found.len(), 1);
        assert!(Arc::ptr_eq(&found[0], &carol));

        let emp = Expr::base("Employee");
        let too_complex = ReadAllQuery::new("Employee")
            .with_builder(emp.clone())
            .filter(emp.any_of("phones").get("number").eq("555-0100"))
            .cache_usage(CacheUsage::CheckCacheOnly);
        match rt.block_on(session.read_all(&cx, &too_complex, &Row::empty())) {
            Outcome::Err(e) => assert_eq!(e.query_kind(), Some(QueryErrorKind::CannotConformExpression)),
            other => panic!("expected a conform error, got {other:?}"),
        }
        assert!(session.accessor().executed().is_empty());
    }

    #[test]
    fn test_conform_in_unit_of_work_adds_new_objects() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let twin = session.register_new(
            Entity::new("Employee")
                .with_value("id", 7_i64)
                .with_value("name", "Bob"),
        );
        session.register_new(
            Entity::new("Employee")
                .with_value("id", 8_i64)
                .with_value("name", "Dave"),
        );

        let query = by_name("Bob").cache_usage(CacheUsage::ConformInUnitOfWork);
        let project = Arc::clone(session.project());
        session
            .accessor()
            .push_result(rows_for(&project, &query, &[&bob()]));
        let container = unwrap_outcome(rt.block_on(session.read_all(&cx, &query, &Row::empty())));
        let found = objects(&container);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].value("id"), Some(&Value::BigInt(1)));
        assert!(Arc::ptr_eq(&found[1], &twin));
    }

    #[test]
    fn test_insert_starts_the_version() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let carol = session.register_new(
            Entity::new("Employee")
                .with_value("id", 3_i64)
                .with_value("name", "Carol")
                .with_value("salary", 700_i64)
                .with_object("address", None),
        );

        let stored = unwrap_outcome(rt.block_on(session.insert(&cx, &carol)));
        assert_eq!(stored.value("version"), Some(&Value::BigInt(1)));
        assert!(session.contains(&stored));
        assert!(session.unit_of_work().pending_count().is_empty());

        let executed = session.accessor().executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].0.starts_with("INSERT INTO EMPLOYEE"));
        assert_eq!(
            executed[0].1,
            vec![
                Value::BigInt(3),
                Value::Text("Carol".into()),
                Value::Null,
                Value::BigInt(1)
            ]
        );
        assert!(executed[1].0.starts_with("INSERT INTO SALARY"));
    }

    #[test]
    fn test_update_writes_changed_fields_and_bumps_the_version() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let bob = rt.block_on(load_bob(&cx, &mut session));

        let mut renamed = (*bob).clone();
        renamed.set("name", Attribute::Value("Robert".into()));
        let stored = unwrap_outcome(rt.block_on(session.update(&cx, renamed)));
        assert_eq!(stored.value("version"), Some(&Value::BigInt(2)));
        assert!(!Arc::ptr_eq(&stored, &bob));
        assert!(session.contains(&stored));

        let executed = session.accessor().executed();
        assert_eq!(executed.len(), 2);
        let (sql, params) = &executed[1];
        assert!(sql.starts_with("UPDATE EMPLOYEE SET"));
        assert!(params.contains(&Value::Text("Robert".into())));
        assert!(params.contains(&Value::BigInt(2)));
        assert!(params.contains(&Value::BigInt(1)));

        let unchanged = unwrap_outcome(rt.block_on(session.update(&cx, (*stored).clone())));
        assert!(Arc::ptr_eq(&unchanged, &stored));
        assert_eq!(session.accessor().executed().len(), 2);
    }

    #[test]
    fn test_stale_update_is_an_optimistic_lock_failure() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let bob = rt.block_on(load_bob(&cx, &mut session));
        session.accessor().set_affected(0);

        let mut renamed = (*bob).clone();
        renamed.set("salary", Attribute::Value(900_i64.into()));
        match rt.block_on(session.update(&cx, renamed)) {
            Outcome::Err(e) => assert_eq!(e.query_kind(), Some(QueryErrorKind::OptimisticLock)),
            other => panic!("expected an optimistic lock failure, got {other:?}"),
        }
        assert!(session.contains(&bob));

        match rt.block_on(session.delete(&cx, &bob)) {
            Outcome::Err(e) => assert_eq!(e.query_kind(), Some(QueryErrorKind::OptimisticLock)),
            other => panic!("expected an optimistic lock failure, got {other:?}"),
        }
        assert!(!session.unit_of_work().is_deleted(&bob));
    }

    #[test]
    fn test_deleting_a_new_object_runs_no_sql() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let draft = session.register_new(Entity::new("Employee").with_value("id", 4_i64));

        let deleted = unwrap_outcome(rt.block_on(session.delete(&cx, &draft)));
        assert_eq!(deleted, 0);
        assert!(session.unit_of_work().pending_count().is_empty());
        assert!(session.accessor().executed().is_empty());
    }

    #[test]
    fn test_bulk_writes_invalidate_the_hierarchy() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        rt.block_on(load_bob(&cx, &mut session));
        assert_eq!(session.identity_map().len(), 2);

        let emp = Expr::base("Employee");
        let query = DeleteAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.get("name").eq("Bob"));
        unwrap_outcome(rt.block_on(session.delete_all(&cx, &query, &Row::empty())));

        assert_eq!(session.identity_map().len(), 1);
        assert!(session.cached_objects("Employee").is_empty());
        assert_eq!(session.cached_objects("Address").len(), 1);
    }

    #[test]
    fn test_update_all_can_keep_the_cache() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = Session::with_config(
            project(),
            DatabasePlatform::postgres(),
            MockAccessor::new(),
            SessionConfig {
                invalidate_after_bulk: false,
                ..SessionConfig::default()
            },
        );
        let bob = rt.block_on(load_bob(&cx, &mut session));

        let emp = Expr::base("Employee");
        let query = UpdateAllQuery::new("Employee")
            .with_builder(emp.clone())
            .with_criteria(emp.get("name").eq("Bob"))
            .set("name", Expr::lit("Robert"));
        unwrap_outcome(rt.block_on(session.update_all(&cx, &query, &Row::empty())));

        assert!(session.contains(&bob));
        let executed = session.accessor().executed();
        assert!(executed[1].0.starts_with("UPDATE EMPLOYEE SET NAME"));
    }

    #[test]
    fn test_does_exist() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let stranger = Entity::new("Employee").with_value("id", 9_i64);

        session
            .accessor()
            .push_result(vec![Row::empty().with("EMPLOYEE.EMP_ID", 9_i64)]);
        assert!(unwrap_outcome(rt.block_on(session.does_exist(&cx, &stranger))));
        assert!(!unwrap_outcome(rt.block_on(session.does_exist(&cx, &stranger))));

        let executed = session.accessor().executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].1, vec![Value::BigInt(9)]);

        let bob = rt.block_on(load_bob(&cx, &mut session));
        assert!(unwrap_outcome(rt.block_on(session.does_exist(&cx, &bob))));
        assert_eq!(session.accessor().executed().len(), 3);
    }

    #[test]
    fn test_report_rows_are_labelled() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = session();
        let emp = Expr::base("Employee");
        let query = ReportQuery::new("Employee")
            .with_builder(emp.clone())
            .item("total", emp.get("salary").sum());
        session
            .accessor()
            .push_result(vec![Row::new(vec!["SUM".into()], vec![Value::BigInt(1500)])]);

        let rows = unwrap_outcome(rt.block_on(session.report(&cx, &query, &Row::empty())));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("total"), Some(&Value::BigInt(1500)));
    }

    #[test]
    fn test_next_version() {
        let field = DatabaseField::new("EMPLOYEE.VERSION");
        assert_eq!(next_version(&field, &Value::Null).unwrap(), Value::BigInt(1));
        assert_eq!(next_version(&field, &Value::Int(4)).unwrap(), Value::Int(5));
        assert!(matches!(
            next_version(&field, &Value::Text("v1".into())),
            Err(Error::Type(_))
        ));
        assert!(matches!(
            next_version(&field, &Value::BigInt(i64::MAX)),
            Err(Error::Type(e)) if e.column.as_deref() == Some("EMPLOYEE.VERSION")
        ));
        assert!(next_version(&field, &Value::SmallInt(i16::MAX)).is_err());
    }
}
