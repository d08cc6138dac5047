//! Per-descriptor cache of generated update-object calls.
//!
//! Update statements depend only on which fields changed, so the calls for
//! each distinct field set are built once and shared across sessions.

use crate::call::SqlCall;
use crate::field::DatabaseField;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key of the update-call cache: the sorted qualified names of the
/// modified fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateCallKey(Vec<String>);

impl UpdateCallKey {
    pub fn new<'a>(fields: impl IntoIterator<Item = &'a DatabaseField>) -> Self {
        let mut names: Vec<String> = fields.into_iter().map(DatabaseField::qualified_name).collect();
        names.sort_unstable();
        names.dedup();
        Self(names)
    }

    pub fn field_names(&self) -> &[String] {
        &self.0
    }
}

/// Concurrent cache of update calls keyed by modified-field set.
#[derive(Debug, Default)]
pub struct QueryManager {
    update_calls: DashMap<UpdateCallKey, Arc<Vec<SqlCall>>>,
    hit_count: AtomicU64,
}

impl QueryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached calls for `key`, if present.
    pub fn cached_update_calls(&self, key: &UpdateCallKey) -> Option<Arc<Vec<SqlCall>>> {
        let calls = self.update_calls.get(key).map(|entry| Arc::clone(entry.value()));
        if calls.is_some() {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        }
        calls
    }

    pub fn put_update_calls(&self, key: UpdateCallKey, calls: Vec<SqlCall>) -> Arc<Vec<SqlCall>> {
        let calls = Arc::new(calls);
        self.update_calls.insert(key, Arc::clone(&calls));
        calls
    }

    /// Get the calls for `key` or build and insert them.
    ///
    /// `build` runs at most once per key, under the entry lock. Build errors
    /// are returned and nothing is cached.
    pub fn get_or_build_update_calls(
        &self,
        key: UpdateCallKey,
        build: impl FnOnce() -> crate::Result<Vec<SqlCall>>,
    ) -> crate::Result<Arc<Vec<SqlCall>>> {
        match self.update_calls.entry(key) {
            Entry::Occupied(entry) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let calls = Arc::new(build()?);
                tracing::trace!(fields = ?entry.key().field_names(), "caching update calls");
                entry.insert(Arc::clone(&calls));
                Ok(calls)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.update_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.update_calls.is_empty()
    }

    /// Number of lookups answered from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.update_calls.clear();
    }
}

/// Cloning a descriptor starts a fresh, empty cache.
impl Clone for QueryManager {
    fn clone(&self) -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, QueryError, QueryErrorKind};
    use std::cell::Cell;

    fn key(names: &[&str]) -> UpdateCallKey {
        let fields: Vec<_> = names.iter().map(|n| DatabaseField::new(n)).collect();
        UpdateCallKey::new(&fields)
    }

    #[test]
    fn key_ignores_order() {
        assert_eq!(key(&["E.B", "E.A"]), key(&["E.A", "E.B", "E.A"]));
        assert_ne!(key(&["E.A"]), key(&["E.B"]));
    }

    #[test]
    fn builds_once_per_field_set() {
        let manager = QueryManager::new();
        let builds = Cell::new(0);
        for _ in 0..3 {
            let calls = manager
                .get_or_build_update_calls(key(&["EMPLOYEE.NAME"]), || {
                    builds.set(builds.get() + 1);
                    Ok(vec![SqlCall::text("UPDATE EMPLOYEE SET NAME = ?")])
                })
                .unwrap();
            assert_eq!(calls.len(), 1);
        }
        assert_eq!(builds.get(), 1);
        assert_eq!(manager.hit_count(), 2);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let manager = QueryManager::new();
        let result = manager.get_or_build_update_calls(key(&["EMPLOYEE.NAME"]), || {
            Err(Error::Query(QueryError::new(
                QueryErrorKind::InvalidExpression,
                "boom",
            )))
        });
        assert!(result.is_err());
        assert!(manager.is_empty());
        assert!(manager.cached_update_calls(&key(&["EMPLOYEE.NAME"])).is_none());
    }

    #[test]
    fn clone_starts_empty() {
        let manager = QueryManager::new();
        manager.put_update_calls(key(&["E.A"]), Vec::new());
        assert_eq!(manager.clone().len(), 0);
        assert_eq!(manager.len(), 1);
    }
}
