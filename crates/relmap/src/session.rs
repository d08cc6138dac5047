//! Session construction.
//!
//! A [`Session`] runs queries for one [`Project`] through one [`Accessor`].
//! [`SessionBuilder`] collects the platform and the session switches; the
//! platform can come from a preset or from JSON configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! use relmap::prelude::*;
//!
//! // Postgres with default switches
//! let session = SessionBuilder::new()
//!     .platform(DatabasePlatform::postgres())
//!     .build(project, accessor);
//!
//! // Platform read from the application's config file
//! let session = SessionBuilder::new()
//!     .platform_json(&std::fs::read_to_string("platform.json")?)?
//!     .invalidate_after_bulk(false)
//!     .build(project, accessor);
//! ```

use relmap_core::{Accessor, DatabasePlatform, PlatformConfig, Project, Result};
use relmap_session::SessionConfig;
use std::sync::Arc;

pub use relmap_session::Session;

/// Builder for [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    platform: DatabasePlatform,
    config: SessionConfig,
}

impl SessionBuilder {
    /// A builder for the generic platform with default switches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: DatabasePlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Platform capabilities from a JSON document. Missing keys take their
    /// defaults.
    pub fn platform_json(mut self, json: &str) -> Result<Self> {
        self.platform = DatabasePlatform::from_json(json)?;
        Ok(self)
    }

    /// Platform capabilities from a JSON value, usually one section of a
    /// larger configuration document.
    pub fn platform_config(mut self, value: serde_json::Value) -> Result<Self> {
        let config: PlatformConfig = serde_json::from_value(value)?;
        self.platform = DatabasePlatform::new(config);
        Ok(self)
    }

    /// Keep one row per owner in reads with a to-many join.
    pub fn filter_duplicates(mut self, filter: bool) -> Self {
        self.config.filter_duplicates = filter;
        self
    }

    pub fn prefetch_map_keys(mut self, prefetch: bool) -> Self {
        self.config.prefetch_map_keys = prefetch;
        self
    }

    /// Drop cached objects after delete-all and update-all.
    pub fn invalidate_after_bulk(mut self, invalidate: bool) -> Self {
        self.config.invalidate_after_bulk = invalidate;
        self
    }

    /// Build the session.
    pub fn build<A: Accessor>(self, project: Arc<Project>, accessor: A) -> Session<A> {
        tracing::debug!(
            platform = self.platform.name(),
            descriptors = project.descriptors().count(),
            "building session"
        );
        Session::with_config(project, self.platform, accessor, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::Dialect;

    #[test]
    fn test_builder_defaults() {
        let builder = SessionBuilder::new();
        assert_eq!(builder.platform, DatabasePlatform::generic());
        assert!(builder.config.filter_duplicates);
        assert!(builder.config.invalidate_after_bulk);
    }

    #[test]
    fn test_platform_from_json_value() {
        let builder = SessionBuilder::new()
            .platform_config(serde_json::json!({
                "dialect": "oracle",
                "supports_temp_tables": false
            }))
            .unwrap()
            .prefetch_map_keys(false);
        assert_eq!(builder.platform.dialect(), Dialect::Oracle);
        assert!(!builder.platform.config().supports_temp_tables);
        assert!(!builder.config.prefetch_map_keys);
    }

    #[test]
    fn test_bad_platform_json_is_an_error() {
        let err = SessionBuilder::new().platform_json("{not json").unwrap_err();
        assert!(matches!(err, relmap_core::Error::Serde(_)));
    }
}
