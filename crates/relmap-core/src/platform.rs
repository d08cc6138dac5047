//! Database platform capabilities.
//!
//! A platform is plain configuration: a SQL dialect plus the capability
//! flags the query mechanism consults when choosing a statement plan. It can
//! be loaded from JSON or taken from one of the presets.

use serde::{Deserialize, Serialize};

/// SQL dialect, which decides placeholder and row-limit syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `$1, $2` placeholders
    #[default]
    Postgres,
    /// `?1, ?2` placeholders
    Sqlite,
    /// `?` placeholders
    Mysql,
    /// `:1, :2` placeholders
    Oracle,
}

impl Dialect {
    /// Placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
            Dialect::Oracle => format!(":{index}"),
        }
    }

    /// Clause appended to a select to cap the number of rows.
    pub fn row_limit(self, max_rows: u64) -> String {
        match self {
            Dialect::Oracle => format!("FETCH FIRST {max_rows} ROWS ONLY"),
            _ => format!("LIMIT {max_rows}"),
        }
    }
}

/// How a temp table is emptied once a plan has used it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempTableCleanup {
    #[default]
    Drop,
    DeleteRows,
}

/// Serializable platform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub name: String,
    pub dialect: Dialect,
    pub supports_temp_tables: bool,
    pub should_always_use_temp_storage_for_modify_all: bool,
    pub is_null_allowed_in_select_clause: bool,
    pub dont_bind_update_all_query_using_temp_tables: bool,
    pub temp_table_prefix: String,
    pub temp_table_cleanup: TempTableCleanup,
    pub should_bind_all_parameters: bool,
    pub supports_for_update: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            dialect: Dialect::Postgres,
            supports_temp_tables: false,
            should_always_use_temp_storage_for_modify_all: false,
            is_null_allowed_in_select_clause: true,
            dont_bind_update_all_query_using_temp_tables: false,
            temp_table_prefix: "TL_".to_string(),
            temp_table_cleanup: TempTableCleanup::Drop,
            should_bind_all_parameters: true,
            supports_for_update: true,
        }
    }
}

/// The platform queries are prepared for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatabasePlatform {
    config: PlatformConfig,
}

impl DatabasePlatform {
    pub fn new(config: PlatformConfig) -> Self {
        Self { config }
    }

    /// Parse a platform from JSON; missing keys take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let config: PlatformConfig = serde_json::from_str(json)?;
        Ok(Self::new(config))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.config)?)
    }

    pub fn postgres() -> Self {
        Self::new(PlatformConfig {
            name: "postgres".to_string(),
            dialect: Dialect::Postgres,
            supports_temp_tables: true,
            ..PlatformConfig::default()
        })
    }

    pub fn mysql() -> Self {
        Self::new(PlatformConfig {
            name: "mysql".to_string(),
            dialect: Dialect::Mysql,
            supports_temp_tables: true,
            temp_table_cleanup: TempTableCleanup::Drop,
            ..PlatformConfig::default()
        })
    }

    pub fn sqlite() -> Self {
        Self::new(PlatformConfig {
            name: "sqlite".to_string(),
            dialect: Dialect::Sqlite,
            supports_temp_tables: true,
            supports_for_update: false,
            ..PlatformConfig::default()
        })
    }

    /// Oracle: no temp tables, staged updates run as an anonymous block.
    pub fn oracle() -> Self {
        Self::new(PlatformConfig {
            name: "oracle".to_string(),
            dialect: Dialect::Oracle,
            supports_temp_tables: false,
            is_null_allowed_in_select_clause: false,
            ..PlatformConfig::default()
        })
    }

    pub fn generic() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn supports_temp_tables(&self) -> bool {
        self.config.supports_temp_tables
    }

    pub fn should_always_use_temp_storage_for_modify_all(&self) -> bool {
        self.config.should_always_use_temp_storage_for_modify_all
    }

    pub fn is_oracle(&self) -> bool {
        self.config.dialect == Dialect::Oracle
    }

    pub fn is_null_allowed_in_select_clause(&self) -> bool {
        self.config.is_null_allowed_in_select_clause
    }

    pub fn dont_bind_update_all_query_using_temp_tables(&self) -> bool {
        self.config.dont_bind_update_all_query_using_temp_tables
    }

    pub fn should_bind_all_parameters(&self) -> bool {
        self.config.should_bind_all_parameters
    }

    pub fn supports_for_update(&self) -> bool {
        self.config.supports_for_update
    }

    pub fn temp_table_cleanup(&self) -> TempTableCleanup {
        self.config.temp_table_cleanup
    }

    /// Name of the temp table staged for `table`.
    pub fn temp_table_name(&self, table: &str) -> String {
        format!("{}{}", self.config.temp_table_prefix, table)
    }
}

impl From<PlatformConfig> for DatabasePlatform {
    fn from(config: PlatformConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(2), "?");
        assert_eq!(Dialect::Oracle.placeholder(2), ":2");
        assert_eq!(Dialect::Oracle.row_limit(5), "FETCH FIRST 5 ROWS ONLY");
    }

    #[test]
    fn json_fills_defaults() {
        let platform = DatabasePlatform::from_json(
            r#"{"name": "warehouse", "dialect": "mysql", "supports_temp_tables": true}"#,
        )
        .unwrap();
        assert_eq!(platform.dialect(), Dialect::Mysql);
        assert!(platform.supports_temp_tables());
        assert!(platform.is_null_allowed_in_select_clause());
        assert_eq!(platform.temp_table_name("EMPLOYEE"), "TL_EMPLOYEE");

        let err = DatabasePlatform::from_json(r#"{"dialect": "db2"}"#).unwrap_err();
        assert!(matches!(err, crate::Error::Serde(_)));
    }

    #[test]
    fn presets() {
        assert!(DatabasePlatform::oracle().is_oracle());
        assert!(!DatabasePlatform::oracle().supports_temp_tables());
        assert!(!DatabasePlatform::generic().supports_temp_tables());
        assert!(DatabasePlatform::postgres().supports_temp_tables());

        let json = DatabasePlatform::sqlite().to_json().unwrap();
        assert_eq!(DatabasePlatform::from_json(&json).unwrap(), DatabasePlatform::sqlite());
    }
}
