//! Engine configuration loaded from `sqlweave.toml`.
//!
//! ```toml
//! dialect = "postgres"
//! render_ctes = true
//! delete_join_style = "using"
//!
//! [logging]
//! debug = false
//! level = "${SQLWEAVE_LEVEL:-warn}"
//! ```
//!
//! `${VAR}` and `${VAR:-default}` references are expanded from the
//! environment before the TOML is parsed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::dialect::{DatabaseType, DbmsDialect, DeleteJoinStyle, StandardDialect, UpdateJoinStyle};
use crate::error::{ErrorCode, QueryError, QueryResult};
use crate::logging;

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Target database.
    #[serde(default)]
    pub dialect: DatabaseType,

    /// Whether CTEs are rendered.
    #[serde(default = "default_true")]
    pub render_ctes: bool,

    /// Force whether recursive WITH clauses use the RECURSIVE keyword.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive_keyword: Option<bool>,

    /// DELETE join style override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_join_style: Option<DeleteJoinStyle>,

    /// UPDATE join style override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_join_style: Option<UpdateJoinStyle>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Explicit log level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: DatabaseType::default(),
            render_ctes: true,
            recursive_keyword: None,
            delete_join_style: None,
            update_join_style: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> QueryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QueryError::new(
                ErrorCode::MissingConfiguration,
                format!("Could not read configuration file '{}'", path.display()),
            )
            .with_source(e)
        })?;
        crate::sqlweave_debug!(path = %path.display(), "loading sqlweave configuration");
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> QueryResult<Self> {
        Self::from_str_with(content, &StdEnvSource)
    }

    /// Parse configuration, expanding variables from `source`.
    pub fn from_str_with<S: EnvSource>(content: &str, source: &S) -> QueryResult<Self> {
        let expanded = expand_env(content, source)?;
        toml::from_str(&expanded).map_err(|e| {
            QueryError::invalid_config(format!("Invalid configuration: {}", e.message()))
                .with_source(e)
        })
    }

    /// Apply `SQLWEAVE_DIALECT` and `SQLWEAVE_RENDER_CTES` from the environment.
    pub fn with_env_overrides(self) -> QueryResult<Self> {
        self.with_env_overrides_from(&StdEnvSource)
    }

    /// Apply overrides read from `source`.
    pub fn with_env_overrides_from<S: EnvSource>(mut self, source: &S) -> QueryResult<Self> {
        if let Some(dialect) = source.get("SQLWEAVE_DIALECT") {
            self.dialect = parse_dialect(&dialect)?;
        }
        if let Some(render_ctes) = source.get("SQLWEAVE_RENDER_CTES") {
            self.render_ctes = match render_ctes.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(QueryError::invalid_config(format!(
                        "SQLWEAVE_RENDER_CTES must be a boolean but was '{}'",
                        other
                    )));
                }
            };
        }
        Ok(self)
    }

    /// The configured dialect.
    pub fn dialect(&self) -> Arc<dyn DbmsDialect> {
        let mut dialect = StandardDialect::new(self.dialect);
        if let Some(style) = self.delete_join_style {
            dialect = dialect.with_delete_join_style(style);
        }
        if let Some(style) = self.update_join_style {
            dialect = dialect.with_update_join_style(style);
        }
        if let Some(keyword) = self.recursive_keyword {
            dialect = dialect.with_recursive_keyword(keyword);
        }
        Arc::new(dialect)
    }

    /// Install the logging subscriber according to the logging settings.
    pub fn init_logging(&self) {
        match (&self.logging.level, self.logging.debug) {
            (Some(level), _) => logging::init_with_level(level),
            (None, true) => logging::init_debug(),
            (None, false) => logging::init(),
        }
    }
}

fn parse_dialect(name: &str) -> QueryResult<DatabaseType> {
    let quoted = serde_json::Value::String(name.to_lowercase());
    serde_json::from_value(quoted).map_err(|e| {
        QueryError::invalid_config(format!("Unknown dialect '{}'", name)).with_source(e)
    })
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env<S: EnvSource>(input: &str, source: &S) -> QueryResult<String> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let end = body.find('}').ok_or_else(|| {
            QueryError::invalid_config("Unterminated variable reference in configuration")
        })?;
        let reference = &body[..end];
        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };
        if name.is_empty() {
            return Err(QueryError::invalid_config("Empty variable name in configuration"));
        }
        match (source.get(name).filter(|v| !v.is_empty()), default) {
            (Some(value), _) => result.push_str(&value),
            (None, Some(default)) => result.push_str(default),
            (None, None) => {
                return Err(QueryError::new(
                    ErrorCode::MissingConfiguration,
                    format!("Required variable '{}' is not set", name),
                ));
            }
        }
        rest = &body[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}
