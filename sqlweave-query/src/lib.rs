//! # sqlweave-query
//!
//! A query composition engine that rewrites provider generated SQL.
//!
//! A persistence provider renders each statement to native SQL. This crate
//! takes that SQL and turns it into the statement that actually runs:
//!
//! - CTEs are assembled into a WITH clause, including CTEs of nested queries
//!   and cascading deletes
//! - VALUES based entity functions replace their placeholder tables
//! - key restricted left joins become correlated subquery joins
//! - UPDATE and DELETE statements with joins are emulated per dialect
//! - collection join tables get their INSERT, UPDATE and DELETE forms
//! - RETURNING is appended or emulated through delta tables
//!
//! Parameter values set on a [`CustomQuery`] are replayed onto every
//! statement taking part in the composed SQL right before execution.
//!
//! ## Composing a query
//!
//! ```rust,ignore
//! use sqlweave_query::prelude::*;
//!
//! let context = SpecContext::new(DatabaseType::PostgreSQL.dialect(), provider);
//! let spec = QuerySpecification::builder(context, statement)
//!     .parameter(Parameter::new("ids"))
//!     .list_parameter("ids")
//!     .cte(CteNode::builder("cte1").columns(["id"]).body(body).build()?)
//!     .build()?;
//!
//! let query = CustomQuery::builder(Arc::new(spec), executor).build()?;
//! query.set_parameter("ids", vec![1, 2])?;
//! let rows = query.get_result_list()?;
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use sqlweave_query::EngineConfig;
//!
//! let config = EngineConfig::from_file("sqlweave.toml").unwrap();
//! config.init_logging();
//! let dialect = config.dialect();
//! ```
//!
//! ## SQL surgery
//!
//! ```rust
//! use sqlweave_query::sql::SqlEdits;
//!
//! let mut edits = SqlEdits::new();
//! edits.replace(7..8, "a.id");
//! assert_eq!(edits.apply("select * from A a").unwrap(), "select a.id from A a");
//! ```

pub mod binder;
pub mod config;
pub mod cte;
pub mod dialect;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod query;
pub mod spec;
pub mod sql;
pub mod statement;
pub mod transformer;
pub mod value;

#[cfg(test)]
mod testing;

pub use binder::{ValueBinder, ValuesParameter, ValuesParameterBinder};
pub use config::{EngineConfig, EnvSource, LoggingConfig, MapEnvSource, StdEnvSource};
pub use cte::{CteNode, CteNodeBuilder};
pub use dialect::{
    DatabaseType, DbmsDialect, DeleteJoinStyle, ModificationState, OrderByElement,
    SetOperationType, StandardDialect, StatementType, UpdateJoinStyle,
};
pub use error::{ErrorCode, ErrorContext, QueryError, QueryResult};
pub use plan::{
    ExecutionRequest, ModificationQueryPlan, QueryExecutor, ResultStream, ReturningQueryPlan,
    ReturningResult, Row, SelectQueryPlan,
};
pub use provider::SqlProvider;
pub use query::{CustomQuery, CustomQueryBuilder};
pub use spec::{
    CollectionDeleteConfig, CollectionInsertConfig, CollectionUpdateConfig, Composition,
    DeleteConfig, EntityFunctionNode, Fingerprint, ModificationConfig, QuerySpecification,
    QuerySpecificationBuilder, ReturningConfig, SetOperationConfig, SpecContext, SpecVariant,
    SubQuery, UpdateConfig, UpdateJoinConfig,
};
pub use statement::{CompositeQuery, Parameter, ParameterType, Statement, StatementRef};
pub use transformer::{Elementwise, ParameterValueTransformer};
pub use value::{TemporalType, Value};

// Re-export logging utilities
pub use logging::{
    get_log_format, get_log_level, init as init_logging, init_debug, init_with_level,
    is_debug_enabled,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::binder::{ValuesParameter, ValuesParameterBinder};
    pub use crate::cte::CteNode;
    pub use crate::dialect::{DatabaseType, DbmsDialect, StatementType};
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::plan::{QueryExecutor, Row};
    pub use crate::provider::SqlProvider;
    pub use crate::query::CustomQuery;
    pub use crate::spec::{QuerySpecification, SpecContext, SpecVariant, SubQuery};
    pub use crate::statement::{Parameter, Statement, StatementRef};
    pub use crate::transformer::{Elementwise, ParameterValueTransformer};
    pub use crate::value::Value;
    pub use std::sync::Arc;
}
