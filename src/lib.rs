//! # sqlweave
//!
//! Dialect-aware SQL composition over persistence provider statements.
//!
//! The engine lives in [`sqlweave_query`]; this crate re-exports it and
//! offers a prelude for applications wiring a provider, a dialect and an
//! executor together.
//!
//! ```rust,ignore
//! use sqlweave::prelude::*;
//!
//! let config = EngineConfig::from_file("sqlweave.toml")?;
//! let context = SpecContext::new(config.dialect(), provider);
//! let spec = QuerySpecification::builder(context, statement)
//!     .parameter(Parameter::new("ids"))
//!     .list_parameter("ids")
//!     .build()?;
//! let query = CustomQuery::builder(Arc::new(spec), executor).build()?;
//! query.set_parameter("ids", vec![1, 2, 3])?;
//! let rows = query.get_result_list()?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The composition engine.
pub mod query {
    pub use sqlweave_query::*;
}

// Re-export key types at the crate root
pub use sqlweave_query::{
    CustomQuery, EngineConfig, QueryError, QueryResult, QuerySpecification, SpecContext,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sqlweave_query::EngineConfig;
    pub use sqlweave_query::prelude::*;
}
