//! The persistence provider's SQL extraction contract.

use crate::error::QueryResult;
use crate::statement::Statement;

/// Extracts native SQL from provider statements.
///
/// Implementations must be deterministic for a given statement version and
/// set of bound list parameters; the composition cache relies on it.
pub trait SqlProvider: Send + Sync {
    /// The native SQL the provider currently generates for `statement`.
    fn sql(&self, statement: &dyn Statement) -> QueryResult<String>;

    /// The SQL alias the provider assigned to `entity_alias` in `statement`.
    fn sql_alias(&self, statement: &dyn Statement, entity_alias: &str) -> QueryResult<String>;

    /// DELETE statements that must run before `statement` to cascade a delete.
    fn cascading_delete_sql(&self, statement: &dyn Statement) -> QueryResult<Vec<String>> {
        let _ = statement;
        Ok(Vec::new())
    }
}
