//! Built-in dialects for the supported databases.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::{
    DbmsDialect, DeleteJoinStyle, ExtendedSql, ModificationState, SetOperationType,
    StatementType, UpdateJoinStyle, append_default_extended_sql,
};
use crate::error::{QueryError, QueryResult};
use crate::sql;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL.
    #[default]
    #[serde(alias = "postgres", alias = "pg")]
    PostgreSQL,
    /// MySQL / MariaDB.
    #[serde(alias = "mariadb")]
    MySQL,
    /// SQLite.
    SQLite,
    /// Microsoft SQL Server.
    #[serde(alias = "sqlserver")]
    MSSQL,
    /// IBM DB2.
    DB2,
    /// H2.
    H2,
    /// Oracle.
    Oracle,
}

impl DatabaseType {
    /// The dialect implementation for this database.
    pub fn dialect(self) -> Arc<dyn DbmsDialect> {
        Arc::new(StandardDialect::new(self))
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
            Self::MSSQL => "mssql",
            Self::DB2 => "db2",
            Self::H2 => "h2",
            Self::Oracle => "oracle",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialect for one of the [`DatabaseType`]s, with optional join style overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardDialect {
    database: DatabaseType,
    delete_join_style: Option<DeleteJoinStyle>,
    update_join_style: Option<UpdateJoinStyle>,
    recursive_keyword: Option<bool>,
}

impl StandardDialect {
    /// Create a new dialect for the given database.
    pub fn new(database: DatabaseType) -> Self {
        Self {
            database,
            delete_join_style: None,
            update_join_style: None,
            recursive_keyword: None,
        }
    }

    /// Override the DELETE join style.
    pub fn with_delete_join_style(mut self, style: DeleteJoinStyle) -> Self {
        self.delete_join_style = Some(style);
        self
    }

    /// Override the UPDATE join style.
    pub fn with_update_join_style(mut self, style: UpdateJoinStyle) -> Self {
        self.update_join_style = Some(style);
        self
    }

    /// Force whether recursive WITH clauses carry the RECURSIVE keyword.
    pub fn with_recursive_keyword(mut self, recursive_keyword: bool) -> Self {
        self.recursive_keyword = Some(recursive_keyword);
        self
    }

    /// The database this dialect renders for.
    pub fn database(&self) -> DatabaseType {
        self.database
    }
}

impl From<DatabaseType> for StandardDialect {
    fn from(database: DatabaseType) -> Self {
        Self::new(database)
    }
}

impl DbmsDialect for StandardDialect {
    fn name(&self) -> &str {
        self.database.as_str()
    }

    fn with_clause(&self, recursive: bool) -> &'static str {
        let keyword = self.recursive_keyword.unwrap_or(matches!(
            self.database,
            DatabaseType::PostgreSQL | DatabaseType::MySQL | DatabaseType::SQLite | DatabaseType::H2
        ));
        if recursive && keyword { "WITH RECURSIVE" } else { "WITH" }
    }

    fn supports_modification_query_in_with_clause(&self) -> bool {
        matches!(self.database, DatabaseType::PostgreSQL | DatabaseType::DB2)
    }

    fn uses_execute_update_when_with_clause_in_modification_query(&self) -> bool {
        !matches!(self.database, DatabaseType::PostgreSQL | DatabaseType::DB2)
    }

    fn supports_returning_columns(&self) -> bool {
        matches!(
            self.database,
            DatabaseType::PostgreSQL | DatabaseType::SQLite | DatabaseType::DB2
        )
    }

    fn supports_set_operation(&self, operator: SetOperationType) -> bool {
        match self.database {
            DatabaseType::PostgreSQL | DatabaseType::DB2 => true,
            _ => !operator.is_all() || operator == SetOperationType::UnionAll,
        }
    }

    fn needs_set_operation_wrapper(&self) -> bool {
        self.database == DatabaseType::Oracle
    }

    fn needs_alias_in_set_order_by(&self) -> bool {
        self.database == DatabaseType::Oracle
    }

    fn supports_nulls_first(&self) -> bool {
        !matches!(self.database, DatabaseType::MySQL | DatabaseType::MSSQL)
    }

    fn delete_join_style(&self) -> DeleteJoinStyle {
        self.delete_join_style.unwrap_or(match self.database {
            DatabaseType::PostgreSQL => DeleteJoinStyle::Using,
            DatabaseType::MySQL | DatabaseType::MSSQL => DeleteJoinStyle::From,
            DatabaseType::DB2 | DatabaseType::H2 | DatabaseType::Oracle => DeleteJoinStyle::Merge,
            DatabaseType::SQLite => DeleteJoinStyle::None,
        })
    }

    fn update_join_style(&self) -> UpdateJoinStyle {
        self.update_join_style.unwrap_or(match self.database {
            DatabaseType::PostgreSQL | DatabaseType::SQLite => UpdateJoinStyle::From,
            DatabaseType::MSSQL => UpdateJoinStyle::FromAlias,
            DatabaseType::MySQL => UpdateJoinStyle::Reference,
            DatabaseType::DB2 | DatabaseType::H2 | DatabaseType::Oracle => UpdateJoinStyle::Merge,
        })
    }

    fn limit_clause(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        match self.database {
            DatabaseType::MSSQL | DatabaseType::Oracle | DatabaseType::DB2 => {
                let mut clause = format!(" offset {} rows", offset.unwrap_or("0"));
                if let Some(limit) = limit {
                    clause.push_str(&format!(" fetch next {} rows only", limit));
                }
                clause
            }
            DatabaseType::MySQL | DatabaseType::SQLite if limit.is_none() => {
                let unbounded = if self.database == DatabaseType::MySQL {
                    "18446744073709551615"
                } else {
                    "-1"
                };
                format!(" limit {} offset {}", unbounded, offset.unwrap_or("0"))
            }
            _ => {
                let mut clause = String::new();
                if let Some(limit) = limit {
                    clause.push_str(&format!(" limit {}", limit));
                }
                if let Some(offset) = offset {
                    clause.push_str(&format!(" offset {}", offset));
                }
                clause
            }
        }
    }

    fn append_extended_sql(
        &self,
        sql: &mut String,
        request: &ExtendedSql<'_>,
    ) -> QueryResult<IndexMap<String, String>> {
        match self.database {
            DatabaseType::DB2 => append_delta_table_sql(self, sql, request),
            _ => append_default_extended_sql(self, sql, request),
        }
    }
}

/// Table targeted by an INSERT: the token after `into`, up to a space or `(`.
fn insert_table(sql: &str) -> Option<&str> {
    let into = sql::index_of_ignore_case(sql, "into ", 0)? + "into ".len();
    let rest = &sql[into..];
    let end = rest.find([' ', '(']).unwrap_or(rest.len());
    Some(&rest[..end]).filter(|t| !t.is_empty())
}

/// DB2 exposes modification results through data-change delta tables
/// (`final table (...)`, `old table (...)`), so modifications that are
/// embedded, return columns or carry a WITH clause are wrapped in a select
/// over one.
fn append_delta_table_sql(
    dialect: &StandardDialect,
    sql: &mut String,
    request: &ExtendedSql<'_>,
) -> QueryResult<IndexMap<String, String>> {
    let statement_type = request.statement_type;
    let wraps_modification = statement_type.is_modification()
        && (request.is_embedded
            || request.returning_columns.is_some()
            || request.with_clause.is_some());

    if !wraps_modification {
        let add_parenthesis = request.is_subquery && !sql.starts_with('(');
        if add_parenthesis {
            sql.insert(0, '(');
        }
        if let Some(with_clause) = request.with_clause {
            let at = sql::index_of_select(sql).unwrap_or(usize::from(add_parenthesis));
            sql.insert_str(at, with_clause);
        }
        if statement_type == StatementType::Select
            && (request.limit.is_some() || request.offset.is_some())
        {
            sql.push_str(&dialect.limit_clause(request.limit, request.offset));
        }
        if add_parenthesis {
            sql.push(')');
        }
        return Ok(IndexMap::new());
    }

    if let Some(old_name) = request
        .included_states
        .and_then(|states| states.get(&ModificationState::Old))
    {
        let mut added = IndexMap::new();
        let old_sql = if statement_type == StatementType::Insert {
            let table = request
                .affected_table
                .or_else(|| insert_table(sql))
                .ok_or_else(|| {
                    QueryError::structural("Could not determine the table of the insert statement")
                        .with_sql(sql.as_str())
                })?
                .to_string();
            let new_name = format!("{}_new", old_name);
            added.insert(new_name.clone(), format!("select * from final table ({})", sql));
            format!("select * from {}\nexcept\nselect * from {}", table, new_name)
        } else {
            format!("select * from old table ({})", sql)
        };
        added.insert(old_name.clone(), old_sql);

        let columns = request
            .returning_columns
            .map_or_else(|| "*".to_string(), |columns| columns.join(", "));
        let mut rewritten = String::new();
        if let Some(with_clause) = request.with_clause {
            rewritten.push_str(with_clause);
        }
        rewritten.push_str(&format!("select {} from {}", columns, old_name));
        if request.is_subquery {
            rewritten = format!("({})", rewritten);
        }
        *sql = rewritten;
        return Ok(added);
    }

    let mut prefix = String::new();
    if let Some(with_clause) = request.with_clause {
        prefix.push_str(with_clause);
    }
    prefix.push_str("select ");
    match request.returning_columns {
        Some(columns) if !columns.is_empty() => {
            let items: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{} as ret_col_{}", column, i))
                .collect();
            prefix.push_str(&items.join(", "));
        }
        _ => prefix.push_str("count(*)"),
    }
    prefix.push_str(if statement_type == StatementType::Delete {
        " from old table ("
    } else {
        " from final table ("
    });
    sql.insert_str(0, &prefix);
    sql.push(')');
    if request.is_subquery {
        sql.insert(0, '(');
        sql.push(')');
    }
    Ok(IndexMap::new())
}
