//! Database dialect capabilities and trailing-syntax rendering.
//!
//! A [`DbmsDialect`] answers capability questions (can a modification run
//! inside a WITH clause, how are joins emulated in DELETE and UPDATE) and
//! appends dialect-correct trailing syntax to composed SQL. The default
//! method bodies describe a conservative ANSI database; [`StandardDialect`]
//! overrides them per [`DatabaseType`].

mod builtin;

pub use builtin::{DatabaseType, StandardDialect};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueryError, QueryResult};
use crate::sql;

/// The kind of statement being composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    /// SELECT.
    Select,
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
}

impl StatementType {
    /// Whether the statement modifies data.
    pub fn is_modification(self) -> bool {
        self != Self::Select
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// How a DELETE restricted by joins is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteJoinStyle {
    /// `delete <alias> from <table> <alias> join ...`
    From,
    /// `delete from <table> <alias> using <joined> ...`
    Using,
    /// Joins are folded into an EXISTS predicate (MERGE capable databases).
    Merge,
    /// Joins are folded into an EXISTS predicate.
    None,
}

/// How an UPDATE restricted by joins is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateJoinStyle {
    /// `update <table> <alias> set ... from <joined> ...`
    From,
    /// `update <alias> set ... from <table> <alias> join ...`
    FromAlias,
    /// `update <table> <alias> join (<computed values>) ... set ...`
    Reference,
    /// `merge into <table> <alias> using (<computed values>) ...`
    Merge,
    /// Joined updates are unsupported.
    None,
}

/// Set operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperationType {
    /// UNION
    Union,
    /// UNION ALL
    UnionAll,
    /// INTERSECT
    Intersect,
    /// INTERSECT ALL
    IntersectAll,
    /// EXCEPT
    Except,
    /// EXCEPT ALL
    ExceptAll,
}

impl SetOperationType {
    /// The SQL keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::UnionAll => "UNION ALL",
            Self::Intersect => "INTERSECT",
            Self::IntersectAll => "INTERSECT ALL",
            Self::Except => "EXCEPT",
            Self::ExceptAll => "EXCEPT ALL",
        }
    }

    /// Whether duplicates are retained.
    pub fn is_all(self) -> bool {
        matches!(self, Self::UnionAll | Self::IntersectAll | Self::ExceptAll)
    }
}

impl fmt::Display for SetOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Which row image a RETURNING clause reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModificationState {
    /// Values before the modification.
    Old,
    /// Values after the modification.
    New,
}

/// One ORDER BY element of a set operation, referencing a select item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderByElement {
    /// 1-based select item position.
    pub position: usize,
    /// Ascending order.
    pub ascending: bool,
    /// Explicit null ordering.
    pub nulls_first: Option<bool>,
}

impl OrderByElement {
    /// Ascending order on the given position.
    pub fn asc(position: usize) -> Self {
        Self {
            position,
            ascending: true,
            nulls_first: None,
        }
    }

    /// Descending order on the given position.
    pub fn desc(position: usize) -> Self {
        Self {
            position,
            ascending: false,
            nulls_first: None,
        }
    }

    /// Set explicit null ordering.
    pub fn nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = Some(nulls_first);
        self
    }
}

/// Inputs to [`DbmsDialect::append_extended_sql`].
#[derive(Debug, Clone, Copy)]
pub struct ExtendedSql<'a> {
    /// Statement kind.
    pub statement_type: StatementType,
    /// The SQL is used as a subquery.
    pub is_subquery: bool,
    /// The SQL is embedded in an outer statement (e.g. as a CTE body).
    pub is_embedded: bool,
    /// Rendered WITH clause, including trailing newline.
    pub with_clause: Option<&'a str>,
    /// LIMIT text.
    pub limit: Option<&'a str>,
    /// OFFSET text.
    pub offset: Option<&'a str>,
    /// Table a modification targets.
    pub affected_table: Option<&'a str>,
    /// Columns to return from a modification.
    pub returning_columns: Option<&'a [String]>,
    /// Requested row images and the CTE names they are exposed under.
    pub included_states: Option<&'a IndexMap<ModificationState, String>>,
}

impl<'a> ExtendedSql<'a> {
    /// A request carrying only the statement type.
    pub fn new(statement_type: StatementType) -> Self {
        Self {
            statement_type,
            is_subquery: false,
            is_embedded: false,
            with_clause: None,
            limit: None,
            offset: None,
            affected_table: None,
            returning_columns: None,
            included_states: None,
        }
    }
}

/// Inputs to [`DbmsDialect::append_set`].
#[derive(Debug, Clone, Copy)]
pub struct SetOperation<'a> {
    /// Operator joining the operands.
    pub operator: SetOperationType,
    /// Operand SQL in order.
    pub operands: &'a [String],
    /// Outer ORDER BY.
    pub order_by: &'a [OrderByElement],
    /// Outer LIMIT text.
    pub limit: Option<&'a str>,
    /// Outer OFFSET text.
    pub offset: Option<&'a str>,
}

/// Capabilities and syntax of a database.
pub trait DbmsDialect: Send + Sync + fmt::Debug {
    /// A short name for logging.
    fn name(&self) -> &str;

    /// The keyword opening a WITH clause.
    fn with_clause(&self, recursive: bool) -> &'static str {
        if recursive { "WITH RECURSIVE" } else { "WITH" }
    }

    /// Whether CTE heads may declare column lists.
    fn supports_with_clause_head(&self) -> bool {
        true
    }

    /// Whether non-recursive CTEs are supported natively.
    fn supports_non_recursive_with_clause(&self) -> bool {
        true
    }

    /// Suffix appended to non-recursive CTE bodies when they are emulated.
    fn non_recursive_with_clause_suffix(&self) -> Option<&'static str> {
        None
    }

    /// Whether INSERT/UPDATE/DELETE may appear inside a WITH clause.
    fn supports_modification_query_in_with_clause(&self) -> bool {
        false
    }

    /// Whether a modification prefixed by a WITH clause is executed as an update.
    fn uses_execute_update_when_with_clause_in_modification_query(&self) -> bool {
        true
    }

    /// Whether modifications can return columns in SQL.
    fn supports_returning_columns(&self) -> bool {
        false
    }

    /// Whether a set operator is supported.
    fn supports_set_operation(&self, operator: SetOperationType) -> bool {
        !operator.is_all() || operator == SetOperationType::UnionAll
    }

    /// Whether ORDER BY/LIMIT over a set operation needs a wrapping select.
    fn needs_set_operation_wrapper(&self) -> bool {
        false
    }

    /// Whether ORDER BY over a set operation must use aliases instead of positions.
    fn needs_alias_in_set_order_by(&self) -> bool {
        false
    }

    /// Whether NULLS FIRST/LAST is supported.
    fn supports_nulls_first(&self) -> bool {
        true
    }

    /// Join emulation strategy for DELETE.
    fn delete_join_style(&self) -> DeleteJoinStyle {
        DeleteJoinStyle::None
    }

    /// Join emulation strategy for UPDATE.
    fn update_join_style(&self) -> UpdateJoinStyle {
        UpdateJoinStyle::None
    }

    /// Render LIMIT/OFFSET, with a leading space.
    fn limit_clause(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(" limit ");
            clause.push_str(limit);
        }
        if let Some(offset) = offset {
            clause.push_str(" offset ");
            clause.push_str(offset);
        }
        clause
    }

    /// Append trailing syntax to `sql` and return CTEs the dialect injected.
    fn append_extended_sql(
        &self,
        sql: &mut String,
        request: &ExtendedSql<'_>,
    ) -> QueryResult<IndexMap<String, String>> {
        append_default_extended_sql(self, sql, request)
    }

    /// Render a set operation into `sql`.
    fn append_set(&self, sql: &mut String, request: &SetOperation<'_>) -> QueryResult<()> {
        append_default_set(self, sql, request)
    }
}

/// Extended SQL rendering shared by all dialects.
pub fn append_default_extended_sql<D: DbmsDialect + ?Sized>(
    dialect: &D,
    sql: &mut String,
    request: &ExtendedSql<'_>,
) -> QueryResult<IndexMap<String, String>> {
    if request.is_subquery
        && request.returning_columns.is_some()
        && !dialect.supports_modification_query_in_with_clause()
    {
        return Err(QueryError::unsupported_dialect(
            "Returning columns in a subquery is not possible for this dbms!",
        ));
    }

    let add_parenthesis = request.is_subquery && !sql.starts_with('(');
    if add_parenthesis {
        sql.insert(0, '(');
    }
    if let Some(with_clause) = request.with_clause {
        sql.insert_str(usize::from(add_parenthesis), with_clause);
    }
    if request.statement_type == StatementType::Select
        && (request.limit.is_some() || request.offset.is_some())
    {
        sql.push_str(&dialect.limit_clause(request.limit, request.offset));
    }
    let native_returning = request.returning_columns.filter(|_| {
        request.statement_type.is_modification() && dialect.supports_returning_columns()
    });
    if let Some(columns) = native_returning {
        if request
            .included_states
            .is_some_and(|states| states.contains_key(&ModificationState::Old))
        {
            return Err(QueryError::unsupported_dialect(format!(
                "Returning values of the OLD state is not supported by {}!",
                dialect.name()
            )));
        }
        sql.push_str(" returning ");
        sql.push_str(&columns.join(", "));
    }
    if add_parenthesis {
        sql.push(')');
    }
    Ok(IndexMap::new())
}

/// Set operation rendering shared by all dialects.
pub fn append_default_set<D: DbmsDialect + ?Sized>(
    dialect: &D,
    sql: &mut String,
    request: &SetOperation<'_>,
) -> QueryResult<()> {
    if !dialect.supports_set_operation(request.operator) {
        return Err(QueryError::unsupported_dialect(format!(
            "{} is not supported by {}!",
            request.operator,
            dialect.name()
        )));
    }

    let has_outer_clause =
        !request.order_by.is_empty() || request.limit.is_some() || request.offset.is_some();
    let wrap = has_outer_clause
        && dialect.needs_set_operation_wrapper()
        && request.operands.len() > 1;

    if wrap {
        sql.push_str("select * from (");
    }
    for (i, operand) in request.operands.iter().enumerate() {
        if i > 0 {
            sql.push('\n');
            sql.push_str(request.operator.keyword());
            sql.push('\n');
        }
        let needs_parenthesis = !operand.starts_with('(')
            && ["order by", "limit", "offset", "fetch"]
                .iter()
                .any(|keyword| sql::find_keyword(operand, keyword, 0).is_some());
        if needs_parenthesis {
            sql.push('(');
        }
        sql.push_str(operand);
        if needs_parenthesis {
            sql.push(')');
        }
    }
    if wrap {
        sql.push_str(") set_op_");
    }

    if !request.order_by.is_empty() {
        let aliases = if dialect.needs_alias_in_set_order_by() {
            let first = request.operands.first().map(String::as_str).unwrap_or_default();
            Some(sql::select_item_aliases(first)?)
        } else {
            None
        };

        sql.push_str("\norder by ");
        for (i, element) in request.order_by.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            match &aliases {
                Some(aliases) => {
                    let alias = element
                        .position
                        .checked_sub(1)
                        .and_then(|idx| aliases.get(idx))
                        .ok_or_else(|| {
                            QueryError::structural(format!(
                                "Order by position {} exceeds the select items of the set operation",
                                element.position
                            ))
                        })?;
                    sql.push_str(alias);
                }
                None => sql.push_str(&element.position.to_string()),
            }
            sql.push_str(if element.ascending { " asc" } else { " desc" });
            match element.nulls_first {
                Some(true) if dialect.supports_nulls_first() => sql.push_str(" nulls first"),
                Some(false) if dialect.supports_nulls_first() => sql.push_str(" nulls last"),
                _ => {}
            }
        }
    }

    if request.limit.is_some() || request.offset.is_some() {
        sql.push_str(&dialect.limit_clause(request.limit, request.offset));
    }
    Ok(())
}
