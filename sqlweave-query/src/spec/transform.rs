//! Rewrites applied to provider SQL before CTE assembly.

use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::provider::SqlProvider;
use crate::sql::{self, SqlEdits};
use crate::statement::StatementRef;

const LEFT_JOIN: &str = "left outer join ";
const JOIN_TABLE_KEY: &str = "join_table_key";
const JOIN_TABLE_PARENT: &str = "join_table_parent_";

/// A VALUES clause standing in for an entity table.
///
/// The provider renders the entity as `( select * from <Entity> ) <alias>`
/// guarded by a synthetic predicate. Composition swaps the table for the
/// literal VALUES clause and neutralizes the guard.
#[derive(Debug, Clone)]
pub struct EntityFunctionNode {
    values_clause: String,
    values_aliases: Option<String>,
    entity_name: String,
    table_alias: String,
    synthetic_predicate: String,
    value_statement: Option<StatementRef>,
}

impl EntityFunctionNode {
    /// Create a node replacing the table aliased `table_alias` with `values_clause`.
    pub fn new(
        values_clause: impl Into<String>,
        entity_name: impl Into<String>,
        table_alias: impl Into<String>,
        synthetic_predicate: impl Into<String>,
    ) -> Self {
        Self {
            values_clause: values_clause.into(),
            values_aliases: None,
            entity_name: entity_name.into(),
            table_alias: table_alias.into(),
            synthetic_predicate: synthetic_predicate.into(),
            value_statement: None,
        }
    }

    /// Column alias list appended to the table alias, e.g. `(id,name)`.
    pub fn with_aliases(mut self, aliases: impl Into<String>) -> Self {
        self.values_aliases = Some(aliases.into());
        self
    }

    /// A statement whose parameters feed the VALUES clause.
    pub fn with_value_statement(mut self, statement: StatementRef) -> Self {
        self.value_statement = Some(statement);
        self
    }

    /// The literal VALUES clause.
    pub fn values_clause(&self) -> &str {
        &self.values_clause
    }

    /// The column alias list.
    pub fn values_aliases(&self) -> Option<&str> {
        self.values_aliases.as_deref()
    }

    /// The entity name in the provider placeholder.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// The SQL alias of the replaced table.
    pub fn table_alias(&self) -> &str {
        &self.table_alias
    }

    /// The guard predicate replaced with `1=1`.
    pub fn synthetic_predicate(&self) -> &str {
        &self.synthetic_predicate
    }

    /// The statement feeding the VALUES clause.
    pub fn value_statement(&self) -> Option<&StatementRef> {
        self.value_statement.as_ref()
    }
}

/// Apply left-join rewrites for `aliases`, then every entity function node.
pub(crate) fn apply_transformations(
    sql: String,
    provider: &dyn SqlProvider,
    base: &StatementRef,
    key_restricted_left_join_aliases: &[String],
    entity_functions: &[EntityFunctionNode],
) -> QueryResult<String> {
    let mut sql = sql;
    for alias in key_restricted_left_join_aliases {
        let sql_alias = provider.sql_alias(Arc::as_ref(base), alias)?;
        sql = rewrite_key_restricted_left_join(&sql, &sql_alias)?;
    }
    for node in entity_functions {
        sql = apply_entity_function(&sql, node)?;
    }
    Ok(sql)
}

/// Substitute the VALUES clause of `node` into `sql`.
pub(crate) fn apply_entity_function(sql: &str, node: &EntityFunctionNode) -> QueryResult<String> {
    let placeholder = format!("( select * from {} )", node.entity_name);
    let predicate = node.synthetic_predicate.as_str();
    let guard_after = |from: usize| -> QueryResult<Option<std::ops::Range<usize>>> {
        if predicate.is_empty() {
            return Ok(None);
        }
        sql[from..]
            .find(predicate)
            .map(|i| Some(from + i..from + i + predicate.len()))
            .ok_or_else(|| {
                QueryError::structural(format!(
                    "The synthetic predicate of entity function {} could not be found",
                    node.entity_name
                ))
                .with_sql(sql)
            })
    };

    let mut edits = SqlEdits::new();
    let mut cursor = 0;
    let mut placeholders = 0;
    while let Some(idx) = sql[cursor..].find(&placeholder).map(|i| cursor + i) {
        let end = idx + placeholder.len();
        edits.replace(idx..end, node.entity_name.as_str());
        cursor = end;
        if let Some(guard) = guard_after(end)? {
            cursor = guard.end;
            edits.replace(guard, "1=1");
        }
        placeholders += 1;
    }
    if placeholders == 0 {
        // a bare parameter list only carries the guard predicate
        let where_idx = sql::index_of_where(sql).unwrap_or(0);
        if let Some(guard) = guard_after(where_idx)? {
            edits.replace(guard, "1=1");
        }
    }
    let sql = edits.apply(sql)?;

    let mut edits = SqlEdits::new();
    let remapped = sql::remap_table_name(
        &sql,
        &node.table_alias,
        &node.values_clause,
        node.values_aliases.as_deref(),
        &mut edits,
    );
    if remapped == 0 {
        return Err(QueryError::structural(format!(
            "The table aliased {} could not be found for entity function {}",
            node.table_alias, node.entity_name
        ))
        .with_sql(sql));
    }
    tracing::trace!(entity = %node.entity_name, placeholders, "applied entity function");
    edits.apply(&sql)
}

/// Turn the key restricted left join aliased `sql_alias` into a subquery join.
///
/// The join table joined before `sql_alias` is moved into the subquery so
/// the key restriction no longer filters the parent's rows.
pub(crate) fn rewrite_key_restricted_left_join(sql: &str, sql_alias: &str) -> QueryResult<String> {
    let bytes = sql.as_bytes();
    let search = format!(" {}", sql_alias);
    let not_found = || {
        QueryError::structural("The left join for subquery rewriting could not be found!")
            .with_sql(sql)
    };

    let mut from = 0;
    let alias_idx = loop {
        let idx = sql[from..]
            .find(&search)
            .map(|i| from + i)
            .ok_or_else(not_found)?;
        from = idx + 1;
        match bytes.get(idx + search.len()) {
            Some(c) if *c == b'.' || sql::is_identifier_char(*c) => continue,
            _ => break idx,
        }
    };

    let table_end = if alias_idx >= 3 && bytes[alias_idx - 3..alias_idx].eq_ignore_ascii_case(b" as") {
        alias_idx - 3
    } else {
        alias_idx
    };
    let table = sql::token_before(sql, table_end);

    let target_join =
        sql::last_index_of_ignore_case(sql, LEFT_JOIN, table.start).ok_or_else(not_found)?;
    let parent_join =
        sql::last_index_of_ignore_case(sql, LEFT_JOIN, target_join).ok_or_else(not_found)?;
    let join_table_idx = parent_join + LEFT_JOIN.len();

    let on_idx = sql::index_of_ignore_case(sql, " on ", join_table_idx)
        .filter(|idx| *idx < target_join)
        .ok_or_else(not_found)?;
    let on_condition = &sql[on_idx..target_join];

    let join_table_alias = sql[join_table_idx..on_idx]
        .split_once(' ')
        .map(|(_, alias)| alias.trim())
        .map(|alias| {
            alias
                .strip_prefix("as ")
                .or_else(|| alias.strip_prefix("AS "))
                .unwrap_or(alias)
                .trim()
        })
        .filter(|alias| !alias.is_empty())
        .ok_or_else(not_found)?;

    let restriction_idx = sql::index_of_ignore_case(sql, " and (", table.end).ok_or_else(|| {
        QueryError::structural(
            "The join table column expression needed for subquery rewriting could not be found!",
        )
        .with_sql(sql)
    })?;

    let parent_expressions = sql::column_expressions(sql, join_table_alias, on_idx..target_join);
    let key_expressions = sql::column_expressions(sql, join_table_alias, restriction_idx..sql.len());
    if key_expressions.len() != 1 {
        return Err(QueryError::structural(format!(
            "Expected exactly one key expression but found: {}",
            key_expressions.len()
        ))
        .with_sql(sql));
    }
    let key_expression = key_expressions[0].as_str();

    let mut subquery = format!(
        "(select {} as {}, {}.*",
        key_expression, JOIN_TABLE_KEY, sql_alias
    );
    let mut condition_edits = SqlEdits::new();
    for (i, parent) in parent_expressions.iter().enumerate() {
        subquery.push_str(&format!(", {} as {}{}", parent, JOIN_TABLE_PARENT, i));
        for occurrence in sql::expression_occurrences(on_condition, parent, 0..on_condition.len()) {
            condition_edits.replace(occurrence, format!("{}.{}{}", sql_alias, JOIN_TABLE_PARENT, i));
        }
    }
    subquery.push_str(" from ");
    subquery.push_str(&sql[join_table_idx..on_idx]);
    let on_condition = condition_edits.apply(on_condition)?;

    let target_key = format!("{}.{}", sql_alias, JOIN_TABLE_KEY);
    let mut edits = SqlEdits::new();
    edits.replace(join_table_idx..target_join - 1, subquery);
    edits.insert(restriction_idx, format!(") {}{}", sql_alias, on_condition));
    for occurrence in sql::expression_occurrences(sql, key_expression, 0..join_table_idx)
        .into_iter()
        .chain(sql::expression_occurrences(sql, key_expression, restriction_idx..sql.len()))
    {
        edits.replace(occurrence, target_key.as_str());
    }

    tracing::debug!(alias = sql_alias, "rewrote key restricted left join");
    edits.apply(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_left_join_rewrite() {
        let sql = "select a.id, ab.key from A a left outer join A_B ab on a.id=ab.a_id left outer join B b on ab.b_id=b.id and (ab.key=?) where a.id = 1";
        let rewritten = rewrite_key_restricted_left_join(sql, "b").unwrap();
        assert_eq!(
            rewritten,
            "select a.id, b.join_table_key from A a left outer join (select ab.key as join_table_key, b.*, ab.a_id as join_table_parent_0 from A_B ab left outer join B b on ab.b_id=b.id) b on a.id=b.join_table_parent_0  and (b.join_table_key=?) where a.id = 1"
        );
    }

    #[test]
    fn test_left_join_rewrite_multibyte_table_name() {
        let sql = "select a.id, ab.key from A a left outer join A_B ab on a.id=ab.a_id left outer join \"B€\" b on ab.b_id=b.id and (ab.key=?) where a.id = 1";
        let rewritten = rewrite_key_restricted_left_join(sql, "b").unwrap();
        assert_eq!(
            rewritten,
            "select a.id, b.join_table_key from A a left outer join (select ab.key as join_table_key, b.*, ab.a_id as join_table_parent_0 from A_B ab left outer join \"B€\" b on ab.b_id=b.id) b on a.id=b.join_table_parent_0  and (b.join_table_key=?) where a.id = 1"
        );
    }

    #[test]
    fn test_left_join_rewrite_missing_parent_join() {
        let sql = "select a.id from A a left outer join B b on a.b_id=b.id and (b.key=?)";
        let err = rewrite_key_restricted_left_join(sql, "b").unwrap_err();
        assert_eq!(err.message, "The left join for subquery rewriting could not be found!");
    }

    #[test]
    fn test_left_join_rewrite_ambiguous_key() {
        let sql = "select a.id from A a left outer join A_B ab on a.id=ab.a_id left outer join B b on ab.b_id=b.id and (ab.key=? or ab.other=?)";
        let err = rewrite_key_restricted_left_join(sql, "b").unwrap_err();
        assert_eq!(err.message, "Expected exactly one key expression but found: 2");
    }

    #[test]
    fn test_entity_function_placeholder() {
        let node = EntityFunctionNode::new("(VALUES (?),(?))", "IntegerValue", "i0_", "i0_.value is null")
            .with_aliases("(value)");
        let sql = "select i0_.value from ( select * from IntegerValue ) i0_ where i0_.value is null";
        assert_eq!(
            apply_entity_function(sql, &node).unwrap(),
            "select i0_.value from (VALUES (?),(?)) i0_(value) where 1=1"
        );
    }

    #[test]
    fn test_entity_function_without_placeholder() {
        let node = EntityFunctionNode::new("(VALUES (?,?))", "Pair", "p0_", "p0_.a is null")
            .with_aliases("(a,b)");
        let sql = "select p0_.a, p0_.b from Pair p0_ where p0_.a is null and p0_.b > 1";
        assert_eq!(
            apply_entity_function(sql, &node).unwrap(),
            "select p0_.a, p0_.b from (VALUES (?,?)) p0_(a,b) where 1=1 and p0_.b > 1"
        );
    }

    #[test]
    fn test_entity_function_unknown_alias() {
        let node = EntityFunctionNode::new("(VALUES (?))", "V", "v9_", "");
        let err = apply_entity_function("select 1 from T t0_", &node).unwrap_err();
        assert!(err.is_structural());
    }
}
