//! DELETE with join emulation and collection table deletes.
//!
//! Providers express a join-restricted delete either with the joins inline
//! or as a self-referencing `in` subquery:
//!
//! ```text
//! delete from T A where L in (select I from T A2 JOIN* [where P]) [and REST]
//! delete from T A JOIN* [where P]
//! ```
//!
//! Both are flattened to the target table, its joins and one predicate, then
//! rendered in the join style of the dialect. A subquery over a different
//! table, or without joins, is left alone.

use indexmap::IndexMap;

use super::modification::ModificationConfig;
use super::shaped::{ShapedSelect, ensure_remapped};
use crate::dialect::DeleteJoinStyle;
use crate::error::{QueryError, QueryResult};
use crate::sql::{self, FromClause, JoinClause, JoinKind, TableRef};

/// Configuration of a DELETE.
#[derive(Debug, Clone, Default)]
pub struct DeleteConfig {
    /// Shared modification settings.
    pub modification: ModificationConfig,
    /// Rewrite joins into the dialect's join style.
    pub join_emulation: bool,
}

impl DeleteConfig {
    /// A delete without join emulation.
    pub fn new(modification: ModificationConfig) -> Self {
        Self {
            modification,
            join_emulation: false,
        }
    }

    /// Enable join emulation.
    pub fn join_emulation(mut self, join_emulation: bool) -> Self {
        self.join_emulation = join_emulation;
        self
    }
}

/// Configuration of a DELETE from a collection join table.
#[derive(Debug, Clone)]
pub struct CollectionDeleteConfig {
    /// Shared modification settings.
    pub modification: ModificationConfig,
    /// The join table rows are deleted from.
    pub join_table: String,
    /// Alias of the join table in the provider SQL.
    pub collection_alias: String,
    /// Column expressions of the provider SQL mapped to join table columns.
    /// Keys ending with `.` remap a whole qualifier.
    pub column_expression_remappings: IndexMap<String, String>,
    /// The collection is the inverse side of its association.
    pub inverse: bool,
}

impl CollectionDeleteConfig {
    /// Delete from `join_table`, joined as `collection_alias`.
    pub fn new(join_table: impl Into<String>, collection_alias: impl Into<String>) -> Self {
        Self {
            modification: ModificationConfig::default(),
            join_table: join_table.into(),
            collection_alias: collection_alias.into(),
            column_expression_remappings: IndexMap::new(),
            inverse: false,
        }
    }

    /// Set the shared modification settings.
    pub fn modification(mut self, modification: ModificationConfig) -> Self {
        self.modification = modification;
        self
    }

    /// Map a column expression to a join table column.
    pub fn remap(mut self, expression: impl Into<String>, column: impl Into<String>) -> Self {
        self.column_expression_remappings
            .insert(expression.into(), column.into());
        self
    }

    /// Mark the collection as inverse.
    pub fn inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }
}

struct DeleteShape {
    target: TableRef,
    joins: Vec<JoinClause>,
    predicate: Option<String>,
}

pub(crate) fn rewrite_delete(sql: &str, style: DeleteJoinStyle) -> QueryResult<String> {
    match parse_delete(sql)? {
        Some(shape) => {
            tracing::debug!(style = ?style, joins = shape.joins.len(), "emulating delete joins");
            Ok(render_delete(
                style,
                &shape.target,
                &shape.joins,
                shape.predicate.as_deref(),
            ))
        }
        None => Ok(sql.to_string()),
    }
}

fn parse_delete(sql: &str) -> QueryResult<Option<DeleteShape>> {
    let start = sql::trim_span(sql, 0..sql.len()).start;
    let from_keyword = sql::find_keyword(sql, "from", start)
        .filter(|&from| sql[start..from].trim().eq_ignore_ascii_case("delete"))
        .ok_or_else(|| {
            QueryError::structural("Expected a statement starting with 'delete from'").with_sql(sql)
        })?;
    let range = sql::from_clause_range(sql, from_keyword);
    let clause = sql::parse_from_clause(sql, range.clone())?;
    let where_keyword = sql::find_keyword(sql, "where", range.end);

    if !clause.joins.is_empty() {
        let predicate = where_keyword
            .map(|keyword| sql[keyword + "where".len()..].trim().to_string())
            .filter(|predicate| !predicate.is_empty());
        return Ok(Some(DeleteShape {
            target: clause.root,
            joins: clause.joins,
            predicate,
        }));
    }
    match where_keyword {
        Some(keyword) => parse_subquery_shape(sql, clause.root, keyword + "where".len()),
        None => Ok(None),
    }
}

fn parse_subquery_shape(
    sql: &str,
    target: TableRef,
    predicate_start: usize,
) -> QueryResult<Option<DeleteShape>> {
    let Some(in_keyword) = sql::find_keyword(sql, "in", predicate_start) else {
        return Ok(None);
    };
    let left = sql[predicate_start..in_keyword].trim();
    let open = sql::trim_span(sql, in_keyword + "in".len()..sql.len()).start;
    if left.is_empty() || left.contains(char::is_whitespace) || sql.as_bytes().get(open) != Some(&b'(') {
        return Ok(None);
    }
    let close = sql::matching_paren(sql, open).ok_or_else(|| {
        QueryError::structural("Unbalanced parenthesis in the delete predicate").with_sql(sql)
    })?;
    let select = sql::trim_span(sql, open + 1..close).start;
    if sql::find_keyword(sql, "select", select) != Some(select) {
        return Ok(None);
    }
    let Some(inner_from) = sql::find_keyword(sql, "from", select) else {
        return Ok(None);
    };
    let inner_key = sql[select + "select".len()..inner_from].trim();
    let inner_range = sql::from_clause_range(sql, inner_from);
    let inner = sql::parse_from_clause(sql, inner_range.clone())?;
    if !inner.root.table.eq_ignore_ascii_case(&target.table) || inner.joins.is_empty() {
        return Ok(None);
    }

    let inner_alias = inner.root.qualifier().to_string();
    let alias = target.qualifier().to_string();
    if !sql::requalify(inner_key, &inner_alias, &alias).eq_ignore_ascii_case(left) {
        return Ok(None);
    }

    let rest = sql[close + 1..].trim();
    let rest_conjunct = if rest.is_empty() {
        None
    } else if rest.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("and ")) {
        Some(rest[4..].trim())
    } else {
        return Err(QueryError::structural(format!(
            "Unexpected text after the delete subquery: {}",
            rest
        ))
        .with_sql(sql));
    };

    let inner_predicate = sql::find_keyword(sql, "where", inner_range.end)
        .map(|keyword| sql::requalify(sql[keyword + "where".len()..close].trim(), &inner_alias, &alias));
    let joins = inner
        .joins
        .into_iter()
        .map(|mut join| {
            join.on = join.on.map(|on| sql::requalify(&on, &inner_alias, &alias));
            join
        })
        .collect();
    Ok(Some(DeleteShape {
        target,
        joins,
        predicate: sql::conjunction(inner_predicate.as_deref().into_iter().chain(rest_conjunct)),
    }))
}

/// Render a delete of `target` restricted by `joins` and `predicate`.
pub(crate) fn render_delete(
    style: DeleteJoinStyle,
    target: &TableRef,
    joins: &[JoinClause],
    predicate: Option<&str>,
) -> String {
    let Some((first, rest)) = joins.split_first() else {
        let mut sql = format!("delete from {}", target);
        push_where(&mut sql, sql::conjunction(predicate));
        return sql;
    };

    match style {
        DeleteJoinStyle::From => {
            let mut sql = format!(
                "delete {} from {} {}",
                target.qualifier(),
                target,
                FromClause::render_joins(joins)
            );
            push_where(&mut sql, sql::conjunction(predicate));
            sql
        }
        DeleteJoinStyle::Using => {
            // The first join references the target, so its table is the USING
            // table and its ON moves to the WHERE. With inner joins only, the
            // rest are listed and each ON is appended in join order, the last
            // join's ON closing the WHERE. Otherwise the rest keep their joins.
            let mut sql = format!("delete from {} using {}", target, first.table);
            let mut conditions: Vec<&str> = predicate.into_iter().collect();
            conditions.extend(first.on.as_deref());
            if rest.iter().all(|join| join.kind != JoinKind::LeftOuter) {
                for join in rest {
                    sql.push_str(", ");
                    sql.push_str(&join.table.to_string());
                    conditions.extend(join.on.as_deref());
                }
            } else {
                sql.push(' ');
                sql.push_str(&FromClause::render_joins(rest));
            }
            push_where(&mut sql, sql::conjunction(conditions));
            sql
        }
        DeleteJoinStyle::Merge | DeleteJoinStyle::None => {
            let mut subquery = format!("select 1 from {}", first.table);
            if !rest.is_empty() {
                subquery.push(' ');
                subquery.push_str(&FromClause::render_joins(rest));
            }
            push_where(
                &mut subquery,
                sql::conjunction(first.on.as_deref().into_iter().chain(predicate)),
            );
            format!("delete from {} where exists ({})", target, subquery)
        }
    }
}

pub(super) fn push_where(sql: &mut String, predicate: Option<String>) {
    if let Some(predicate) = predicate {
        sql.push_str(" where ");
        sql.push_str(&predicate);
    }
}

pub(crate) fn rewrite_collection_delete(
    sql: &str,
    config: &CollectionDeleteConfig,
    style: DeleteJoinStyle,
) -> QueryResult<String> {
    let shaped = ShapedSelect::parse(sql)?;
    let (_, extra_joins) = shaped.split_collection_join(&config.collection_alias)?;
    let remappings = &config.column_expression_remappings;

    let mut joins = Vec::with_capacity(extra_joins.len());
    for mut join in extra_joins {
        join.on = join
            .on
            .map(|on| sql::remap_expressions(&on, remappings))
            .transpose()?;
        joins.push(join);
    }
    let predicate = shaped
        .predicate()
        .map(|predicate| sql::remap_expressions(predicate, remappings))
        .transpose()?;

    ensure_remapped(
        predicate
            .as_deref()
            .into_iter()
            .chain(joins.iter().filter_map(|join| join.on.as_deref())),
        &[shaped.from.root.qualifier(), config.collection_alias.as_str()],
        &config.join_table,
    )?;

    tracing::debug!(
        style = ?style,
        join_table = %config.join_table,
        joins = joins.len(),
        "rewriting collection delete"
    );
    let target = TableRef {
        table: config.join_table.clone(),
        alias: None,
        span: 0..0,
    };
    Ok(render_delete(style, &target, &joins, predicate.as_deref()))
}
