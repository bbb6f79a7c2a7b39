//! UPDATE with join emulation and collection table updates.
//!
//! A joined update arrives as a shaped select whose items carry the SET list
//! as `case when <column>=<expression> then ... end`. The target, its joins
//! and the predicate come from the FROM and WHERE clauses of the same select.

use indexmap::IndexMap;

use super::delete::push_where;
use super::modification::ModificationConfig;
use super::shaped::{SetItem, ShapedSelect, ensure_remapped, parse_set_item, unqualified};
use crate::dialect::UpdateJoinStyle;
use crate::error::{QueryError, QueryResult};
use crate::sql::{self, FromClause, JoinClause, TableRef};

/// Identity of the updated rows, needed by the styles that join back
/// computed values.
#[derive(Debug, Clone, Default)]
pub struct UpdateJoinConfig {
    /// Id columns of the target table, unqualified.
    pub id_columns: Vec<String>,
}

impl UpdateJoinConfig {
    /// Join back on the given id columns.
    pub fn new<I, S>(id_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id_columns: id_columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Configuration of an UPDATE.
#[derive(Debug, Clone, Default)]
pub struct UpdateConfig {
    /// Shared modification settings.
    pub modification: ModificationConfig,
    /// Set when the base statement is a shaped select with joins.
    pub join: Option<UpdateJoinConfig>,
}

impl UpdateConfig {
    /// A native update.
    pub fn new(modification: ModificationConfig) -> Self {
        Self {
            modification,
            join: None,
        }
    }

    /// Emulate joins over a shaped select.
    pub fn join(mut self, join: UpdateJoinConfig) -> Self {
        self.join = Some(join);
        self
    }
}

/// Configuration of an UPDATE of a collection join table.
#[derive(Debug, Clone)]
pub struct CollectionUpdateConfig {
    /// Shared modification settings.
    pub modification: ModificationConfig,
    /// The join table being updated.
    pub join_table: String,
    /// Alias of the join table in the provider SQL.
    pub collection_alias: String,
    /// SET columns of the provider SQL mapped to join table columns.
    pub column_only_remappings: IndexMap<String, String>,
    /// Column expressions mapped to join table columns. Keys ending with
    /// `.` remap a whole qualifier.
    pub column_expression_remappings: IndexMap<String, String>,
}

impl CollectionUpdateConfig {
    /// Update `join_table`, joined as `collection_alias`.
    pub fn new(join_table: impl Into<String>, collection_alias: impl Into<String>) -> Self {
        Self {
            modification: ModificationConfig::default(),
            join_table: join_table.into(),
            collection_alias: collection_alias.into(),
            column_only_remappings: IndexMap::new(),
            column_expression_remappings: IndexMap::new(),
        }
    }

    /// Set the shared modification settings.
    pub fn modification(mut self, modification: ModificationConfig) -> Self {
        self.modification = modification;
        self
    }

    /// Map a SET column to a join table column.
    pub fn remap_column(mut self, column: impl Into<String>, target: impl Into<String>) -> Self {
        self.column_only_remappings.insert(column.into(), target.into());
        self
    }

    /// Map a column expression to a join table column.
    pub fn remap(mut self, expression: impl Into<String>, column: impl Into<String>) -> Self {
        self.column_expression_remappings
            .insert(expression.into(), column.into());
        self
    }
}

fn set_items(shaped: &ShapedSelect<'_>) -> QueryResult<Vec<SetItem>> {
    (0..shaped.items.len())
        .map(|index| parse_set_item(shaped.item(index)))
        .collect()
}

pub(crate) fn rewrite_update(
    sql: &str,
    style: UpdateJoinStyle,
    join: &UpdateJoinConfig,
) -> QueryResult<String> {
    let shaped = ShapedSelect::parse(sql)?;
    let items = set_items(&shaped)?;
    tracing::debug!(
        style = ?style,
        joins = shaped.from.joins.len(),
        items = items.len(),
        "emulating update joins"
    );
    render_update(
        style,
        &shaped.from.root,
        &items,
        &shaped.from.joins,
        shaped.predicate(),
        &join.id_columns,
    )
}

fn render_update(
    style: UpdateJoinStyle,
    target: &TableRef,
    items: &[SetItem],
    joins: &[JoinClause],
    predicate: Option<&str>,
    id_columns: &[String],
) -> QueryResult<String> {
    let alias = target.qualifier();
    let set_list = items
        .iter()
        .map(|item| format!("{} = {}", unqualified(&item.column, alias), item.expression))
        .collect::<Vec<_>>()
        .join(", ");

    match (style, joins.split_first()) {
        (UpdateJoinStyle::FromAlias, _) => {
            let mut sql = format!("update {} set {} from {}", alias, set_list, target);
            if !joins.is_empty() {
                sql.push(' ');
                sql.push_str(&FromClause::render_joins(joins));
            }
            push_where(&mut sql, sql::conjunction(predicate));
            Ok(sql)
        }
        (_, None) => {
            let mut sql = format!("update {} set {}", target, set_list);
            push_where(&mut sql, sql::conjunction(predicate));
            Ok(sql)
        }
        (UpdateJoinStyle::From, Some((first, rest))) => {
            let mut sql = format!("update {} set {} from {}", target, set_list, first.table);
            if !rest.is_empty() {
                sql.push(' ');
                sql.push_str(&FromClause::render_joins(rest));
            }
            push_where(
                &mut sql,
                sql::conjunction(first.on.as_deref().into_iter().chain(predicate)),
            );
            Ok(sql)
        }
        (UpdateJoinStyle::Reference | UpdateJoinStyle::Merge, Some(_)) => {
            if id_columns.is_empty() {
                return Err(QueryError::invalid_config(format!(
                    "The update join style {:?} requires the id columns of '{}'",
                    style, target.table
                )));
            }
            let mut computed = Vec::with_capacity(id_columns.len() + items.len());
            for (i, column) in id_columns.iter().enumerate() {
                computed.push(format!("{}.{} as ref_id_{}", alias, column, i));
            }
            for (i, item) in items.iter().enumerate() {
                computed.push(format!("{} as ref_set_{}", item.expression, i));
            }
            let mut values = format!(
                "select {} from {} {}",
                computed.join(", "),
                target,
                FromClause::render_joins(joins)
            );
            push_where(&mut values, sql::conjunction(predicate));

            let on = id_columns
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{}.{} = ref_.ref_id_{}", alias, column, i))
                .collect::<Vec<_>>()
                .join(" and ");
            let assignments = items.iter().enumerate().map(|(i, item)| {
                let column = unqualified(&item.column, alias);
                if style == UpdateJoinStyle::Reference {
                    format!("{}.{} = ref_.ref_set_{}", alias, column, i)
                } else {
                    format!("{} = ref_.ref_set_{}", column, i)
                }
            });
            let assignments = assignments.collect::<Vec<_>>().join(", ");

            Ok(if style == UpdateJoinStyle::Reference {
                format!(
                    "update {} inner join ({}) ref_ on {} set {}",
                    target, values, on, assignments
                )
            } else {
                format!(
                    "merge into {} using ({}) ref_ on ({}) when matched then update set {}",
                    target, values, on, assignments
                )
            })
        }
        (UpdateJoinStyle::None, Some(_)) => Err(QueryError::unsupported_dialect(format!(
            "Updates with joins are not supported with the update join style {:?}",
            style
        ))),
    }
}

pub(crate) fn rewrite_collection_update(
    sql: &str,
    config: &CollectionUpdateConfig,
) -> QueryResult<String> {
    let shaped = ShapedSelect::parse(sql)?;
    let (_, extra_joins) = shaped.split_collection_join(&config.collection_alias)?;
    let remappings = &config.column_expression_remappings;

    let mut columns = Vec::new();
    let mut expressions = Vec::new();
    for item in set_items(&shaped)? {
        let column = match config.column_only_remappings.get(&item.column) {
            Some(column) => column.clone(),
            None => unqualified(&item.column, &config.collection_alias).to_string(),
        };
        columns.push(column);
        expressions.push(sql::remap_expressions(&item.expression, remappings)?);
    }
    let predicate = shaped
        .predicate()
        .map(|predicate| sql::remap_expressions(predicate, remappings))
        .transpose()?;
    let mut joins = Vec::with_capacity(extra_joins.len());
    for mut join in extra_joins {
        join.on = join
            .on
            .map(|on| sql::remap_expressions(&on, remappings))
            .transpose()?;
        joins.push(join);
    }

    ensure_remapped(
        columns
            .iter()
            .chain(&expressions)
            .map(String::as_str)
            .chain(predicate.as_deref())
            .chain(joins.iter().filter_map(|join| join.on.as_deref())),
        &[shaped.from.root.qualifier(), config.collection_alias.as_str()],
        &config.join_table,
    )?;

    let assignments = columns
        .iter()
        .zip(&expressions)
        .map(|(column, expression)| format!("{} = {}", column, expression))
        .collect::<Vec<_>>()
        .join(", ");
    let mut update = format!("update {} set {}", config.join_table, assignments);
    match joins.split_first() {
        None => push_where(&mut update, sql::conjunction(predicate.as_deref())),
        Some((first, rest)) => {
            let mut exists = format!("select 1 from {}", first.table);
            if !rest.is_empty() {
                exists.push(' ');
                exists.push_str(&FromClause::render_joins(rest));
            }
            push_where(
                &mut exists,
                sql::conjunction(first.on.as_deref().into_iter().chain(predicate.as_deref())),
            );
            update.push_str(" where exists (");
            update.push_str(&exists);
            update.push(')');
        }
    }
    tracing::debug!(join_table = %config.join_table, "rewrote collection update");
    Ok(update)
}
