//! INSERT into collection join tables.
//!
//! The provider renders the rows to insert as a shaped select. Trailing
//! select items that only served to correlate the select are cut off, and
//! joins that become unused are removed with them.

use super::modification::ModificationConfig;
use super::shaped::ShapedSelect;
use crate::error::{QueryError, QueryResult};
use crate::sql::{self, SqlEdits};

/// Configuration of an INSERT into a collection join table.
#[derive(Debug, Clone)]
pub struct CollectionInsertConfig {
    /// Shared modification settings.
    pub modification: ModificationConfig,
    /// The statement head, e.g. `insert into owner_items(owner_id, item_id)`.
    pub insert_sql: String,
    /// Number of trailing select items to remove.
    pub cutoff_columns: usize,
}

impl CollectionInsertConfig {
    /// Insert through `insert_sql` without cutting off columns.
    pub fn new(insert_sql: impl Into<String>) -> Self {
        Self {
            modification: ModificationConfig::default(),
            insert_sql: insert_sql.into(),
            cutoff_columns: 0,
        }
    }

    /// Set the shared modification settings.
    pub fn modification(mut self, modification: ModificationConfig) -> Self {
        self.modification = modification;
        self
    }

    /// Remove the last `cutoff_columns` select items.
    pub fn cutoff_columns(mut self, cutoff_columns: usize) -> Self {
        self.cutoff_columns = cutoff_columns;
        self
    }
}

fn references(text: &str, alias: &str) -> bool {
    !sql::column_expressions(text, alias, 0..text.len()).is_empty()
}

pub(crate) fn rewrite_collection_insert(
    sql: &str,
    config: &CollectionInsertConfig,
) -> QueryResult<String> {
    if config.cutoff_columns == 0 {
        return Ok(format!("{} {}", config.insert_sql, sql));
    }

    let shaped = ShapedSelect::parse(sql)?;
    let items = &shaped.items;
    if config.cutoff_columns >= items.len() {
        return Err(QueryError::invalid_config(format!(
            "Cannot cut off {} of {} select items",
            config.cutoff_columns,
            items.len()
        ))
        .with_sql(sql));
    }
    let keep = items.len() - config.cutoff_columns;
    let removed_span = items[keep - 1].end..items[items.len() - 1].end;
    let removed_items = &sql[removed_span.clone()];
    let tail = &sql[shaped.from_range.end..];
    let joins = &shaped.from.joins;

    let mut removed = vec![false; joins.len()];
    loop {
        let mut changed = false;
        for (i, join) in joins.iter().enumerate() {
            if removed[i] {
                continue;
            }
            let alias = join.table.qualifier();
            let on_of = |keep_removed: bool| {
                joins.iter().enumerate().any(|(j, other)| {
                    j != i
                        && removed[j] == keep_removed
                        && other.on.as_deref().is_some_and(|on| references(on, alias))
                })
            };
            let used_by_removed = references(removed_items, alias) || on_of(true);
            let used_elsewhere = items[..keep]
                .iter()
                .any(|item| references(&sql[item.clone()], alias))
                || references(tail, alias)
                || on_of(false);
            if used_by_removed && !used_elsewhere {
                removed[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut edits = SqlEdits::new();
    edits.delete(removed_span);
    let bytes = sql.as_bytes();
    for (join, _) in joins.iter().zip(&removed).filter(|(_, removed)| **removed) {
        let mut start = join.span.start;
        while start > 0 && bytes[start - 1].is_ascii_whitespace() {
            start -= 1;
        }
        edits.delete(start..join.span.end);
    }
    tracing::debug!(
        cutoff = config.cutoff_columns,
        removed_joins = removed.iter().filter(|r| **r).count(),
        "cut off collection insert columns"
    );
    Ok(format!("{} {}", config.insert_sql, edits.apply(sql)?))
}
