//! The select-shaped SQL providers generate for UPDATE and collection DML.
//!
//! ```text
//! shaped-select := "select " ITEM ("," ITEM)* " from " T " " A JOIN* [" where " P]
//! SET           := "case when " COLUMN "=" EXPR " then " ANY " end" [alias]
//! ```

use std::ops::Range;

use crate::error::{QueryError, QueryResult};
use crate::sql::{self, FromClause, JoinClause};

#[derive(Debug)]
pub(super) struct ShapedSelect<'a> {
    pub sql: &'a str,
    pub items: Vec<Range<usize>>,
    pub from: FromClause,
    pub from_range: Range<usize>,
    pub predicate: Option<Range<usize>>,
}

impl<'a> ShapedSelect<'a> {
    pub fn parse(sql: &'a str) -> QueryResult<Self> {
        let items = sql::select_item_spans(sql)?;
        let from_keyword = sql::index_of_from(sql).ok_or_else(|| {
            QueryError::structural("Could not find the from clause of the shaped select").with_sql(sql)
        })?;
        let from_range = sql::from_clause_range(sql, from_keyword);
        let from = sql::parse_from_clause(sql, from_range.clone())?;
        let predicate = sql::find_keyword(sql, "where", from_range.end)
            .map(|keyword| {
                let start = keyword + "where".len();
                sql::trim_span(sql, start..sql::end_of_level(sql, start))
            })
            .filter(|span| !span.is_empty());
        Ok(Self {
            sql,
            items,
            from,
            from_range,
            predicate,
        })
    }

    pub fn item(&self, index: usize) -> &'a str {
        &self.sql[self.items[index].clone()]
    }

    pub fn predicate(&self) -> Option<&'a str> {
        self.predicate.clone().map(|span| &self.sql[span])
    }

    /// The join of the collection table and the remaining joins.
    pub fn split_collection_join(&self, alias: &str) -> QueryResult<(JoinClause, Vec<JoinClause>)> {
        let position = self
            .from
            .joins
            .iter()
            .position(|join| {
                join.table
                    .alias
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(alias))
            })
            .ok_or_else(|| {
                QueryError::structural(format!(
                    "The join of the collection alias '{}' could not be found",
                    alias
                ))
                .with_sql(self.sql)
            })?;
        let mut joins = self.from.joins.clone();
        let collection = joins.remove(position);
        Ok((collection, joins))
    }
}

/// A SET item of a shaped update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SetItem {
    pub column: String,
    pub expression: String,
}

pub(super) fn parse_set_item(item: &str) -> QueryResult<SetItem> {
    const CASE_WHEN: &str = "case when ";
    let item = item.trim();
    let body = item
        .get(..CASE_WHEN.len())
        .filter(|head| head.eq_ignore_ascii_case(CASE_WHEN))
        .map(|_| &item[CASE_WHEN.len()..])
        .ok_or_else(|| {
            QueryError::structural(format!("Expected a 'case when' set item but found: {}", item))
        })?;
    let equals = body.find('=').ok_or_else(|| {
        QueryError::structural(format!("The set item has no assignment: {}", item))
    })?;
    let then = sql::last_index_of_ignore_case(body, " then ", body.len())
        .filter(|&then| then > equals)
        .ok_or_else(|| {
            QueryError::structural(format!("The set item has no 'then' branch: {}", item))
        })?;
    Ok(SetItem {
        column: body[..equals].trim().to_string(),
        expression: body[equals + 1..then].trim().to_string(),
    })
}

/// Strip the `alias.` qualifier from a column expression.
pub(super) fn unqualified<'s>(column: &'s str, alias: &str) -> &'s str {
    column
        .get(..alias.len() + 1)
        .filter(|head| head[..alias.len()].eq_ignore_ascii_case(alias) && head.ends_with('.'))
        .map_or(column, |_| &column[alias.len() + 1..])
}

/// Fail when any of `texts` still references one of `aliases`.
pub(super) fn ensure_remapped<'t, I>(texts: I, aliases: &[&str], join_table: &str) -> QueryResult<()>
where
    I: IntoIterator<Item = &'t str>,
{
    for text in texts {
        for alias in aliases {
            if let Some(expression) = sql::column_expressions(text, alias, 0..text.len()).first() {
                return Err(QueryError::structural(format!(
                    "The column expression '{}' could not be remapped to the join table '{}'",
                    expression, join_table
                ))
                .with_sql(text));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_shaped_select() {
        let sql = "select case when a0_.name=? then 1 else 0 end from A a0_ inner join B b0_ on a0_.b_id=b0_.id where b0_.x=1";
        let shaped = ShapedSelect::parse(sql).unwrap();
        assert_eq!(shaped.items.len(), 1);
        assert_eq!(shaped.from.root.qualifier(), "a0_");
        assert_eq!(shaped.from.joins.len(), 1);
        assert_eq!(shaped.predicate(), Some("b0_.x=1"));
    }

    #[test]
    fn test_parse_set_item() {
        let item = parse_set_item("case when a0_.name=upper(b0_.name) then 1 else 0 end").unwrap();
        assert_eq!(item.column, "a0_.name");
        assert_eq!(item.expression, "upper(b0_.name)");

        let item = parse_set_item("CASE WHEN a0_.flag=(case when b0_.x=1 then true else false end) then 1 end c0").unwrap();
        assert_eq!(item.column, "a0_.flag");
        assert_eq!(item.expression, "(case when b0_.x=1 then true else false end)");

        assert!(parse_set_item("a0_.name").unwrap_err().is_structural());
    }

    #[test]
    fn test_unqualified() {
        assert_eq!(unqualified("a0_.name", "a0_"), "name");
        assert_eq!(unqualified("name", "a0_"), "name");
        assert_eq!(unqualified("a0x.name", "a0_"), "a0x.name");
    }

    #[test]
    fn test_missing_collection_join() {
        let sql = "select 1 from Owner o0_ inner join Item i2_ on o0_.id=i2_.owner_id";
        let shaped = ShapedSelect::parse(sql).unwrap();
        assert!(shaped.split_collection_join("i1_").unwrap_err().is_structural());
    }
}
