//! FROM clause decomposition into a root table and its joins.

use std::fmt;
use std::ops::Range;

use super::{find_keyword, is_identifier_char, matching_paren, scan_top_level, trim_span};
use crate::error::{QueryError, QueryResult};

/// The kind of a join in a FROM clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `inner join` or bare `join`.
    Inner,
    /// `left outer join` or `left join`.
    LeftOuter,
    /// `cross join` or a comma separated table.
    Cross,
}

impl JoinKind {
    /// The keyword rendered for this join.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "inner join",
            Self::LeftOuter => "left outer join",
            Self::Cross => "cross join",
        }
    }
}

const JOIN_KEYWORDS: &[(&str, JoinKind)] = &[
    ("inner join", JoinKind::Inner),
    ("left outer join", JoinKind::LeftOuter),
    ("left join", JoinKind::LeftOuter),
    ("cross join", JoinKind::Cross),
    ("join", JoinKind::Inner),
];

const ALIAS_STOP_WORDS: &[&str] = &[
    "inner", "left", "right", "full", "cross", "join", "on", "where", "group", "order", "having",
    "using", "set", "union", "except", "intersect",
];

/// A table reference with its optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Table name or parenthesized derived table.
    pub table: String,
    /// Alias, if declared.
    pub alias: Option<String>,
    /// Span of the whole reference in the source text.
    pub span: Range<usize>,
}

impl TableRef {
    /// The qualifier columns of this table are referenced with.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} {}", self.table, alias),
            None => f.write_str(&self.table),
        }
    }
}

/// One join of a FROM clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    /// Join kind.
    pub kind: JoinKind,
    /// The joined table.
    pub table: TableRef,
    /// The ON condition, if any.
    pub on: Option<String>,
    /// Span from the join keyword to the end of the condition.
    pub span: Range<usize>,
}

impl fmt::Display for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.keyword(), self.table)?;
        if let Some(on) = &self.on {
            write!(f, " on {}", on)?;
        }
        Ok(())
    }
}

/// A decomposed FROM clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromClause {
    /// The first table.
    pub root: TableRef,
    /// Joins in declaration order.
    pub joins: Vec<JoinClause>,
}

impl FromClause {
    /// Render the joins back to SQL, separated by single spaces.
    pub fn render_joins(joins: &[JoinClause]) -> String {
        joins
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn skip_whitespace(bytes: &[u8], mut pos: usize, end: usize) -> usize {
    while pos < end && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn join_keyword_at(sql: &str, pos: usize) -> Option<(usize, JoinKind)> {
    let bytes = sql.as_bytes();
    if bytes.get(pos) == Some(&b',') {
        return Some((1, JoinKind::Cross));
    }
    JOIN_KEYWORDS.iter().find_map(|(keyword, kind)| {
        let end = pos + keyword.len();
        let matches = bytes.len() > end
            && bytes[pos..end].eq_ignore_ascii_case(keyword.as_bytes())
            && bytes[end].is_ascii_whitespace()
            && (pos == 0 || !is_identifier_char(bytes[pos - 1]));
        matches.then_some((keyword.len(), *kind))
    })
}

fn parse_table_ref(sql: &str, pos: usize, end: usize) -> QueryResult<(TableRef, usize)> {
    let bytes = sql.as_bytes();
    let start = skip_whitespace(bytes, pos, end);
    let mut cursor = start;

    if bytes.get(cursor) == Some(&b'(') {
        let close = matching_paren(sql, cursor).ok_or_else(|| {
            QueryError::structural("Unbalanced parenthesis in FROM clause").with_sql(sql)
        })?;
        cursor = close + 1;
    } else {
        while cursor < end
            && !bytes[cursor].is_ascii_whitespace()
            && bytes[cursor] != b','
            && bytes[cursor] != b')'
        {
            cursor += 1;
        }
    }
    if cursor == start {
        return Err(QueryError::structural("Expected a table in FROM clause").with_sql(sql));
    }
    let table = sql[start..cursor].to_string();
    let mut table_end = cursor;

    let mut next = skip_whitespace(bytes, cursor, end);
    if next + 3 <= end && bytes[next..next + 3].eq_ignore_ascii_case(b"as ") {
        next = skip_whitespace(bytes, next + 3, end);
    }
    let mut alias_end = next;
    while alias_end < end && is_identifier_char(bytes[alias_end]) {
        alias_end += 1;
    }
    let candidate = &sql[next..alias_end];
    let alias = if !candidate.is_empty()
        && !ALIAS_STOP_WORDS
            .iter()
            .any(|w| w.eq_ignore_ascii_case(candidate))
    {
        table_end = alias_end;
        Some(candidate.to_string())
    } else {
        None
    };

    Ok((
        TableRef {
            table,
            alias,
            span: start..table_end,
        },
        table_end,
    ))
}

/// Decompose the FROM clause text `sql[range]`.
///
/// `range` starts right after the `from` keyword and ends where the clause
/// ends (the `where` keyword, the end of the enclosing group or the text).
pub fn parse_from_clause(sql: &str, range: Range<usize>) -> QueryResult<FromClause> {
    let bytes = sql.as_bytes();
    let (root, mut pos) = parse_table_ref(sql, range.start, range.end)?;
    let mut joins = Vec::new();

    loop {
        pos = skip_whitespace(bytes, pos, range.end);
        if pos >= range.end {
            break;
        }
        let (keyword_len, kind) = join_keyword_at(sql, pos).ok_or_else(|| {
            QueryError::structural(format!(
                "Unexpected token in FROM clause at offset {}",
                pos
            ))
            .with_sql(sql)
        })?;
        let join_start = pos;
        let (table, table_end) = parse_table_ref(sql, pos + keyword_len, range.end)?;
        pos = skip_whitespace(bytes, table_end, range.end);

        let mut on = None;
        if pos + 3 <= range.end && bytes[pos..pos + 3].eq_ignore_ascii_case(b"on ") {
            let condition_start = pos + 3;
            let condition_end = scan_top_level(&sql[..range.end], condition_start, |i| {
                bytes[i - 1].is_ascii_whitespace() && join_keyword_at(sql, i).is_some()
                    || bytes[i] == b','
            })
            .unwrap_or(range.end);
            let condition = trim_span(sql, condition_start..condition_end);
            on = Some(sql[condition.clone()].to_string());
            pos = condition.end;
        }

        joins.push(JoinClause {
            kind,
            table,
            on,
            span: join_start..pos,
        });
    }

    Ok(FromClause { root, joins })
}

/// Range of the FROM clause whose `from` keyword starts at `from_keyword`.
pub fn from_clause_range(sql: &str, from_keyword: usize) -> Range<usize> {
    let start = from_keyword + "from".len();
    let end = ["where", "group by", "having", "order by", "union", "intersect", "except"]
        .iter()
        .filter_map(|k| find_keyword(sql, k, start))
        .min()
        .unwrap_or_else(|| super::end_of_level(sql, start));
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(sql: &str) -> FromClause {
        let from = super::super::index_of_from(sql).unwrap();
        parse_from_clause(sql, from_clause_range(sql, from)).unwrap()
    }

    #[test]
    fn test_root_only() {
        let clause = parse("select a.id from A a where a.id = 1");
        assert_eq!(clause.root.table, "A");
        assert_eq!(clause.root.alias.as_deref(), Some("a"));
        assert!(clause.joins.is_empty());
    }

    #[test]
    fn test_joins_with_conditions() {
        let sql = "select a.id from A a inner join B b on a.b_id=b.id left outer join C as c on c.id=b.c_id and (c.x in (1, 2)) where a.id = 1";
        let clause = parse(sql);
        assert_eq!(clause.joins.len(), 2);
        assert_eq!(clause.joins[0].kind, JoinKind::Inner);
        assert_eq!(clause.joins[0].on.as_deref(), Some("a.b_id=b.id"));
        assert_eq!(clause.joins[1].kind, JoinKind::LeftOuter);
        assert_eq!(clause.joins[1].table.alias.as_deref(), Some("c"));
        assert_eq!(clause.joins[1].on.as_deref(), Some("c.id=b.c_id and (c.x in (1, 2))"));
        assert_eq!(
            FromClause::render_joins(&clause.joins),
            "inner join B b on a.b_id=b.id left outer join C c on c.id=b.c_id and (c.x in (1, 2))"
        );
    }

    #[test]
    fn test_inside_subquery() {
        let sql = "delete from A a where a.id in (select a1.id from A a1 join B b on a1.id=b.a_id)";
        let open = sql.find('(').unwrap();
        let from = find_keyword(sql, "from", open + 1).unwrap();
        let clause = parse_from_clause(sql, from_clause_range(sql, from)).unwrap();
        assert_eq!(clause.root.alias.as_deref(), Some("a1"));
        assert_eq!(clause.joins[0].on.as_deref(), Some("a1.id=b.a_id"));
    }

    #[test]
    fn test_unexpected_token() {
        let sql = "select x from A a natural join B b";
        let from = super::super::index_of_from(sql).unwrap();
        assert!(parse_from_clause(sql, from_clause_range(sql, from)).is_err());
    }
}
