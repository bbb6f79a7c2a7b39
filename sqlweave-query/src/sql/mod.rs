//! SQL text surgery.
//!
//! Provider SQL is never parsed into a tree. These helpers locate clause
//! boundaries, select items, column expressions and table aliases with a
//! quote and parenthesis aware scanner, and hand back byte offsets into the
//! original text. Rewrites are then expressed as [`SqlEdits`].
//!
//! All keyword matching is ASCII case-insensitive. Offsets returned by the
//! scanners always fall on ASCII bytes, so slicing at them is safe.

mod edit;
mod from;
mod quote;

pub use edit::SqlEdits;
pub use from::{FromClause, JoinClause, JoinKind, TableRef, from_clause_range, parse_from_clause};
pub use quote::QuoteMode;

use indexmap::{IndexMap, IndexSet};
use std::ops::Range;

use crate::error::{QueryError, QueryResult};

/// Whether `c` can be part of an unquoted identifier.
#[inline]
pub fn is_identifier_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

#[inline]
fn starts_with_ignore_case(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.len() >= at + needle.len() && bytes[at..at + needle.len()].eq_ignore_ascii_case(needle)
}

/// Find `needle` at or after `from`, ignoring ASCII case.
pub fn index_of_ignore_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() {
        return (from <= h.len()).then_some(from);
    }
    if n.len() > h.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Find the last `needle` starting strictly before `before`, ignoring ASCII case.
pub fn last_index_of_ignore_case(haystack: &str, needle: &str, before: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.len() > h.len() {
        return None;
    }
    let last_start = (h.len() - n.len()).min(before.checked_sub(1)?);
    (0..=last_start)
        .rev()
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Scan from `from` at the current nesting level and return the first offset
/// accepted by `accept`.
///
/// Quoted regions and parenthesized groups are skipped. A closing parenthesis
/// that ends the current level stops the scan.
pub fn scan_top_level<F>(sql: &str, from: usize, mut accept: F) -> Option<usize>
where
    F: FnMut(usize) -> bool,
{
    let bytes = sql.as_bytes();
    let mut mode = QuoteMode::None;
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        let c = bytes[i];
        if mode.is_unquoted() {
            if depth == 0 && accept(i) {
                return Some(i);
            }
            match c {
                b'(' => depth += 1,
                b')' if depth == 0 => return None,
                b')' => depth -= 1,
                _ => {}
            }
        }
        mode = mode.on_char(c);
        i += 1;
    }
    None
}

/// Find a literal pattern at the current nesting level.
pub fn find_top_level(sql: &str, pattern: &str, from: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let needle = pattern.as_bytes();
    scan_top_level(sql, from, |i| starts_with_ignore_case(bytes, i, needle))
}

/// Find a keyword at the current nesting level, requiring identifier
/// boundaries on both sides.
pub fn find_keyword(sql: &str, keyword: &str, from: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let needle = keyword.as_bytes();
    scan_top_level(sql, from, |i| {
        starts_with_ignore_case(bytes, i, needle)
            && (i == 0 || !is_identifier_char(bytes[i - 1]))
            && bytes
                .get(i + needle.len())
                .is_none_or(|c| !is_identifier_char(*c))
    })
}

/// Offset of the parenthesis closing the one at `open`.
pub fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    if sql.as_bytes().get(open) != Some(&b'(') {
        return None;
    }
    let bytes = sql.as_bytes();
    scan_top_level(sql, open + 1, |i| bytes[i] == b')')
}

/// Offset where the current nesting level ends: the closing parenthesis of
/// the enclosing group, or the end of the text.
pub fn end_of_level(sql: &str, from: usize) -> usize {
    let bytes = sql.as_bytes();
    scan_top_level(sql, from, |i| bytes[i] == b')').unwrap_or(sql.len())
}

/// Offset of the top-level `select` keyword, skipping a leading WITH clause.
pub fn index_of_select(sql: &str) -> Option<usize> {
    find_keyword(sql, "select", 0)
}

/// Offset of the top-level `from` keyword of the main query.
pub fn index_of_from(sql: &str) -> Option<usize> {
    let select = index_of_select(sql).unwrap_or(0);
    find_keyword(sql, "from", select)
}

/// Offset of the top-level `where` keyword of the main query.
pub fn index_of_where(sql: &str) -> Option<usize> {
    let select = index_of_select(sql).unwrap_or(0);
    find_keyword(sql, "where", select)
}

/// Offset of the top-level `group by` of the main query.
pub fn index_of_group_by(sql: &str) -> Option<usize> {
    let select = index_of_select(sql).unwrap_or(0);
    find_keyword(sql, "group by", select)
}

/// Offset of the top-level `order by` of the main query.
pub fn index_of_order_by(sql: &str) -> Option<usize> {
    let select = index_of_select(sql).unwrap_or(0);
    find_keyword(sql, "order by", select)
}

/// Split `sql[range]` on top-level commas, returning trimmed spans.
pub fn split_top_level(sql: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut start = range.start;
    let mut cursor = range.start;
    while let Some(comma) = scan_top_level(&sql[..range.end], cursor, |i| bytes[i] == b',') {
        spans.push(trim_span(sql, start..comma));
        start = comma + 1;
        cursor = comma + 1;
    }
    spans.push(trim_span(sql, start..range.end));
    spans.retain(|s| !s.is_empty());
    spans
}

/// Shrink a span so it neither starts nor ends with whitespace.
pub fn trim_span(sql: &str, span: Range<usize>) -> Range<usize> {
    let bytes = sql.as_bytes();
    let mut start = span.start;
    let mut end = span.end;
    while start < end && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    while end > start && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    start..end
}

/// Spans of the select items of the main query.
pub fn select_item_spans(sql: &str) -> QueryResult<Vec<Range<usize>>> {
    let select = index_of_select(sql)
        .ok_or_else(|| QueryError::structural("Could not find the select clause").with_sql(sql))?;
    let mut start = select + "select".len();
    let bytes = sql.as_bytes();
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    if starts_with_ignore_case(bytes, start, b"distinct ") {
        start += "distinct ".len();
    }
    let end = find_keyword(sql, "from", start).unwrap_or(sql.len());
    Ok(split_top_level(sql, start..end))
}

/// Number of select items of the main query.
pub fn count_select_items(sql: &str) -> QueryResult<usize> {
    select_item_spans(sql).map(|spans| spans.len())
}

/// The alias a select item is visible under.
///
/// `a.x as c0` yields `c0`, `count(*) c1` yields `c1` and an unaliased column
/// reference yields its column name. Sequence expressions have no alias and
/// are returned whole.
pub fn extract_alias(item: &str) -> &str {
    let item = item.trim();
    let bytes = item.as_bytes();
    if starts_with_ignore_case(bytes, 0, b"next value for") {
        return item;
    }

    let mut mode = QuoteMode::None;
    let mut depth = 0usize;
    let mut last_whitespace = None;
    for (i, c) in bytes.iter().enumerate() {
        if mode.is_unquoted() {
            match c {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                c if depth == 0 && c.is_ascii_whitespace() => last_whitespace = Some(i),
                _ => {}
            }
        }
        mode = mode.on_char(*c);
    }

    match last_whitespace {
        Some(i) => item[i + 1..].trim(),
        None => item.rsplit('.').next().unwrap_or(item),
    }
}

/// Aliases of every select item of the main query.
pub fn select_item_aliases(sql: &str) -> QueryResult<Vec<String>> {
    Ok(select_item_spans(sql)?
        .into_iter()
        .map(|span| extract_alias(&sql[span]).to_string())
        .collect())
}

/// Occurrences of `expression` in `range` that stand alone as identifiers.
pub fn expression_occurrences(sql: &str, expression: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut from = range.start;
    while let Some(idx) = index_of_ignore_case(&sql[..range.end], expression, from) {
        let end = idx + expression.len();
        let before_ok = idx == 0 || !(is_identifier_char(bytes[idx - 1]) || bytes[idx - 1] == b'.');
        let after_ok = bytes.get(end).is_none_or(|c| !is_identifier_char(*c));
        if before_ok && after_ok {
            found.push(idx..end);
        }
        from = idx + 1;
    }
    found
}

/// Distinct column expressions `<alias>.<column>` referenced in `range`, in
/// order of first appearance.
pub fn column_expressions(sql: &str, alias: &str, range: Range<usize>) -> IndexSet<String> {
    let bytes = sql.as_bytes();
    let prefix = format!("{}.", alias);
    let mut expressions = IndexSet::new();
    let mut from = range.start;
    while let Some(idx) = index_of_ignore_case(&sql[..range.end], &prefix, from) {
        from = idx + 1;
        if idx > 0 && (is_identifier_char(bytes[idx - 1]) || bytes[idx - 1] == b'.') {
            continue;
        }
        let mut end = idx + prefix.len();
        while end < range.end && is_identifier_char(bytes[end]) {
            end += 1;
        }
        if end > idx + prefix.len() {
            expressions.insert(sql[idx..end].to_string());
        }
    }
    expressions
}

const NON_TABLE_TOKENS: &[&str] = &[
    "select", "from", "join", "on", "and", "or", "not", "where", "by", "set", "update", "into",
    "delete", "using", "as", "in", "is", "exists", "when", "then", "else", "case", "end",
    "union", "except", "intersect", "all", "distinct", "values", "with",
];

/// Span of the token ending right before `end`, skipping trailing whitespace.
///
/// The token extends backward to the previous whitespace, comma or opening
/// parenthesis.
pub fn token_before(sql: &str, end: usize) -> Range<usize> {
    let bytes = sql.as_bytes();
    let mut token_end = end;
    while token_end > 0 && bytes[token_end - 1].is_ascii_whitespace() {
        token_end -= 1;
    }
    let mut token_start = token_end;
    while token_start > 0 {
        let c = bytes[token_start - 1];
        if c.is_ascii_whitespace() || c == b',' || c == b'(' {
            break;
        }
        token_start -= 1;
    }
    token_start..token_end
}

/// Record edits that replace the table bound to `sql_alias` with `new_table`.
///
/// Every standalone `<table> [as] <sql_alias>` declaration is rewritten;
/// dereferences such as `<sql_alias>.col` are left alone. When
/// `alias_extension` is given (e.g. a column list), it is appended right after
/// the alias.
pub fn remap_table_name(
    sql: &str,
    sql_alias: &str,
    new_table: &str,
    alias_extension: Option<&str>,
    edits: &mut SqlEdits,
) -> usize {
    let bytes = sql.as_bytes();
    let mut remapped = 0;
    let mut from = 0;
    while let Some(idx) = index_of_ignore_case(sql, sql_alias, from) {
        from = idx + 1;
        let end = idx + sql_alias.len();
        if idx == 0 || !bytes[idx - 1].is_ascii_whitespace() {
            continue;
        }
        if bytes
            .get(end)
            .is_some_and(|c| is_identifier_char(*c) || *c == b'.')
        {
            continue;
        }

        let mut token = token_before(sql, idx);
        if sql[token.clone()].eq_ignore_ascii_case("as") {
            token = token_before(sql, token.start);
        }
        let text = &sql[token.clone()];
        if text.is_empty()
            || NON_TABLE_TOKENS.iter().any(|k| k.eq_ignore_ascii_case(text))
            || text.bytes().all(|c| !is_identifier_char(c) && c != b')')
        {
            continue;
        }

        edits.replace(token, new_table);
        if let Some(extension) = alias_extension {
            edits.insert(end, extension);
        }
        remapped += 1;
    }
    remapped
}

/// Rewrite every `<from_alias>.` qualifier to `<to_alias>.`.
pub fn requalify(sql: &str, from_alias: &str, to_alias: &str) -> String {
    if from_alias.eq_ignore_ascii_case(to_alias) {
        return sql.to_string();
    }
    let bytes = sql.as_bytes();
    let prefix = format!("{}.", from_alias);
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    let mut from = 0;
    while let Some(idx) = index_of_ignore_case(sql, &prefix, from) {
        from = idx + 1;
        if idx > 0 && (is_identifier_char(bytes[idx - 1]) || bytes[idx - 1] == b'.') {
            continue;
        }
        out.push_str(&sql[cursor..idx]);
        out.push_str(to_alias);
        out.push('.');
        cursor = idx + prefix.len();
        from = cursor;
    }
    out.push_str(&sql[cursor..]);
    out
}

/// Join predicates with `and`, parenthesizing those with a top-level `or`.
pub fn conjunction<I, S>(predicates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = predicates
        .into_iter()
        .filter_map(|predicate| {
            let predicate = predicate.as_ref().trim();
            if predicate.is_empty() {
                None
            } else if find_keyword(predicate, "or", 0).is_some() {
                Some(format!("({})", predicate))
            } else {
                Some(predicate.to_string())
            }
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join(" and "))
}

/// Apply column remappings to `text`.
///
/// A key ending with `.` remaps a qualifier: `i1_.` -> `owner_items.` turns
/// `i1_.item_id` into `owner_items.item_id`. Any other key is matched as a
/// whole column expression. Keys are tried in order and an occurrence that
/// overlaps an earlier match is left alone.
pub fn remap_expressions(
    text: &str,
    remappings: &IndexMap<String, String>,
) -> QueryResult<String> {
    let bytes = text.as_bytes();
    let mut claimed: Vec<Range<usize>> = Vec::new();
    let mut edits = SqlEdits::new();
    for (key, replacement) in remappings {
        let occurrences = if key.ends_with('.') {
            let mut found = Vec::new();
            let mut from = 0;
            while let Some(idx) = index_of_ignore_case(text, key, from) {
                from = idx + 1;
                if idx == 0 || !(is_identifier_char(bytes[idx - 1]) || bytes[idx - 1] == b'.') {
                    found.push(idx..idx + key.len());
                }
            }
            found
        } else {
            expression_occurrences(text, key, 0..text.len())
        };
        for span in occurrences {
            if claimed
                .iter()
                .any(|c| c.start < span.end && span.start < c.end)
            {
                continue;
            }
            edits.replace(span.clone(), replacement.as_str());
            claimed.push(span);
        }
    }
    edits.apply(text)
}
