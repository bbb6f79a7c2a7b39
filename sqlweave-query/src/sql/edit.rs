//! Span-based SQL rewriting.
//!
//! Rewrites are recorded as `(span, replacement)` pairs against the original
//! text and materialized once. Offsets computed on the original text therefore
//! stay valid no matter how many edits precede them.
//!
//! ```rust
//! use sqlweave_query::sql::SqlEdits;
//!
//! let sql = "select a.id from A a where a.x = 1";
//! let mut edits = SqlEdits::new();
//! edits.replace(17..18, "(VALUES (?))");
//! edits.insert(20, "(x)");
//! edits.replace(27..34, "1=1");
//! assert_eq!(
//!     edits.apply(sql).unwrap(),
//!     "select a.id from (VALUES (?)) a(x) where 1=1"
//! );
//! ```

use std::ops::Range;

use crate::error::{ErrorCode, QueryError, QueryResult};

#[derive(Debug, Clone)]
struct Edit {
    span: Range<usize>,
    replacement: String,
    seq: usize,
}

/// An ordered set of non-overlapping text edits.
#[derive(Debug, Clone, Default)]
pub struct SqlEdits {
    edits: Vec<Edit>,
}

impl SqlEdits {
    /// Create an empty edit list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `span` with `replacement`.
    pub fn replace(&mut self, span: Range<usize>, replacement: impl Into<String>) -> &mut Self {
        let seq = self.edits.len();
        self.edits.push(Edit {
            span,
            replacement: replacement.into(),
            seq,
        });
        self
    }

    /// Insert `text` at `at`. Inserts at the same offset keep their insertion order.
    pub fn insert(&mut self, at: usize, text: impl Into<String>) -> &mut Self {
        self.replace(at..at, text)
    }

    /// Remove `span`.
    pub fn delete(&mut self, span: Range<usize>) -> &mut Self {
        self.replace(span, String::new())
    }

    /// Number of recorded edits.
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Whether no edit was recorded.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Materialize the edits over `source`.
    pub fn apply(mut self, source: &str) -> QueryResult<String> {
        if self.edits.is_empty() {
            return Ok(source.to_string());
        }

        self.edits
            .sort_by_key(|e| (e.span.start, e.span.end, e.seq));

        let growth: usize = self.edits.iter().map(|e| e.replacement.len()).sum();
        let mut out = String::with_capacity(source.len() + growth);
        let mut cursor = 0;

        for edit in &self.edits {
            let Range { start, end } = edit.span;
            if start > end
                || end > source.len()
                || !source.is_char_boundary(start)
                || !source.is_char_boundary(end)
            {
                return Err(QueryError::internal(format!(
                    "Edit span {}..{} is outside of the SQL text",
                    start, end
                ))
                .with_sql(source));
            }
            if start < cursor {
                return Err(QueryError::new(
                    ErrorCode::OverlappingEdit,
                    format!("Edit span {}..{} overlaps a previous edit", start, end),
                )
                .with_sql(source));
            }
            out.push_str(&source[cursor..start]);
            out.push_str(&edit.replacement);
            cursor = end;
        }

        out.push_str(&source[cursor..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_edits_use_original_offsets() {
        let mut edits = SqlEdits::new();
        edits.replace(0..1, "xxx");
        edits.replace(4..5, "y");
        assert_eq!(edits.apply("a bc d e").unwrap(), "xxx bcyd e");
    }

    #[test]
    fn test_insert_before_replacement_at_same_offset() {
        let mut edits = SqlEdits::new();
        edits.replace(2..3, "B");
        edits.insert(2, "[");
        edits.insert(2, "(");
        assert_eq!(edits.apply("a b c").unwrap(), "a [(B c");
    }

    #[test]
    fn test_overlap_rejected() {
        let mut edits = SqlEdits::new();
        edits.replace(0..4, "x");
        edits.replace(2..6, "y");
        let err = edits.apply("abcdefgh").unwrap_err();
        assert_eq!(err.code, ErrorCode::OverlappingEdit);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut edits = SqlEdits::new();
        edits.delete(3..10);
        assert!(edits.apply("abc").unwrap_err().is_structural());
    }
}
