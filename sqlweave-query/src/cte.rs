//! Common Table Expression (CTE) assembly.
//!
//! A [`CteNode`] describes one named CTE whose body is a [`SubQuery`]: a
//! provider statement or a nested query specification. When a specification is
//! composed, its nodes are rendered into a single WITH clause together with
//! cascading-delete CTEs and any CTEs the nested bodies added on their own.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use sqlweave_query::cte::CteNode;
//! use sqlweave_query::spec::SubQuery;
//!
//! let node = CteNode::builder("cte1")
//!     .columns(["id"])
//!     .body(SubQuery::Statement(statement))
//!     .build()?;
//! // renders as: WITH cte1(id) AS(\n<body sql>\n)\n
//! ```

use indexmap::IndexMap;
use std::sync::Arc;

use crate::dialect::{DbmsDialect, ExtendedSql, StatementType};
use crate::error::{QueryError, QueryResult};
use crate::provider::SqlProvider;
use crate::spec::{FingerprintBuilder, SubQuery};
use crate::sql::{self, SqlEdits};
use crate::statement::{StatementRef, push_unique};

/// One named CTE.
#[derive(Debug, Clone)]
pub struct CteNode {
    name: String,
    entity_name: String,
    columns: Vec<String>,
    union_all: bool,
    non_recursive: SubQuery,
    recursive: Option<SubQuery>,
    non_recursive_table_name_remappings: IndexMap<String, String>,
    recursive_table_name_remappings: IndexMap<String, String>,
    non_recursive_with_clause_suffix: Option<String>,
}

impl CteNode {
    /// Start building a CTE named `name`.
    pub fn builder(name: impl Into<String>) -> CteNodeBuilder {
        CteNodeBuilder::new(name)
    }

    /// CTE name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity the CTE stands in for. Placeholders `( select * from <entity> )`
    /// are replaced with the CTE name.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Declared column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The head, `name(col, ...)`, or just the name without columns.
    pub fn head(&self) -> String {
        if self.columns.is_empty() {
            self.name.clone()
        } else {
            format!("{}({})", self.name, self.columns.join(", "))
        }
    }

    /// Whether the CTE has a recursive branch.
    pub fn is_recursive(&self) -> bool {
        self.recursive.is_some()
    }

    /// Whether the recursive branch is joined with UNION ALL.
    pub fn is_union_all(&self) -> bool {
        self.union_all
    }

    /// The anchor body.
    pub fn non_recursive(&self) -> &SubQuery {
        &self.non_recursive
    }

    /// The recursive body.
    pub fn recursive(&self) -> Option<&SubQuery> {
        self.recursive.as_ref()
    }

    pub(crate) fn write_fingerprint(&self, fingerprint: &mut FingerprintBuilder) {
        fingerprint.tag(&self.name);
        self.non_recursive.write_fingerprint(fingerprint);
        if let Some(recursive) = &self.recursive {
            recursive.write_fingerprint(fingerprint);
        }
    }
}

/// Builder for [`CteNode`].
#[derive(Debug, Clone)]
pub struct CteNodeBuilder {
    name: String,
    entity_name: Option<String>,
    columns: Vec<String>,
    union_all: bool,
    non_recursive: Option<SubQuery>,
    recursive: Option<SubQuery>,
    non_recursive_table_name_remappings: IndexMap<String, String>,
    recursive_table_name_remappings: IndexMap<String, String>,
    non_recursive_with_clause_suffix: Option<String>,
}

impl CteNodeBuilder {
    /// Create a new builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_name: None,
            columns: Vec::new(),
            union_all: false,
            non_recursive: None,
            recursive: None,
            non_recursive_table_name_remappings: IndexMap::new(),
            recursive_table_name_remappings: IndexMap::new(),
            non_recursive_with_clause_suffix: None,
        }
    }

    /// Set the entity name (defaults to the CTE name).
    pub fn entity(mut self, entity_name: impl Into<String>) -> Self {
        self.entity_name = Some(entity_name.into());
        self
    }

    /// Set the column names.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the anchor body.
    pub fn body(mut self, body: SubQuery) -> Self {
        self.non_recursive = Some(body);
        self
    }

    /// Set the recursive body.
    pub fn recursive_body(mut self, body: SubQuery) -> Self {
        self.recursive = Some(body);
        self
    }

    /// Join the recursive branch with UNION ALL instead of UNION.
    pub fn union_all(mut self, union_all: bool) -> Self {
        self.union_all = union_all;
        self
    }

    /// Map an entity alias of the main query to a CTE added by the anchor body.
    pub fn table_name_remapping(
        mut self,
        entity_alias: impl Into<String>,
        cte_name: impl Into<String>,
    ) -> Self {
        self.non_recursive_table_name_remappings
            .insert(entity_alias.into(), cte_name.into());
        self
    }

    /// Map an entity alias of the main query to a CTE added by the recursive body.
    pub fn recursive_table_name_remapping(
        mut self,
        entity_alias: impl Into<String>,
        cte_name: impl Into<String>,
    ) -> Self {
        self.recursive_table_name_remappings
            .insert(entity_alias.into(), cte_name.into());
        self
    }

    /// Suffix for dialects that emulate non-recursive CTEs.
    pub fn with_clause_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.non_recursive_with_clause_suffix = Some(suffix.into());
        self
    }

    /// Build the node.
    pub fn build(self) -> QueryResult<CteNode> {
        let non_recursive = self.non_recursive.ok_or_else(|| {
            QueryError::invalid_config(format!("CTE '{}' requires a body", self.name))
        })?;
        if self.name.is_empty() {
            return Err(QueryError::invalid_config("CTE name must not be empty"));
        }
        Ok(CteNode {
            entity_name: self.entity_name.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            columns: self.columns,
            union_all: self.union_all,
            non_recursive,
            recursive: self.recursive,
            non_recursive_table_name_remappings: self.non_recursive_table_name_remappings,
            recursive_table_name_remappings: self.recursive_table_name_remappings,
            non_recursive_with_clause_suffix: self.non_recursive_with_clause_suffix,
        })
    }
}

/// Inputs for rendering the WITH clause of one composition.
pub(crate) struct CteAssembly<'a> {
    pub dialect: &'a dyn DbmsDialect,
    pub provider: &'a dyn SqlProvider,
    pub base: &'a StatementRef,
    pub statement_type: StatementType,
    /// Already includes CTEs with a recursive body.
    pub recursive: bool,
    pub render: bool,
    pub ctes: &'a [Arc<CteNode>],
}

impl CteAssembly<'_> {
    /// Render the WITH clause for `sql`, rewriting CTE references in `sql`.
    ///
    /// Returns `None` when no CTE was emitted. Statements the CTE bodies
    /// depend on are appended to `participants`.
    pub(crate) fn apply(
        &self,
        sql: &mut String,
        participants: &mut Vec<StatementRef>,
    ) -> QueryResult<Option<String>> {
        let cascades = self.dialect.supports_modification_query_in_with_clause();
        if !self.render
            || (self.ctes.is_empty() && (self.statement_type != StatementType::Delete || !cascades))
        {
            return Ok(None);
        }

        let mut with = String::from(self.dialect.with_clause(self.recursive));
        with.push(' ');
        let mut first = true;
        let mut table_name_remapping = IndexMap::new();

        for node in self.ctes {
            let body = node.non_recursive.render(self.provider)?;
            let recursive_body = node
                .recursive
                .as_ref()
                .map(|recursive| recursive.render(self.provider))
                .transpose()?;

            for participant in body
                .participants
                .iter()
                .chain(recursive_body.iter().flat_map(|b| b.participants.iter()))
            {
                push_unique(participants, Arc::clone(participant));
            }

            if cascades {
                let base = node.non_recursive.base_statement();
                first = self.append_cascading_deletes(&mut with, &base, &node.name, first, participants)?;
            }

            first = append_added_ctes(
                &mut with,
                &body.added_ctes,
                &node.non_recursive_table_name_remappings,
                &mut table_name_remapping,
                first,
            );
            if let Some(recursive_body) = &recursive_body {
                first = append_added_ctes(
                    &mut with,
                    &recursive_body.added_ctes,
                    &node.recursive_table_name_remappings,
                    &mut table_name_remapping,
                    first,
                );
            }

            if first {
                first = false;
            } else {
                with.push_str(",\n");
            }

            let mut body_sql = body.sql;
            if self.dialect.supports_with_clause_head() {
                with.push_str(&node.head());
            } else {
                with.push_str(&node.name);
                if !node.columns.is_empty() {
                    body_sql = rewrite_select_aliases(&body_sql, &node.columns)?;
                }
            }
            with.push_str(" AS(\n");
            with.push_str(&body_sql);

            match &recursive_body {
                Some(recursive_body) => {
                    with.push_str(if node.union_all {
                        "\nUNION ALL\n"
                    } else {
                        "\nUNION\n"
                    });
                    with.push_str(&recursive_body.sql);
                }
                None if !self.dialect.supports_non_recursive_with_clause() => {
                    let suffix = node
                        .non_recursive_with_clause_suffix
                        .as_deref()
                        .or(self.dialect.non_recursive_with_clause_suffix());
                    if let Some(suffix) = suffix {
                        with.push_str(suffix);
                    }
                }
                None => {}
            }
            with.push_str("\n)");
        }

        if cascades {
            first = self.append_cascading_deletes(&mut with, self.base, "main_query", first, participants)?;
        }

        if first {
            return Ok(None);
        }

        for node in self.ctes {
            let placeholder = format!("( select * from {} )", node.entity_name);
            if with.contains(&placeholder) {
                with = with.replace(&placeholder, &node.name);
            }
            if sql.contains(&placeholder) {
                *sql = sql.replace(&placeholder, &node.name);
            }
        }
        with.push('\n');

        if !table_name_remapping.is_empty() {
            let mut edits = SqlEdits::new();
            for (entity_alias, cte_name) in &table_name_remapping {
                let sql_alias = self.provider.sql_alias(self.base.as_ref(), entity_alias)?;
                sql::remap_table_name(sql, &sql_alias, cte_name, None, &mut edits);
            }
            *sql = edits.apply(sql)?;
        }

        tracing::trace!(ctes = self.ctes.len(), recursive = self.recursive, "assembled WITH clause");
        Ok(Some(with))
    }

    fn append_cascading_deletes(
        &self,
        with: &mut String,
        base: &StatementRef,
        cte_name: &str,
        mut first: bool,
        participants: &mut Vec<StatementRef>,
    ) -> QueryResult<bool> {
        let cascades = self.provider.cascading_delete_sql(base.as_ref())?;
        for (n, mut cascade) in cascades.into_iter().enumerate() {
            if first {
                first = false;
            } else {
                with.push_str(",\n");
            }
            // cascades read the parameters of the statement they derive from
            push_unique(participants, Arc::clone(base));
            self.dialect.append_extended_sql(
                &mut cascade,
                &ExtendedSql {
                    is_embedded: true,
                    ..ExtendedSql::new(StatementType::Delete)
                },
            )?;
            with.push_str(&format!("{}_{} AS (\n{}\n)", cte_name, n, cascade));
        }
        Ok(first)
    }
}

fn append_added_ctes(
    with: &mut String,
    added_ctes: &IndexMap<String, String>,
    remappings: &IndexMap<String, String>,
    table_name_remapping: &mut IndexMap<String, String>,
    mut first: bool,
) -> bool {
    for (name, body) in added_ctes {
        for (entity_alias, cte_name) in remappings {
            if cte_name == name {
                table_name_remapping.insert(entity_alias.clone(), cte_name.clone());
            }
        }
        if first {
            first = false;
        } else {
            with.push_str(",\n");
        }
        with.push_str(name);
        with.push_str(" AS (\n");
        with.push_str(body);
        with.push_str("\n)");
    }
    first
}

/// Rename the select items of `sql` to `aliases`, for dialects without CTE heads.
fn rewrite_select_aliases(sql: &str, aliases: &[String]) -> QueryResult<String> {
    let items = sql::select_item_spans(sql)?;
    if items.len() != aliases.len() {
        return Err(QueryError::structural(format!(
            "The CTE body selects {} items but {} columns were declared",
            items.len(),
            aliases.len()
        ))
        .with_sql(sql));
    }

    let bytes = sql.as_bytes();
    let mut edits = SqlEdits::new();
    for (span, alias) in items.iter().zip(aliases) {
        let item = &sql[span.clone()];
        let current = sql::extract_alias(item);
        let alias_start = span.end - current.len();
        let aliased = current.len() < item.len() && bytes[alias_start - 1].is_ascii_whitespace();
        if aliased {
            edits.replace(alias_start..span.end, alias.as_str());
        } else {
            edits.insert(span.end, format!(" as {}", alias));
        }
    }
    edits.apply(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DatabaseType, ModificationState};
    use crate::spec::{
        DeleteConfig, ModificationConfig, QuerySpecification, ReturningConfig, SpecContext, SpecVariant,
    };
    use crate::testing::MockProvider;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Headless;

    impl DbmsDialect for Headless {
        fn name(&self) -> &str {
            "headless"
        }

        fn supports_with_clause_head(&self) -> bool {
            false
        }
    }

    #[derive(Debug)]
    struct Ansi;

    impl DbmsDialect for Ansi {
        fn name(&self) -> &str {
            "ansi"
        }
    }

    fn assemble(
        provider: &MockProvider,
        dialect: &dyn DbmsDialect,
        ctes: &[Arc<CteNode>],
        sql: &mut String,
    ) -> (Option<String>, Vec<StatementRef>) {
        let (_, base) = provider.register("main", &[]);
        let mut participants = Vec::new();
        let with = CteAssembly {
            dialect,
            provider,
            base: &base,
            statement_type: StatementType::Select,
            recursive: ctes.iter().any(|node| node.is_recursive()),
            render: true,
            ctes,
        }
        .apply(sql, &mut participants)
        .unwrap();
        (with, participants)
    }

    #[test]
    fn test_single_cte() {
        let provider = MockProvider::default();
        let (_, body) = provider.register("select id from t", &[]);
        let node = CteNode::builder("cte1")
            .entity("Cte1")
            .columns(["id"])
            .body(SubQuery::Statement(Arc::clone(&body)))
            .build()
            .unwrap();
        let mut sql = "select c.id from ( select * from Cte1 ) c".to_string();
        let (with, participants) = assemble(&provider, &Ansi, &[Arc::new(node)], &mut sql);
        assert_eq!(with.as_deref(), Some("WITH cte1(id) AS(\nselect id from t\n)\n"));
        assert_eq!(sql, "select c.id from cte1 c");
        assert_eq!(participants.len(), 1);
        assert!(Arc::ptr_eq(&participants[0], &body));
    }

    #[test]
    fn test_recursive_cte() {
        let provider = MockProvider::default();
        let (_, anchor) = provider.register("select id, parent from n where parent is null", &[]);
        let (_, step) = provider.register("select n.id, n.parent from n join tree t on n.parent = t.id", &[]);
        let node = CteNode::builder("tree")
            .columns(["id", "parent"])
            .body(SubQuery::Statement(anchor))
            .recursive_body(SubQuery::Statement(step))
            .union_all(true)
            .build()
            .unwrap();
        let mut sql = "select id from tree".to_string();
        let (with, participants) = assemble(&provider, &Ansi, &[Arc::new(node)], &mut sql);
        let with = with.unwrap();
        assert!(with.starts_with("WITH RECURSIVE tree(id, parent) AS(\n"));
        assert_eq!(with.matches("\nUNION ALL\n").count(), 1);
        assert_eq!(participants.len(), 2);
    }

    #[test]
    fn test_no_ctes_is_absent() {
        let provider = MockProvider::default();
        let mut sql = "select 1".to_string();
        let (with, participants) = assemble(&provider, &Ansi, &[], &mut sql);
        assert!(with.is_none());
        assert!(participants.is_empty());
    }

    #[test]
    fn test_headless_dialect_rewrites_aliases() {
        let provider = MockProvider::default();
        let (_, body) = provider.register("select t.x as x0, t.y from t", &[]);
        let node = CteNode::builder("c")
            .columns(["a", "b"])
            .body(SubQuery::Statement(body))
            .build()
            .unwrap();
        let mut sql = "select a from c".to_string();
        let (with, _) = assemble(&provider, &Headless, &[Arc::new(node)], &mut sql);
        assert_eq!(with.as_deref(), Some("WITH c AS(\nselect t.x as a, t.y as b from t\n)\n"));
    }

    #[test]
    fn test_multiple_ctes_in_declaration_order() {
        let provider = MockProvider::default();
        let (_, one) = provider.register("select 1", &[]);
        let (_, two) = provider.register("select 2", &[]);
        let first = CteNode::builder("one").body(SubQuery::Statement(one)).build().unwrap();
        let second = CteNode::builder("two").body(SubQuery::Statement(two)).build().unwrap();
        let mut sql = "select * from one, two".to_string();
        let (with, _) = assemble(&provider, &Ansi, &[Arc::new(first), Arc::new(second)], &mut sql);
        assert_eq!(
            with.as_deref(),
            Some("WITH one AS(\nselect 1\n),\ntwo AS(\nselect 2\n)\n")
        );
    }

    #[test]
    fn test_cascading_deletes_follow_ctes() {
        let provider = MockProvider::default();
        let (_, body) = provider.register("select 1", &[]);
        let (_, base) = provider.register_with_cascades(
            "delete from A a0_ where a0_.id = ?",
            &[],
            vec![
                "delete from A_tags where a_id = ?".to_string(),
                "delete from A_refs where a_id = ?".to_string(),
            ],
        );
        let node = CteNode::builder("one")
            .body(SubQuery::Statement(Arc::clone(&body)))
            .build()
            .unwrap();
        let dialect = DatabaseType::PostgreSQL.dialect();
        let mut sql = "delete from A a0_ where a0_.id = ?".to_string();
        let mut participants = Vec::new();
        let with = CteAssembly {
            dialect: dialect.as_ref(),
            provider: &provider,
            base: &base,
            statement_type: StatementType::Delete,
            recursive: false,
            render: true,
            ctes: &[Arc::new(node)],
        }
        .apply(&mut sql, &mut participants)
        .unwrap();

        assert_eq!(
            with.as_deref(),
            Some("WITH one AS(\nselect 1\n),\nmain_query_0 AS (\ndelete from A_tags where a_id = ?\n),\nmain_query_1 AS (\ndelete from A_refs where a_id = ?\n)\n")
        );
        assert_eq!(participants.len(), 2);
        assert!(Arc::ptr_eq(&participants[0], &body));
        assert!(Arc::ptr_eq(&participants[1], &base));
    }

    #[test]
    fn test_cascades_need_modification_ctes() {
        let provider = MockProvider::default();
        let (_, base) = provider.register_with_cascades(
            "delete from A a0_",
            &[],
            vec!["delete from A_tags".to_string()],
        );
        let mut sql = "delete from A a0_".to_string();
        let mut participants = Vec::new();
        let with = CteAssembly {
            dialect: &Ansi,
            provider: &provider,
            base: &base,
            statement_type: StatementType::Delete,
            recursive: false,
            render: true,
            ctes: &[],
        }
        .apply(&mut sql, &mut participants)
        .unwrap();
        assert!(with.is_none());
        assert!(participants.is_empty());
    }

    #[test]
    fn test_added_ctes_are_hoisted_and_remapped() {
        let provider = Arc::new(MockProvider::default());
        let (_, deleting) = provider.register("delete from A a0_ where a0_.x = ?", &["x"]);
        let inner = QuerySpecification::builder(
            SpecContext::new(DatabaseType::DB2.dialect(), provider.clone()),
            Arc::clone(&deleting),
        )
        .variant(SpecVariant::Delete(DeleteConfig::new(
            ModificationConfig::new().embedded(true).returning(
                ReturningConfig::columns(["id"]).include_state(ModificationState::Old, "a_old"),
            ),
        )))
        .build()
        .unwrap();
        let node = CteNode::builder("deleted")
            .columns(["id"])
            .body(SubQuery::Specification(Arc::new(inner)))
            .table_name_remapping("oldA", "a_old")
            .build()
            .unwrap();

        let (_, base) = provider.register("select a1_.name from A a1_", &[]);
        provider.alias("oldA", "a1_");
        let dialect = DatabaseType::DB2.dialect();
        let mut sql = "select a1_.name from A a1_".to_string();
        let mut participants = Vec::new();
        let with = CteAssembly {
            dialect: dialect.as_ref(),
            provider: provider.as_ref(),
            base: &base,
            statement_type: StatementType::Select,
            recursive: false,
            render: true,
            ctes: &[Arc::new(node)],
        }
        .apply(&mut sql, &mut participants)
        .unwrap();

        assert_eq!(
            with.as_deref(),
            Some("WITH a_old AS (\nselect * from old table (delete from A a0_ where a0_.x = ?)\n),\ndeleted(id) AS(\nselect id from a_old\n)\n")
        );
        assert_eq!(sql, "select a1_.name from a_old a1_");
        assert_eq!(participants.len(), 1);
        assert!(Arc::ptr_eq(&participants[0], &deleting));
    }

    #[test]
    fn test_builder_requires_body() {
        let err = CteNode::builder("c").build().unwrap_err();
        assert!(err.message.contains("requires a body"));
    }
}
