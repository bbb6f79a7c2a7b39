//! INSERT, UPDATE and DELETE composition with RETURNING.

use indexmap::IndexMap;
use std::sync::Arc;

use super::compose::{ComposeContext, cte_assembly, finish_participants, prepared_sql};
use super::{Composition, SpecInputs, SpecVariant, delete, insert, update};
use crate::dialect::{ExtendedSql, ModificationState, StatementType};
use crate::error::QueryResult;
use crate::sql;
use crate::statement::{StatementRef, push_unique};

/// Columns a modification returns.
#[derive(Debug, Clone, Default)]
pub struct ReturningConfig {
    /// Returned column expressions.
    pub columns: Vec<String>,
    /// Requested row images and the CTE names they are exposed under.
    pub included_states: IndexMap<ModificationState, String>,
    /// Attribute paths mapped to the returned column they are read from.
    pub attribute_bindings: IndexMap<String, String>,
}

impl ReturningConfig {
    /// Return the given columns.
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Expose a row image under a CTE name.
    pub fn include_state(mut self, state: ModificationState, cte_name: impl Into<String>) -> Self {
        self.included_states.insert(state, cte_name.into());
        self
    }

    /// Bind an attribute path to a returned column.
    pub fn bind_attribute(mut self, attribute: impl Into<String>, column: impl Into<String>) -> Self {
        self.attribute_bindings.insert(attribute.into(), column.into());
        self
    }
}

/// Settings shared by all modification variants.
#[derive(Debug, Clone, Default)]
pub struct ModificationConfig {
    /// The modification is embedded in an enclosing statement, e.g. as a CTE.
    pub embedded: bool,
    /// Columns to return.
    pub returning: Option<ReturningConfig>,
    /// Query-typed statement used to execute the modification when it must
    /// run as a query.
    pub example_statement: Option<StatementRef>,
}

impl ModificationConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the modification as embedded.
    pub fn embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }

    /// Return columns.
    pub fn returning(mut self, returning: ReturningConfig) -> Self {
        self.returning = Some(returning);
        self
    }

    /// Set the example statement.
    pub fn example_statement(mut self, statement: StatementRef) -> Self {
        self.example_statement = Some(statement);
        self
    }
}

pub(crate) fn compose(
    variant: &SpecVariant,
    inputs: &SpecInputs,
    context: &ComposeContext<'_>,
) -> QueryResult<Composition> {
    let statement_type = variant.statement_type();
    let default_config = ModificationConfig::default();
    let config = variant.modification().unwrap_or(&default_config);

    let sql = prepared_sql(inputs, context)?;
    let mut sql = match variant {
        SpecVariant::Delete(delete) if delete.join_emulation => {
            delete::rewrite_delete(&sql, context.dialect.delete_join_style())?
        }
        SpecVariant::Update(update) => match &update.join {
            Some(join) => update::rewrite_update(&sql, context.dialect.update_join_style(), join)?,
            None => sql,
        },
        SpecVariant::CollectionInsert(collection) => insert::rewrite_collection_insert(&sql, collection)?,
        SpecVariant::CollectionUpdate(collection) => update::rewrite_collection_update(&sql, collection)?,
        SpecVariant::CollectionDelete(collection) => {
            delete::rewrite_collection_delete(&sql, collection, context.dialect.delete_join_style())?
        }
        _ => sql,
    };

    let mut participants = Vec::new();
    let with_clause =
        cte_assembly(inputs, context, statement_type).apply(&mut sql, &mut participants)?;
    let affected_table = affected_table(&sql, statement_type);

    let returning = config.returning.as_ref();
    let added_ctes = context.dialect.append_extended_sql(
        &mut sql,
        &ExtendedSql {
            is_embedded: config.embedded,
            with_clause: with_clause.as_deref(),
            affected_table: affected_table.as_deref(),
            returning_columns: returning.map(|r| r.columns.as_slice()),
            included_states: returning.map(|r| &r.included_states),
            ..ExtendedSql::new(statement_type)
        },
    )?;

    let executes_as_query = returning.is_some()
        || (with_clause.is_some()
            && !context
                .dialect
                .uses_execute_update_when_with_clause_in_modification_query());
    let executing_statement = match &config.example_statement {
        Some(example) if executes_as_query => Arc::clone(example),
        _ => Arc::clone(&inputs.base),
    };

    finish_participants(&mut participants, inputs);
    push_unique(&mut participants, Arc::clone(&executing_statement));

    Ok(Composition {
        sql,
        participants,
        added_ctes,
        executing_statement,
        statement_type,
        returning_columns: returning.map(|r| r.columns.clone()).unwrap_or_default(),
    })
}

/// The table a modification targets, read after its leading keyword.
pub(crate) fn affected_table(sql: &str, statement_type: StatementType) -> Option<String> {
    let keyword = match statement_type {
        StatementType::Select => return None,
        StatementType::Update if starts_with_merge(sql) => "into",
        StatementType::Update => "update",
        StatementType::Delete => "from",
        StatementType::Insert => "into",
    };
    let start = sql::find_keyword(sql, keyword, 0)? + keyword.len();
    let rest = sql[start..].trim_start();
    let end = rest
        .find(|c: char| c.is_ascii_whitespace() || c == '(')
        .unwrap_or(rest.len());
    Some(rest[..end].to_string()).filter(|table| !table.is_empty())
}

fn starts_with_merge(sql: &str) -> bool {
    sql.trim_start()
        .get(..5)
        .is_some_and(|head| head.eq_ignore_ascii_case("merge"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cte::CteNode;
    use crate::dialect::DatabaseType;
    use crate::spec::{DeleteConfig, QuerySpecification, SpecContext, SubQuery};
    use crate::testing::MockProvider;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_affected_table() {
        assert_eq!(
            affected_table("update A a0_ set x = 1", StatementType::Update).as_deref(),
            Some("A")
        );
        assert_eq!(
            affected_table("delete from A a0_ where a0_.id = 1", StatementType::Delete).as_deref(),
            Some("A")
        );
        assert_eq!(
            affected_table("insert into A(id, name) select 1, 'x'", StatementType::Insert).as_deref(),
            Some("A")
        );
        assert_eq!(
            affected_table("merge into A a using (select 1) r on (1=1) when matched then update set x = 1", StatementType::Update).as_deref(),
            Some("A")
        );
        assert_eq!(affected_table("select 1", StatementType::Select), None);
    }

    #[test]
    fn test_postgres_returning_executes_through_example() {
        let provider = Arc::new(MockProvider::default());
        let (_, base) = provider.register("delete from A a0_ where a0_.id = ?", &["id"]);
        let (_, example) = provider.register("select 1", &[]);
        let spec = QuerySpecification::builder(
            SpecContext::new(DatabaseType::PostgreSQL.dialect(), provider.clone()),
            Arc::clone(&base),
        )
        .variant(SpecVariant::Delete(DeleteConfig::new(
            ModificationConfig::new()
                .returning(ReturningConfig::columns(["a0_.id"]))
                .example_statement(Arc::clone(&example)),
        )))
        .build()
        .unwrap();

        let composition = spec.composition().unwrap();
        assert_eq!(composition.sql, "delete from A a0_ where a0_.id = ? returning a0_.id");
        assert!(Arc::ptr_eq(&composition.executing_statement, &example));
        assert_eq!(composition.participants.len(), 2);
        assert_eq!(composition.returning_columns, vec!["a0_.id".to_string()]);
    }

    #[test]
    fn test_db2_with_clause_wraps_modification() {
        let provider = Arc::new(MockProvider::default());
        let (_, body) = provider.register("select b.id from B b", &[]);
        let (_, base) = provider.register("delete from A a0_ where a0_.id in (select id from ids)", &[]);
        let node = CteNode::builder("ids")
            .columns(["id"])
            .body(SubQuery::Statement(body))
            .build()
            .unwrap();
        let spec = QuerySpecification::builder(
            SpecContext::new(DatabaseType::DB2.dialect(), provider.clone()),
            Arc::clone(&base),
        )
        .cte(node)
        .variant(SpecVariant::Delete(DeleteConfig::default()))
        .build()
        .unwrap();

        let composition = spec.composition().unwrap();
        assert_eq!(
            composition.sql,
            "WITH ids(id) AS(\nselect b.id from B b\n)\nselect count(*) from old table (delete from A a0_ where a0_.id in (select id from ids))"
        );
        assert!(Arc::ptr_eq(&composition.executing_statement, &base));
    }

    #[test]
    fn test_db2_returning_without_ctes_reads_delta_table() {
        let provider = Arc::new(MockProvider::default());
        let (_, base) = provider.register("delete from A a0_ where a0_.id = ?", &["id"]);
        let (_, example) = provider.register("select a0_.id from A a0_", &[]);
        let spec = QuerySpecification::builder(
            SpecContext::new(DatabaseType::DB2.dialect(), provider.clone()),
            Arc::clone(&base),
        )
        .variant(SpecVariant::Delete(DeleteConfig::new(
            ModificationConfig::new()
                .returning(ReturningConfig::columns(["a0_.id"]))
                .example_statement(Arc::clone(&example)),
        )))
        .build()
        .unwrap();

        let composition = spec.composition().unwrap();
        assert_eq!(
            composition.sql,
            "select a0_.id as ret_col_0 from old table (delete from A a0_ where a0_.id = ?)"
        );
        assert!(Arc::ptr_eq(&composition.executing_statement, &example));
        assert_eq!(composition.returning_columns, vec!["a0_.id".to_string()]);
    }
}
