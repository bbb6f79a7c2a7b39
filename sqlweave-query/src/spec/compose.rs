//! The composition pipeline shared by every variant.

use indexmap::IndexMap;
use smol_str::SmolStr;
use std::sync::Arc;

use super::{Composition, SpecInputs, SpecVariant, modification, set_operation, transform};
use crate::cte::CteAssembly;
use crate::dialect::{DbmsDialect, ExtendedSql, StatementType};
use crate::error::QueryResult;
use crate::provider::SqlProvider;
use crate::statement::{StatementRef, push_unique};
use crate::value::Value;

/// Collaborators and list parameter values for one composition.
#[derive(Clone, Copy)]
pub struct ComposeContext<'a> {
    /// The dialect.
    pub dialect: &'a dyn DbmsDialect,
    /// The SQL provider.
    pub provider: &'a dyn SqlProvider,
    /// Current list parameter values by name.
    pub list_parameters: &'a IndexMap<SmolStr, Option<Vec<Value>>>,
}

/// Compose the SQL of `variant` over `inputs`.
///
/// The steps are the same for every variant; the variant only decides how
/// the provider SQL is reshaped and which trailing syntax is requested:
///
/// 1. push list parameter values to the base statement
/// 2. fetch the provider SQL and apply left join and entity function rewrites
/// 3. reshape the SQL for the variant (set operations, join emulation)
/// 4. assemble the WITH clause
/// 5. append dialect trailing syntax
pub fn compose(
    variant: &SpecVariant,
    inputs: &SpecInputs,
    context: &ComposeContext<'_>,
) -> QueryResult<Composition> {
    match variant {
        SpecVariant::Select => compose_select(inputs, context),
        SpecVariant::SetOperation(config) => set_operation::compose(config, inputs, context),
        _ => modification::compose(variant, inputs, context),
    }
}

fn compose_select(inputs: &SpecInputs, context: &ComposeContext<'_>) -> QueryResult<Composition> {
    let mut sql = prepared_sql(inputs, context)?;
    let mut participants = Vec::new();
    let with_clause =
        cte_assembly(inputs, context, StatementType::Select).apply(&mut sql, &mut participants)?;

    let added_ctes = context.dialect.append_extended_sql(
        &mut sql,
        &ExtendedSql {
            with_clause: with_clause.as_deref(),
            limit: inputs.limit.as_deref(),
            offset: inputs.offset.as_deref(),
            ..ExtendedSql::new(StatementType::Select)
        },
    )?;
    finish_participants(&mut participants, inputs);

    Ok(Composition {
        sql,
        participants,
        added_ctes,
        executing_statement: Arc::clone(&inputs.base),
        statement_type: StatementType::Select,
        returning_columns: Vec::new(),
    })
}

/// Provider SQL of the base statement with list parameters pushed and the
/// SQL transformations applied.
pub(crate) fn prepared_sql(inputs: &SpecInputs, context: &ComposeContext<'_>) -> QueryResult<String> {
    for (name, values) in context.list_parameters {
        if let Some(values) = values {
            inputs
                .base
                .set_parameter(name, Value::List(values.clone()))?;
        }
    }
    let sql = context.provider.sql(inputs.base.as_ref())?;
    transform::apply_transformations(
        sql,
        context.provider,
        &inputs.base,
        &inputs.key_restricted_left_join_aliases,
        &inputs.entity_functions,
    )
}

pub(crate) fn cte_assembly<'a>(
    inputs: &'a SpecInputs,
    context: &ComposeContext<'a>,
    statement_type: StatementType,
) -> CteAssembly<'a> {
    CteAssembly {
        dialect: context.dialect,
        provider: context.provider,
        base: &inputs.base,
        statement_type,
        recursive: inputs.recursive,
        render: inputs.render_ctes,
        ctes: &inputs.ctes,
    }
}

/// Append the entity function statements and the base statement.
pub(crate) fn finish_participants(participants: &mut Vec<StatementRef>, inputs: &SpecInputs) {
    for node in &inputs.entity_functions {
        if let Some(statement) = node.value_statement() {
            push_unique(participants, Arc::clone(statement));
        }
    }
    push_unique(participants, Arc::clone(&inputs.base));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cte::CteNode;
    use crate::dialect::DatabaseType;
    use crate::spec::{EntityFunctionNode, QuerySpecification, SpecContext, SubQuery};
    use crate::testing::MockProvider;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_with_cte_and_limit() {
        let provider = Arc::new(MockProvider::default());
        let (_, body) = provider.register("select id from t", &[]);
        let (_, base) = provider.register("select c.id from ( select * from Cte1 ) c", &[]);
        let node = CteNode::builder("cte1")
            .entity("Cte1")
            .columns(["id"])
            .body(SubQuery::Statement(Arc::clone(&body)))
            .build()
            .unwrap();
        let spec = QuerySpecification::builder(
            SpecContext::new(DatabaseType::PostgreSQL.dialect(), provider.clone()),
            Arc::clone(&base),
        )
        .cte(node)
        .limit("?")
        .build()
        .unwrap();

        assert_eq!(
            spec.sql().unwrap(),
            "WITH cte1(id) AS(\nselect id from t\n)\nselect c.id from cte1 c limit ?"
        );
        let participants = spec.participating_statements().unwrap();
        assert_eq!(participants.len(), 2);
        assert!(Arc::ptr_eq(&participants[0], &body));
        assert!(Arc::ptr_eq(&participants[1], &base));
    }

    #[test]
    fn test_entity_function_statement_participates() {
        let provider = Arc::new(MockProvider::default());
        let (_, values) = provider.register("select 1", &["v_0_0"]);
        let (_, base) = provider.register(
            "select i0_.value from ( select * from IntegerValue ) i0_ where i0_.value is null",
            &[],
        );
        let spec = QuerySpecification::builder(
            SpecContext::new(DatabaseType::PostgreSQL.dialect(), provider.clone()),
            Arc::clone(&base),
        )
        .entity_function(
            EntityFunctionNode::new("(VALUES (?))", "IntegerValue", "i0_", "i0_.value is null")
                .with_aliases("(value)")
                .with_value_statement(Arc::clone(&values)),
        )
        .build()
        .unwrap();

        assert_eq!(
            spec.sql().unwrap(),
            "select i0_.value from (VALUES (?)) i0_(value) where 1=1"
        );
        let participants = spec.participating_statements().unwrap();
        assert!(Arc::ptr_eq(&participants[0], &values));
        assert!(Arc::ptr_eq(&participants[1], &base));
    }
}
