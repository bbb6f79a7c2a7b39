//! UNION, INTERSECT and EXCEPT composition.

use indexmap::IndexMap;
use std::sync::Arc;

use super::compose::{ComposeContext, cte_assembly};
use super::{Composition, SpecInputs, SubQuery};
use crate::dialect::{ExtendedSql, OrderByElement, SetOperation, SetOperationType, StatementType};
use crate::error::QueryResult;
use crate::statement::push_unique;

/// Configuration of a set operation.
#[derive(Debug, Clone)]
pub struct SetOperationConfig {
    /// Operator joining the operands.
    pub operator: SetOperationType,
    /// Operands in order.
    pub operands: Vec<SubQuery>,
    /// ORDER BY applied to the combined result.
    pub order_by: Vec<OrderByElement>,
    /// The set operation is itself an operand or subquery.
    pub nested: bool,
}

impl SetOperationConfig {
    /// A set operation without operands.
    pub fn new(operator: SetOperationType) -> Self {
        Self {
            operator,
            operands: Vec::new(),
            order_by: Vec::new(),
            nested: false,
        }
    }

    /// Add an operand.
    pub fn operand(mut self, operand: SubQuery) -> Self {
        self.operands.push(operand);
        self
    }

    /// Add an ORDER BY element.
    pub fn order_by(mut self, element: OrderByElement) -> Self {
        self.order_by.push(element);
        self
    }

    /// Mark the operation as nested.
    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }
}

pub(crate) fn compose(
    config: &SetOperationConfig,
    inputs: &SpecInputs,
    context: &ComposeContext<'_>,
) -> QueryResult<Composition> {
    let mut operands = Vec::with_capacity(config.operands.len());
    let mut operand_participants = Vec::new();
    let mut added_ctes = IndexMap::new();
    for operand in &config.operands {
        let rendered = operand.render(context.provider)?;
        operands.push(rendered.sql);
        for participant in rendered.participants {
            push_unique(&mut operand_participants, participant);
        }
        added_ctes.extend(rendered.added_ctes);
    }

    let mut sql = String::new();
    context.dialect.append_set(
        &mut sql,
        &SetOperation {
            operator: config.operator,
            operands: &operands,
            order_by: &config.order_by,
            limit: inputs.limit.as_deref(),
            offset: inputs.offset.as_deref(),
        },
    )?;

    let mut participants = Vec::new();
    let with_clause =
        cte_assembly(inputs, context, StatementType::Select).apply(&mut sql, &mut participants)?;
    added_ctes.extend(context.dialect.append_extended_sql(
        &mut sql,
        &ExtendedSql {
            is_subquery: config.nested,
            with_clause: with_clause.as_deref(),
            ..ExtendedSql::new(StatementType::Select)
        },
    )?);
    for participant in operand_participants {
        push_unique(&mut participants, participant);
    }

    tracing::debug!(
        operator = %config.operator,
        operands = operands.len(),
        "composed set operation"
    );
    Ok(Composition {
        sql,
        participants,
        added_ctes,
        executing_statement: Arc::clone(&inputs.base),
        statement_type: StatementType::Select,
        returning_columns: Vec::new(),
    })
}
