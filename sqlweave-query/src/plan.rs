//! Executable plans over a composed query.
//!
//! A plan pairs a [`Composition`] with a [`QueryExecutor`] and the paging
//! window. The executor is the persistence provider's side of the contract:
//! it receives the final SQL, the statement to execute through and the
//! statements whose bindings apply, and returns rows or update counts.

use std::fmt;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::spec::Composition;
use crate::statement::StatementRef;
use crate::value::Value;

/// One result row.
pub type Row = Vec<Value>;

/// Update count and returned rows of a modification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturningResult {
    /// Number of affected rows.
    pub update_count: u64,
    /// Returned rows, one value per returning column.
    pub rows: Vec<Row>,
}

/// Everything an executor needs to run a composed query.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Final SQL.
    pub sql: &'a str,
    /// The statement the SQL is executed through.
    pub statement: &'a StatementRef,
    /// Statements carrying the parameter values, in binding order.
    pub participants: &'a [StatementRef],
    /// Index of the first row to return.
    pub first_result: usize,
    /// Maximum number of rows to return.
    pub max_results: Option<usize>,
    /// Columns returned by a modification.
    pub returning_columns: &'a [String],
}

/// Executes composed SQL on behalf of a plan.
pub trait QueryExecutor: Send + Sync {
    /// Run a query and return its rows.
    fn select(&self, request: &ExecutionRequest<'_>) -> QueryResult<Vec<Row>>;

    /// Run a modification and return the update count.
    fn update(&self, request: &ExecutionRequest<'_>) -> QueryResult<u64>;

    /// Run a modification and return the update count with the returned rows.
    fn returning(&self, request: &ExecutionRequest<'_>) -> QueryResult<ReturningResult>;
}

struct PlanState {
    composition: Arc<Composition>,
    executor: Arc<dyn QueryExecutor>,
    first_result: usize,
    max_results: Option<usize>,
}

impl PlanState {
    fn request(&self) -> ExecutionRequest<'_> {
        ExecutionRequest {
            sql: &self.composition.sql,
            statement: &self.composition.executing_statement,
            participants: &self.composition.participants,
            first_result: self.first_result,
            max_results: self.max_results,
            returning_columns: &self.composition.returning_columns,
        }
    }
}

impl fmt::Debug for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("sql", &self.composition.sql)
            .field("first_result", &self.first_result)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

/// A plan returning rows.
#[derive(Debug)]
pub struct SelectQueryPlan {
    state: PlanState,
    returning: bool,
}

impl SelectQueryPlan {
    pub(crate) fn new(
        composition: Arc<Composition>,
        executor: Arc<dyn QueryExecutor>,
        first_result: usize,
        max_results: Option<usize>,
        returning: bool,
    ) -> Self {
        Self {
            state: PlanState {
                composition,
                executor,
                first_result,
                max_results,
            },
            returning,
        }
    }

    /// The SQL this plan executes.
    pub fn sql(&self) -> &str {
        &self.state.composition.sql
    }

    /// Execute and collect every row.
    pub fn get_result_list(&self) -> QueryResult<Vec<Row>> {
        let request = self.state.request();
        tracing::debug!(
            returning = self.returning,
            participants = request.participants.len(),
            first_result = request.first_result,
            "executing select plan"
        );
        if self.returning {
            Ok(self.state.executor.returning(&request)?.rows)
        } else {
            self.state.executor.select(&request)
        }
    }

    /// Execute and return the only row.
    pub fn get_single_result(&self) -> QueryResult<Row> {
        let mut rows = self.get_result_list()?;
        match rows.len() {
            0 => Err(QueryError::no_result()),
            1 => rows.pop().ok_or_else(QueryError::no_result),
            n => Err(QueryError::not_unique(n)),
        }
    }

    /// Rows produced lazily; the query runs on the first poll.
    pub fn result_stream(self) -> ResultStream {
        ResultStream {
            plan: Some(self),
            rows: Vec::new().into_iter(),
        }
    }
}

/// Rows of a [`SelectQueryPlan`], fetched on the first call to `next`.
#[derive(Debug)]
pub struct ResultStream {
    plan: Option<SelectQueryPlan>,
    rows: std::vec::IntoIter<Row>,
}

impl Iterator for ResultStream {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(plan) = self.plan.take() {
            match plan.get_result_list() {
                Ok(rows) => self.rows = rows.into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
        self.rows.next().map(Ok)
    }
}

/// A plan returning the update count of a modification.
#[derive(Debug)]
pub struct ModificationQueryPlan {
    state: PlanState,
}

impl ModificationQueryPlan {
    pub(crate) fn new(
        composition: Arc<Composition>,
        executor: Arc<dyn QueryExecutor>,
        first_result: usize,
        max_results: Option<usize>,
    ) -> Self {
        Self {
            state: PlanState {
                composition,
                executor,
                first_result,
                max_results,
            },
        }
    }

    /// The SQL this plan executes.
    pub fn sql(&self) -> &str {
        &self.state.composition.sql
    }

    /// Execute and return the number of affected rows.
    pub fn execute_update(&self) -> QueryResult<u64> {
        let request = self.state.request();
        tracing::debug!(participants = request.participants.len(), "executing modification plan");
        self.state.executor.update(&request)
    }
}

/// A plan returning the update count and the returned rows of a modification.
#[derive(Debug)]
pub struct ReturningQueryPlan {
    state: PlanState,
}

impl ReturningQueryPlan {
    pub(crate) fn new(composition: Arc<Composition>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            state: PlanState {
                composition,
                executor,
                first_result: 0,
                max_results: None,
            },
        }
    }

    /// The SQL this plan executes.
    pub fn sql(&self) -> &str {
        &self.state.composition.sql
    }

    /// Execute and return the update count with the returned rows.
    pub fn execute(&self) -> QueryResult<ReturningResult> {
        let request = self.state.request();
        tracing::debug!(
            columns = request.returning_columns.len(),
            "executing returning plan"
        );
        self.state.executor.returning(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::StatementType;
    use crate::testing::{MockExecutor, MockProvider};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn composition(sql: &str) -> Arc<Composition> {
        let provider = MockProvider::default();
        let (_, base) = provider.register(sql, &[]);
        Arc::new(Composition {
            sql: sql.to_string(),
            participants: vec![Arc::clone(&base)],
            added_ctes: IndexMap::new(),
            executing_statement: base,
            statement_type: StatementType::Select,
            returning_columns: Vec::new(),
        })
    }

    #[test]
    fn test_single_result() {
        let executor = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(1)]]));
        let plan = SelectQueryPlan::new(composition("select 1"), executor.clone(), 0, Some(10), false);
        assert_eq!(plan.get_single_result().unwrap(), vec![Value::Int(1)]);
        let request = executor.last_request().unwrap();
        assert_eq!(request.sql, "select 1");
        assert_eq!(request.max_results, Some(10));
    }

    #[test]
    fn test_single_result_errors() {
        let empty = Arc::new(MockExecutor::default());
        let plan = SelectQueryPlan::new(composition("select 1"), empty, 0, None, false);
        assert_eq!(
            plan.get_single_result().unwrap_err().code,
            crate::error::ErrorCode::NoResult
        );

        let two = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(1)], vec![Value::Int(2)]]));
        let plan = SelectQueryPlan::new(composition("select 1"), two, 0, None, false);
        assert_eq!(
            plan.get_single_result().unwrap_err().code,
            crate::error::ErrorCode::NotUnique
        );
    }

    #[test]
    fn test_stream_executes_on_first_poll() {
        let executor = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(1)], vec![Value::Int(2)]]));
        let plan = SelectQueryPlan::new(composition("select 1"), executor.clone(), 0, None, false);
        let mut stream = plan.result_stream();
        assert_eq!(executor.executions(), 0);
        assert_eq!(stream.next().unwrap().unwrap(), vec![Value::Int(1)]);
        assert_eq!(executor.executions(), 1);
        assert_eq!(stream.count(), 1);
    }

    #[test]
    fn test_returning_select_reads_returned_rows() {
        let executor = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(7)]]));
        let plan = SelectQueryPlan::new(composition("delete from A"), executor.clone(), 0, None, true);
        assert_eq!(plan.get_result_list().unwrap(), vec![vec![Value::Int(7)]]);
        assert_eq!(executor.last_request().unwrap().kind, "returning");
    }

    #[test]
    fn test_modification_and_returning_plans() {
        let executor = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(7)]]).update_count(3));
        let plan = ModificationQueryPlan::new(composition("delete from A"), executor.clone(), 0, None);
        assert_eq!(plan.execute_update().unwrap(), 3);

        let plan = ReturningQueryPlan::new(composition("delete from A"), executor);
        let result = plan.execute().unwrap();
        assert_eq!(result.update_count, 3);
        assert_eq!(result.rows.len(), 1);
    }
}
