//! In-memory provider, statement and executor used by the integration tests.

#![allow(dead_code)]

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sqlweave::query::{
    DatabaseType, ExecutionRequest, QueryError, QueryExecutor, QueryResult, ReturningResult, Row,
    SpecContext, SqlProvider, Statement, StatementRef, Value,
};

/// A statement that records bound values.
#[derive(Debug, Default)]
pub struct TestStatement {
    pub template: String,
    pub names: Vec<SmolStr>,
    pub bound: Mutex<IndexMap<SmolStr, Value>>,
}

impl TestStatement {
    pub fn bound(&self, name: &str) -> Option<Value> {
        self.bound.lock().get(name).cloned()
    }
}

impl Statement for TestStatement {
    fn parameter_names(&self) -> Vec<SmolStr> {
        self.names.clone()
    }

    fn set_parameter(&self, name: &str, value: Value) -> QueryResult<()> {
        if !self.names.iter().any(|n| n == name) {
            return Err(QueryError::unknown_parameter(name));
        }
        self.bound.lock().insert(SmolStr::new(name), value);
        Ok(())
    }
}

/// Renders `:name` as one `?` per element of the list bound to `name`.
#[derive(Default)]
pub struct TestProvider {
    statements: Mutex<Vec<Arc<TestStatement>>>,
    pub calls: AtomicUsize,
}

impl TestProvider {
    pub fn statement(&self, template: &str, names: &[&str]) -> (Arc<TestStatement>, StatementRef) {
        let statement = Arc::new(TestStatement {
            template: template.to_string(),
            names: names.iter().map(|n| SmolStr::new(n)).collect(),
            ..TestStatement::default()
        });
        self.statements.lock().push(Arc::clone(&statement));
        let handle: StatementRef = statement.clone();
        (statement, handle)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn find(&self, statement: &dyn Statement) -> QueryResult<Arc<TestStatement>> {
        let target = statement as *const dyn Statement as *const ();
        self.statements
            .lock()
            .iter()
            .find(|s| Arc::as_ptr(s) as *const () == target)
            .cloned()
            .ok_or_else(|| QueryError::provider("Unknown statement"))
    }
}

impl SqlProvider for TestProvider {
    fn sql(&self, statement: &dyn Statement) -> QueryResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let statement = self.find(statement)?;
        let mut sql = statement.template.clone();
        for name in &statement.names {
            let placeholder = format!(":{}", name);
            let count = statement
                .bound(name)
                .and_then(|v| v.cardinality())
                .unwrap_or(1)
                .max(1);
            sql = sql.replace(&placeholder, &vec!["?"; count].join(","));
        }
        Ok(sql)
    }

    fn sql_alias(&self, _statement: &dyn Statement, entity_alias: &str) -> QueryResult<String> {
        Ok(format!("{}_", entity_alias))
    }
}

/// Answers every request with fixed rows and records the SQL it received.
#[derive(Default)]
pub struct TestExecutor {
    pub rows: Vec<Row>,
    pub update_count: u64,
    pub executed: Mutex<Vec<String>>,
}

impl TestExecutor {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn last_sql(&self) -> Option<String> {
        self.executed.lock().last().cloned()
    }
}

impl QueryExecutor for TestExecutor {
    fn select(&self, request: &ExecutionRequest<'_>) -> QueryResult<Vec<Row>> {
        self.executed.lock().push(request.sql.to_string());
        Ok(self.rows.clone())
    }

    fn update(&self, request: &ExecutionRequest<'_>) -> QueryResult<u64> {
        self.executed.lock().push(request.sql.to_string());
        Ok(self.update_count)
    }

    fn returning(&self, request: &ExecutionRequest<'_>) -> QueryResult<ReturningResult> {
        self.executed.lock().push(request.sql.to_string());
        Ok(ReturningResult {
            update_count: self.update_count,
            rows: self.rows.clone(),
        })
    }
}

pub fn context(provider: &Arc<TestProvider>, database: DatabaseType) -> SpecContext {
    SpecContext::new(database.dialect(), provider.clone())
}
