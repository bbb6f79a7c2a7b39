//! In-memory collaborators shared by unit tests.

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{QueryError, QueryResult};
use crate::plan::{ExecutionRequest, QueryExecutor, ReturningResult, Row};
use crate::provider::SqlProvider;
use crate::statement::{Statement, StatementRef};
use crate::value::Value;

/// A statement recording every value bound to it.
#[derive(Debug, Default)]
pub(crate) struct MockStatement {
    pub names: Vec<SmolStr>,
    pub bound: Mutex<IndexMap<SmolStr, Value>>,
    pub version: AtomicU64,
}

impl MockStatement {
    pub fn bound(&self, name: &str) -> Option<Value> {
        self.bound.lock().get(name).cloned()
    }
}

impl Statement for MockStatement {
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

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

struct Entry {
    statement: Arc<MockStatement>,
    template: String,
    cascades: Vec<String>,
}

/// A provider serving SQL templates registered per statement.
///
/// `:name` in a template expands to one `?` per element of the list bound to
/// `name`, the way providers expand collection parameters.
#[derive(Default)]
pub(crate) struct MockProvider {
    entries: Mutex<Vec<Entry>>,
    aliases: Mutex<IndexMap<String, String>>,
    pub calls: AtomicUsize,
}

impl MockProvider {
    pub fn register(&self, template: &str, names: &[&str]) -> (Arc<MockStatement>, StatementRef) {
        self.register_with_cascades(template, names, Vec::new())
    }

    pub fn register_with_cascades(
        &self,
        template: &str,
        names: &[&str],
        cascades: Vec<String>,
    ) -> (Arc<MockStatement>, StatementRef) {
        let statement = Arc::new(MockStatement {
            names: names.iter().map(|n| SmolStr::new(n)).collect(),
            ..MockStatement::default()
        });
        self.entries.lock().push(Entry {
            statement: Arc::clone(&statement),
            template: template.to_string(),
            cascades,
        });
        let handle: StatementRef = statement.clone();
        (statement, handle)
    }

    pub fn alias(&self, entity_alias: &str, sql_alias: &str) {
        self.aliases
            .lock()
            .insert(entity_alias.to_string(), sql_alias.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_entry<T>(&self, statement: &dyn Statement, f: impl FnOnce(&Entry) -> T) -> QueryResult<T> {
        let target = statement as *const dyn Statement as *const ();
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| Arc::as_ptr(&e.statement) as *const () == target)
            .map(f)
            .ok_or_else(|| QueryError::provider("Unknown statement"))
    }
}

impl SqlProvider for MockProvider {
    fn sql(&self, statement: &dyn Statement) -> QueryResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.with_entry(statement, |entry| {
            let mut sql = entry.template.clone();
            for name in &entry.statement.names {
                let placeholder = format!(":{}", name);
                if !sql.contains(&placeholder) {
                    continue;
                }
                let count = entry
                    .statement
                    .bound(name)
                    .and_then(|v| v.cardinality())
                    .unwrap_or(1);
                sql = sql.replace(&placeholder, &vec!["?"; count.max(1)].join(","));
            }
            sql
        })
    }

    fn sql_alias(&self, _statement: &dyn Statement, entity_alias: &str) -> QueryResult<String> {
        self.aliases
            .lock()
            .get(entity_alias)
            .cloned()
            .ok_or_else(|| QueryError::provider(format!("Unknown alias {}", entity_alias)))
    }

    fn cascading_delete_sql(&self, statement: &dyn Statement) -> QueryResult<Vec<String>> {
        self.with_entry(statement, |entry| entry.cascades.clone())
    }
}

/// What an executor call received.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub kind: &'static str,
    pub sql: String,
    pub participants: usize,
    pub first_result: usize,
    pub max_results: Option<usize>,
    pub returning_columns: Vec<String>,
}

/// An executor answering every call with canned rows and counts.
#[derive(Debug, Default)]
pub(crate) struct MockExecutor {
    rows: Vec<Row>,
    update_count: u64,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockExecutor {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn update_count(mut self, update_count: u64) -> Self {
        self.update_count = update_count;
        self
    }

    pub fn executions(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    fn record(&self, kind: &'static str, request: &ExecutionRequest<'_>) {
        self.requests.lock().push(RecordedRequest {
            kind,
            sql: request.sql.to_string(),
            participants: request.participants.len(),
            first_result: request.first_result,
            max_results: request.max_results,
            returning_columns: request.returning_columns.to_vec(),
        });
    }
}

impl QueryExecutor for MockExecutor {
    fn select(&self, request: &ExecutionRequest<'_>) -> QueryResult<Vec<Row>> {
        self.record("select", request);
        Ok(self.rows.clone())
    }

    fn update(&self, request: &ExecutionRequest<'_>) -> QueryResult<u64> {
        self.record("update", request);
        Ok(self.update_count)
    }

    fn returning(&self, request: &ExecutionRequest<'_>) -> QueryResult<ReturningResult> {
        self.record("returning", request);
        Ok(ReturningResult {
            update_count: self.update_count,
            rows: self.rows.clone(),
        })
    }
}
