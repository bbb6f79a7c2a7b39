//! The query façade.
//!
//! [`CustomQuery`] is what callers hold: it captures parameter values,
//! delegates SQL composition to its [`QuerySpecification`] and, right before
//! execution, replays every captured value onto every statement that takes
//! part in the composed SQL.
//!
//! ```rust,ignore
//! use sqlweave_query::prelude::*;
//!
//! let query = CustomQuery::builder(Arc::new(spec), executor)
//!     .transformer("ids", Elementwise(to_id))
//!     .build()?;
//! query.set_parameter("ids", vec![1, 2, 3])?;
//! let rows = query.get_result_list()?;
//! ```

use chrono::NaiveDateTime;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::fmt;
use std::sync::Arc;

use crate::binder::{ValueBinder, ValuesParameter};
use crate::error::{ErrorCode, QueryError, QueryResult};
use crate::plan::{QueryExecutor, ResultStream, ReturningResult, Row};
use crate::spec::{Fingerprint, QuerySpecification};
use crate::statement::{CompositeQuery, Parameter, ParameterType, Statement, StatementRef, same_statement};
use crate::transformer::ParameterValueTransformer;
use crate::value::{TemporalType, Value};

#[derive(Default)]
struct QueryState {
    binders: IndexMap<SmolStr, ValueBinder>,
    values_parameters: IndexMap<SmolStr, ValuesParameter>,
    transformers: IndexMap<SmolStr, Arc<dyn ParameterValueTransformer>>,
    handle_names: IndexMap<Parameter, SmolStr>,
    first_result: usize,
    max_results: Option<usize>,
}

impl QueryState {
    fn values_parameter_for(&self, physical_name: &str) -> Option<&ValuesParameter> {
        self.values_parameters
            .values()
            .find(|parameter| parameter.binder().contains(physical_name))
    }

    fn is_bound(&self, name: &str) -> bool {
        match self.values_parameters.get(name) {
            Some(parameter) => parameter.value().is_some(),
            None => self.binders.contains_key(name),
        }
    }
}

/// A query over a [`QuerySpecification`] with captured parameter values.
pub struct CustomQuery {
    specification: Arc<QuerySpecification>,
    executor: Arc<dyn QueryExecutor>,
    state: Mutex<QueryState>,
}

impl fmt::Debug for CustomQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CustomQuery")
            .field("specification", &self.specification)
            .field("bound", &state.binders.keys().collect::<Vec<_>>())
            .field("first_result", &state.first_result)
            .field("max_results", &state.max_results)
            .finish_non_exhaustive()
    }
}

impl CustomQuery {
    /// Start building a query over `specification`.
    pub fn builder(
        specification: Arc<QuerySpecification>,
        executor: Arc<dyn QueryExecutor>,
    ) -> CustomQueryBuilder {
        CustomQueryBuilder::new(specification, executor)
    }

    /// The specification composing this query's SQL.
    pub fn specification(&self) -> &Arc<QuerySpecification> {
        &self.specification
    }

    /// The composed SQL.
    pub fn sql(&self) -> QueryResult<String> {
        self.specification.sql()
    }

    // ============== Parameters ==============

    /// Every declared parameter, VALUES parameters included.
    pub fn get_parameters(&self) -> Vec<Parameter> {
        let state = self.state.lock();
        let mut parameters = self.specification.parameters().to_vec();
        for name in state.values_parameters.keys() {
            if !parameters.iter().any(|p| p.name() == name.as_str()) {
                parameters.push(Parameter::typed(name.clone(), ParameterType::Collection));
            }
        }
        parameters
    }

    /// The declared parameter named `name`.
    pub fn get_parameter(&self, name: &str) -> QueryResult<Parameter> {
        self.get_parameters()
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| QueryError::unknown_parameter(name))
    }

    /// The declared parameter named `name`, which must be readable as `target`.
    pub fn get_parameter_typed(&self, name: &str, target: ParameterType) -> QueryResult<Parameter> {
        let parameter = self.get_parameter(name)?;
        if parameter.parameter_type().is_assignable_to(target) {
            Ok(parameter)
        } else {
            Err(QueryError::not_assignable(name, target))
        }
    }

    /// Positional parameters are not supported.
    pub fn get_positional_parameter(&self, _position: usize) -> QueryResult<Parameter> {
        Err(QueryError::positional_unsupported())
    }

    /// Positional parameters are not supported.
    pub fn set_positional_parameter(&self, _position: usize, _value: Value) -> QueryResult<()> {
        Err(QueryError::positional_unsupported())
    }

    /// Bind `value` to the parameter named `name`.
    ///
    /// A registered transformer runs first. Collections are reported to the
    /// specification so a change of cardinality recomposes the SQL.
    pub fn set_parameter(&self, name: &str, value: impl Into<Value>) -> QueryResult<()> {
        let parameter = self.get_parameter(name)?;
        let transformer = self.state.lock().transformers.get(name).cloned();
        let value = match transformer {
            Some(transformer) => transformer.transform(value.into())?,
            None => value.into(),
        };

        let mut state = self.state.lock();
        if let Some(values_parameter) = state.values_parameters.get_mut(name) {
            return values_parameter.set_value(value);
        }
        check_assignable(&parameter, &value)?;
        if let Value::List(values) = &value {
            if self.specification.on_collection_parameter_change(name, values) {
                tracing::debug!(parameter = name, cardinality = values.len(), "list parameter changed shape");
            }
        }
        state
            .binders
            .insert(SmolStr::new(name), ValueBinder::Plain(value));
        Ok(())
    }

    /// Bind a value through a parameter handle.
    ///
    /// Handles registered with [`CustomQueryBuilder::parameter_name`] resolve
    /// to their mapped name, others to their own name.
    pub fn set_parameter_value(&self, parameter: &Parameter, value: impl Into<Value>) -> QueryResult<()> {
        let name = self.resolve_handle(parameter);
        self.set_parameter(&name, value)
    }

    /// Bind a timestamp with the given precision.
    pub fn set_temporal_parameter(
        &self,
        name: &str,
        value: NaiveDateTime,
        precision: TemporalType,
    ) -> QueryResult<()> {
        let parameter = self.get_parameter(name)?;
        if !ParameterType::Temporal.is_assignable_to(parameter.parameter_type()) {
            return Err(QueryError::not_assignable(name, parameter.parameter_type()));
        }
        self.state
            .lock()
            .binders
            .insert(SmolStr::new(name), ValueBinder::Temporal { value, precision });
        Ok(())
    }

    /// The value currently bound to `name`, after transformation.
    pub fn get_parameter_value(&self, name: &str) -> QueryResult<Option<Value>> {
        self.get_parameter(name)?;
        let state = self.state.lock();
        if let Some(values_parameter) = state.values_parameters.get(name) {
            return Ok(values_parameter.value().map(|v| Value::List(v.to_vec())));
        }
        Ok(state.binders.get(name).map(ValueBinder::value))
    }

    /// Whether a value is bound to `name`.
    pub fn is_bound(&self, name: &str) -> bool {
        self.state.lock().is_bound(name)
    }

    fn resolve_handle(&self, parameter: &Parameter) -> SmolStr {
        self.state
            .lock()
            .handle_names
            .get(parameter)
            .cloned()
            .unwrap_or_else(|| SmolStr::new(parameter.name()))
    }

    // ============== Paging ==============

    /// Index of the first row to return.
    pub fn first_result(&self) -> usize {
        self.state.lock().first_result
    }

    /// Set the index of the first row to return.
    pub fn set_first_result(&self, first_result: usize) -> &Self {
        self.state.lock().first_result = first_result;
        self
    }

    /// Maximum number of rows to return.
    pub fn max_results(&self) -> Option<usize> {
        self.state.lock().max_results
    }

    /// Set the maximum number of rows to return.
    pub fn set_max_results(&self, max_results: Option<usize>) -> &Self {
        self.state.lock().max_results = max_results;
        self
    }

    // ============== Binding ==============

    /// Replay captured values onto every participating statement.
    ///
    /// Every name left without a value is collected; the error lists all of
    /// them at once, sorted.
    pub fn bind_parameters(&self) -> QueryResult<()> {
        let mut statements = Vec::new();
        flatten_participants(self.specification.participating_statements()?, &mut statements)?;

        let state = self.state.lock();
        let mut missing: IndexSet<SmolStr> = IndexSet::new();
        let mut bindings = 0usize;
        for statement in &statements {
            let mut bound_values: IndexSet<&str> = IndexSet::new();
            for name in statement.parameter_names() {
                if let Some(values_parameter) = state.values_parameter_for(&name) {
                    if !bound_values.insert(values_parameter.name()) {
                        continue;
                    }
                    if values_parameter.value().is_some() {
                        values_parameter.bind(statement.as_ref())?;
                        bindings += 1;
                    } else {
                        missing.insert(SmolStr::new(values_parameter.name()));
                    }
                    continue;
                }
                match state.binders.get(name.as_str()) {
                    Some(binder) => {
                        binder.bind(statement.as_ref(), &name)?;
                        bindings += 1;
                    }
                    None => {
                        missing.insert(name);
                    }
                }
            }
        }

        missing.retain(|name| !state.is_bound(name));
        tracing::debug!(
            statements = statements.len(),
            bindings,
            missing = missing.len(),
            "bound parameters"
        );
        if missing.is_empty() {
            return Ok(());
        }
        let mut names: Vec<SmolStr> = missing.into_iter().collect();
        names.sort();
        Err(QueryError::missing_parameters(names))
    }

    // ============== Execution ==============

    /// Execute and collect every row.
    pub fn get_result_list(&self) -> QueryResult<Vec<Row>> {
        let (first, max) = self.paging();
        let plan = self
            .specification
            .create_select_plan(Arc::clone(&self.executor), first, max)?;
        self.bind_parameters()?;
        plan.get_result_list()
    }

    /// Execute and return the only row.
    pub fn get_single_result(&self) -> QueryResult<Row> {
        let (first, max) = self.paging();
        let plan = self
            .specification
            .create_select_plan(Arc::clone(&self.executor), first, max)?;
        self.bind_parameters()?;
        plan.get_single_result()
    }

    /// Execute and return the only row, or `None` when there is none.
    pub fn get_single_result_or_null(&self) -> QueryResult<Option<Row>> {
        match self.get_single_result() {
            Ok(row) => Ok(Some(row)),
            Err(err) if err.code == ErrorCode::NoResult => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Rows produced lazily. Parameters are bound now, the query runs on the first poll.
    pub fn result_stream(&self) -> QueryResult<ResultStream> {
        let (first, max) = self.paging();
        let plan = self
            .specification
            .create_select_plan(Arc::clone(&self.executor), first, max)?;
        self.bind_parameters()?;
        Ok(plan.result_stream())
    }

    /// Execute a modification and return the number of affected rows.
    pub fn execute_update(&self) -> QueryResult<u64> {
        let (first, max) = self.paging();
        let plan = self
            .specification
            .create_modification_plan(Arc::clone(&self.executor), first, max)?;
        self.bind_parameters()?;
        plan.execute_update()
    }

    /// Execute a modification and return the update count with the returned rows.
    pub fn execute_with_returning(&self) -> QueryResult<ReturningResult> {
        let plan = self
            .specification
            .create_returning_plan(Arc::clone(&self.executor))?;
        self.bind_parameters()?;
        plan.execute()
    }

    fn paging(&self) -> (usize, Option<usize>) {
        let state = self.state.lock();
        (state.first_result, state.max_results)
    }
}

fn check_assignable(parameter: &Parameter, value: &Value) -> QueryResult<()> {
    let declared = parameter.parameter_type();
    let assignable = match value {
        Value::Null => true,
        Value::List(values) if declared != ParameterType::Collection => values
            .iter()
            .all(|v| v.is_null() || ParameterType::of(v).is_assignable_to(declared)),
        other => ParameterType::of(other).is_assignable_to(declared),
    };
    if assignable {
        Ok(())
    } else {
        Err(QueryError::not_assignable(parameter.name(), value.type_name())
            .with_help(format!("The parameter is declared as {}", declared)))
    }
}

/// Replace composite statements by their own participants, depth first.
fn flatten_participants(participants: Vec<StatementRef>, out: &mut Vec<StatementRef>) -> QueryResult<()> {
    for statement in participants {
        match statement.composite() {
            Some(composite) => flatten_participants(composite.participating_statements()?, out)?,
            None => {
                if !out.iter().any(|s| same_statement(s, &statement)) {
                    out.push(statement);
                }
            }
        }
    }
    Ok(())
}

impl Statement for CustomQuery {
    fn parameter_names(&self) -> Vec<SmolStr> {
        self.get_parameters()
            .into_iter()
            .map(|p| SmolStr::new(p.name()))
            .collect()
    }

    fn set_parameter(&self, name: &str, value: Value) -> QueryResult<()> {
        CustomQuery::set_parameter(self, name, value)
    }

    fn set_temporal_parameter(
        &self,
        name: &str,
        value: NaiveDateTime,
        temporal: TemporalType,
    ) -> QueryResult<()> {
        CustomQuery::set_temporal_parameter(self, name, value, temporal)
    }

    fn composite(&self) -> Option<&dyn CompositeQuery> {
        Some(self)
    }
}

impl CompositeQuery for CustomQuery {
    fn composed_sql(&self) -> QueryResult<String> {
        self.specification.sql()
    }

    fn participating_statements(&self) -> QueryResult<Vec<StatementRef>> {
        self.specification.participating_statements()
    }

    fn fingerprint(&self) -> Fingerprint {
        self.specification.fingerprint()
    }
}

/// Builder for [`CustomQuery`].
pub struct CustomQueryBuilder {
    specification: Arc<QuerySpecification>,
    executor: Arc<dyn QueryExecutor>,
    state: QueryState,
    error: Option<QueryError>,
}

impl fmt::Debug for CustomQueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomQueryBuilder")
            .field("specification", &self.specification)
            .field("transformers", &self.state.transformers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CustomQueryBuilder {
    /// Create a builder.
    pub fn new(specification: Arc<QuerySpecification>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            specification,
            executor,
            state: QueryState::default(),
            error: None,
        }
    }

    /// Add a VALUES parameter.
    pub fn values_parameter(mut self, parameter: ValuesParameter) -> Self {
        self.state
            .values_parameters
            .insert(SmolStr::new(parameter.name()), parameter);
        self
    }

    /// Register a value transformer for `name`.
    ///
    /// Registering a second transformer for the same name fails at [`build`](Self::build).
    pub fn transformer<T>(mut self, name: impl Into<SmolStr>, transformer: T) -> Self
    where
        T: ParameterValueTransformer + 'static,
    {
        let name = name.into();
        if self.state.transformers.contains_key(&name) {
            self.error.get_or_insert_with(|| {
                QueryError::new(
                    ErrorCode::TransformerConflict,
                    format!("A value transformer is already registered for parameter: {}", name),
                )
                .with_parameter(name.as_str())
            });
            return self;
        }
        self.state.transformers.insert(name, Arc::new(transformer));
        self
    }

    /// Map a parameter handle to the name it is bound under.
    pub fn parameter_name(mut self, handle: Parameter, name: impl Into<SmolStr>) -> Self {
        self.state.handle_names.insert(handle, name.into());
        self
    }

    /// Set the index of the first row to return.
    pub fn first_result(mut self, first_result: usize) -> Self {
        self.state.first_result = first_result;
        self
    }

    /// Set the maximum number of rows to return.
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.state.max_results = Some(max_results);
        self
    }

    /// Build the query.
    pub fn build(self) -> QueryResult<CustomQuery> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let declared = |name: &str| {
            self.specification.parameters().iter().any(|p| p.name() == name)
                || self.state.values_parameters.contains_key(name)
        };
        if let Some(name) = self.state.transformers.keys().find(|name| !declared(name)) {
            return Err(QueryError::unknown_parameter(name.as_str()).with_context("register transformer"));
        }
        if let Some(name) = self.state.handle_names.values().find(|name| !declared(name)) {
            return Err(QueryError::unknown_parameter(name.as_str()).with_context("map parameter handle"));
        }
        Ok(CustomQuery {
            specification: self.specification,
            executor: self.executor,
            state: Mutex::new(self.state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::ValuesParameterBinder;
    use crate::dialect::DatabaseType;
    use crate::spec::{DeleteConfig, ModificationConfig, ReturningConfig, SpecContext, SpecVariant};
    use crate::testing::{MockExecutor, MockProvider};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn context(provider: &Arc<MockProvider>) -> SpecContext {
        SpecContext::new(DatabaseType::PostgreSQL.dialect(), provider.clone())
    }

    fn in_query(provider: &Arc<MockProvider>) -> (Arc<crate::testing::MockStatement>, Arc<QuerySpecification>) {
        let (statement, base) =
            provider.register("select a.id from A a where a.id in (:ids) and a.name = :name", &["ids", "name"]);
        let spec = QuerySpecification::builder(context(provider), base)
            .parameter(Parameter::typed("ids", ParameterType::Int))
            .parameter(Parameter::typed("name", ParameterType::String))
            .list_parameter("ids")
            .build()
            .unwrap();
        (statement, Arc::new(spec))
    }

    #[test]
    fn test_missing_parameters_are_collected() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let query = CustomQuery::builder(spec, Arc::new(MockExecutor::default()))
            .build()
            .unwrap();
        let err = query.bind_parameters().unwrap_err();
        assert!(err.is_missing_parameter());
        assert_eq!(err.message, "The following parameters have not been set: [ids, name]");
    }

    #[test]
    fn test_bind_replays_values() {
        let provider = Arc::new(MockProvider::default());
        let (statement, spec) = in_query(&provider);
        let executor = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(1)]]));
        let query = CustomQuery::builder(spec, executor.clone()).build().unwrap();
        query.set_parameter("ids", vec![1, 2]).unwrap();
        query.set_parameter("name", "x").unwrap();

        let rows = query.get_result_list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(statement.bound("name"), Some(Value::from("x")));
        assert_eq!(
            executor.last_request().unwrap().sql,
            "select a.id from A a where a.id in (?,?) and a.name = ?"
        );
    }

    #[test]
    fn test_unknown_and_positional_parameters() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let query = CustomQuery::builder(spec, Arc::new(MockExecutor::default()))
            .build()
            .unwrap();
        let err = query.set_parameter("nope", 1).unwrap_err();
        assert_eq!(err.message, "Invalid or unknown parameter with name: nope");
        assert_eq!(
            query.set_positional_parameter(1, Value::Int(1)).unwrap_err().message,
            "Positional parameters unsupported!"
        );
        assert!(query.get_positional_parameter(1).unwrap_err().is_invalid_parameter());
    }

    #[test]
    fn test_typed_parameters() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let query = CustomQuery::builder(spec, Arc::new(MockExecutor::default()))
            .build()
            .unwrap();
        assert!(query.get_parameter_typed("ids", ParameterType::Float).is_ok());
        let err = query.get_parameter_typed("name", ParameterType::Int).unwrap_err();
        assert_eq!(err.message, "Parameter 'name' is not assignable to 'int'!");
        assert!(query.set_parameter("name", 5).unwrap_err().is_invalid_parameter());
    }

    #[test]
    fn test_transformer_reshapes_value() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let double = |value: Value| -> QueryResult<Value> {
            Ok(match value {
                Value::List(values) => Value::List(values.into_iter().chain([Value::Int(0)]).collect()),
                other => other,
            })
        };
        let query = CustomQuery::builder(Arc::clone(&spec), Arc::new(MockExecutor::default()))
            .transformer("ids", double)
            .build()
            .unwrap();
        query.set_parameter("ids", vec![1, 2]).unwrap();
        assert_eq!(
            query.get_parameter_value("ids").unwrap(),
            Some(Value::from(vec![1, 2, 0]))
        );
        assert!(spec.sql().unwrap().contains("in (?,?,?)"));
    }

    #[test]
    fn test_transformer_conflict() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let identity = |value: Value| -> QueryResult<Value> { Ok(value) };
        let err = CustomQuery::builder(spec, Arc::new(MockExecutor::default()))
            .transformer("ids", identity)
            .transformer("ids", identity)
            .build()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransformerConflict);
    }

    #[test]
    fn test_values_parameter_binding() {
        let provider = Arc::new(MockProvider::default());
        let (statement, base) = provider.register(
            "select v.id from (VALUES (:v_0_0),(:v_1_0)) v(id)",
            &["v_0_0", "v_1_0"],
        );
        let spec = QuerySpecification::builder(context(&provider), base)
            .build()
            .unwrap();
        let query = CustomQuery::builder(Arc::new(spec), Arc::new(MockExecutor::default()))
            .values_parameter(ValuesParameter::new("v", ValuesParameterBinder::generate("v", 2, 1)))
            .build()
            .unwrap();
        assert_eq!(query.bind_parameters().unwrap_err().message, "The following parameters have not been set: [v]");

        query.set_parameter("v", vec![7]).unwrap();
        query.bind_parameters().unwrap();
        assert_eq!(statement.bound("v_0_0"), Some(Value::Int(7)));
        assert_eq!(statement.bound("v_1_0"), Some(Value::Null));

        let err = query.set_parameter("v", vec![1, 2, 3]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameterValue);
    }

    #[test]
    fn test_temporal_parameter() {
        let provider = Arc::new(MockProvider::default());
        let (statement, base) = provider.register("select 1 from A a where a.d = :d", &["d"]);
        let spec = QuerySpecification::builder(context(&provider), base)
            .parameter(Parameter::new("d"))
            .build()
            .unwrap();
        let query = CustomQuery::builder(Arc::new(spec), Arc::new(MockExecutor::default()))
            .build()
            .unwrap();
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        query.set_temporal_parameter("d", timestamp, TemporalType::Date).unwrap();
        query.bind_parameters().unwrap();
        assert_eq!(statement.bound("d"), Some(TemporalType::Date.apply(timestamp)));
    }

    #[test]
    fn test_parameter_handle_mapping() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let handle = Parameter::new("param_0");
        let query = CustomQuery::builder(spec, Arc::new(MockExecutor::default()))
            .parameter_name(handle.clone(), "name")
            .build()
            .unwrap();
        query.set_parameter_value(&handle, "x").unwrap();
        assert!(query.is_bound("name"));
    }

    #[test]
    fn test_wrong_operation_for_kind() {
        let provider = Arc::new(MockProvider::default());
        let (_, base) = provider.register("select a.id from A a", &[]);
        let spec = QuerySpecification::builder(context(&provider), base)
            .build()
            .unwrap();
        let query = CustomQuery::builder(Arc::new(spec), Arc::new(MockExecutor::default()))
            .build()
            .unwrap();
        assert!(query.execute_update().unwrap_err().is_unsupported());
        assert!(query.execute_with_returning().unwrap_err().is_unsupported());
        assert_eq!(query.get_single_result_or_null().unwrap(), None);
    }

    #[test]
    fn test_delete_with_returning() {
        let provider = Arc::new(MockProvider::default());
        let (_, base) = provider.register("delete from A a0_ where a0_.id = :id", &["id"]);
        let (_, example) = provider.register("select a0_.id from A a0_", &[]);
        let spec = QuerySpecification::builder(context(&provider), base)
            .parameter(Parameter::new("id"))
            .variant(SpecVariant::Delete(DeleteConfig::new(
                ModificationConfig::new()
                    .returning(ReturningConfig::columns(["a0_.id"]))
                    .example_statement(example),
            )))
            .build()
            .unwrap();
        let executor = Arc::new(MockExecutor::with_rows(vec![vec![Value::Int(4)]]).update_count(1));
        let query = CustomQuery::builder(Arc::new(spec), executor.clone())
            .build()
            .unwrap();
        query.set_parameter("id", 4).unwrap();
        let result = query.execute_with_returning().unwrap();
        assert_eq!(result.update_count, 1);
        assert_eq!(result.rows, vec![vec![Value::Int(4)]]);
        let request = executor.last_request().unwrap();
        assert_eq!(request.kind, "returning");
        assert_eq!(request.returning_columns, vec!["a0_.id".to_string()]);
    }

    #[test]
    fn test_nested_query_participants_are_flattened() {
        let provider = Arc::new(MockProvider::default());
        let (_, spec) = in_query(&provider);
        let inner = Arc::new(
            CustomQuery::builder(spec, Arc::new(MockExecutor::default()))
                .build()
                .unwrap(),
        );
        let inner_ref: StatementRef = inner;
        let mut out = Vec::new();
        flatten_participants(vec![inner_ref], &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].parameter_names().len(), 2);
    }
}
