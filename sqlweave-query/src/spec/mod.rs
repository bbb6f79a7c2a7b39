//! Query specifications: the composition engine.
//!
//! A [`QuerySpecification`] owns everything needed to turn a provider
//! statement into the final SQL of one query:
//!
//! - the base statement and the logical parameters it declares
//! - list parameters whose cardinality shapes the provider SQL
//! - key restricted left joins and entity function nodes to rewrite
//! - the CTE nodes to assemble into a WITH clause
//! - a [`SpecVariant`] carrying the per-kind configuration
//!
//! Composition is a pure function of these inputs, [`compose`], and its
//! result is cached under a [`Fingerprint`] of the observable inputs. A
//! list parameter changing cardinality changes the fingerprint, so the next
//! access recomposes; nothing flips a dirty flag from the outside.
//!
//! ```rust,ignore
//! use sqlweave_query::spec::{QuerySpecification, SpecContext};
//!
//! let spec = QuerySpecification::builder(context, statement)
//!     .parameter(Parameter::new("ids"))
//!     .list_parameter("ids")
//!     .limit("?")
//!     .build()?;
//! let sql = spec.sql()?;
//! ```

mod compose;
mod delete;
mod fingerprint;
mod insert;
mod modification;
mod set_operation;
mod shaped;
mod transform;
mod update;

pub use compose::{ComposeContext, compose};
pub use delete::{CollectionDeleteConfig, DeleteConfig};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use insert::CollectionInsertConfig;
pub use modification::{ModificationConfig, ReturningConfig};
pub use set_operation::SetOperationConfig;
pub use transform::EntityFunctionNode;
pub use update::{CollectionUpdateConfig, UpdateConfig, UpdateJoinConfig};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::fmt;
use std::sync::Arc;

use crate::cte::CteNode;
use crate::dialect::{DbmsDialect, StatementType};
use crate::error::{ErrorCode, QueryError, QueryResult};
use crate::plan::{ModificationQueryPlan, QueryExecutor, ReturningQueryPlan, SelectQueryPlan};
use crate::provider::SqlProvider;
use crate::statement::{CompositeQuery, Parameter, StatementRef};
use crate::value::Value;

/// The collaborators a specification composes with.
#[derive(Clone)]
pub struct SpecContext {
    dialect: Arc<dyn DbmsDialect>,
    provider: Arc<dyn SqlProvider>,
}

impl SpecContext {
    /// Create a context.
    pub fn new(dialect: Arc<dyn DbmsDialect>, provider: Arc<dyn SqlProvider>) -> Self {
        Self { dialect, provider }
    }

    /// The dialect.
    pub fn dialect(&self) -> &Arc<dyn DbmsDialect> {
        &self.dialect
    }

    /// The SQL provider.
    pub fn provider(&self) -> &Arc<dyn SqlProvider> {
        &self.provider
    }
}

impl fmt::Debug for SpecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecContext")
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

/// A query used as a CTE body or set operand.
#[derive(Debug, Clone)]
pub enum SubQuery {
    /// A provider statement, used with its native SQL.
    Statement(StatementRef),
    /// A nested specification, used with its composed SQL.
    Specification(Arc<QuerySpecification>),
}

/// A rendered [`SubQuery`].
pub(crate) struct RenderedQuery {
    pub sql: String,
    pub participants: Vec<StatementRef>,
    pub added_ctes: IndexMap<String, String>,
}

impl SubQuery {
    /// The statement the query is derived from.
    pub fn base_statement(&self) -> StatementRef {
        match self {
            Self::Statement(statement) => Arc::clone(statement),
            Self::Specification(spec) => Arc::clone(spec.base_statement()),
        }
    }

    pub(crate) fn render(&self, provider: &dyn SqlProvider) -> QueryResult<RenderedQuery> {
        match self {
            Self::Statement(statement) => match statement.composite() {
                Some(composite) => Ok(RenderedQuery {
                    sql: composite.composed_sql()?,
                    participants: composite.participating_statements()?,
                    added_ctes: IndexMap::new(),
                }),
                None => Ok(RenderedQuery {
                    sql: provider.sql(statement.as_ref())?,
                    participants: vec![Arc::clone(statement)],
                    added_ctes: IndexMap::new(),
                }),
            },
            Self::Specification(spec) => {
                let composition = spec.composition()?;
                Ok(RenderedQuery {
                    sql: composition.sql.clone(),
                    participants: composition.participants.clone(),
                    added_ctes: composition.added_ctes.clone(),
                })
            }
        }
    }

    pub(crate) fn write_fingerprint(&self, fingerprint: &mut FingerprintBuilder) {
        match self {
            Self::Statement(statement) => match statement.composite() {
                Some(composite) => fingerprint.nested(composite.fingerprint()),
                None => fingerprint.version(statement.version()),
            },
            Self::Specification(spec) => fingerprint.nested(spec.fingerprint()),
        };
    }
}

/// The kind of query a specification composes, with its configuration.
#[derive(Debug, Clone)]
pub enum SpecVariant {
    /// A plain select.
    Select,
    /// UNION, INTERSECT or EXCEPT over several operands.
    SetOperation(SetOperationConfig),
    /// A native INSERT.
    Insert(ModificationConfig),
    /// An UPDATE, optionally emulating joins.
    Update(UpdateConfig),
    /// A DELETE, optionally emulating joins.
    Delete(DeleteConfig),
    /// An INSERT into a collection join table.
    CollectionInsert(CollectionInsertConfig),
    /// An UPDATE of a collection join table.
    CollectionUpdate(CollectionUpdateConfig),
    /// A DELETE from a collection join table.
    CollectionDelete(CollectionDeleteConfig),
}

impl SpecVariant {
    /// The statement kind the variant produces.
    pub fn statement_type(&self) -> StatementType {
        match self {
            Self::Select | Self::SetOperation(_) => StatementType::Select,
            Self::Insert(_) | Self::CollectionInsert(_) => StatementType::Insert,
            Self::Update(_) | Self::CollectionUpdate(_) => StatementType::Update,
            Self::Delete(_) | Self::CollectionDelete(_) => StatementType::Delete,
        }
    }

    /// A short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::SetOperation(_) => "set_operation",
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::CollectionInsert(_) => "collection_insert",
            Self::CollectionUpdate(_) => "collection_update",
            Self::CollectionDelete(_) => "collection_delete",
        }
    }

    /// The modification settings, for modification variants.
    pub fn modification(&self) -> Option<&ModificationConfig> {
        match self {
            Self::Select | Self::SetOperation(_) => None,
            Self::Insert(config) => Some(config),
            Self::Update(config) => Some(&config.modification),
            Self::Delete(config) => Some(&config.modification),
            Self::CollectionInsert(config) => Some(&config.modification),
            Self::CollectionUpdate(config) => Some(&config.modification),
            Self::CollectionDelete(config) => Some(&config.modification),
        }
    }

    /// Whether the variant returns rows from a modification.
    pub fn is_returning(&self) -> bool {
        self.modification()
            .is_some_and(|config| config.returning.is_some())
    }

    fn write_fingerprint(&self, fingerprint: &mut FingerprintBuilder) {
        fingerprint.tag(self.name());
        if let Self::SetOperation(config) = self {
            for operand in &config.operands {
                operand.write_fingerprint(fingerprint);
            }
        }
        if let Some(example) = self
            .modification()
            .and_then(|config| config.example_statement.as_ref())
        {
            fingerprint.version(example.version());
        }
    }
}

/// Inputs shared by every variant.
#[derive(Debug, Clone)]
pub struct SpecInputs {
    pub(crate) base: StatementRef,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) limit: Option<String>,
    pub(crate) offset: Option<String>,
    pub(crate) key_restricted_left_join_aliases: Vec<String>,
    pub(crate) entity_functions: Vec<EntityFunctionNode>,
    pub(crate) recursive: bool,
    pub(crate) render_ctes: bool,
    pub(crate) ctes: Vec<Arc<CteNode>>,
}

impl SpecInputs {
    /// The base statement.
    pub fn base(&self) -> &StatementRef {
        &self.base
    }

    /// Declared logical parameters.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// LIMIT text.
    pub fn limit(&self) -> Option<&str> {
        self.limit.as_deref()
    }

    /// OFFSET text.
    pub fn offset(&self) -> Option<&str> {
        self.offset.as_deref()
    }

    /// Entity aliases whose left joins are rewritten into subqueries.
    pub fn key_restricted_left_join_aliases(&self) -> &[String] {
        &self.key_restricted_left_join_aliases
    }

    /// Entity function nodes.
    pub fn entity_functions(&self) -> &[EntityFunctionNode] {
        &self.entity_functions
    }

    /// Whether the WITH clause is recursive: requested on the builder or
    /// implied by a CTE with a recursive body.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether CTEs are rendered at all.
    pub fn render_ctes(&self) -> bool {
        self.render_ctes
    }

    /// Declared CTE nodes.
    pub fn ctes(&self) -> &[Arc<CteNode>] {
        &self.ctes
    }
}

/// The result of composing a specification.
#[derive(Debug, Clone)]
pub struct Composition {
    /// Final SQL.
    pub sql: String,
    /// Statements to bind parameters on, in binding order.
    pub participants: Vec<StatementRef>,
    /// CTEs generated by the dialect or cascades, for an enclosing query.
    pub added_ctes: IndexMap<String, String>,
    /// The statement the SQL is executed through.
    pub executing_statement: StatementRef,
    /// Statement kind.
    pub statement_type: StatementType,
    /// Columns returned by a modification.
    pub returning_columns: Vec<String>,
}

/// A composable query over a provider statement.
pub struct QuerySpecification {
    context: SpecContext,
    inputs: SpecInputs,
    variant: SpecVariant,
    list_parameters: Mutex<IndexMap<SmolStr, Option<Vec<Value>>>>,
    cache: Mutex<Option<(Fingerprint, Arc<Composition>)>>,
}

impl fmt::Debug for QuerySpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpecification")
            .field("variant", &self.variant.name())
            .field("base", &self.inputs.base)
            .field("ctes", &self.inputs.ctes.len())
            .finish_non_exhaustive()
    }
}

impl QuerySpecification {
    /// Start building a specification over `base`.
    pub fn builder(context: SpecContext, base: StatementRef) -> QuerySpecificationBuilder {
        QuerySpecificationBuilder::new(context, base)
    }

    /// The collaborators.
    pub fn context(&self) -> &SpecContext {
        &self.context
    }

    /// The shared inputs.
    pub fn inputs(&self) -> &SpecInputs {
        &self.inputs
    }

    /// The variant.
    pub fn variant(&self) -> &SpecVariant {
        &self.variant
    }

    /// The statement kind.
    pub fn statement_type(&self) -> StatementType {
        self.variant.statement_type()
    }

    /// The base statement.
    pub fn base_statement(&self) -> &StatementRef {
        &self.inputs.base
    }

    /// Declared logical parameters.
    pub fn parameters(&self) -> &[Parameter] {
        &self.inputs.parameters
    }

    /// Whether `name` is a declared list parameter.
    pub fn is_list_parameter(&self, name: &str) -> bool {
        self.list_parameters.lock().contains_key(name)
    }

    /// The composed SQL.
    pub fn sql(&self) -> QueryResult<String> {
        Ok(self.composition()?.sql.clone())
    }

    /// Statements that must be bound before execution, in binding order.
    pub fn participating_statements(&self) -> QueryResult<Vec<StatementRef>> {
        Ok(self.composition()?.participants.clone())
    }

    /// CTEs generated during composition, for an enclosing query.
    pub fn added_ctes(&self) -> QueryResult<IndexMap<String, String>> {
        Ok(self.composition()?.added_ctes.clone())
    }

    /// The current composition, recomposing when the inputs changed.
    pub fn composition(&self) -> QueryResult<Arc<Composition>> {
        let fingerprint = self.fingerprint();
        if let Some((cached, composition)) = &*self.cache.lock() {
            if *cached == fingerprint {
                tracing::trace!(kind = self.variant.name(), "composition cache hit");
                return Ok(Arc::clone(composition));
            }
        }
        tracing::trace!(kind = self.variant.name(), "composition cache miss");

        let list_parameters = self.list_parameters.lock().clone();
        let context = ComposeContext {
            dialect: self.context.dialect.as_ref(),
            provider: self.context.provider.as_ref(),
            list_parameters: &list_parameters,
        };
        let composition = Arc::new(compose(&self.variant, &self.inputs, &context)?);
        tracing::debug!(
            kind = self.variant.name(),
            ctes = self.inputs.ctes.len(),
            participants = composition.participants.len(),
            sql_len = composition.sql.len(),
            "composed query"
        );
        *self.cache.lock() = Some((fingerprint, Arc::clone(&composition)));
        Ok(composition)
    }

    /// Record a new value for a list parameter.
    ///
    /// Returns whether the cardinality changed, counting the first value as a
    /// change. Names that are not declared list parameters are ignored.
    pub fn on_collection_parameter_change(&self, name: &str, values: &[Value]) -> bool {
        let mut list_parameters = self.list_parameters.lock();
        match list_parameters.get_mut(name) {
            Some(current) => {
                let changed = current.as_ref().map(Vec::len) != Some(values.len());
                *current = Some(values.to_vec());
                changed
            }
            None => false,
        }
    }

    /// Whether the next access recomposes.
    pub fn is_dirty(&self) -> bool {
        let fingerprint = self.fingerprint();
        self.cache
            .lock()
            .as_ref()
            .is_none_or(|(cached, _)| *cached != fingerprint)
    }

    /// Fingerprint of the inputs the composition depends on.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut fingerprint = Fingerprint::builder();
        fingerprint.version(self.inputs.base.version());
        for (name, values) in self.list_parameters.lock().iter() {
            fingerprint.tag(name);
            match values {
                Some(values) => fingerprint.cardinality(values.len()),
                None => fingerprint.tag("unset"),
            };
        }
        for node in &self.inputs.ctes {
            node.write_fingerprint(&mut fingerprint);
        }
        for node in &self.inputs.entity_functions {
            if let Some(statement) = node.value_statement() {
                fingerprint.version(statement.version());
            }
        }
        self.variant.write_fingerprint(&mut fingerprint);
        fingerprint.finish()
    }

    /// A plan returning rows: a select, or a modification with RETURNING.
    pub fn create_select_plan(
        &self,
        executor: Arc<dyn QueryExecutor>,
        first_result: usize,
        max_results: Option<usize>,
    ) -> QueryResult<SelectQueryPlan> {
        let returning = self.variant.is_returning();
        if self.statement_type().is_modification() && !returning {
            return Err(QueryError::unsupported("create_select_plan"));
        }
        Ok(SelectQueryPlan::new(
            self.composition()?,
            executor,
            first_result,
            max_results,
            returning,
        ))
    }

    /// A plan returning the update count of a modification.
    pub fn create_modification_plan(
        &self,
        executor: Arc<dyn QueryExecutor>,
        first_result: usize,
        max_results: Option<usize>,
    ) -> QueryResult<ModificationQueryPlan> {
        if !self.statement_type().is_modification() {
            return Err(QueryError::unsupported("create_modification_plan"));
        }
        Ok(ModificationQueryPlan::new(
            self.composition()?,
            executor,
            first_result,
            max_results,
        ))
    }

    /// A plan returning the update count and the returned rows.
    pub fn create_returning_plan(
        &self,
        executor: Arc<dyn QueryExecutor>,
    ) -> QueryResult<ReturningQueryPlan> {
        if !self.variant.is_returning() {
            return Err(QueryError::unsupported("create_returning_plan"));
        }
        Ok(ReturningQueryPlan::new(self.composition()?, executor))
    }
}

impl CompositeQuery for QuerySpecification {
    fn composed_sql(&self) -> QueryResult<String> {
        self.sql()
    }

    fn participating_statements(&self) -> QueryResult<Vec<StatementRef>> {
        QuerySpecification::participating_statements(self)
    }

    fn fingerprint(&self) -> Fingerprint {
        QuerySpecification::fingerprint(self)
    }
}

/// Builder for [`QuerySpecification`].
#[derive(Debug)]
pub struct QuerySpecificationBuilder {
    context: SpecContext,
    base: StatementRef,
    parameters: Vec<Parameter>,
    list_parameters: IndexMap<SmolStr, Option<Vec<Value>>>,
    limit: Option<String>,
    offset: Option<String>,
    key_restricted_left_join_aliases: Vec<String>,
    entity_functions: Vec<EntityFunctionNode>,
    recursive: bool,
    render_ctes: bool,
    ctes: Vec<Arc<CteNode>>,
    variant: SpecVariant,
}

impl QuerySpecificationBuilder {
    /// Create a builder for a plain select over `base`.
    pub fn new(context: SpecContext, base: StatementRef) -> Self {
        Self {
            context,
            base,
            parameters: Vec::new(),
            list_parameters: IndexMap::new(),
            limit: None,
            offset: None,
            key_restricted_left_join_aliases: Vec::new(),
            entity_functions: Vec::new(),
            recursive: false,
            render_ctes: true,
            ctes: Vec::new(),
            variant: SpecVariant::Select,
        }
    }

    /// Declare a logical parameter.
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Declare several logical parameters.
    pub fn parameters<I>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = Parameter>,
    {
        self.parameters.extend(parameters);
        self
    }

    /// Mark a declared parameter as a list parameter.
    pub fn list_parameter(mut self, name: impl Into<SmolStr>) -> Self {
        self.list_parameters.insert(name.into(), None);
        self
    }

    /// Set the LIMIT text, e.g. `?` or `10`.
    pub fn limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Set the OFFSET text.
    pub fn offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    /// Rewrite the left join of `entity_alias` into a subquery join.
    pub fn key_restricted_left_join(mut self, entity_alias: impl Into<String>) -> Self {
        self.key_restricted_left_join_aliases.push(entity_alias.into());
        self
    }

    /// Add an entity function node.
    pub fn entity_function(mut self, node: EntityFunctionNode) -> Self {
        self.entity_functions.push(node);
        self
    }

    /// Add a CTE node.
    pub fn cte(mut self, node: impl Into<Arc<CteNode>>) -> Self {
        self.ctes.push(node.into());
        self
    }

    /// Render the WITH clause as recursive even when no CTE has a recursive
    /// body.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Whether CTEs are rendered (default true).
    pub fn render_ctes(mut self, render_ctes: bool) -> Self {
        self.render_ctes = render_ctes;
        self
    }

    /// Set the variant.
    pub fn variant(mut self, variant: SpecVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Build the specification.
    pub fn build(self) -> QueryResult<QuerySpecification> {
        for name in self.list_parameters.keys() {
            if !self.parameters.iter().any(|p| p.name() == name.as_str()) {
                return Err(QueryError::unknown_parameter(name.as_str())
                    .with_context("declare list parameter"));
            }
        }
        match &self.variant {
            SpecVariant::SetOperation(config) if config.operands.is_empty() => {
                return Err(QueryError::invalid_config(
                    "A set operation requires at least one operand",
                ));
            }
            SpecVariant::CollectionDelete(config) if config.inverse => {
                return Err(QueryError::new(
                    ErrorCode::UnsupportedOperation,
                    "Deleting inverse collections is not supported!",
                ));
            }
            _ => {}
        }

        Ok(QuerySpecification {
            context: self.context,
            inputs: SpecInputs {
                base: self.base,
                parameters: self.parameters,
                limit: self.limit,
                offset: self.offset,
                key_restricted_left_join_aliases: self.key_restricted_left_join_aliases,
                entity_functions: self.entity_functions,
                recursive: self.recursive || self.ctes.iter().any(|node| node.is_recursive()),
                render_ctes: self.render_ctes,
                ctes: self.ctes,
            },
            variant: self.variant,
            list_parameters: Mutex::new(self.list_parameters),
            cache: Mutex::new(None),
        })
    }
}
