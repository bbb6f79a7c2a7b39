//! Provider statement handles and logical parameters.
//!
//! A [`Statement`] is an opaque handle owned by the persistence provider. The
//! engine never creates or closes statements; it only reads their parameter
//! names, replays parameter values onto them and asks the provider for their
//! SQL. Statements that are themselves composed queries expose that through
//! [`Statement::composite`] so binding can descend into them without any
//! runtime type inspection.

use chrono::NaiveDateTime;
use smol_str::SmolStr;
use std::fmt;
use std::sync::Arc;

use crate::error::QueryResult;
use crate::spec::Fingerprint;
use crate::value::{TemporalType, Value};

/// Shared handle to a provider statement.
pub type StatementRef = Arc<dyn Statement>;

/// A provider-native prepared statement.
pub trait Statement: Send + Sync + fmt::Debug {
    /// Names of the parameters this statement declares.
    fn parameter_names(&self) -> Vec<SmolStr>;

    /// Bind a value to a named parameter.
    fn set_parameter(&self, name: &str, value: Value) -> QueryResult<()>;

    /// Bind a temporal value with the given precision.
    fn set_temporal_parameter(
        &self,
        name: &str,
        value: NaiveDateTime,
        temporal: TemporalType,
    ) -> QueryResult<()> {
        self.set_parameter(name, temporal.apply(value))
    }

    /// Version of the statement's SQL shape.
    ///
    /// Providers bump this whenever the SQL they would generate changes for a
    /// reason the engine cannot observe. It is part of the composition cache key.
    fn version(&self) -> u64 {
        0
    }

    /// Composite capability, present when this statement wraps a composed query.
    fn composite(&self) -> Option<&dyn CompositeQuery> {
        None
    }
}

/// A query composed from several provider statements.
pub trait CompositeQuery: Send + Sync {
    /// The final composed SQL.
    fn composed_sql(&self) -> QueryResult<String>;

    /// Statements that must receive parameter values before execution.
    fn participating_statements(&self) -> QueryResult<Vec<StatementRef>>;

    /// Fingerprint of the inputs the composed SQL depends on.
    fn fingerprint(&self) -> Fingerprint;
}

/// Identity comparison for statement handles.
#[inline]
pub fn same_statement(a: &StatementRef, b: &StatementRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Append `statement` unless the very same handle is already present.
pub(crate) fn push_unique(participants: &mut Vec<StatementRef>, statement: StatementRef) {
    if !participants.iter().any(|p| same_statement(p, &statement)) {
        participants.push(statement);
    }
}

/// Declared type of a logical parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// Accepts anything.
    Any,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Floating point.
    Float,
    /// Text.
    String,
    /// Date, time or timestamp.
    Temporal,
    /// JSON document.
    Json,
    /// Collection of values.
    Collection,
}

impl ParameterType {
    /// Whether a parameter of this type can be read as `target`.
    pub fn is_assignable_to(self, target: ParameterType) -> bool {
        self == target || target == Self::Any || (self == Self::Int && target == Self::Float)
    }

    /// Infer the type of a bound value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Any,
            Value::Bool(_) => Self::Bool,
            Value::Int(_) => Self::Int,
            Value::Float(_) => Self::Float,
            Value::String(_) => Self::String,
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => Self::Temporal,
            Value::Json(_) => Self::Json,
            Value::List(_) => Self::Collection,
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Temporal => "temporal",
            Self::Json => "json",
            Self::Collection => "collection",
        };
        f.write_str(name)
    }
}

/// A logical parameter declared by a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    name: SmolStr,
    parameter_type: ParameterType,
}

impl Parameter {
    /// Create a new parameter accepting any value.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            parameter_type: ParameterType::Any,
        }
    }

    /// Create a new parameter with a declared type.
    pub fn typed(name: impl Into<SmolStr>, parameter_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            parameter_type,
        }
    }

    /// The parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared type.
    pub fn parameter_type(&self) -> ParameterType {
        self.parameter_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignability() {
        assert!(ParameterType::Int.is_assignable_to(ParameterType::Float));
        assert!(ParameterType::Json.is_assignable_to(ParameterType::Any));
        assert!(!ParameterType::String.is_assignable_to(ParameterType::Int));
    }

    #[test]
    fn test_type_inference() {
        assert_eq!(ParameterType::of(&Value::from(vec![1])), ParameterType::Collection);
        assert_eq!(ParameterType::of(&Value::from("a")), ParameterType::String);
    }
}
