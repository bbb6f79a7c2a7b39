//! Value binders capture a parameter set-call so it can be replayed onto
//! every statement that declares the parameter.

use chrono::NaiveDateTime;
use smol_str::SmolStr;

use crate::error::{QueryError, QueryResult};
use crate::statement::Statement;
use crate::value::{TemporalType, Value};

/// A captured parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueBinder {
    /// A plain value.
    Plain(Value),
    /// A timestamp bound with a given precision.
    Temporal {
        /// The raw timestamp.
        value: NaiveDateTime,
        /// The precision the statement receives.
        precision: TemporalType,
    },
}

impl ValueBinder {
    /// Replay the captured value onto `statement`.
    pub fn bind(&self, statement: &dyn Statement, name: &str) -> QueryResult<()> {
        match self {
            Self::Plain(value) => statement.set_parameter(name, value.clone()),
            Self::Temporal { value, precision } => {
                statement.set_temporal_parameter(name, *value, *precision)
            }
        }
    }

    /// The value as the statement would see it.
    pub fn value(&self) -> Value {
        match self {
            Self::Plain(value) => value.clone(),
            Self::Temporal { value, precision } => precision.apply(*value),
        }
    }
}

/// Binds a collection into the fixed-size placeholder grid of a VALUES clause.
///
/// Row `r`, column `c` is bound through `parameter_names[r][c]`. Rows beyond
/// the bound collection are filled with nulls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesParameterBinder {
    parameter_names: Vec<Vec<SmolStr>>,
}

impl ValuesParameterBinder {
    /// Create a binder over an explicit name grid.
    pub fn new(parameter_names: Vec<Vec<SmolStr>>) -> Self {
        Self { parameter_names }
    }

    /// Generate the grid `<prefix>_<row>_<column>` for the given dimensions.
    pub fn generate(prefix: &str, rows: usize, columns: usize) -> Self {
        let parameter_names = (0..rows)
            .map(|row| {
                (0..columns)
                    .map(|column| SmolStr::new(format!("{}_{}_{}", prefix, row, column)))
                    .collect()
            })
            .collect();
        Self { parameter_names }
    }

    /// Row capacity of the VALUES clause.
    pub fn size(&self) -> usize {
        self.parameter_names.len()
    }

    /// Number of columns per row.
    pub fn columns(&self) -> usize {
        self.parameter_names.first().map_or(0, Vec::len)
    }

    /// Every physical parameter name, row by row.
    pub fn parameter_names(&self) -> impl Iterator<Item = &SmolStr> {
        self.parameter_names.iter().flatten()
    }

    /// Whether `name` is one of the physical parameter names.
    pub fn contains(&self, name: &str) -> bool {
        self.parameter_names().any(|n| n == name)
    }

    /// Bind `values` into `statement`, null-padding unused rows.
    pub fn bind(&self, statement: &dyn Statement, values: &[Value]) -> QueryResult<()> {
        crate::sqlweave_trace!(rows = values.len(), capacity = self.size(), "binding VALUES rows");
        for (row, names) in self.parameter_names.iter().enumerate() {
            match values.get(row) {
                Some(Value::List(columns)) => {
                    for (column, name) in names.iter().enumerate() {
                        let value = columns.get(column).cloned().unwrap_or(Value::Null);
                        statement.set_parameter(name, value)?;
                    }
                }
                Some(scalar) => {
                    for (column, name) in names.iter().enumerate() {
                        let value = if column == 0 { scalar.clone() } else { Value::Null };
                        statement.set_parameter(name, value)?;
                    }
                }
                None => {
                    for name in names {
                        statement.set_parameter(name, Value::Null)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// A named parameter bound to a multi-row VALUES clause.
#[derive(Debug, Clone)]
pub struct ValuesParameter {
    name: SmolStr,
    binder: ValuesParameterBinder,
    value: Option<Vec<Value>>,
}

impl ValuesParameter {
    /// Create a new unbound VALUES parameter.
    pub fn new(name: impl Into<SmolStr>, binder: ValuesParameterBinder) -> Self {
        Self {
            name: name.into(),
            binder,
            value: None,
        }
    }

    /// The logical parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The placeholder binder.
    pub fn binder(&self) -> &ValuesParameterBinder {
        &self.binder
    }

    /// The bound collection, if any.
    pub fn value(&self) -> Option<&[Value]> {
        self.value.as_deref()
    }

    /// Set the collection, validating shape and capacity.
    pub fn set_value(&mut self, value: Value) -> QueryResult<()> {
        match value {
            Value::Null => Err(QueryError::invalid_value(
                self.name.as_str(),
                "null not allowed for VALUES parameter!",
            )),
            Value::List(values) => {
                if values.len() > self.binder.size() {
                    return Err(QueryError::invalid_value(
                        self.name.as_str(),
                        "The size of the collection must be lower or equal to the specified size for the VALUES clause.",
                    ));
                }
                self.value = Some(values);
                Ok(())
            }
            other => Err(QueryError::invalid_value(
                self.name.as_str(),
                format!(
                    "Value for VALUES parameter must be a collection! Unsupported type: {}",
                    other.type_name()
                ),
            )),
        }
    }

    /// Bind the collection into `statement`.
    pub fn bind(&self, statement: &dyn Statement) -> QueryResult<()> {
        match &self.value {
            Some(values) => self.binder.bind(statement, values),
            None => Err(QueryError::invalid_value(
                self.name.as_str(),
                format!("No values are bound for parameter with name: {}", self.name),
            )),
        }
    }
}
