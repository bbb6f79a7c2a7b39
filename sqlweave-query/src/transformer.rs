//! Parameter value transformers.
//!
//! A transformer reshapes a value passed to `set_parameter` before it is
//! captured, e.g. to turn entities into ids or to normalize a collection.

use std::fmt;

use crate::error::QueryResult;
use crate::value::Value;

/// Reshapes a parameter value before it is bound.
pub trait ParameterValueTransformer: Send + Sync {
    /// Transform `value`.
    fn transform(&self, value: Value) -> QueryResult<Value>;
}

impl<F> ParameterValueTransformer for F
where
    F: Fn(Value) -> QueryResult<Value> + Send + Sync,
{
    fn transform(&self, value: Value) -> QueryResult<Value> {
        self(value)
    }
}

/// Applies a transformer to every element of a collection, or to a scalar.
pub struct Elementwise<T>(pub T);

impl<T: ParameterValueTransformer> ParameterValueTransformer for Elementwise<T> {
    fn transform(&self, value: Value) -> QueryResult<Value> {
        match value {
            Value::List(values) => values
                .into_iter()
                .map(|v| self.0.transform(v))
                .collect::<QueryResult<Vec<_>>>()
                .map(Value::List),
            scalar => self.0.transform(scalar),
        }
    }
}

impl<T> fmt::Debug for Elementwise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Elementwise")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;

    fn double(value: Value) -> QueryResult<Value> {
        match value {
            Value::Int(i) => Ok(Value::Int(i * 2)),
            other => Err(QueryError::invalid_value("ids", format!("Cannot double {}", other.type_name()))),
        }
    }

    #[test]
    fn test_closure_transformer() {
        let upper = |value: Value| -> QueryResult<Value> {
            match value {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Ok(other),
            }
        };
        assert_eq!(upper.transform(Value::from("abc")).unwrap(), Value::from("ABC"));
    }

    #[test]
    fn test_elementwise() {
        let transformer = Elementwise(double);
        assert_eq!(
            transformer
                .transform(Value::List(vec![Value::Int(1), Value::Int(2)]))
                .unwrap(),
            Value::List(vec![Value::Int(2), Value::Int(4)])
        );
        assert_eq!(transformer.transform(Value::Int(3)).unwrap(), Value::Int(6));
        assert!(transformer.transform(Value::List(vec![Value::from("x")])).is_err());
    }
}
