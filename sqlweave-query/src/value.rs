//! Parameter values replayed onto provider statements.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound to a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// Date without time.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Date and time.
    Timestamp(NaiveDateTime),
    /// JSON value.
    Json(serde_json::Value),
    /// Collection of values, bound to list and VALUES parameters.
    List(Vec<Value>),
}

impl Value {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the elements if this is a collection.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    /// Number of elements for collections, `None` for scalars.
    pub fn cardinality(&self) -> Option<usize> {
        self.as_list().map(<[Value]>::len)
    }

    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Precision of a temporal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalType {
    /// Date only.
    Date,
    /// Time of day only, whole seconds.
    Time,
    /// Full timestamp.
    Timestamp,
}

impl TemporalType {
    /// Truncate a timestamp to this precision.
    pub fn apply(self, value: NaiveDateTime) -> Value {
        match self {
            Self::Date => Value::Date(value.date()),
            Self::Time => {
                let time = value.time();
                Value::Time(time.with_nanosecond(0).unwrap_or(time))
            }
            Self::Timestamp => Value::Timestamp(value),
        }
    }
}

impl fmt::Display for TemporalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date => write!(f, "DATE"),
            Self::Time => write!(f, "TIME"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_milli_opt(14, 5, 30, 250)
            .unwrap()
    }

    #[test]
    fn test_list_cardinality() {
        let value = Value::from(vec![1, 2, 3]);
        assert_eq!(value.cardinality(), Some(3));
        assert_eq!(Value::from(1).cardinality(), None);
    }

    #[test]
    fn test_temporal_truncation() {
        assert_eq!(
            TemporalType::Date.apply(sample()),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
        );
        assert_eq!(
            TemporalType::Time.apply(sample()),
            Value::Time(NaiveTime::from_hms_opt(14, 5, 30).unwrap())
        );
        assert_eq!(TemporalType::Timestamp.apply(sample()), Value::Timestamp(sample()));
    }

    #[test]
    fn test_option_conversion() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
