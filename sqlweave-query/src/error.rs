//! Error types for SQL composition, parameter binding and execution.
//!
//! Every failure carries an [`ErrorCode`] for programmatic handling plus an
//! [`ErrorContext`] with the operation, parameter and SQL fragment involved.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: S{category}{number}
//! - 1xxx: Parameter errors (unknown, missing, invalid value)
//! - 2xxx: Operation errors (wrong operation for the statement kind, result cardinality)
//! - 3xxx: SQL surgery errors (structural assumption violated)
//! - 4xxx: Dialect errors (unsupported capability)
//! - 5xxx: Collaborator errors (provider, executor)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use sqlweave_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::unknown_parameter("ids");
//! assert_eq!(err.code, ErrorCode::InvalidParameter);
//! assert_eq!(err.code.code(), "S1001");
//! assert!(err.to_string().contains("ids"));
//! ```
//!
//! No error produced by this crate is transient, so nothing is retryable.

use std::fmt;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Parameter errors (1xxx)
    /// Unknown parameter name, wrong type or positional access (S1001).
    InvalidParameter = 1001,
    /// Parameters left unbound at execution time (S1002).
    MissingParameter = 1002,
    /// Rejected parameter value (S1003).
    InvalidParameterValue = 1003,
    /// A second value transformer registered for one name (S1004).
    TransformerConflict = 1004,

    // Operation errors (2xxx)
    /// Operation not supported for the statement kind (S2001).
    UnsupportedOperation = 2001,
    /// Single result requested but none found (S2002).
    NoResult = 2002,
    /// Single result requested but several found (S2003).
    NotUnique = 2003,

    // SQL surgery errors (3xxx)
    /// An expected clause, alias or join was not found (S3001).
    StructuralViolation = 3001,
    /// Two text edits claim overlapping spans (S3002).
    OverlappingEdit = 3002,

    // Dialect errors (4xxx)
    /// The dialect lacks a required capability (S4001).
    UnsupportedDialectFeature = 4001,

    // Collaborator errors (5xxx)
    /// The SQL provider failed (S5001).
    ProviderError = 5001,
    /// The query executor failed (S5002).
    ExecutionError = 5002,

    // Configuration errors (7xxx)
    /// Invalid configuration (S7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (S7002).
    MissingConfiguration = 7002,

    // Internal errors (9xxx)
    /// Internal error (S9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "S1001").
    pub fn code(&self) -> String {
        format!("S{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "Invalid parameter reference",
            Self::MissingParameter => "Missing parameter binding",
            Self::InvalidParameterValue => "Invalid parameter value",
            Self::TransformerConflict => "Conflicting parameter transformer",
            Self::UnsupportedOperation => "Operation not supported",
            Self::NoResult => "No result",
            Self::NotUnique => "Result not unique",
            Self::StructuralViolation => "Unexpected SQL structure",
            Self::OverlappingEdit => "Overlapping SQL edits",
            Self::UnsupportedDialectFeature => "Unsupported dialect feature",
            Self::ProviderError => "SQL provider error",
            Self::ExecutionError => "Execution error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The parameter involved.
    pub parameter: Option<String>,
    /// The SQL text being rewritten (if available).
    pub sql: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur while composing, binding or executing a query.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the parameter name.
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.context.parameter = Some(parameter.into());
        self
    }

    /// Set the SQL text.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Create an error for a parameter name that is not declared.
    pub fn unknown_parameter(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::InvalidParameter,
            format!("Invalid or unknown parameter with name: {}", name),
        )
        .with_parameter(&name)
    }

    /// Create an error for positional parameter access.
    pub fn positional_unsupported() -> Self {
        Self::new(ErrorCode::InvalidParameter, "Positional parameters unsupported!")
            .with_suggestion("Use named parameters instead")
    }

    /// Create an error for a parameter that is not assignable to the requested type.
    pub fn not_assignable(name: impl Into<String>, type_name: impl fmt::Display) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::InvalidParameter,
            format!("Parameter '{}' is not assignable to '{}'!", name, type_name),
        )
        .with_parameter(&name)
    }

    /// Create an error listing every parameter left unbound.
    pub fn missing_parameters<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        Self::new(
            ErrorCode::MissingParameter,
            format!("The following parameters have not been set: [{}]", names.join(", ")),
        )
    }

    /// Create an error for a rejected parameter value.
    pub fn invalid_value(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameterValue, message).with_parameter(name)
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorCode::UnsupportedOperation,
            format!("{} is not supported for this operation", operation),
        )
        .with_context(&operation)
    }

    /// Create a structural violation error raised during SQL surgery.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StructuralViolation, message)
    }

    /// Create an unsupported dialect capability error.
    pub fn unsupported_dialect(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedDialectFeature, message)
    }

    /// Create a no result error.
    pub fn no_result() -> Self {
        Self::new(ErrorCode::NoResult, "No result found for query")
            .with_suggestion("Use get_single_result_or_null() to get None instead of an error")
    }

    /// Create a not unique error.
    pub fn not_unique(count: usize) -> Self {
        Self::new(
            ErrorCode::NotUnique,
            format!("Expected a single result but found {}", count),
        )
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderError, message)
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    // ============== Error Checks ==============

    /// Check if this is an invalid parameter reference.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidParameter | ErrorCode::InvalidParameterValue
        )
    }

    /// Check if this is a missing binding error.
    pub fn is_missing_parameter(&self) -> bool {
        self.code == ErrorCode::MissingParameter
    }

    /// Check if this is an unsupported operation error.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::UnsupportedOperation | ErrorCode::UnsupportedDialectFeature
        )
    }

    /// Check if this is a structural violation during SQL surgery.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::StructuralViolation | ErrorCode::OverlappingEdit | ErrorCode::Internal
        )
    }

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = format!("Error [{}]: {}\n", self.code.code(), self.message);

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  → While: {}\n", op));
        }
        if let Some(ref parameter) = self.context.parameter {
            output.push_str(&format!("  → Parameter: {}\n", parameter));
        }
        if let Some(ref sql) = self.context.sql {
            let sql_display = match sql.char_indices().nth(200) {
                Some((idx, _)) => format!("{}...", &sql[..idx]),
                None => sql.clone(),
            };
            output.push_str(&format!("  → SQL: {}\n", sql_display));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output
    }
}

/// Helper for creating errors with context.
#[macro_export]
macro_rules! query_error {
    ($code:expr, $msg:expr) => {
        $crate::error::QueryError::new($code, $msg)
    };
    ($code:expr, $msg:expr, $($key:ident = $value:expr),+ $(,)?) => {{
        let mut err = $crate::error::QueryError::new($code, $msg);
        $(
            err = err.$key($value);
        )+
        err
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::InvalidParameter.code(), "S1001");
        assert_eq!(ErrorCode::StructuralViolation.code(), "S3001");
        assert_eq!(ErrorCode::Internal.code(), "S9001");
    }

    #[test]
    fn test_missing_parameters_lists_all_names() {
        let err = QueryError::missing_parameters(["a", "b"]);
        assert!(err.is_missing_parameter());
        assert_eq!(
            err.message,
            "The following parameters have not been set: [a, b]"
        );
    }

    #[test]
    fn test_unknown_parameter() {
        let err = QueryError::unknown_parameter("ids");
        assert!(err.is_invalid_parameter());
        assert_eq!(err.context.parameter.as_deref(), Some("ids"));
        assert_eq!(err.to_string(), "[S1001] Invalid or unknown parameter with name: ids");
    }

    #[test]
    fn test_display_full() {
        let err = QueryError::structural("The left join for subquery rewriting could not be found!")
            .with_context("Rewriting key restricted left join")
            .with_sql("select * from a");

        let output = err.display_full();
        assert!(output.contains("S3001"));
        assert!(output.contains("While: Rewriting"));
        assert!(output.contains("SQL: select * from a"));
    }

    #[test]
    fn test_error_macro() {
        let err = query_error!(
            ErrorCode::InvalidParameterValue,
            "null not allowed for VALUES parameter!",
            with_parameter = "vals",
            with_suggestion = "Bind an empty collection instead"
        );

        assert_eq!(err.code, ErrorCode::InvalidParameterValue);
        assert_eq!(err.context.parameter, Some("vals".to_string()));
    }
}
