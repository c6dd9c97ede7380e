//! Variable resolution errors

use thiserror::Error;

/// Errors raised while resolving or writing a variable expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MemoryError {
    #[error("invalid variable expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("property '{property}' not found on {type_name}{}", crate::suggest::suggestion_suffix(.suggestion))]
    PropertyNotFound {
        property: String,
        type_name: String,
        suggestion: Option<String>,
    },

    #[error("method '{method}' not found on {type_name}{}", crate::suggest::suggestion_suffix(.suggestion))]
    MethodNotFound {
        method: String,
        type_name: String,
        suggestion: Option<String>,
    },

    #[error("no overload of '{method}' accepts {given} argument(s) of these types (expects {expected})")]
    InvalidArguments {
        method: String,
        given: usize,
        expected: String,
    },

    #[error("index {index} is out of range for '{expr}' (length {len})")]
    IndexOutOfRange {
        expr: String,
        index: usize,
        len: usize,
    },

    #[error("cannot index into {type_name} in '{expr}'")]
    NotIndexable { expr: String, type_name: String },

    #[error("cannot apply '{op}' to {left} and {right}")]
    Arithmetic {
        op: char,
        left: String,
        right: String,
    },

    #[error("invalid JSON path '{path}': {reason}")]
    JsonPath { path: String, reason: String },

    #[error("setting '{key}' is not set")]
    MissingSetting { key: String },
}

impl MemoryError {
    /// Stable key used by error handlers to match this error
    pub fn key(&self) -> &'static str {
        match self {
            MemoryError::InvalidExpression { .. } => "InvalidExpression",
            MemoryError::PropertyNotFound { .. } => "PropertyNotFound",
            MemoryError::MethodNotFound { .. } => "MethodNotFound",
            MemoryError::InvalidArguments { .. } => "InvalidArguments",
            MemoryError::IndexOutOfRange { .. } => "IndexOutOfRange",
            MemoryError::NotIndexable { .. } => "NotIndexable",
            MemoryError::Arithmetic { .. } => "Arithmetic",
            MemoryError::JsonPath { .. } => "JsonPath",
            MemoryError::MissingSetting { .. } => "MissingSetting",
        }
    }
}
