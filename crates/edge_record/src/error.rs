//! Error types for field access and field-path parsing.

use crate::field::FieldType;
use thiserror::Error;

/// A field path that failed to parse.
///
/// `position` is the byte offset of the offending character in `path`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field path '{path}' at position {position}: {reason}")]
pub struct FieldPathError {
    pub path: String,
    pub position: usize,
    pub reason: String,
}

impl FieldPathError {
    pub(crate) fn new(path: &str, position: usize, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            position,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error(transparent)]
    Path(#[from] FieldPathError),

    #[error("cannot convert {from} value '{value}' to {to}")]
    Conversion {
        from: FieldType,
        to: FieldType,
        value: String,
    },

    #[error("{field_type} field has a null value")]
    NullValue { field_type: FieldType },

    #[error("missing parent for field path '{path}'")]
    MissingParent { path: String },

    #[error("cannot navigate field path '{path}': {reason}")]
    InvalidStep { path: String, reason: String },

    #[error("list index {index} out of bounds for field path '{path}' (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("wildcards are not allowed in field path '{path}'")]
    WildcardNotAllowed { path: String },

    #[error("invalid field JSON: {0}")]
    InvalidJson(String),
}

impl RecordError {
    pub(crate) fn conversion(from: FieldType, to: FieldType, value: impl ToString) -> Self {
        Self::Conversion {
            from,
            to,
            value: value.to_string(),
        }
    }
}
