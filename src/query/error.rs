use thiserror::Error;

use super::expr::Op;

/// Structural error raised while turning filter JSON into an [`Expression`](super::Expression).
///
/// Every variant carries the dotted operator path of the offending node
/// (`$and.1.$gt`), so the caller can point at the exact spot in the input.
/// The root itself has an empty path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input is not valid JSON, or a node that must be an object is not one.
    #[error("malformed filter JSON at '{path}': {details}")]
    MalformedJson {
        /// Operator path of the node
        path: String,
        /// Parser or shape diagnostic
        details: String,
    },

    /// An object key that is not one of the recognised `$` operators.
    #[error("unknown filter operator '{operator}' at '{path}'")]
    UnknownOperator {
        /// Operator path of the parent node
        path: String,
        /// The key as written in the input
        operator: String,
    },

    /// An operator object or leaf payload without exactly one key.
    #[error("filter operator at '{path}' expects exactly one key, found {found}")]
    ArityMismatch {
        /// Operator path of the node
        path: String,
        /// Number of keys actually present
        found: usize,
    },

    /// A value whose JSON type is not accepted by its operator.
    #[error("filter operator at '{path}' expects {expected}, found {found}")]
    TypeMismatch {
        /// Operator path of the node
        path: String,
        /// Human readable description of the accepted types
        expected: &'static str,
        /// JSON type found in the input
        found: &'static str,
    },

    /// A numeric literal that could not be scanned.
    #[error("invalid numeric literal '{literal}' at '{path}'")]
    InvalidLiteral {
        /// Operator path of the node
        path: String,
        /// The offending substring
        literal: String,
    },

    /// Nesting beyond [`MAX_DEPTH`](super::parser::MAX_DEPTH).
    #[error("filter nesting at '{path}' exceeds the maximum depth of {limit}")]
    TooDeep {
        /// Operator path where the limit was crossed
        path: String,
        /// Configured limit
        limit: usize,
    },
}

impl ParseError {
    /// Operator path of the node that failed.
    pub fn path(&self) -> &str {
        match self {
            ParseError::MalformedJson { path, .. }
            | ParseError::UnknownOperator { path, .. }
            | ParseError::ArityMismatch { path, .. }
            | ParseError::TypeMismatch { path, .. }
            | ParseError::InvalidLiteral { path, .. }
            | ParseError::TooDeep { path, .. } => path,
        }
    }
}

/// Error raised while compiling an expression to SQL.
///
/// The compiler never wraps these: whatever a [`MappingContext`](super::MappingContext)
/// returns reaches the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Free-form failure reported by a caller-supplied mapping context.
    #[error("{0}")]
    Translation(String),

    /// The key is not exposed for filtering.
    #[error("field '{key}' is not queryable")]
    UnknownField {
        /// Key as written in the filter
        key: String,
    },

    /// The context cannot render this operator/value combination.
    #[error("operator '{op}' is not supported here: {reason}")]
    Unsupported {
        /// Operator that was rejected
        op: Op,
        /// Why it was rejected
        reason: String,
    },
}

/// NaN or an infinity offered where a filter value is built.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("float {0} is not finite")]
pub struct NonFiniteFloat(pub f64);

impl CompileError {
    /// Shorthand for [`CompileError::Translation`].
    pub fn translation(message: impl Into<String>) -> Self {
        CompileError::Translation(message.into())
    }
}
