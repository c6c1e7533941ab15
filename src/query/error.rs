//! Query compilation errors.

use serde::Serialize;

use crate::graph::GraphError;

pub type CompileResult<T> = Result<T, CompileError>;

/// Errors returned by [`compile`](super::compile). Compilation has no side
/// effects, so every error leaves the catalog and stores untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown member '{member}': {reason}")]
    UnknownField { member: String, reason: String },

    #[error("unknown cube '{0}'")]
    UnknownCube(String),

    #[error("no join path from '{from}' to '{to}'")]
    NoPath { from: String, to: String },

    #[error("'{cube}' is only reachable through aliases {}; query one of them instead", .aliases.join(", "))]
    AmbiguousJoin { cube: String, aliases: Vec<String> },

    #[error("operator '{operator}' is not supported for '{member}'")]
    UnsupportedFilterOperator { member: String, operator: String },

    #[error("invalid filter on '{member}': {message}")]
    InvalidFilterValue { member: String, message: String },

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("invalid granularity '{0}'")]
    InvalidGranularity(String),

    #[error("query requests no measures, dimensions or time dimensions")]
    EmptyQuery,
}

/// Category of a [`CompileError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompileErrorKind {
    UnknownField,
    UnknownCube,
    NoPath,
    AmbiguousJoin,
    UnsupportedFilterOperator,
    InvalidFilterValue,
    InvalidDateRange,
    InvalidGranularity,
    EmptyQuery,
}

impl CompileError {
    pub fn kind(&self) -> CompileErrorKind {
        match self {
            CompileError::UnknownField { .. } => CompileErrorKind::UnknownField,
            CompileError::UnknownCube(_) => CompileErrorKind::UnknownCube,
            CompileError::NoPath { .. } => CompileErrorKind::NoPath,
            CompileError::AmbiguousJoin { .. } => CompileErrorKind::AmbiguousJoin,
            CompileError::UnsupportedFilterOperator { .. } => {
                CompileErrorKind::UnsupportedFilterOperator
            }
            CompileError::InvalidFilterValue { .. } => CompileErrorKind::InvalidFilterValue,
            CompileError::InvalidDateRange(_) => CompileErrorKind::InvalidDateRange,
            CompileError::InvalidGranularity(_) => CompileErrorKind::InvalidGranularity,
            CompileError::EmptyQuery => CompileErrorKind::EmptyQuery,
        }
    }

    pub(crate) fn unknown_field(member: &str, reason: impl Into<String>) -> Self {
        CompileError::UnknownField {
            member: member.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(member: &str, message: impl Into<String>) -> Self {
        CompileError::InvalidFilterValue {
            member: member.into(),
            message: message.into(),
        }
    }
}

impl From<GraphError> for CompileError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::UnknownCube(name) => CompileError::UnknownCube(name),
            GraphError::NoPath { from, to } => CompileError::NoPath { from, to },
            GraphError::AmbiguousJoin { cube, aliases } => {
                CompileError::AmbiguousJoin { cube, aliases }
            }
        }
    }
}
