//! Refresh errors. Each is scoped to one pre-aggregation key.

use thiserror::Error;

use super::state::RefreshState;
use crate::cache::CacheError;
use crate::driver::DriverError;
use crate::query::CompileError;

pub type RefreshResult<T> = Result<T, RefreshError>;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("unknown pre-aggregation '{0}'")]
    UnknownPreAggregation(String),

    #[error("pre-aggregation '{0}' is already refreshing")]
    AlreadyRefreshing(String),

    #[error("invalid refresh transition for '{key}': {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: RefreshState,
        to: RefreshState,
    },

    #[error("materialization query failed to compile: {0}")]
    Compile(#[from] CompileError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("failed to persist rowset: {0}")]
    Persist(#[from] CacheError),
}
