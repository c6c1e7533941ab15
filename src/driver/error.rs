//! Driver errors.

use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by a [`Driver`](super::Driver). The engine never retries
/// them; retry policy belongs to the driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {message}")]
    QueryFailed { message: String, sql: String },

    #[error("malformed result: {0}")]
    MalformedResult(String),
}

impl DriverError {
    pub fn query_failed(message: impl Into<String>, sql: &str) -> Self {
        Self::QueryFailed {
            message: message.into(),
            sql: sql.into(),
        }
    }
}
