//! The database collaborator: executes SQL and returns JSON-valued rows.
//!
//! Connection management lives outside this crate. [`StaticDriver`] answers
//! from canned results for tests and offline checks.

mod error;
mod fixed;

pub use error::{DriverError, DriverResult};
pub use fixed::StaticDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A result set: column names and positional rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Build from JSON objects. Columns are the first row's keys in sorted
    /// order; keys missing from later rows read as null.
    pub fn from_objects(objects: Vec<Map<String, Value>>) -> Self {
        let columns: Vec<String> = objects
            .first()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        let rows = objects
            .iter()
            .map(|o| {
                columns
                    .iter()
                    .map(|c| o.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at `row`, column `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let i = self.column_index(name)?;
        self.rows.get(row)?.get(i)
    }

    /// Rows as objects keyed by column name.
    pub fn to_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// First column of the first row, the shape of a refresh-key query.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first()?.first()
    }
}

/// Executes SQL against the warehouse.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(&self, sql: &str) -> DriverResult<QueryResult>;
}
