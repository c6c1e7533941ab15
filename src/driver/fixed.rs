use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Driver, DriverError, DriverResult, QueryResult};

/// Answers from canned results matched by SQL substring; first match wins.
/// Unmatched SQL returns an empty result. Every statement is recorded.
#[derive(Debug, Default)]
pub struct StaticDriver {
    responses: Vec<(String, DriverResult<QueryResult>)>,
    delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
}

impl StaticDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, sql_contains: &str, result: QueryResult) -> Self {
        self.responses.push((sql_contains.into(), Ok(result)));
        self
    }

    pub fn with_error(mut self, sql_contains: &str, message: &str) -> Self {
        self.responses.push((
            sql_contains.into(),
            Err(DriverError::query_failed(message, sql_contains)),
        ));
        self
    }

    /// Sleep before answering, for deadline tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Driver for StaticDriver {
    async fn execute(&self, sql: &str) -> DriverResult<QueryResult> {
        match self.executed.lock() {
            Ok(mut log) => log.push(sql.to_string()),
            Err(poisoned) => poisoned.into_inner().push(sql.to_string()),
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok(QueryResult::default()))
    }
}
