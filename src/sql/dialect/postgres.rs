//! PostgreSQL SQL dialect.
//!
//! Everything the compiler emits is ANSI here, so only the name differs
//! from the trait defaults.

use super::SqlDialect;

#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }
}
