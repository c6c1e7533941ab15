//! SQL generation module.
//!
//! A type-safe SQL builder emitting DuckDB or PostgreSQL:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;

pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    and_all, avg, case_when, col, count, count_distinct, count_star, date_trunc, func, lit_bool,
    lit_float, lit_int, lit_null, lit_str, lit_timestamp, max, min, or_all, raw_sql, star, sum,
    table_col, BinaryOperator, Expr, ExprExt, Literal, UnaryOperator,
};
pub use query::{Join, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, TableRef, TableSource};
pub use token::{Token, TokenStream};
