//! Query compilation: a [`QueryRequest`] against a [`Catalog`](crate::schema::Catalog)
//! becomes one SQL statement plus column metadata.

pub mod compiled;
pub mod compiler;
pub mod date_range;
pub mod error;
pub mod filters;
pub mod request;

pub use compiled::{
    member_alias, time_alias, ColumnInfo, ColumnKind, CompiledOrder, CompiledQuery,
    CompiledTimeDimension,
};
pub use compiler::{compile, compile_with_tree, CompileOptions, DEFAULT_LIMIT, MAX_LIMIT};
pub use date_range::DateBounds;
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use filters::{Condition, FilterNode, FilterOperator, FilterValue};
pub use request::{
    DateRange, Filter, MemberFilter, Order, OrderDirection, QueryRequest, TimeDimensionRequest,
};
