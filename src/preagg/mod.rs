//! Pre-aggregations: materialization, matching and scheduled refresh.
//!
//! ```text
//! RefreshScheduler ──materialization SQL──▶ Driver ──rows──▶ PreAggStore
//!                                                               │
//! CompiledQuery ──match_materialized──▶ PreAggMatch ──RollupPlan::execute──▶ rows
//! ```

pub mod error;
pub mod matcher;
pub mod rollup;
pub mod scheduler;
pub mod state;
pub mod store;

pub use error::{RefreshError, RefreshResult};
pub use matcher::{candidates, find_match, match_materialized, Candidate, PreAggMatch};
pub use rollup::{materialization, Component, Materialization, RollupPlan};
pub use scheduler::{RefreshOptions, RefreshScheduler, DEFAULT_REFRESH_EVERY};
pub use state::RefreshState;
pub use store::{MaterializedPreAgg, PreAggStore};
