//! # Cubist
//!
//! A semantic-layer query compiler and pre-aggregation engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Cube definitions (JSON)                     │
//! │  (cubes, dimensions, measures, joins, pre-aggregations)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [schema::load]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Catalog (immutable, versioned) + JoinGraph             │
//! │   held per app id by SchemaRegistry                      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query::compile]
//! ┌─────────────────────────────────────────────────────────┐
//! │   CompiledQuery: join tree, SQL, column metadata         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [preagg::match_materialized]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ RollupPlan over a stored │   │ Driver executes the SQL  │
//! │ pre-aggregation rowset   │   │                          │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! [`engine::Engine`] runs the pipeline; [`preagg::RefreshScheduler`]
//! keeps pre-aggregations materialized in the background.

pub mod cache;
pub mod config;
pub mod driver;
pub mod engine;
pub mod graph;
pub mod model;
pub mod preagg;
pub mod query;
pub mod schema;
pub mod sql;

pub use engine::{Engine, EngineError, EngineOptions, EngineResult, QueryResponse};
pub use query::{compile, CompileOptions, CompiledQuery, QueryRequest};
pub use schema::{Catalog, SchemaRegistry, SecurityContext};
pub use sql::Dialect;
