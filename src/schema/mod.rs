//! Cube definitions: parsing, validation and the active catalog.
//!
//! ```text
//! SchemaSource ──read──▶ Vec<CubeDefinition> ──load──▶ Catalog
//!                                                        │
//!                              SchemaRegistry (per app id, watch<Arc<Catalog>>)
//! ```

pub mod catalog;
pub mod definition;
pub mod error;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod loader;
pub mod registry;
pub mod source;
pub mod template;

pub use catalog::{pre_aggregation_key, Catalog, MemberLookupError};
pub use definition::{parse_definitions, CubeDefinition};
pub use error::{SchemaError, SchemaResult, SchemaViolation, ViolationKind};
pub use loader::load;
pub use registry::{SchemaRegistry, SecurityContext, DEFAULT_APP_ID};
pub use source::{DirectorySource, InMemorySource, SchemaSource};
