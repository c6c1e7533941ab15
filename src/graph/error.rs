//! Join graph errors.

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("unknown cube '{0}'")]
    UnknownCube(String),

    #[error("no join path from '{from}' to '{to}'")]
    NoPath { from: String, to: String },

    /// The cube is only joined under aliases, so the caller must pick one.
    #[error("'{cube}' is only reachable through aliases {}; query one of them instead", .aliases.join(", "))]
    AmbiguousJoin { cube: String, aliases: Vec<String> },
}
