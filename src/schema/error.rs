//! Schema validation errors.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Category of a schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViolationKind {
    DuplicateName,
    UnresolvedReference,
    InvalidMeasureSpec,
    AmbiguousJoin,
    InvalidDefinition,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::DuplicateName => "duplicate name",
            ViolationKind::UnresolvedReference => "unresolved reference",
            ViolationKind::InvalidMeasureSpec => "invalid measure",
            ViolationKind::AmbiguousJoin => "ambiguous join",
            ViolationKind::InvalidDefinition => "invalid definition",
        };
        f.write_str(s)
    }
}

/// One problem found while loading definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub kind: ViolationKind,
    /// Cube the violation was found in, when there is one.
    pub cube: Option<String>,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(kind: ViolationKind, cube: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            cube: cube.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cube {
            Some(cube) => write!(f, "[{}] {}: {}", self.kind, cube, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Every violation found, in discovery order.
    #[error("schema rejected with {} violation(s):\n{}", .violations.len(), list(.violations))]
    Invalid { violations: Vec<SchemaViolation> },

    #[error("failed to read schema source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SchemaError {
    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            SchemaError::Invalid { violations } => violations,
            SchemaError::Io { .. } => &[],
        }
    }

    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.violations().iter().any(|v| v.kind == kind)
    }
}

fn list(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
