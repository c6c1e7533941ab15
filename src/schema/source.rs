//! Where cube definitions come from.

use std::fs;
use std::path::{Path, PathBuf};

use super::definition::{parse_definitions, CubeDefinition};
use super::error::{SchemaError, SchemaResult, SchemaViolation, ViolationKind};

/// A provider of cube definitions.
pub trait SchemaSource: Send + Sync {
    /// Human-readable origin, used in logs.
    fn name(&self) -> String;

    /// Read and parse every definition. Parse failures are reported as
    /// `InvalidDefinition` violations, one per unreadable document.
    fn read(&self) -> SchemaResult<Vec<CubeDefinition>>;
}

/// Every `*.json` file below a directory, in sorted path order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn files(&self) -> SchemaResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_json(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn collect_json(dir: &Path, out: &mut Vec<PathBuf>) -> SchemaResult<()> {
    let io = |source| SchemaError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            collect_json(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

impl SchemaSource for DirectorySource {
    fn name(&self) -> String {
        self.root.display().to_string()
    }

    fn read(&self) -> SchemaResult<Vec<CubeDefinition>> {
        let mut documents = Vec::new();
        for path in self.files()? {
            let text = fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: path.clone(),
                source,
            })?;
            documents.push((path.display().to_string(), text));
        }
        parse_all(documents.iter().map(|(o, t)| (o.as_str(), t.as_str())))
    }
}

/// Definition text held in memory, e.g. generated per tenant.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    documents: Vec<(String, String)>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one document; `origin` only labels errors.
    pub fn with_document(mut self, origin: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents.push((origin.into(), text.into()));
        self
    }
}

impl SchemaSource for InMemorySource {
    fn name(&self) -> String {
        format!("memory ({} document(s))", self.documents.len())
    }

    fn read(&self) -> SchemaResult<Vec<CubeDefinition>> {
        parse_all(
            self.documents
                .iter()
                .map(|(o, t)| (o.as_str(), t.as_str())),
        )
    }
}

fn parse_all<'a>(
    documents: impl Iterator<Item = (&'a str, &'a str)>,
) -> SchemaResult<Vec<CubeDefinition>> {
    let mut cubes = Vec::new();
    let mut violations = Vec::new();
    for (origin, text) in documents {
        match parse_definitions(text) {
            Ok(parsed) => cubes.extend(parsed),
            Err(e) => violations.push(SchemaViolation::new(
                ViolationKind::InvalidDefinition,
                None,
                format!("{origin}: {e}"),
            )),
        }
    }
    if violations.is_empty() {
        Ok(cubes)
    } else {
        Err(SchemaError::Invalid { violations })
    }
}
