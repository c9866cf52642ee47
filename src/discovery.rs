//! Schema Discovery
//!
//! Finds schema sources under configured roots. The filesystem is reached
//! only through [`SchemaSource`] so the orchestrator can run against any
//! file store.

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::DiscoveryError;
use crate::parser::SourceKind;

/// Include globs used when none are configured
pub const DEFAULT_INCLUDE: &[&str] = &["**/*.avsc", "**/*.avpr", "**/*.avdl"];

/// A discovered schema file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaFile {
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// Filesystem collaborator
pub trait SchemaSource: Send + Sync {
    /// Schema files under `roots` matching any include pattern, sorted by path
    fn discover(&self, roots: &[PathBuf], include: &[String]) -> Result<Vec<SchemaFile>, DiscoveryError>;

    /// UTF-8 contents of a discovered file
    fn read(&self, file: &SchemaFile) -> Result<String, DiscoveryError>;
}

/// Local filesystem walker. Honours `.gitignore` files under the roots.
#[derive(Debug, Clone)]
pub struct FsSchemaSource {
    follow_links: bool,
}

impl Default for FsSchemaSource {
    fn default() -> Self {
        Self { follow_links: true }
    }
}

impl FsSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    fn walk_root(&self, root: &Path, include: &[String], out: &mut Vec<SchemaFile>) -> Result<(), DiscoveryError> {
        let mut overrides = OverrideBuilder::new(root);
        for pattern in include {
            overrides.add(pattern).map_err(|e| DiscoveryError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        let overrides = overrides.build().map_err(|e| DiscoveryError::InvalidPattern {
            pattern: include.join(", "),
            reason: e.to_string(),
        })?;

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .follow_links(self.follow_links)
            .require_git(false)
            .overrides(overrides)
            .build();

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            match SourceKind::from_path(path) {
                Some(kind) => out.push(SchemaFile {
                    path: path.to_path_buf(),
                    kind,
                }),
                None => debug!(path = %path.display(), "Skipping file with unknown extension"),
            }
        }
        Ok(())
    }
}

impl SchemaSource for FsSchemaSource {
    fn discover(&self, roots: &[PathBuf], include: &[String]) -> Result<Vec<SchemaFile>, DiscoveryError> {
        let defaults: Vec<String>;
        let include = if include.is_empty() {
            defaults = DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect();
            &defaults
        } else {
            include
        };

        let mut files = Vec::new();
        for root in roots {
            if !root.is_dir() {
                return Err(DiscoveryError::MissingRoot(root.clone()));
            }
            self.walk_root(root, include, &mut files)?;
        }
        files.sort();
        files.dedup();

        info!(roots = roots.len(), files = files.len(), "Discovered schema files");
        Ok(files)
    }

    fn read(&self, file: &SchemaFile) -> Result<String, DiscoveryError> {
        fs::read_to_string(&file.path).map_err(|source| DiscoveryError::Read {
            path: file.path.clone(),
            source,
        })
    }
}
