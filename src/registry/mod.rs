//! Schema Registry
//!
//! The registry owns each subject's append-only version history. The
//! resolver only reads it; registration happens after a run has passed.
//!
//! Two implementations ship with the crate: [`FileRegistry`], an on-disk
//! snapshot optionally committed to git, and [`MemoryRegistry`] for tests
//! and embedding.

pub mod memory;
pub mod snapshot;

pub use memory::MemoryRegistry;
pub use snapshot::FileRegistry;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::fingerprint::SchemaFingerprint;
use crate::schema::SchemaGraph;

/// One registered version of a subject
#[derive(Debug, Clone)]
pub struct SubjectVersion {
    /// 1-based, ascending
    pub version: u32,
    pub schema: Arc<SchemaGraph>,
    pub fingerprint: SchemaFingerprint,
    pub registered_at: Option<DateTime<Utc>>,
}

/// Ordered versions of one subject
#[derive(Debug, Clone)]
pub struct SubjectHistory {
    subject: String,
    versions: Vec<SubjectVersion>,
}

impl SubjectHistory {
    /// Empty history: the subject has never been registered
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            versions: Vec::new(),
        }
    }

    /// History with versions 1..=n in the given order
    pub fn from_schemas(subject: impl Into<String>, schemas: Vec<SchemaGraph>) -> Self {
        let versions = schemas
            .into_iter()
            .zip(1u32..)
            .map(|(schema, version)| SubjectVersion {
                version,
                fingerprint: SchemaFingerprint::of(&schema),
                schema: Arc::new(schema),
                registered_at: None,
            })
            .collect();
        Self {
            subject: subject.into(),
            versions,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// All versions, oldest first
    pub fn versions(&self) -> &[SubjectVersion] {
        &self.versions
    }

    pub fn latest(&self) -> Option<&SubjectVersion> {
        self.versions.last()
    }

    pub fn get(&self, version: u32) -> Option<&SubjectVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Version already holding this exact schema
    pub fn find(&self, fingerprint: &SchemaFingerprint) -> Option<&SubjectVersion> {
        self.versions.iter().find(|v| &v.fingerprint == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn next_version(&self) -> u32 {
        self.latest().map(|v| v.version + 1).unwrap_or(1)
    }

    /// Append a version; versions must stay strictly ascending
    pub(crate) fn push(&mut self, entry: SubjectVersion) -> Result<(), RegistryError> {
        if let Some(latest) = self.latest() {
            if entry.version <= latest.version {
                return Err(RegistryError::Corrupt {
                    subject: self.subject.clone(),
                    reason: format!(
                        "version {} does not follow version {}",
                        entry.version, latest.version
                    ),
                });
            }
        }
        self.versions.push(entry);
        Ok(())
    }
}

/// Access to a schema registry.
///
/// Implementations must report an unreachable registry as
/// [`RegistryError::Unavailable`]. An unknown subject is an empty history,
/// which is different from not being able to ask.
pub trait RegistryClient: Send + Sync {
    /// Every subject with at least one version
    fn subjects(&self) -> Result<Vec<String>, RegistryError>;

    /// Full history of a subject, oldest first
    fn history(&self, subject: &str) -> Result<SubjectHistory, RegistryError>;

    /// Latest version of a subject, if any
    fn latest_schema(&self, subject: &str) -> Result<Option<SubjectVersion>, RegistryError> {
        Ok(self.history(subject)?.latest().cloned())
    }

    /// Register a schema; returns the existing version when the same
    /// schema is already registered
    fn register(&self, subject: &str, schema: &SchemaGraph) -> Result<u32, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_schema, NamespaceContext};

    #[test]
    fn test_history_versions_ascend() {
        let a = parse_schema(r#""int""#, &mut NamespaceContext::new()).unwrap();
        let b = parse_schema(r#""long""#, &mut NamespaceContext::new()).unwrap();
        let mut history = SubjectHistory::from_schemas("s", vec![a, b]);
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().map(|v| v.version), Some(2));
        assert_eq!(history.next_version(), 3);

        let stale = history.versions()[0].clone();
        assert!(history.push(stale).is_err());
    }
}
