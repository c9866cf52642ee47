//! File-snapshot registry
//!
//! Append-only on-disk registry, optionally versioned in git:
//!
//! ```text
//! <root>/subjects/<subject>/manifest.json
//! <root>/subjects/<subject>/v1.avsc
//! <root>/subjects/<subject>/v2.avsc
//! ```
//!
//! Every read re-verifies each version's fingerprint against the manifest.

use chrono::{DateTime, Utc};
use git2::{Commit, Oid, Repository, Signature};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{RegistryClient, SubjectHistory, SubjectVersion};
use crate::error::RegistryError;
use crate::fingerprint::SchemaFingerprint;
use crate::parser::{parse_schema, NamespaceContext};
use crate::schema::SchemaGraph;

const SUBJECTS_DIR: &str = "subjects";
const MANIFEST_FILE: &str = "manifest.json";

/// Per-subject manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectManifest {
    pub subject: String,
    pub versions: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub version: u32,
    pub fingerprint: SchemaFingerprint,
    /// File name relative to the subject directory
    pub file: String,
    pub registered_at: DateTime<Utc>,
}

/// Registry stored as a directory snapshot
#[derive(Debug)]
pub struct FileRegistry {
    root: PathBuf,
    /// Commit and tag every registration
    git: bool,
    /// Serializes writers
    write_lock: Mutex<()>,
}

impl FileRegistry {
    /// Open an existing snapshot. A missing root is reported as unavailable.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(RegistryError::Unavailable(format!(
                "registry snapshot {} does not exist",
                root.display()
            )));
        }
        Ok(Self {
            root,
            git: false,
            write_lock: Mutex::new(()),
        })
    }

    /// Create the snapshot directory (and git repository) if needed
    pub fn init(root: impl AsRef<Path>, git: bool) -> Result<Self, RegistryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(SUBJECTS_DIR))?;
        if git && Repository::open(&root).is_err() {
            Repository::init(&root)?;
            info!(path = %root.display(), "Initialized registry git repository");
        }
        Ok(Self {
            root,
            git,
            write_lock: Mutex::new(()),
        })
    }

    /// Enable or disable git commits on registration
    pub fn with_git(mut self, git: bool) -> Self {
        self.git = git;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(SUBJECTS_DIR).join(sanitize(subject))
    }

    fn read_manifest(&self, subject: &str) -> Result<Option<SubjectManifest>, RegistryError> {
        read_manifest_at(&self.subject_dir(subject), subject)
    }

    fn load_history(&self, subject: &str) -> Result<SubjectHistory, RegistryError> {
        let mut history = SubjectHistory::new(subject);
        let Some(manifest) = self.read_manifest(subject)? else {
            return Ok(history);
        };

        let dir = self.subject_dir(subject);
        for entry in manifest.versions {
            let corrupt = |reason: String| RegistryError::Corrupt {
                subject: subject.to_string(),
                reason,
            };
            let text = fs::read_to_string(dir.join(&entry.file))
                .map_err(|e| corrupt(format!("cannot read {}: {}", entry.file, e)))?;
            let schema = parse_schema(&text, &mut NamespaceContext::new())
                .map_err(|e| corrupt(format!("{} does not parse: {}", entry.file, e)))?;

            let fingerprint = SchemaFingerprint::of(&schema);
            if fingerprint != entry.fingerprint {
                return Err(corrupt(format!(
                    "{} has fingerprint {} but the manifest records {}",
                    entry.file,
                    fingerprint.short(),
                    entry.fingerprint.short()
                )));
            }

            history.push(SubjectVersion {
                version: entry.version,
                schema: Arc::new(schema),
                fingerprint,
                registered_at: Some(entry.registered_at),
            })?;
        }
        Ok(history)
    }

    /// Verify every subject's files against its manifest
    pub fn verify(&self) -> Result<usize, RegistryError> {
        let mut versions = 0;
        for subject in self.subjects()? {
            versions += self.load_history(&subject)?.len();
        }
        Ok(versions)
    }

    fn git_commit(&self, repo: &Repository, summary: &str) -> Result<Oid, RegistryError> {
        let mut index = repo.index()?;
        index.add_all(["subjects/*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let oid = index.write_tree()?;
        let tree = repo.find_tree(oid)?;
        let sig = Signature::now("avro-gate", "avro-gate@localhost")?;

        let parent_commit = head_commit(repo);
        let parents: Vec<&Commit> = parent_commit.iter().collect();

        Ok(repo.commit(Some("HEAD"), &sig, &sig, summary, &tree, &parents)?)
    }

    fn git_tag(&self, repo: &Repository, tag_name: &str) -> Result<(), RegistryError> {
        let obj = repo.revparse_single("HEAD")?;
        let sig = Signature::now("avro-gate", "avro-gate@localhost")?;
        repo.tag(tag_name, &obj, &sig, &format!("Register {}", tag_name), false)?;
        Ok(())
    }
}

fn head_commit(repo: &Repository) -> Option<Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}

/// Subject names become directory names and git tag prefixes
/// Manifest in a subject directory; `None` when the directory has none
fn read_manifest_at(dir: &Path, subject: &str) -> Result<Option<SubjectManifest>, RegistryError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let manifest = serde_json::from_str(&content).map_err(|e| RegistryError::Corrupt {
        subject: subject.to_string(),
        reason: format!("unreadable manifest: {}", e),
    })?;
    Ok(Some(manifest))
}

fn sanitize(subject: &str) -> String {
    subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl RegistryClient for FileRegistry {
    fn subjects(&self) -> Result<Vec<String>, RegistryError> {
        let dir = self.root.join(SUBJECTS_DIR);
        if !self.root.is_dir() {
            return Err(RegistryError::Unavailable(format!(
                "registry snapshot {} does not exist",
                self.root.display()
            )));
        }
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut subjects = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let label = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let Some(manifest) = read_manifest_at(&path, &label)? else {
                continue;
            };
            if !manifest.versions.is_empty() {
                subjects.push(manifest.subject);
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    fn history(&self, subject: &str) -> Result<SubjectHistory, RegistryError> {
        if !self.root.is_dir() {
            return Err(RegistryError::Unavailable(format!(
                "registry snapshot {} does not exist",
                self.root.display()
            )));
        }
        self.load_history(subject)
    }

    fn register(&self, subject: &str, schema: &SchemaGraph) -> Result<u32, RegistryError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;

        let history = self.history(subject)?;
        let fingerprint = SchemaFingerprint::of(schema);
        if let Some(existing) = history.find(&fingerprint) {
            debug!(subject, version = existing.version, "Schema already registered");
            return Ok(existing.version);
        }

        let version = history.next_version();
        let dir = self.subject_dir(subject);
        fs::create_dir_all(&dir)?;

        let file = format!("v{}.avsc", version);
        let path = dir.join(&file);
        if path.exists() {
            return Err(RegistryError::Rejected {
                subject: subject.to_string(),
                reason: format!("{} already exists", file),
            });
        }
        fs::write(&path, serde_json::to_string_pretty(&schema.to_json())?)?;

        let mut manifest = self.read_manifest(subject)?.unwrap_or_else(|| SubjectManifest {
            subject: subject.to_string(),
            versions: Vec::new(),
        });
        manifest.versions.push(ManifestEntry {
            version,
            fingerprint,
            file,
            registered_at: Utc::now(),
        });
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;

        if self.git {
            let repo = match Repository::open(&self.root) {
                Ok(repo) => repo,
                Err(_) => Repository::init(&self.root)?,
            };
            let tag = format!("{}/v{}", sanitize(subject), version);
            self.git_commit(&repo, &format!("Register {}", tag))?;
            self.git_tag(&repo, &tag)?;
        }

        info!(subject, version, fingerprint = %fingerprint.short(), "Registered schema");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schema(text: &str) -> SchemaGraph {
        parse_schema(text, &mut NamespaceContext::new()).unwrap()
    }

    const USER: &str = r#"{"type":"record","name":"User","namespace":"com.acme","fields":[{"name":"id","type":"int"}]}"#;

    #[test]
    fn test_missing_root_is_unavailable() {
        let dir = tempdir().unwrap();
        let err = FileRegistry::open(dir.path().join("absent")).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_register_and_reload() {
        let dir = tempdir().unwrap();
        let registry = FileRegistry::init(dir.path(), false).unwrap();
        assert!(registry.subjects().unwrap().is_empty());

        assert_eq!(registry.register("com.acme.User", &schema(USER)).unwrap(), 1);
        assert_eq!(registry.register("com.acme.User", &schema(USER)).unwrap(), 1);

        let reopened = FileRegistry::open(dir.path()).unwrap();
        assert_eq!(reopened.subjects().unwrap(), vec!["com.acme.User".to_string()]);
        let history = reopened.history("com.acme.User").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().fingerprint, SchemaFingerprint::of(&schema(USER)));
        assert_eq!(reopened.verify().unwrap(), 1);
    }

    #[test]
    fn test_tampered_version_is_corrupt() {
        let dir = tempdir().unwrap();
        let registry = FileRegistry::init(dir.path(), false).unwrap();
        registry.register("s", &schema(USER)).unwrap();

        let file = dir.path().join("subjects/s/v1.avsc");
        fs::write(&file, r#"{"type":"record","name":"User","namespace":"com.acme","fields":[]}"#).unwrap();

        let err = registry.history("s").unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unreadable_manifest_is_corrupt_when_listing() {
        let dir = tempdir().unwrap();
        let registry = FileRegistry::init(dir.path(), false).unwrap();
        registry.register("s", &schema(USER)).unwrap();
        fs::write(dir.path().join("subjects/s").join(MANIFEST_FILE), "{ not json").unwrap();

        let err = registry.subjects().unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { ref subject, .. } if subject == "s"));
        assert!(matches!(registry.history("s").unwrap_err(), RegistryError::Corrupt { .. }));
    }

    #[test]
    fn test_git_commit_and_tag() {
        let dir = tempdir().unwrap();
        let registry = FileRegistry::init(dir.path(), true).unwrap();
        registry.register("com.acme.User", &schema(USER)).unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        assert!(repo.revparse_single("com.acme.User/v1").is_ok());
        assert!(head_commit(&repo).is_some());
    }

    #[test]
    fn test_sanitize_subject() {
        assert_eq!(sanitize("com.acme.User"), "com.acme.User");
        assert_eq!(sanitize("orders value"), "orders_value");
    }
}
