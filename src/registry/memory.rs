//! In-memory registry

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{RegistryClient, SubjectHistory, SubjectVersion};
use crate::error::RegistryError;
use crate::fingerprint::SchemaFingerprint;
use crate::schema::SchemaGraph;

/// Registry held in process memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    subjects: RwLock<BTreeMap<String, SubjectHistory>>,
    /// Number of upcoming calls that fail as unavailable
    outages: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a subject with a history, replacing any existing one
    pub fn insert_history(&self, history: SubjectHistory) -> Result<(), RegistryError> {
        let mut subjects = self.subjects.write().map_err(poisoned)?;
        subjects.insert(history.subject().to_string(), history);
        Ok(())
    }

    /// Make the next `calls` requests fail with [`RegistryError::Unavailable`]
    pub fn fail_next(&self, calls: usize) {
        self.outages.store(calls, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        let took_outage = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took_outage {
            return Err(RegistryError::Unavailable("in-memory registry outage".to_string()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> RegistryError {
    RegistryError::Unavailable("registry lock poisoned".to_string())
}

impl RegistryClient for MemoryRegistry {
    fn subjects(&self) -> Result<Vec<String>, RegistryError> {
        self.check_available()?;
        let subjects = self.subjects.read().map_err(poisoned)?;
        Ok(subjects
            .iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn history(&self, subject: &str) -> Result<SubjectHistory, RegistryError> {
        self.check_available()?;
        let subjects = self.subjects.read().map_err(poisoned)?;
        Ok(subjects
            .get(subject)
            .cloned()
            .unwrap_or_else(|| SubjectHistory::new(subject)))
    }

    fn register(&self, subject: &str, schema: &SchemaGraph) -> Result<u32, RegistryError> {
        self.check_available()?;
        let mut subjects = self.subjects.write().map_err(poisoned)?;
        let history = subjects
            .entry(subject.to_string())
            .or_insert_with(|| SubjectHistory::new(subject));

        let fingerprint = SchemaFingerprint::of(schema);
        if let Some(existing) = history.find(&fingerprint) {
            return Ok(existing.version);
        }

        let version = history.next_version();
        history.push(SubjectVersion {
            version,
            schema: Arc::new(schema.clone()),
            fingerprint,
            registered_at: Some(Utc::now()),
        })?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_schema, NamespaceContext};

    fn schema(text: &str) -> SchemaGraph {
        parse_schema(text, &mut NamespaceContext::new()).unwrap()
    }

    #[test]
    fn test_poisoned_lock_is_unavailable() {
        let registry = Arc::new(MemoryRegistry::new());
        let holder = Arc::clone(&registry);
        let _ = std::thread::spawn(move || {
            let _guard = holder.subjects.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err = registry.insert_history(SubjectHistory::new("s")).unwrap_err();
        assert!(err.is_transient());
        assert!(registry.subjects().unwrap_err().is_transient());
    }

    #[test]
    fn test_register_and_dedup() {
        let registry = MemoryRegistry::new();
        assert!(registry.subjects().unwrap().is_empty());

        assert_eq!(registry.register("s", &schema(r#""int""#)).unwrap(), 1);
        assert_eq!(registry.register("s", &schema(r#""long""#)).unwrap(), 2);
        assert_eq!(registry.register("s", &schema(r#""int""#)).unwrap(), 1);

        assert_eq!(registry.history("s").unwrap().len(), 2);
        assert_eq!(registry.latest_schema("s").unwrap().map(|v| v.version), Some(2));
        assert_eq!(registry.subjects().unwrap(), vec!["s".to_string()]);
    }

    #[test]
    fn test_unknown_subject_is_empty_history() {
        let registry = MemoryRegistry::new();
        assert!(registry.history("nope").unwrap().is_empty());
    }

    #[test]
    fn test_outage_is_unavailable_not_empty() {
        let registry = MemoryRegistry::new();
        registry.fail_next(2);
        assert!(matches!(registry.history("s"), Err(RegistryError::Unavailable(_))));
        assert!(registry.subjects().unwrap_err().is_transient());
        assert!(registry.history("s").is_ok());
    }
}
