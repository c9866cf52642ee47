//! Namespace context shared across files of one build.
//!
//! Built serially while files are parsed, then only read. Each parse call
//! stages its new definitions and commits them together on success.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use std::sync::Arc;

use crate::schema::{SchemaNode, TypeTable};

/// Named types known so far, keyed by full name
#[derive(Debug, Clone, Default)]
pub struct NamespaceContext {
    types: TypeTable,
}

impl NamespaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fullname: &str) -> bool {
        self.types.contains_key(fullname)
    }

    pub fn get(&self, fullname: &str) -> Option<&Arc<SchemaNode>> {
        self.types.get(fullname)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Known full names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub(crate) fn commit(&mut self, staged: TypeTable) {
        self.types.extend(staged);
    }

    /// Closest known name to an unresolved reference
    pub fn suggest<'a>(&'a self, unresolved: &str, extra: impl IntoIterator<Item = &'a str>) -> Option<String> {
        let matcher = SkimMatcherV2::default();
        self.names()
            .chain(extra)
            .filter_map(|candidate| {
                let short = candidate.rsplit('.').next().unwrap_or(candidate);
                let score = matcher
                    .fuzzy_match(candidate, unresolved)
                    .max(matcher.fuzzy_match(short, unresolved))?;
                Some((score, candidate))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, name)| name.to_string())
    }
}
