//! Code Generation
//!
//! Emits one source file per named type reachable from a schema's root.
//!
//! Architecture:
//! - EmitContext: per-graph analysis (recursive components) shared by emitters
//! - Emitters: `rust` and `java`, pure functions from a definition to a unit
//! - Merging: units from many graphs are deduplicated by output path; two
//!   different units for one path are a conflict, never an overwrite
//!
//! Output is deterministic: the same graph and naming table always produce
//! byte-identical units.

pub mod config;
pub mod java;
pub mod names;
pub mod rust;

pub use config::{Casing, Language, NamingConfig, NamingOverrides};

use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::GenerationError;
use crate::graph::TypeGraph;
use crate::schema::{Name, SchemaGraph, SchemaNode};

// =============================================================================
// Generated Units
// =============================================================================

/// One generated source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedUnit {
    /// Full Avro name of the type this file defines
    pub type_name: String,
    /// Path relative to the output root
    pub path: PathBuf,
    pub contents: String,
}

// =============================================================================
// Emit Context
// =============================================================================

/// Analysis shared by every unit of one graph
pub struct EmitContext<'a> {
    pub graph: &'a SchemaGraph,
    pub naming: &'a NamingConfig,
    /// Recursive component id per type that takes part in a cycle
    components: BTreeMap<String, usize>,
}

impl<'a> EmitContext<'a> {
    pub fn new(graph: &'a SchemaGraph, naming: &'a NamingConfig) -> Self {
        let components = TypeGraph::build(graph.types().iter().map(|(k, v)| (k.as_str(), v.as_ref())))
            .recursive_components();
        Self {
            graph,
            naming,
            components,
        }
    }

    pub fn definition(&self, name: &Name) -> Option<&SchemaNode> {
        self.graph.lookup(&name.fullname())
    }

    /// Whether two named types are mutually recursive
    pub fn same_component(&self, a: &str, b: &str) -> bool {
        match (self.components.get(a), self.components.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

// =============================================================================
// Binding Generator
// =============================================================================

/// Generates bindings for one target language
#[derive(Debug, Clone)]
pub struct BindingGenerator {
    language: Language,
    naming: NamingConfig,
}

impl BindingGenerator {
    pub fn new(language: Language, naming: NamingConfig) -> Self {
        Self { language, naming }
    }

    /// Generator using the language's embedded naming table
    pub fn for_language(language: Language) -> Self {
        Self::new(language, NamingConfig::for_language(language))
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn naming(&self) -> &NamingConfig {
        &self.naming
    }

    /// Units for every named type reachable from the graph's root, in
    /// depth-first field order
    pub fn generate_units(&self, graph: &SchemaGraph) -> Vec<GeneratedUnit> {
        let ctx = EmitContext::new(graph, &self.naming);
        graph
            .reachable_types()
            .iter()
            .filter_map(|name| graph.lookup(name))
            .filter_map(|def| match self.language {
                Language::Rust => rust::emit_unit(def, &ctx),
                Language::Java => java::emit_unit(def, &ctx),
            })
            .collect()
    }

    /// Units for several graphs, deduplicated and sorted by path
    pub fn generate(&self, graphs: &[&SchemaGraph]) -> Result<Vec<GeneratedUnit>, GenerationError> {
        merge_units(graphs.iter().map(|g| self.generate_units(g)))
    }
}

/// Merge unit batches. Identical units collapse; different contents for
/// one output path is a [`GenerationError::Conflict`].
pub fn merge_units(
    batches: impl IntoIterator<Item = Vec<GeneratedUnit>>,
) -> Result<Vec<GeneratedUnit>, GenerationError> {
    let mut by_path: BTreeMap<PathBuf, GeneratedUnit> = BTreeMap::new();
    for unit in batches.into_iter().flatten() {
        match by_path.get(&unit.path) {
            Some(existing) if existing == &unit => {}
            Some(existing) => {
                let type_name = if existing.type_name == unit.type_name {
                    unit.type_name.clone()
                } else {
                    format!("{} / {}", existing.type_name, unit.type_name)
                };
                let label = unit.path.display().to_string();
                return Err(GenerationError::Conflict {
                    type_name,
                    diff: unified_diff(&existing.contents, &unit.contents, &label, &label),
                });
            }
            None => {
                by_path.insert(unit.path.clone(), unit);
            }
        }
    }
    Ok(by_path.into_values().collect())
}

pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(old_label, new_label)
        .to_string()
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub written: usize,
    pub unchanged: usize,
}

/// Write units under `root`, skipping files whose contents already match
pub fn write_units(root: &Path, units: &[GeneratedUnit]) -> std::io::Result<WriteStats> {
    let mut stats = WriteStats::default();
    for unit in units {
        let path = root.join(&unit.path);
        if fs::read_to_string(&path).map(|c| c == unit.contents).unwrap_or(false) {
            stats.unchanged += 1;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &unit.contents)?;
        debug!(path = %path.display(), "Wrote unit");
        stats.written += 1;
    }
    Ok(stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// The unit has never been written
    Missing,
    /// The file on disk differs from the unit
    Stale,
    /// A file with the language's extension that no unit produces
    Orphaned,
}

/// A difference between generated units and the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drift {
    pub path: PathBuf,
    pub kind: DriftKind,
    /// Unified diff from disk to the expected contents (empty for orphans)
    pub diff: String,
}

/// Compare units against what is on disk under `root`
pub fn check_units(root: &Path, units: &[GeneratedUnit], language: Language) -> std::io::Result<Vec<Drift>> {
    let mut drift = Vec::new();
    for unit in units {
        let path = root.join(&unit.path);
        let label = unit.path.display().to_string();
        match fs::read_to_string(&path) {
            Ok(current) if current == unit.contents => {}
            Ok(current) => drift.push(Drift {
                path: unit.path.clone(),
                kind: DriftKind::Stale,
                diff: unified_diff(&current, &unit.contents, &label, &label),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => drift.push(Drift {
                path: unit.path.clone(),
                kind: DriftKind::Missing,
                diff: unified_diff("", &unit.contents, "/dev/null", &label),
            }),
            Err(e) => return Err(e),
        }
    }

    if root.is_dir() {
        let expected: BTreeSet<&Path> = units.iter().map(|u| u.path.as_path()).collect();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some(language.extension()) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if !expected.contains(relative) {
                drift.push(Drift {
                    path: relative.to_path_buf(),
                    kind: DriftKind::Orphaned,
                    diff: String::new(),
                });
            }
        }
    }
    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_schema, NamespaceContext};
    use tempfile::tempdir;

    const USER: &str = r#"{"type":"record","name":"User","namespace":"com.acme","fields":[
        {"name":"id","type":"long"},
        {"name":"status","type":{"type":"enum","name":"Status","symbols":["ACTIVE","CLOSED"]}}
    ]}"#;

    fn graph(text: &str) -> SchemaGraph {
        parse_schema(text, &mut NamespaceContext::new()).unwrap()
    }

    #[test]
    fn test_one_unit_per_named_type() {
        let units = BindingGenerator::for_language(Language::Rust).generate_units(&graph(USER));
        let names: Vec<_> = units.iter().map(|u| u.type_name.as_str()).collect();
        assert_eq!(names, vec!["com.acme.User", "com.acme.Status"]);
        assert_eq!(units[0].path, PathBuf::from("com/acme/user.rs"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let generator = BindingGenerator::for_language(Language::Java);
        let g = graph(USER);
        assert_eq!(generator.generate(&[&g]).unwrap(), generator.generate(&[&g]).unwrap());
    }

    #[test]
    fn test_shared_types_deduplicated() {
        let mut ctx = NamespaceContext::new();
        let user = parse_schema(USER, &mut ctx).unwrap();
        let audit = parse_schema(
            r#"{"type":"record","name":"Audit","namespace":"com.acme","fields":[{"name":"status","type":"Status"}]}"#,
            &mut ctx,
        )
        .unwrap();
        let units = BindingGenerator::for_language(Language::Rust)
            .generate(&[&user, &audit])
            .unwrap();
        assert_eq!(units.len(), 3);
    }

    #[test]
    fn test_conflicting_definitions_rejected() {
        let a = graph(r#"{"type":"enum","name":"Status","namespace":"com.acme","symbols":["A"]}"#);
        let b = graph(r#"{"type":"enum","name":"Status","namespace":"com.acme","symbols":["B"]}"#);
        let err = BindingGenerator::for_language(Language::Rust)
            .generate(&[&a, &b])
            .unwrap_err();
        let GenerationError::Conflict { type_name, diff } = err;
        assert_eq!(type_name, "com.acme.Status");
        assert!(diff.contains("-    A,"));
        assert!(diff.contains("+    B,"));
    }

    #[test]
    fn test_write_then_check() {
        let dir = tempdir().unwrap();
        let units = BindingGenerator::for_language(Language::Rust).generate_units(&graph(USER));

        let drift = check_units(dir.path(), &units, Language::Rust).unwrap();
        assert!(drift.iter().all(|d| d.kind == DriftKind::Missing));

        let stats = write_units(dir.path(), &units).unwrap();
        assert_eq!(stats, WriteStats { written: 2, unchanged: 0 });
        assert!(check_units(dir.path(), &units, Language::Rust).unwrap().is_empty());
        assert_eq!(write_units(dir.path(), &units).unwrap().unchanged, 2);

        fs::write(dir.path().join("com/acme/user.rs"), "// edited\n").unwrap();
        fs::write(dir.path().join("com/acme/old.rs"), "// leftover\n").unwrap();
        let drift = check_units(dir.path(), &units, Language::Rust).unwrap();
        let kinds: Vec<_> = drift.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DriftKind::Stale, DriftKind::Orphaned]);
        assert!(drift[0].diff.contains("-// edited"));
    }
}
