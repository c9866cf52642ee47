//! Configuration management for avro-gate
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (avro-gate.toml, .avro-gate.toml, config/avro-gate.toml)
//! - The XDG config directory
//! - Environment variables (AVRO_GATE__SECTION__KEY)
//!
//! ## Example config file (avro-gate.toml):
//! ```toml
//! [source]
//! roots = ["schemas"]
//! include = ["**/*.avsc", "**/*.avdl"]
//!
//! [output]
//! dir = "src/generated"
//! language = "rust"
//!
//! [registry]
//! path = "schema-registry"
//! git = true
//!
//! [compatibility]
//! mode = "FULL_TRANSITIVE"
//! fail_on_missing_subjects = true
//!
//! [[subjects]]
//! name = "com.acme.User"
//! subject = "users-value"
//!
//! [retry]
//! attempts = 3
//! backoff_ms = 200
//!
//! [naming]
//! field_case = "camel_case"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::codegen::{Language, NamingOverrides};
use crate::compatibility::CompatibilityMode;
use crate::discovery::DEFAULT_INCLUDE;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub compatibility: CompatibilityConfig,

    /// Full type name to subject overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<SubjectMapping>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub naming: NamingOverrides,
}

/// Where schema sources live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Globs relative to each root
    #[serde(default = "default_include")]
    pub include: Vec<String>,
}

/// Generated bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub language: Language,
}

/// Registry snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Commit and tag every registration in git
    #[serde(default)]
    pub git: bool,

    /// Register every compatible changed subject after a successful build
    #[serde(default)]
    pub register_on_build: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    #[serde(default)]
    pub mode: CompatibilityMode,

    /// Fail when the registry has subjects the sources no longer define
    #[serde(default = "default_true")]
    pub fail_on_missing_subjects: bool,
}

/// Registers a type under a subject other than its full name. The full name
/// is a value rather than a table key, since keys are case-folded on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMapping {
    /// Full name of the root type
    pub name: String,
    pub subject: String,
}

/// Registry retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per registry call, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Worker threads for the per-subject phase (0 = one per core)
    #[serde(default)]
    pub parallelism: usize,

    /// Parse passes allowed for resolving cross-file forward references
    #[serde(default = "default_max_passes")]
    pub max_resolution_passes: usize,
}

// Default value functions
fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("schemas")]
}

fn default_include() -> Vec<String> {
    DEFAULT_INCLUDE.iter().map(|s| s.to_string()).collect()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("schema-registry")
}

fn default_true() -> bool {
    true
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_max_passes() -> usize {
    8
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            include: default_include(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            language: Language::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            git: false,
            register_on_build: false,
        }
    }
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            mode: CompatibilityMode::default(),
            fail_on_missing_subjects: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            max_resolution_passes: default_max_passes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["avro-gate.toml", ".avro-gate.toml", "config/avro-gate.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "avro-gate", "avro-gate") {
            let xdg_config = config_dir.config_dir().join("avro-gate.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // AVRO_GATE__COMPATIBILITY__MODE=BACKWARD
        builder = builder.add_source(
            Environment::with_prefix("AVRO_GATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Subject overrides keyed by full type name
    pub fn subject_mappings(&self) -> BTreeMap<String, String> {
        self.subjects
            .iter()
            .map(|m| (m.name.clone(), m.subject.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.compatibility.mode, CompatibilityMode::FullTransitive);
        assert!(config.compatibility.fail_on_missing_subjects);
        assert_eq!(config.source.include.len(), 3);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.output.language, Language::Rust);
    }

    #[test]
    fn test_serialize_config() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[compatibility]"));
        assert!(toml_str.contains("mode = \"FULL_TRANSITIVE\""));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[compatibility]\nmode = \"BACKWARD\"\n\n[output]\nlanguage = \"java\"\n\n[retry]\nattempts = 5\n",
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.compatibility.mode, CompatibilityMode::Backward);
        assert_eq!(config.output.language, Language::Java);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.backoff_ms, 200);
    }

    #[test]
    fn test_save_round_trips_through_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = AppConfig::default();
        config.registry.git = true;
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = AppConfig::load_from(path.to_str()).unwrap();
        assert!(loaded.registry.git);
    }

    #[test]
    fn test_subject_mappings_keep_case_through_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subjects.toml");
        std::fs::write(
            &path,
            "[[subjects]]\nname = \"com.acme.User\"\nsubject = \"users-value\"\n\n\
             [[subjects]]\nname = \"com.acme.shop.OrderState\"\nsubject = \"Order-States\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str()).unwrap();
        let mappings = config.subject_mappings();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings.get("com.acme.User").map(String::as_str), Some("users-value"));
        assert_eq!(
            mappings.get("com.acme.shop.OrderState").map(String::as_str),
            Some("Order-States")
        );
    }

    #[test]
    fn test_saved_subject_mappings_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = AppConfig::default();
        config.subjects.push(SubjectMapping {
            name: "com.acme.User".to_string(),
            subject: "users-value".to_string(),
        });
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = AppConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.subjects, config.subjects);
    }
}
