//! Codegen Configuration
//!
//! Naming is data, not code: each target language has a table under
//! `naming/` (embedded at build time) giving its casing conventions, reserved
//! words and keyword escape. Project configuration can override any of it.

use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::error;

static NAMING_TABLES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/naming");

/// Supported target languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Rust,
    Java,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Java => "java",
        }
    }

    /// Source file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Rust => "rs",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rust" | "rs" => Ok(Language::Rust),
            "java" => Ok(Language::Java),
            other => Err(format!("unsupported language '{}'", other)),
        }
    }
}

/// Casing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Casing {
    PascalCase,
    CamelCase,
    SnakeCase,
    ScreamingSnakeCase,
    /// Keep the schema's spelling
    Preserve,
}

/// Naming configuration for one target language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    pub type_case: Casing,
    pub field_case: Casing,
    pub symbol_case: Casing,
    /// Appended to names that collide with reserved words
    pub escape_suffix: String,
    pub reserved: BTreeSet<String>,
    /// Acronyms kept upper-case in Pascal/camel case (e.g. ID, URL)
    #[serde(default = "default_acronyms")]
    pub acronyms: BTreeSet<String>,
}

fn default_acronyms() -> BTreeSet<String> {
    ["ID", "URL", "UUID", "API", "HTTP", "JSON", "XML", "SQL", "URI", "UI", "IO"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            type_case: Casing::PascalCase,
            field_case: Casing::SnakeCase,
            symbol_case: Casing::Preserve,
            escape_suffix: "_".to_string(),
            reserved: BTreeSet::new(),
            acronyms: default_acronyms(),
        }
    }
}

impl NamingConfig {
    /// The embedded naming table for a language
    pub fn for_language(language: Language) -> Self {
        let file = format!("{}.toml", language.as_str());
        let table = NAMING_TABLES
            .get_file(&file)
            .and_then(|f| f.contents_utf8())
            .ok_or_else(|| format!("naming table {} is not embedded", file))
            .and_then(|text| toml::from_str::<NamingConfig>(text).map_err(|e| e.to_string()));

        match table {
            Ok(config) => config,
            Err(e) => {
                error!(language = %language, error = %e, "Invalid naming table, using defaults");
                Self::default()
            }
        }
    }

    /// Apply project-level overrides
    pub fn with_overrides(mut self, overrides: &NamingOverrides) -> Self {
        if let Some(case) = overrides.type_case {
            self.type_case = case;
        }
        if let Some(case) = overrides.field_case {
            self.field_case = case;
        }
        if let Some(case) = overrides.symbol_case {
            self.symbol_case = case;
        }
        if let Some(acronyms) = &overrides.acronyms {
            self.acronyms = acronyms.iter().map(|a| a.to_uppercase()).collect();
        }
        self.reserved.extend(overrides.extra_reserved.iter().cloned());
        self
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }
}

/// `[naming]` section of the project configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_case: Option<Casing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_case: Option<Casing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_case: Option<Casing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acronyms: Option<Vec<String>>,
    /// Words to escape in addition to the language's reserved words
    #[serde(default)]
    pub extra_reserved: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_tables_parse() {
        for name in ["rust.toml", "java.toml"] {
            let text = NAMING_TABLES.get_file(name).and_then(|f| f.contents_utf8()).unwrap();
            toml::from_str::<NamingConfig>(text).unwrap();
        }
    }

    #[test]
    fn test_rust_table() {
        let naming = NamingConfig::for_language(Language::Rust);
        assert_eq!(naming.field_case, Casing::SnakeCase);
        assert!(naming.is_reserved("type"));
        assert!(naming.acronyms.contains("ID"));
    }

    #[test]
    fn test_java_table() {
        let naming = NamingConfig::for_language(Language::Java);
        assert_eq!(naming.field_case, Casing::CamelCase);
        assert!(naming.is_reserved("class"));
    }

    #[test]
    fn test_overrides() {
        let overrides = NamingOverrides {
            field_case: Some(Casing::CamelCase),
            extra_reserved: vec!["Model".to_string()],
            ..Default::default()
        };
        let naming = NamingConfig::for_language(Language::Rust).with_overrides(&overrides);
        assert_eq!(naming.field_case, Casing::CamelCase);
        assert!(naming.is_reserved("Model"));
        assert!(naming.is_reserved("fn"));
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("Rust".parse::<Language>(), Ok(Language::Rust));
        assert_eq!("java".parse::<Language>(), Ok(Language::Java));
        assert!("cobol".parse::<Language>().is_err());
    }
}
