//! avro-gate
//!
//! Deterministic Avro schema compilation with registry compatibility
//! enforcement.
//!
//! ## Features
//!
//! - **Parsing**: `.avsc`, `.avpr` and `.avdl` sources into immutable schema graphs,
//!   with cross-file named-type resolution
//! - **Fingerprinting**: SHA-256 over a canonical form that ignores docs, aliases
//!   and union branch order
//! - **Compatibility**: Backward/Forward/Full (and transitive) checks against a
//!   subject's history, with a structured violation set
//! - **Bindings**: Rust and Java sources, one file per named type, byte-identical
//!   across runs
//! - **Orchestration**: discover, check every subject in parallel, generate only
//!   what passed and changed
//!
//! ## Architecture
//!
//! ```text
//! discovery ──► parser ──► fingerprint ──► compatibility ──► codegen
//!                 │                             ▲
//!          NamespaceContext              registry (history)
//!                 └──────── orchestrator ───────┘
//! ```

pub mod codegen;
pub mod compatibility;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod schema;

pub use codegen::{BindingGenerator, GeneratedUnit, Language, NamingConfig};
pub use compatibility::{CompatibilityMode, CompatibilityResolver, CompatibilityVerdict, Violation, ViolationReason};
pub use config::AppConfig;
pub use discovery::{FsSchemaSource, SchemaFile, SchemaSource};
pub use error::{GenerationError, ParseError, ParseErrorKind, RegistryError, Result, SchemaError};
pub use fingerprint::SchemaFingerprint;
pub use orchestrator::{BuildOptions, BuildReport, Orchestrator, OutputMode, SubjectOutcome};
pub use parser::{parse_schema, parse_source, NamespaceContext, SourceKind};
pub use registry::{FileRegistry, MemoryRegistry, RegistryClient, SubjectHistory};
pub use schema::{SchemaGraph, SchemaNode};
