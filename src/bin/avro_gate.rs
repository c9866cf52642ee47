//! avro-gate CLI
//!
//! Compiles Avro schemas into bindings after checking them against the
//! registry snapshot.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use avro_gate::codegen::{write_units, DriftKind};
use avro_gate::orchestrator::parse_files;
use avro_gate::registry::RegistryClient;
use avro_gate::{
    AppConfig, BindingGenerator, BuildOptions, BuildReport, CompatibilityMode, FileRegistry, FsSchemaSource,
    Language, Orchestrator, OutputMode, SchemaFingerprint, SchemaSource, SubjectOutcome,
};

#[derive(Parser)]
#[command(name = "avro-gate")]
#[command(about = "Compile Avro schemas with registry compatibility enforcement")]
struct Cli {
    /// Configuration file layered over the default locations
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Registry snapshot directory
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    /// Compatibility mode (e.g. backward, full_transitive)
    #[arg(short, long, global = true)]
    mode: Option<CompatibilityMode>,

    /// Target language for bindings
    #[arg(short, long, global = true)]
    language: Option<Language>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every subject and generate bindings for the ones that changed
    Build {
        /// Register changed subjects after a successful build
        #[arg(long)]
        register: bool,
    },

    /// Check compatibility without writing anything
    Check {
        /// Also compare generated bindings with the output directory
        #[arg(long)]
        outputs: bool,
    },

    /// Generate bindings without consulting the registry
    Generate {
        /// Output directory (overrides configuration)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the fingerprint of every subject
    Fingerprint {
        /// Also print each subject's self-contained schema JSON
        #[arg(long)]
        json: bool,
    },

    /// Register every compatible changed subject
    Register,

    /// Print the effective configuration
    Config {
        /// Write it to this file instead
        #[arg(long)]
        save: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the command passed
fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = AppConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(path) = cli.registry {
        config.registry.path = path;
    }
    if let Some(mode) = cli.mode {
        config.compatibility.mode = mode;
    }
    if let Some(language) = cli.language {
        config.output.language = language;
    }

    let source = FsSchemaSource::new();

    match cli.command {
        Commands::Build { register } => {
            let registry = open_registry(&config, false)?;
            let mut options = BuildOptions::from_config(&config);
            options.register |= register;
            println!("🔍 Building with {} compatibility", options.mode);
            let report = Orchestrator::new(&source, &registry, options).run()?;
            Ok(print_report(&report))
        }

        Commands::Check { outputs } => {
            let registry = open_registry(&config, false)?;
            let mut options = BuildOptions::from_config(&config);
            options.output_mode = if outputs { OutputMode::Check } else { OutputMode::Skip };
            options.register = false;
            println!("🔍 Checking with {} compatibility", options.mode);
            let report = Orchestrator::new(&source, &registry, options).run()?;
            Ok(print_report(&report))
        }

        Commands::Register => {
            let registry = open_registry(&config, true)?;
            let mut options = BuildOptions::from_config(&config);
            options.output_mode = OutputMode::Skip;
            options.register = true;
            println!("📦 Registering into {}", registry.root().display());
            let report = Orchestrator::new(&source, &registry, options).run()?;
            Ok(print_report(&report))
        }

        Commands::Generate { output } => {
            let options = BuildOptions::from_config(&config);
            let output_dir = output.unwrap_or_else(|| options.output_dir.clone());
            let files = source.discover(&options.roots, &options.include)?;
            let parsed = parse_files(&source, &files, &options);
            for failure in &parsed.failures {
                println!("❌ {} - {}", failure.path.display(), failure.error);
            }

            let generator = BindingGenerator::new(options.language, options.naming.clone());
            let graphs: Vec<_> = parsed.subjects.iter().map(|s| &s.graph).collect();
            let units = generator.generate(&graphs)?;
            let stats = write_units(&output_dir, &units)
                .with_context(|| format!("writing bindings to {}", output_dir.display()))?;
            println!(
                "✅ {} unit(s) in {} ({} written, {} unchanged)",
                units.len(),
                output_dir.display(),
                stats.written,
                stats.unchanged
            );
            Ok(parsed.failures.is_empty())
        }

        Commands::Fingerprint { json } => {
            let options = BuildOptions::from_config(&config);
            let files = source.discover(&options.roots, &options.include)?;
            let parsed = parse_files(&source, &files, &options);
            for subject in &parsed.subjects {
                println!("{}  {}", SchemaFingerprint::of(&subject.graph), subject.subject);
                if json {
                    println!("{}", serde_json::to_string_pretty(&subject.graph.to_json())?);
                }
            }
            for failure in &parsed.failures {
                println!("❌ {} - {}", failure.path.display(), failure.error);
            }
            Ok(parsed.failures.is_empty())
        }

        Commands::Config { save } => {
            match save {
                Some(path) => {
                    config.save(&path)?;
                    println!("✅ Configuration written to {}", path);
                }
                None => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(true)
        }
    }
}

fn open_registry(config: &AppConfig, create: bool) -> anyhow::Result<FileRegistry> {
    let path = &config.registry.path;
    let registry = if create {
        FileRegistry::init(path, config.registry.git)?
    } else {
        FileRegistry::open(path)?.with_git(config.registry.git)
    };
    // Fail fast on a snapshot that cannot be listed at all
    if let Err(e) = registry.subjects() {
        bail!("registry snapshot {} is unusable: {}", path.display(), e);
    }
    Ok(registry)
}

/// Print a human-readable report; returns whether the build passed
fn print_report(report: &BuildReport) -> bool {
    println!();
    for subject in &report.subjects {
        let name = &subject.subject;
        match &subject.outcome {
            SubjectOutcome::New => println!("✅ {} - new subject", name),
            SubjectOutcome::Unchanged { version } => println!("✅ {} - unchanged (v{})", name, version),
            SubjectOutcome::Compatible { bypassed: true, .. } => {
                println!("⚠️  {} - compatibility check bypassed (mode NONE)", name)
            }
            SubjectOutcome::Compatible { checked_versions, .. } => {
                let versions: Vec<String> = checked_versions.iter().map(|v| format!("v{}", v)).collect();
                println!("✅ {} - compatible with {}", name, versions.join(", "));
            }
            SubjectOutcome::Incompatible {
                against_version,
                violations,
            } => {
                println!("❌ {} - INCOMPATIBLE with v{}", name, against_version);
                for violation in violations {
                    println!("   └─ [{:?}] {}", violation.direction, violation);
                }
            }
            SubjectOutcome::RegistryUnavailable { attempts, message } => {
                println!("❌ {} - registry unavailable after {} attempt(s): {}", name, attempts, message)
            }
            SubjectOutcome::RegistryFailed { message } => println!("❌ {} - registry error: {}", name, message),
            SubjectOutcome::DependencyFailed { failed } => {
                println!("❌ {} - depends on failed subject(s): {}", name, failed.join(", "))
            }
        }
        if let Some(version) = subject.registered {
            println!("   📦 registered as v{}", version);
        }
    }

    for failure in &report.file_failures {
        println!("❌ {} - {}", failure.path.display(), failure.error);
    }
    for subject in &report.missing {
        let icon = if report.missing_is_fatal { "❌" } else { "⚠️ " };
        println!("{} {} - registered but missing from sources", icon, subject);
    }
    if let Some(error) = &report.registry_error {
        println!("❌ registry - {}", error);
    }
    if let Some(error) = &report.generation_error {
        println!("❌ {}", error);
    }
    for drift in &report.drift {
        match drift.kind {
            DriftKind::Missing => println!("❌ {} - not generated yet", drift.path.display()),
            DriftKind::Orphaned => println!("❌ {} - no schema generates this file", drift.path.display()),
            DriftKind::Stale => {
                println!("❌ {} - out of date", drift.path.display());
                print!("{}", drift.diff);
            }
        }
    }
    for (subject, error) in &report.register_failures {
        println!("❌ {} - registration failed: {}", subject, error);
    }

    println!();
    if report.write_stats.written > 0 || report.write_stats.unchanged > 0 {
        println!(
            "📝 {} file(s) written, {} unchanged",
            report.write_stats.written, report.write_stats.unchanged
        );
    }
    if report.is_success() {
        println!("✅ {} subject(s) passed", report.subjects.len());
        true
    } else {
        println!("❌ {} failure(s)", report.failed_count());
        false
    }
}
