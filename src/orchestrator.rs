//! Build Orchestration
//!
//! A build runs in phases:
//!
//! 1. Discover schema files through the [`SchemaSource`]
//! 2. Parse every file serially against one [`NamespaceContext`], deferring
//!    files whose references are defined later and retrying them for a
//!    bounded number of passes
//! 3. Per subject, in parallel: fingerprint, fetch history (with retry),
//!    resolve compatibility, and prepare bindings for passing subjects
//! 4. Merge bindings, write or check them, record fingerprints, and
//!    optionally register changed subjects
//!
//! Every subject is reported. A failed subject never hides its siblings.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codegen::{
    check_units, merge_units, write_units, BindingGenerator, Drift, GeneratedUnit, Language, NamingConfig,
    WriteStats,
};
use crate::compatibility::{CompatibilityMode, CompatibilityResolver, CompatibilityVerdict, Violation};
use crate::config::AppConfig;
use crate::discovery::{SchemaFile, SchemaSource};
use crate::error::{GenerationError, ParseError, ParseErrorKind, RegistryError, Result, SchemaError};
use crate::fingerprint::SchemaFingerprint;
use crate::parser::{parse_source, NamespaceContext};
use crate::registry::RegistryClient;
use crate::schema::SchemaGraph;

/// Output-root file recording the fingerprint each subject was last generated from
pub const FINGERPRINT_MANIFEST: &str = ".avro-gate-fingerprints.json";

// =============================================================================
// Options
// =============================================================================

/// What happens to generated bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Write changed units under the output root
    #[default]
    Write,
    /// Compare units to the output root without writing
    Check,
    /// Do not generate
    Skip,
}

/// Retry with exponential backoff for transient registry failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `op`, retrying transient errors. Returns the result and the
    /// number of attempts made.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> std::result::Result<T, RegistryError>,
    ) -> (std::result::Result<T, RegistryError>, u32) {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay(attempt);
                    warn!(what, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Registry call failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => return (result, attempt),
            }
        }
    }
}

/// Everything a build needs besides its collaborators
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub roots: Vec<PathBuf>,
    pub include: Vec<String>,
    pub output_dir: PathBuf,
    pub output_mode: OutputMode,
    pub language: Language,
    pub naming: NamingConfig,
    pub mode: CompatibilityMode,
    pub fail_on_missing_subjects: bool,
    /// Full type name to subject overrides
    pub subjects: BTreeMap<String, String>,
    pub retry: RetryPolicy,
    /// Worker threads for the per-subject phase (0 = one per core)
    pub parallelism: usize,
    pub max_resolution_passes: usize,
    /// Register changed subjects once the build has passed
    pub register: bool,
}

impl BuildOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            roots: config.source.roots.clone(),
            include: config.source.include.clone(),
            output_dir: config.output.dir.clone(),
            output_mode: OutputMode::Write,
            language: config.output.language,
            naming: NamingConfig::for_language(config.output.language).with_overrides(&config.naming),
            mode: config.compatibility.mode,
            fail_on_missing_subjects: config.compatibility.fail_on_missing_subjects,
            subjects: config.subject_mappings(),
            retry: RetryPolicy {
                attempts: config.retry.attempts,
                backoff: Duration::from_millis(config.retry.backoff_ms),
                max_backoff: Duration::from_millis(config.retry.max_backoff_ms),
            },
            parallelism: config.build.parallelism,
            max_resolution_passes: config.build.max_resolution_passes.max(1),
            register: config.registry.register_on_build,
        }
    }

    fn subject_for(&self, full_name: &str) -> String {
        self.subjects
            .get(full_name)
            .cloned()
            .unwrap_or_else(|| full_name.to_string())
    }
}

// =============================================================================
// Report
// =============================================================================

/// Result of checking one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubjectOutcome {
    /// No registered history
    New,
    /// Identical to the latest registered version
    Unchanged { version: u32 },
    Compatible { bypassed: bool, checked_versions: Vec<u32> },
    Incompatible { against_version: u32, violations: Vec<Violation> },
    /// Registry stayed unreachable after every retry
    RegistryUnavailable { attempts: u32, message: String },
    /// Registry answered with an error that retrying cannot fix
    RegistryFailed { message: String },
    /// Reaches types owned by subjects that failed
    DependencyFailed { failed: Vec<String> },
}

impl SubjectOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SubjectOutcome::Incompatible { .. }
                | SubjectOutcome::RegistryUnavailable { .. }
                | SubjectOutcome::RegistryFailed { .. }
                | SubjectOutcome::DependencyFailed { .. }
        )
    }

    /// Whether the subject would become a new registry version
    pub fn is_change(&self) -> bool {
        matches!(self, SubjectOutcome::New | SubjectOutcome::Compatible { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub subject: String,
    /// Full name of the root type, when it is named
    pub full_name: Option<String>,
    pub file: PathBuf,
    pub fingerprint: SchemaFingerprint,
    pub outcome: SubjectOutcome,
    /// Bindings regenerated for this subject in this run
    pub regenerated: bool,
    /// Version assigned by registration
    pub registered: Option<u32>,
}

/// A source file that produced no subjects
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: SchemaError,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub files: usize,
    pub subjects: Vec<SubjectReport>,
    pub file_failures: Vec<FileFailure>,
    /// Registry subjects the sources no longer define
    pub missing: Vec<String>,
    pub missing_is_fatal: bool,
    /// Listing registry subjects failed
    pub registry_error: Option<String>,
    pub generation_error: Option<GenerationError>,
    pub write_stats: WriteStats,
    pub drift: Vec<Drift>,
    /// Subjects whose registration failed, with the reason
    pub register_failures: Vec<(String, String)>,
}

impl BuildReport {
    pub fn failed_count(&self) -> usize {
        let missing = if self.missing_is_fatal { self.missing.len() } else { 0 };
        self.subjects.iter().filter(|s| s.outcome.is_failure()).count()
            + self.file_failures.len()
            + missing
            + usize::from(self.registry_error.is_some())
            + usize::from(self.generation_error.is_some())
            + self.drift.len()
            + self.register_failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectReport> {
        self.subjects.iter().find(|s| s.subject == name)
    }

    /// Every violation across all subjects
    pub fn violations(&self) -> impl Iterator<Item = (&str, &Violation)> {
        self.subjects.iter().flat_map(|s| match &s.outcome {
            SubjectOutcome::Incompatible { violations, .. } => {
                violations.iter().map(|v| (s.subject.as_str(), v)).collect::<Vec<_>>()
            }
            _ => Vec::new(),
        })
    }

    /// `Err(BuildFailed)` when anything failed
    pub fn into_result(self) -> Result<BuildReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SchemaError::BuildFailed {
                failed: self.failed_count(),
                total: self.subjects.len() + self.file_failures.len(),
            })
        }
    }
}

// =============================================================================
// Parsing Phase
// =============================================================================

/// A parsed root awaiting the per-subject phase
#[derive(Debug, Clone)]
pub struct ParsedSubject {
    pub subject: String,
    pub file: PathBuf,
    pub graph: SchemaGraph,
}

/// Output of the serial parse phase
#[derive(Debug, Default)]
pub struct ParsedSources {
    pub subjects: Vec<ParsedSubject>,
    pub failures: Vec<FileFailure>,
    pub context: NamespaceContext,
}

/// Parse files against one shared context. Files failing only on unresolved
/// references are retried after the others, up to `max_passes` passes.
pub fn parse_files(
    source: &dyn SchemaSource,
    files: &[SchemaFile],
    options: &BuildOptions,
) -> ParsedSources {
    let mut parsed = ParsedSources::default();
    let mut pending: Vec<(&SchemaFile, String)> = Vec::new();

    for file in files {
        match source.read(file) {
            Ok(text) => pending.push((file, text)),
            Err(e) => parsed.failures.push(FileFailure {
                path: file.path.clone(),
                error: e.into(),
            }),
        }
    }

    let mut graphs: Vec<(&SchemaFile, SchemaGraph)> = Vec::new();
    let mut deferred: Vec<(&SchemaFile, String, ParseError)> = Vec::new();
    for pass in 1..=options.max_resolution_passes.max(1) {
        deferred.clear();
        let before = pending.len();
        for (file, text) in pending.drain(..) {
            match parse_source(file.kind, &text, &mut parsed.context) {
                Ok(found) => graphs.extend(found.into_iter().map(|g| (file, g))),
                Err(e) if e.kind == ParseErrorKind::UnresolvedReference => {
                    debug!(path = %file.path.display(), error = %e, pass, "Deferring file");
                    deferred.push((file, text, e));
                }
                Err(e) => parsed.failures.push(FileFailure {
                    path: file.path.clone(),
                    error: e.into(),
                }),
            }
        }
        debug!(pass, parsed = before - deferred.len(), deferred = deferred.len(), "Parse pass complete");
        if deferred.is_empty() || deferred.len() == before {
            break;
        }
        pending = deferred.iter().map(|(f, t, _)| (*f, t.clone())).collect();
    }
    for (file, _, error) in deferred {
        parsed.failures.push(FileFailure {
            path: file.path.clone(),
            error: error.into(),
        });
    }

    let mut seen: BTreeMap<String, (PathBuf, SchemaFingerprint)> = BTreeMap::new();
    for (file, graph) in graphs {
        let subject = match graph.full_name() {
            Some(name) => options.subject_for(&name),
            None => file
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.path.display().to_string()),
        };
        let fingerprint = SchemaFingerprint::of(&graph);
        match seen.get(&subject) {
            Some((_, existing)) if *existing == fingerprint => continue,
            Some((first, _)) => {
                parsed.failures.push(FileFailure {
                    path: file.path.clone(),
                    error: ParseError::duplicate(
                        subject.clone(),
                        format!("subject '{}' is already defined by {}", subject, first.display()),
                    )
                    .into(),
                });
                continue;
            }
            None => {
                seen.insert(subject.clone(), (file.path.clone(), fingerprint));
            }
        }
        parsed.subjects.push(ParsedSubject {
            subject,
            file: file.path.clone(),
            graph,
        });
    }

    info!(
        subjects = parsed.subjects.len(),
        failed = parsed.failures.len(),
        types = parsed.context.len(),
        "Parsed schema sources"
    );
    parsed
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Fail every subject whose bindings need a type owned by a failed subject,
/// until no more subjects fail. A type is owned by the subject rooted at it,
/// otherwise by the first subject in parse order that reaches it.
fn withhold_dependents(subjects: &[ParsedSubject], checked: &mut [Checked]) {
    let reachable: Vec<Vec<String>> = subjects.iter().map(|s| s.graph.reachable_types()).collect();
    let mut owners: BTreeMap<String, usize> = subjects
        .iter()
        .enumerate()
        .filter_map(|(index, s)| s.graph.full_name().map(|name| (name, index)))
        .collect();
    for (index, types) in reachable.iter().enumerate() {
        for name in types {
            owners.entry(name.clone()).or_insert(index);
        }
    }

    loop {
        let failed: BTreeSet<usize> = checked
            .iter()
            .enumerate()
            .filter(|(_, c)| c.report.outcome.is_failure())
            .map(|(index, _)| index)
            .collect();

        let mut grew = false;
        for (index, types) in reachable.iter().enumerate() {
            if failed.contains(&index) {
                continue;
            }
            let blocking: BTreeSet<&str> = types
                .iter()
                .filter_map(|name| owners.get(name))
                .filter(|owner| failed.contains(*owner))
                .map(|owner| subjects[*owner].subject.as_str())
                .collect();
            if blocking.is_empty() {
                continue;
            }
            let names: Vec<String> = blocking.into_iter().map(str::to_string).collect();
            warn!(subject = %subjects[index].subject, failed = ?names, "Withholding bindings of dependent subject");
            let entry = &mut checked[index];
            entry.report.outcome = SubjectOutcome::DependencyFailed { failed: names };
            entry.report.regenerated = false;
            entry.units.clear();
            grew = true;
        }
        if !grew {
            break;
        }
    }
}

/// Per-subject result of the parallel phase
struct Checked {
    report: SubjectReport,
    units: Vec<GeneratedUnit>,
}

/// Runs builds against injected collaborators
pub struct Orchestrator<'a> {
    source: &'a dyn SchemaSource,
    registry: &'a dyn RegistryClient,
    options: BuildOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(source: &'a dyn SchemaSource, registry: &'a dyn RegistryClient, options: BuildOptions) -> Self {
        Self {
            source,
            registry,
            options,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Run a build. `Err` only for failures that prevent any subject from
    /// being checked (discovery, thread pool); everything else is in the report.
    pub fn run(&self) -> Result<BuildReport> {
        let files = self.source.discover(&self.options.roots, &self.options.include)?;
        let parsed = parse_files(self.source, &files, &self.options);

        let mut report = BuildReport {
            files: files.len(),
            file_failures: parsed.failures,
            missing_is_fatal: self.options.fail_on_missing_subjects,
            ..Default::default()
        };

        self.check_missing(&parsed.subjects, &mut report);

        let previous = self.load_manifest();
        let mut checked = self.check_subjects(&parsed.subjects, &previous)?;
        withhold_dependents(&parsed.subjects, &mut checked);

        let mut units_by_subject: Vec<(usize, Vec<GeneratedUnit>)> = Vec::new();
        for (index, checked) in checked.into_iter().enumerate() {
            report.subjects.push(checked.report);
            if !checked.units.is_empty() {
                units_by_subject.push((index, checked.units));
            }
        }

        if self.options.output_mode != OutputMode::Skip {
            self.emit(&mut report, units_by_subject, &previous);
        }

        if self.options.register && report.is_success() {
            self.register_changed(&parsed.subjects, &mut report);
        }

        for subject in &report.subjects {
            match &subject.outcome {
                SubjectOutcome::Incompatible { violations, .. } => {
                    warn!(subject = %subject.subject, violations = violations.len(), "Incompatible")
                }
                outcome if outcome.is_failure() => warn!(subject = %subject.subject, ?outcome, "Subject failed"),
                outcome => debug!(subject = %subject.subject, ?outcome, "Subject passed"),
            }
        }
        info!(
            subjects = report.subjects.len(),
            failed = report.failed_count(),
            "Build finished"
        );
        Ok(report)
    }

    fn check_missing(&self, subjects: &[ParsedSubject], report: &mut BuildReport) {
        let (listed, attempts) = self.options.retry.run("list subjects", || self.registry.subjects());
        match listed {
            Ok(registered) => {
                let local: BTreeSet<&str> = subjects.iter().map(|s| s.subject.as_str()).collect();
                report.missing = registered
                    .into_iter()
                    .filter(|s| !local.contains(s.as_str()))
                    .collect();
                if !report.missing.is_empty() {
                    warn!(missing = ?report.missing, "Registered subjects missing from sources");
                }
            }
            Err(e) => {
                report.registry_error = Some(format!("listing subjects failed after {} attempt(s): {}", attempts, e));
            }
        }
    }

    fn check_subjects(
        &self,
        subjects: &[ParsedSubject],
        previous: &BTreeMap<String, SchemaFingerprint>,
    ) -> Result<Vec<Checked>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.parallelism)
            .build()
            .map_err(|e| SchemaError::Io(std::io::Error::other(e)))?;

        let resolver = CompatibilityResolver::new(self.options.mode);
        let generator = BindingGenerator::new(self.options.language, self.options.naming.clone());
        let generate = self.options.output_mode != OutputMode::Skip;

        Ok(pool.install(|| {
            subjects
                .par_iter()
                .map(|parsed| self.check_subject(parsed, &resolver, generate.then_some(&generator), previous))
                .collect()
        }))
    }

    fn check_subject(
        &self,
        parsed: &ParsedSubject,
        resolver: &CompatibilityResolver,
        generator: Option<&BindingGenerator>,
        previous: &BTreeMap<String, SchemaFingerprint>,
    ) -> Checked {
        let fingerprint = SchemaFingerprint::of(&parsed.graph);
        let (history, attempts) = self
            .options
            .retry
            .run(&parsed.subject, || self.registry.history(&parsed.subject));

        let outcome = match history {
            Err(e) if e.is_transient() => SubjectOutcome::RegistryUnavailable {
                attempts,
                message: e.to_string(),
            },
            Err(e) => SubjectOutcome::RegistryFailed { message: e.to_string() },
            Ok(history) => match history.latest() {
                None => SubjectOutcome::New,
                Some(latest) if latest.fingerprint == fingerprint => SubjectOutcome::Unchanged {
                    version: latest.version,
                },
                Some(_) => {
                    let resolution = resolver.resolve(&parsed.graph, &history);
                    match resolution.verdict {
                        CompatibilityVerdict::Compatible => SubjectOutcome::Compatible {
                            bypassed: resolution.bypassed,
                            checked_versions: resolution.checked_versions,
                        },
                        CompatibilityVerdict::Incompatible {
                            against_version,
                            violations,
                        } => SubjectOutcome::Incompatible {
                            against_version,
                            violations,
                        },
                    }
                }
            },
        };
        debug!(subject = %parsed.subject, fingerprint = %fingerprint.short(), ?outcome, "Checked subject");

        let changed = previous.get(&parsed.subject) != Some(&fingerprint);
        let units = match generator {
            Some(generator) if !outcome.is_failure() => generator.generate_units(&parsed.graph),
            _ => Vec::new(),
        };
        let regenerated = !units.is_empty()
            && (changed
                || self.options.output_mode == OutputMode::Check
                || units.iter().any(|u| !self.options.output_dir.join(&u.path).exists()));

        Checked {
            report: SubjectReport {
                subject: parsed.subject.clone(),
                full_name: parsed.graph.full_name(),
                file: parsed.file.clone(),
                fingerprint,
                outcome,
                regenerated,
                registered: None,
            },
            units,
        }
    }

    fn emit(
        &self,
        report: &mut BuildReport,
        units_by_subject: Vec<(usize, Vec<GeneratedUnit>)>,
        previous: &BTreeMap<String, SchemaFingerprint>,
    ) {
        let mut wanted: BTreeSet<PathBuf> = BTreeSet::new();
        let mut batches = Vec::with_capacity(units_by_subject.len());
        for (index, units) in units_by_subject {
            if report.subjects[index].regenerated {
                wanted.extend(units.iter().map(|u| u.path.clone()));
            }
            batches.push(units);
        }

        let merged = match merge_units(batches) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(error = %e, "Generation conflict, no bindings written");
                for subject in &mut report.subjects {
                    subject.regenerated = false;
                }
                report.generation_error = Some(e);
                return;
            }
        };

        let root = &self.options.output_dir;
        match self.options.output_mode {
            OutputMode::Check => match check_units(root, &merged, self.options.language) {
                Ok(drift) => report.drift = drift,
                Err(e) => report.file_failures.push(FileFailure {
                    path: root.clone(),
                    error: e.into(),
                }),
            },
            OutputMode::Write => {
                let changed: Vec<GeneratedUnit> = merged.into_iter().filter(|u| wanted.contains(&u.path)).collect();
                match write_units(root, &changed) {
                    Ok(stats) => {
                        report.write_stats = stats;
                        if let Err(e) = self.save_manifest(report, previous) {
                            warn!(error = %e, "Could not record generated fingerprints");
                        }
                    }
                    Err(e) => report.file_failures.push(FileFailure {
                        path: root.clone(),
                        error: e.into(),
                    }),
                }
            }
            OutputMode::Skip => {}
        }
    }

    fn register_changed(&self, subjects: &[ParsedSubject], report: &mut BuildReport) {
        for (parsed, subject) in subjects.iter().zip(report.subjects.iter_mut()) {
            if !subject.outcome.is_change() {
                continue;
            }
            let (result, _) = self
                .options
                .retry
                .run(&parsed.subject, || self.registry.register(&parsed.subject, &parsed.graph));
            match result {
                Ok(version) => {
                    info!(subject = %parsed.subject, version, "Registered");
                    subject.registered = Some(version);
                }
                Err(e) => report.register_failures.push((parsed.subject.clone(), e.to_string())),
            }
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.options.output_dir.join(FINGERPRINT_MANIFEST)
    }

    fn load_manifest(&self) -> BTreeMap<String, SchemaFingerprint> {
        let path = self.manifest_path();
        let Ok(content) = fs::read_to_string(&path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable fingerprint manifest");
            BTreeMap::new()
        })
    }

    /// Record fingerprints of regenerated subjects, keeping other entries
    fn save_manifest(&self, report: &BuildReport, previous: &BTreeMap<String, SchemaFingerprint>) -> Result<()> {
        let mut manifest = previous.clone();
        for subject in report.subjects.iter().filter(|s| s.regenerated) {
            manifest.insert(subject.subject.clone(), subject.fingerprint);
        }
        if manifest == *previous {
            return Ok(());
        }
        write_json(&self.manifest_path(), &manifest)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FsSchemaSource;
    use crate::registry::{MemoryRegistry, SubjectHistory};
    use tempfile::{tempdir, TempDir};

    const USER_V1: &str = r#"{"type":"record","name":"User","namespace":"com.acme","fields":[
        {"name":"id","type":"int"},{"name":"name","type":"string"}]}"#;

    fn workspace(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (name, text) in files {
            let path = dir.path().join("schemas").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        dir
    }

    fn options(dir: &Path) -> BuildOptions {
        let mut config = AppConfig::default();
        config.source.roots = vec![dir.join("schemas")];
        config.output.dir = dir.join("out");
        config.compatibility.mode = CompatibilityMode::Backward;
        let mut options = BuildOptions::from_config(&config);
        options.retry = RetryPolicy::immediate(3);
        options.parallelism = 2;
        options
    }

    fn parse(text: &str) -> SchemaGraph {
        crate::parser::parse_schema(text, &mut NamespaceContext::new()).unwrap()
    }

    #[test]
    fn test_new_subject_generates_and_records_fingerprint() {
        let dir = workspace(&[("user.avsc", USER_V1)]);
        let registry = MemoryRegistry::new();
        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();

        assert!(report.is_success());
        let user = report.subject("com.acme.User").unwrap();
        assert_eq!(user.outcome, SubjectOutcome::New);
        assert!(user.regenerated);
        assert!(dir.path().join("out/com/acme/user.rs").exists());
        assert!(dir.path().join("out").join(FINGERPRINT_MANIFEST).exists());

        // Second run: nothing changed, nothing rewritten
        let again = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();
        assert!(!again.subject("com.acme.User").unwrap().regenerated);
        assert_eq!(again.write_stats, WriteStats::default());
    }

    #[test]
    fn test_incompatible_subject_fails_without_output_but_siblings_report() {
        let dir = workspace(&[
            ("user.avsc", r#"{"type":"record","name":"User","namespace":"com.acme","fields":[{"name":"id","type":"int"}]}"#),
            ("order.avsc", r#"{"type":"record","name":"Order","namespace":"com.acme","fields":[{"name":"id","type":"long"}]}"#),
        ]);
        let registry = MemoryRegistry::new();
        registry.insert_history(SubjectHistory::from_schemas("com.acme.User", vec![parse(USER_V1)])).unwrap();

        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();

        assert!(!report.is_success());
        let user = report.subject("com.acme.User").unwrap();
        let SubjectOutcome::Incompatible { violations, .. } = &user.outcome else {
            panic!("expected incompatible, got {:?}", user.outcome);
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "name");
        assert!(!dir.path().join("out/com/acme/user.rs").exists());

        assert_eq!(report.subject("com.acme.Order").unwrap().outcome, SubjectOutcome::New);
        assert!(dir.path().join("out/com/acme/order.rs").exists());
        assert!(matches!(
            report.into_result(),
            Err(SchemaError::BuildFailed { failed: 1, total: 2 })
        ));
    }

    #[test]
    fn test_subject_reaching_failed_subject_is_withheld() {
        let dir = workspace(&[
            ("user.avsc", r#"{"type":"record","name":"User","namespace":"com.acme","fields":[{"name":"id","type":"int"}]}"#),
            ("order.avsc", r#"{"type":"record","name":"Order","namespace":"com.acme","fields":[{"name":"buyer","type":"com.acme.User"}]}"#),
            ("invoice.avsc", r#"{"type":"record","name":"Invoice","namespace":"com.acme","fields":[{"name":"order","type":"com.acme.Order"}]}"#),
            ("sku.avsc", r#"{"type":"record","name":"Sku","namespace":"com.acme","fields":[{"name":"code","type":"string"}]}"#),
        ]);
        let registry = MemoryRegistry::new();
        registry.insert_history(SubjectHistory::from_schemas("com.acme.User", vec![parse(USER_V1)])).unwrap();

        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();

        assert!(matches!(
            report.subject("com.acme.User").unwrap().outcome,
            SubjectOutcome::Incompatible { .. }
        ));
        let order = report.subject("com.acme.Order").unwrap();
        assert_eq!(
            order.outcome,
            SubjectOutcome::DependencyFailed {
                failed: vec!["com.acme.User".to_string()]
            }
        );
        assert!(!order.regenerated);
        assert_eq!(
            report.subject("com.acme.Invoice").unwrap().outcome,
            SubjectOutcome::DependencyFailed {
                failed: vec!["com.acme.User".to_string()]
            }
        );
        assert_eq!(report.subject("com.acme.Sku").unwrap().outcome, SubjectOutcome::New);

        let out = dir.path().join("out/com/acme");
        assert!(!out.join("user.rs").exists());
        assert!(!out.join("order.rs").exists());
        assert!(!out.join("invoice.rs").exists());
        assert!(out.join("sku.rs").exists());
        assert_eq!(report.failed_count(), 3);
    }

    #[test]
    fn test_transient_outage_is_retried() {
        let dir = workspace(&[("user.avsc", USER_V1)]);
        let registry = MemoryRegistry::new();
        registry.fail_next(2);
        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();
        assert!(report.is_success(), "{:?}", report);
    }

    #[test]
    fn test_persistent_outage_is_not_treated_as_new() {
        let dir = workspace(&[("user.avsc", USER_V1)]);
        let registry = MemoryRegistry::new();
        registry.fail_next(100);
        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();

        assert!(!report.is_success());
        assert!(report.registry_error.is_some());
        assert!(matches!(
            report.subject("com.acme.User").unwrap().outcome,
            SubjectOutcome::RegistryUnavailable { attempts: 3, .. }
        ));
        assert!(!dir.path().join("out/com/acme/user.rs").exists());
    }

    #[test]
    fn test_forward_reference_across_files_resolved_by_retry() {
        // "a_order.avsc" sorts first but references a type defined later
        let dir = workspace(&[
            ("a_order.avsc", r#"{"type":"record","name":"Order","namespace":"com.acme","fields":[{"name":"user","type":"com.acme.User"}]}"#),
            ("b_user.avsc", USER_V1),
        ]);
        let registry = MemoryRegistry::new();
        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();
        assert!(report.file_failures.is_empty(), "{:?}", report.file_failures);
        assert_eq!(report.subjects.len(), 2);
    }

    #[test]
    fn test_unresolvable_reference_fails_file_only() {
        let dir = workspace(&[
            ("order.avsc", r#"{"type":"record","name":"Order","fields":[{"name":"user","type":"Usr"}]}"#),
            ("user.avsc", USER_V1),
        ]);
        let registry = MemoryRegistry::new();
        let source = FsSchemaSource::new();
        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();
        assert_eq!(report.file_failures.len(), 1);
        assert_eq!(report.subjects.len(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_missing_subject_fails_run() {
        let dir = workspace(&[("user.avsc", USER_V1)]);
        let registry = MemoryRegistry::new();
        registry.insert_history(SubjectHistory::from_schemas("com.acme.Legacy", vec![parse(r#""string""#)])).unwrap();
        let source = FsSchemaSource::new();

        let report = Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();
        assert_eq!(report.missing, vec!["com.acme.Legacy".to_string()]);
        assert!(!report.is_success());

        let mut lenient = options(dir.path());
        lenient.fail_on_missing_subjects = false;
        assert!(Orchestrator::new(&source, &registry, lenient).run().unwrap().is_success());
    }

    #[test]
    fn test_register_after_successful_build() {
        let dir = workspace(&[("user.avsc", USER_V1)]);
        let registry = MemoryRegistry::new();
        let source = FsSchemaSource::new();
        let mut opts = options(dir.path());
        opts.register = true;
        opts.output_mode = OutputMode::Skip;

        let report = Orchestrator::new(&source, &registry, opts.clone()).run().unwrap();
        assert_eq!(report.subject("com.acme.User").unwrap().registered, Some(1));

        let again = Orchestrator::new(&source, &registry, opts).run().unwrap();
        assert_eq!(
            again.subject("com.acme.User").unwrap().outcome,
            SubjectOutcome::Unchanged { version: 1 }
        );
    }

    #[test]
    fn test_check_mode_reports_drift() {
        let dir = workspace(&[("user.avsc", USER_V1)]);
        let registry = MemoryRegistry::new();
        let source = FsSchemaSource::new();
        let mut opts = options(dir.path());
        opts.output_mode = OutputMode::Check;

        let report = Orchestrator::new(&source, &registry, opts.clone()).run().unwrap();
        assert_eq!(report.drift.len(), 1);
        assert!(!dir.path().join("out/com/acme/user.rs").exists());

        Orchestrator::new(&source, &registry, options(dir.path())).run().unwrap();
        assert!(Orchestrator::new(&source, &registry, opts).run().unwrap().is_success());
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy {
            attempts: 10,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));
    }
}
