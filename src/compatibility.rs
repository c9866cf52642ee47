//! Schema compatibility checking
//!
//! Decides whether a candidate schema may be registered after a subject's
//! history under a compatibility mode, and reports every violation found.
//!
//! A comparison always has a writer and a reader side. Backward checks read
//! data written with the old schema using the new one; forward checks swap
//! the roles. Within one comparison violations form a set: a field can
//! carry several reasons and nothing short-circuits.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::registry::SubjectHistory;
use crate::schema::{Primitive, SchemaGraph, SchemaNode};

/// Compatibility policy for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    /// No checking at all
    None,
    Backward,
    Forward,
    Full,
    BackwardTransitive,
    ForwardTransitive,
    #[default]
    FullTransitive,
}

impl CompatibilityMode {
    pub fn is_backward(&self) -> bool {
        matches!(
            self,
            Self::Backward | Self::Full | Self::BackwardTransitive | Self::FullTransitive
        )
    }

    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Self::Forward | Self::Full | Self::ForwardTransitive | Self::FullTransitive
        )
    }

    /// Transitive modes check every prior version, not just the latest
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            Self::BackwardTransitive | Self::ForwardTransitive | Self::FullTransitive
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Backward => "BACKWARD",
            Self::Forward => "FORWARD",
            Self::Full => "FULL",
            Self::BackwardTransitive => "BACKWARD_TRANSITIVE",
            Self::ForwardTransitive => "FORWARD_TRANSITIVE",
            Self::FullTransitive => "FULL_TRANSITIVE",
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "NONE" => Ok(Self::None),
            "BACKWARD" => Ok(Self::Backward),
            "FORWARD" => Ok(Self::Forward),
            "FULL" => Ok(Self::Full),
            "BACKWARD_TRANSITIVE" => Ok(Self::BackwardTransitive),
            "FORWARD_TRANSITIVE" => Ok(Self::ForwardTransitive),
            "FULL_TRANSITIVE" => Ok(Self::FullTransitive),
            _ => Err(format!("unknown compatibility mode '{}'", s)),
        }
    }
}

/// Why a comparison failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    /// An old field without a default is missing from the new schema
    FieldRemovedWithoutDefault,
    /// A new field without a default is missing from the old schema
    FieldAddedWithoutDefault,
    /// The reading side has a narrower numeric type than the writing side
    TypeNarrowed,
    /// The types cannot be resolved against each other at all
    TypeMismatch,
    EnumSymbolRemoved,
    EnumSymbolAdded,
    UnionBranchRemoved,
    UnionBranchAdded,
    /// Named types differ in name and no alias bridges them
    NameMismatch,
    FixedSizeMismatch,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FieldRemovedWithoutDefault => "field removed without default",
            Self::FieldAddedWithoutDefault => "field added without default",
            Self::TypeNarrowed => "type narrowed",
            Self::TypeMismatch => "type mismatch",
            Self::EnumSymbolRemoved => "enum symbol removed",
            Self::EnumSymbolAdded => "enum symbol added",
            Self::UnionBranchRemoved => "union branch removed",
            Self::UnionBranchAdded => "union branch added",
            Self::NameMismatch => "name mismatch",
            Self::FixedSizeMismatch => "fixed size mismatch",
        };
        f.write_str(s)
    }
}

/// Which check produced a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Old data read with the new schema
    Backward,
    /// New data read with the old schema
    Forward,
}

/// One incompatibility
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    /// Field path from the root record (e.g. `address.street`, `tags[]`);
    /// empty for the root itself
    pub path: String,
    pub reason: ViolationReason,
    pub direction: Direction,
    /// Human-readable description
    pub detail: String,
}

impl Violation {
    pub fn display_path(&self) -> &str {
        if self.path.is_empty() {
            "<root>"
        } else {
            &self.path
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.display_path(), self.reason, self.detail)
    }
}

/// Outcome of resolving a candidate against a history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CompatibilityVerdict {
    Compatible,
    Incompatible {
        /// The prior version the failing comparison ran against
        against_version: u32,
        violations: Vec<Violation>,
    },
}

impl CompatibilityVerdict {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Compatible => &[],
            Self::Incompatible { violations, .. } => violations,
        }
    }
}

/// Verdict plus how it was reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub verdict: CompatibilityVerdict,
    pub mode: CompatibilityMode,
    /// Mode `None`: no comparison ran
    pub bypassed: bool,
    /// Prior versions compared, in comparison order
    pub checked_versions: Vec<u32>,
}

/// Compatibility resolver for one mode
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityResolver {
    mode: CompatibilityMode,
}

impl CompatibilityResolver {
    pub fn new(mode: CompatibilityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CompatibilityMode {
        self.mode
    }

    /// Resolve a candidate against a subject's history.
    ///
    /// Non-transitive modes compare against the latest version only.
    /// Transitive modes walk the history newest first and stop at the
    /// first failing comparison, whose violations are reported in full.
    pub fn resolve(&self, candidate: &SchemaGraph, history: &SubjectHistory) -> Resolution {
        if self.mode == CompatibilityMode::None {
            warn!(subject = %history.subject(), "Compatibility mode NONE: check bypassed");
            return Resolution {
                verdict: CompatibilityVerdict::Compatible,
                mode: self.mode,
                bypassed: true,
                checked_versions: Vec::new(),
            };
        }

        let priors: Vec<_> = if self.mode.is_transitive() {
            history.versions().iter().rev().collect()
        } else {
            history.latest().into_iter().collect()
        };

        let mut checked_versions = Vec::with_capacity(priors.len());
        for prior in priors {
            checked_versions.push(prior.version);
            let violations = self.compare(&prior.schema, candidate);
            debug!(
                subject = %history.subject(),
                version = prior.version,
                violations = violations.len(),
                "Compared against prior version"
            );
            if !violations.is_empty() {
                return Resolution {
                    verdict: CompatibilityVerdict::Incompatible {
                        against_version: prior.version,
                        violations,
                    },
                    mode: self.mode,
                    bypassed: false,
                    checked_versions,
                };
            }
        }

        Resolution {
            verdict: CompatibilityVerdict::Compatible,
            mode: self.mode,
            bypassed: false,
            checked_versions,
        }
    }

    /// All violations between one prior schema and the candidate under
    /// this mode's directions. Empty means compatible.
    pub fn compare(&self, prior: &SchemaGraph, candidate: &SchemaGraph) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.mode.is_backward() {
            let mut cmp = Comparison::new(prior, candidate, Direction::Backward);
            cmp.check(prior.root(), candidate.root(), "");
            violations.extend(cmp.violations);
        }
        if self.mode.is_forward() {
            let mut cmp = Comparison::new(candidate, prior, Direction::Forward);
            cmp.check(candidate.root(), prior.root(), "");
            violations.extend(cmp.violations);
        }
        dedup(violations)
    }
}

fn dedup(violations: Vec<Violation>) -> Vec<Violation> {
    let mut seen = HashSet::new();
    violations.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

// =============================================================================
// Writer/reader comparison
// =============================================================================

struct Comparison<'a> {
    writer: &'a SchemaGraph,
    reader: &'a SchemaGraph,
    direction: Direction,
    /// Named pairs already being compared higher up the stack
    in_progress: HashSet<(String, String)>,
    violations: Vec<Violation>,
}

impl<'a> Comparison<'a> {
    fn new(writer: &'a SchemaGraph, reader: &'a SchemaGraph, direction: Direction) -> Self {
        Self {
            writer,
            reader,
            direction,
            in_progress: HashSet::new(),
            violations: Vec::new(),
        }
    }

    /// Old/new labels for the writer and reader of this direction
    fn sides(&self) -> (&'static str, &'static str) {
        match self.direction {
            Direction::Backward => ("old", "new"),
            Direction::Forward => ("new", "old"),
        }
    }

    fn push(&mut self, path: &str, reason: ViolationReason, detail: String) {
        self.violations.push(Violation {
            path: path.to_string(),
            reason,
            direction: self.direction,
            detail,
        });
    }

    /// Whether `writer` data is readable as `reader` without any violation
    fn readable(&self, writer: &SchemaNode, reader: &SchemaNode) -> bool {
        let mut trial = Comparison {
            writer: self.writer,
            reader: self.reader,
            direction: self.direction,
            in_progress: self.in_progress.clone(),
            violations: Vec::new(),
        };
        trial.check(writer, reader, "");
        trial.violations.is_empty()
    }

    fn check(&mut self, writer: &SchemaNode, reader: &SchemaNode, path: &str) {
        let w = self.writer.resolve(writer);
        let r = self.reader.resolve(reader);

        match (w, r) {
            (SchemaNode::Union(wu), _) => {
                for branch in wu.branches() {
                    self.check_branch(branch, r, path);
                }
            }
            (_, SchemaNode::Union(_)) => self.check_branch(w, r, path),
            _ => self.check_plain(w, r, path),
        }
    }

    /// One writer branch where either side is a union
    fn check_branch(&mut self, branch: &SchemaNode, reader: &SchemaNode, path: &str) {
        let branch = self.writer.resolve(branch);
        let candidates: Vec<&SchemaNode> = match reader {
            SchemaNode::Union(ru) => ru.branches().iter().map(|b| self.reader.resolve(b)).collect(),
            other => vec![other],
        };

        // Same type on both sides: recurse so nested violations surface
        if let Some(same) = candidates.iter().find(|c| same_kind(branch, c)) {
            self.check_plain(branch, same, path);
            return;
        }
        if candidates.iter().any(|c| self.readable(branch, c)) {
            return;
        }

        let (writer_side, reader_side) = self.sides();
        let narrowed = candidates.iter().any(|c| is_narrowing(branch, c));
        if narrowed {
            self.push(
                path,
                ViolationReason::TypeNarrowed,
                format!(
                    "{} {} cannot be read as {} {}",
                    writer_side,
                    branch.kind_label(),
                    reader_side,
                    reader.kind_label()
                ),
            );
        } else {
            let reason = match self.direction {
                Direction::Backward => ViolationReason::UnionBranchRemoved,
                Direction::Forward => ViolationReason::UnionBranchAdded,
            };
            self.push(
                path,
                reason,
                format!(
                    "{} branch {} has no counterpart in the {} schema",
                    writer_side,
                    branch.kind_label(),
                    reader_side
                ),
            );
        }
    }

    fn check_plain(&mut self, w: &SchemaNode, r: &SchemaNode, path: &str) {
        let (writer_side, reader_side) = self.sides();
        match (w, r) {
            (SchemaNode::Primitive(wp), SchemaNode::Primitive(rp)) => {
                if wp == rp || promotes(*wp, *rp) {
                    return;
                }
                let reason = if promotes(*rp, *wp) {
                    ViolationReason::TypeNarrowed
                } else {
                    ViolationReason::TypeMismatch
                };
                self.push(
                    path,
                    reason,
                    format!("{} type {} cannot be read as {} type {}", writer_side, wp, reader_side, rp),
                );
            }
            (SchemaNode::Record(wr), SchemaNode::Record(rr)) => {
                if !self.names_match(w, r, path) {
                    return;
                }
                let key = (wr.name.fullname(), rr.name.fullname());
                if !self.in_progress.insert(key.clone()) {
                    return;
                }

                for wf in &wr.fields {
                    let field_path = join(path, &wf.name);
                    let matched = rr
                        .fields
                        .iter()
                        .find(|rf| rf.answers_to(&wf.name) || wf.answers_to(&rf.name));
                    match matched {
                        Some(rf) => self.check(&wf.schema, &rf.schema, &field_path),
                        None if wf.default.is_some() => {}
                        None => {
                            let reason = match self.direction {
                                Direction::Backward => ViolationReason::FieldRemovedWithoutDefault,
                                Direction::Forward => ViolationReason::FieldAddedWithoutDefault,
                            };
                            self.push(
                                &field_path,
                                reason,
                                format!(
                                    "{} field '{}' has no default and is missing from the {} schema",
                                    writer_side, wf.name, reader_side
                                ),
                            );
                        }
                    }
                }

                self.in_progress.remove(&key);
            }
            (SchemaNode::Enum(we), SchemaNode::Enum(re)) => {
                if !self.names_match(w, r, path) {
                    return;
                }
                if re.default.is_some() {
                    return;
                }
                let reason = match self.direction {
                    Direction::Backward => ViolationReason::EnumSymbolRemoved,
                    Direction::Forward => ViolationReason::EnumSymbolAdded,
                };
                for symbol in we.symbols.iter().filter(|s| !re.symbols.contains(s)) {
                    self.push(
                        path,
                        reason,
                        format!(
                            "{} symbol '{}' of {} is unknown to the {} schema, which has no default symbol",
                            writer_side, symbol, we.name, reader_side
                        ),
                    );
                }
            }
            (SchemaNode::Fixed(wf), SchemaNode::Fixed(rf)) => {
                if !self.names_match(w, r, path) {
                    return;
                }
                if wf.size != rf.size {
                    self.push(
                        path,
                        ViolationReason::FixedSizeMismatch,
                        format!("{} size {} differs from {} size {}", writer_side, wf.size, reader_side, rf.size),
                    );
                }
            }
            (SchemaNode::Array(wi), SchemaNode::Array(ri)) => self.check(wi, ri, &format!("{}[]", path)),
            (SchemaNode::Map(wv), SchemaNode::Map(rv)) => self.check(wv, rv, &format!("{}{{}}", path)),
            (SchemaNode::Union(_), _) | (_, SchemaNode::Union(_)) => self.check(w, r, path),
            _ => self.push(
                path,
                ViolationReason::TypeMismatch,
                format!(
                    "{} {} cannot be read as {} {}",
                    writer_side,
                    w.kind_label(),
                    reader_side,
                    r.kind_label()
                ),
            ),
        }
    }

    /// Named types match on short name, or when a reader alias names the writer
    fn names_match(&mut self, w: &SchemaNode, r: &SchemaNode, path: &str) -> bool {
        let (Some(wn), Some(rn)) = (w.name(), r.name()) else {
            return false;
        };
        let writer_full = wn.fullname();
        let matched = wn.name == rn.name
            || r
                .aliases()
                .iter()
                .any(|a| *a == writer_full || a.rsplit('.').next() == Some(wn.name.as_str()));
        if !matched {
            let (writer_side, reader_side) = self.sides();
            self.push(
                path,
                ViolationReason::NameMismatch,
                format!("{} type {} does not match {} type {}", writer_side, wn, reader_side, rn),
            );
        }
        matched
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

/// Avro schema-resolution promotions (writer → reader)
fn promotes(writer: Primitive, reader: Primitive) -> bool {
    use Primitive::*;
    matches!(
        (writer, reader),
        (Int, Long)
            | (Int, Float)
            | (Int, Double)
            | (Long, Float)
            | (Long, Double)
            | (Float, Double)
            | (String, Bytes)
            | (Bytes, String)
    )
}

fn is_narrowing(writer: &SchemaNode, reader: &SchemaNode) -> bool {
    match (writer, reader) {
        (SchemaNode::Primitive(w), SchemaNode::Primitive(r)) => promotes(*r, *w) && !promotes(*w, *r),
        _ => false,
    }
}

/// Same structural kind, and for named types the same short name
fn same_kind(a: &SchemaNode, b: &SchemaNode) -> bool {
    match (a, b) {
        (SchemaNode::Primitive(x), SchemaNode::Primitive(y)) => x == y,
        (SchemaNode::Array(_), SchemaNode::Array(_)) | (SchemaNode::Map(_), SchemaNode::Map(_)) => true,
        (SchemaNode::Record(_), SchemaNode::Record(_))
        | (SchemaNode::Enum(_), SchemaNode::Enum(_))
        | (SchemaNode::Fixed(_), SchemaNode::Fixed(_)) => {
            let b_aliases = b.aliases();
            match (a.name(), b.name()) {
                (Some(x), Some(y)) => {
                    x.name == y.name
                        || b_aliases
                            .iter()
                            .any(|alias| *alias == x.fullname() || alias.rsplit('.').next() == Some(x.name.as_str()))
                }
                _ => false,
            }
        }
        _ => false,
    }
}
