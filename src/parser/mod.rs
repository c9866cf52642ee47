//! Schema Parser
//!
//! Parses Avro JSON schemas (`.avsc`), JSON protocols (`.avpr`) and Avro IDL
//! (`.avdl`) into [`SchemaGraph`]s.
//!
//! Parsing is transactional against the [`NamespaceContext`]: new named
//! types are staged while a document is parsed, validated (cycles,
//! defaults), and committed only if the whole document is valid. A failed
//! parse leaves the context untouched, so a caller can retry a document
//! after its forward references have been defined by other files.

pub mod context;
pub mod idl;

pub use context::NamespaceContext;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{ParseError, ParseErrorKind};
use crate::fingerprint::canonical_definition;
use crate::graph::TypeGraph;
use crate::schema::{
    reachable_from, EnumSchema, Field, FixedSchema, Name, Primitive, RecordSchema, SchemaGraph,
    SchemaNode, TypeTable, UnionSchema,
};

// =============================================================================
// Source Kinds
// =============================================================================

/// Which parser entry point a file uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// `.avsc`: a single schema definition
    Schema,
    /// `.avpr`: JSON protocol with a `types` array
    Protocol,
    /// `.avdl`: Avro IDL protocol
    Idl,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "avsc" => Some(SourceKind::Schema),
            "avpr" => Some(SourceKind::Protocol),
            "avdl" => Some(SourceKind::Idl),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceKind::Schema => "avsc",
            SourceKind::Protocol => "avpr",
            SourceKind::Idl => "avdl",
        }
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Parse one JSON schema document
pub fn parse_schema(text: &str, ctx: &mut NamespaceContext) -> Result<SchemaGraph, ParseError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ParseError::malformed(format!("{}:{}", e.line(), e.column()), e.to_string()))?;
    parse_schema_value(&value, ctx)
}

/// Parse an already-decoded JSON schema
pub fn parse_schema_value(value: &Value, ctx: &mut NamespaceContext) -> Result<SchemaGraph, ParseError> {
    let mut parser = DocumentParser::new(ctx, None);
    let root = parser.parse_node(value, None, "<root>")?;
    let mut graphs = parser.finish(vec![root])?;
    Ok(graphs.remove(0))
}

/// Parse a JSON protocol; returns one graph per top-level named type
pub fn parse_protocol(text: &str, ctx: &mut NamespaceContext) -> Result<Vec<SchemaGraph>, ParseError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ParseError::malformed(format!("{}:{}", e.line(), e.column()), e.to_string()))?;
    parse_protocol_value(&value, ctx)
}

/// Parse an Avro IDL protocol; returns one graph per declared named type
pub fn parse_idl(text: &str, ctx: &mut NamespaceContext) -> Result<Vec<SchemaGraph>, ParseError> {
    let protocol = idl::lower_to_protocol(text)?;
    parse_protocol_value(&protocol, ctx)
}

/// Dispatch on the source kind
pub fn parse_source(kind: SourceKind, text: &str, ctx: &mut NamespaceContext) -> Result<Vec<SchemaGraph>, ParseError> {
    match kind {
        SourceKind::Schema => parse_schema(text, ctx).map(|g| vec![g]),
        SourceKind::Protocol => parse_protocol(text, ctx),
        SourceKind::Idl => parse_idl(text, ctx),
    }
}

fn parse_protocol_value(value: &Value, ctx: &mut NamespaceContext) -> Result<Vec<SchemaGraph>, ParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::malformed("<protocol>", "protocol must be a JSON object"))?;
    let protocol = obj
        .get("protocol")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::malformed("<protocol>", "missing 'protocol' name"))?;
    let namespace = obj
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string);

    let types = match obj.get("types") {
        None => return Ok(Vec::new()),
        Some(Value::Array(types)) => types,
        Some(_) => return Err(ParseError::malformed(protocol, "'types' must be an array")),
    };

    let mut parser = DocumentParser::new(ctx, namespace.clone());
    let mut roots = Vec::with_capacity(types.len());
    for (i, ty) in types.iter().enumerate() {
        let location = format!("{}.types[{}]", protocol, i);
        let root = parser.parse_node(ty, namespace.as_deref(), &location)?;
        if root.name().is_none() {
            return Err(ParseError::malformed(location, "protocol types must be named"));
        }
        roots.push(root);
    }
    parser.finish(roots)
}

// =============================================================================
// Document Parser
// =============================================================================

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"))
}

fn namespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid namespace regex")
    })
}

/// Parses one document against a read-only view of the context, staging
/// new definitions until [`DocumentParser::finish`]
struct DocumentParser<'c> {
    ctx: &'c mut NamespaceContext,
    /// Protocol namespace, consulted when resolving short names
    default_ns: Option<String>,
    staged: TypeTable,
    /// Names whose definition is still being parsed (legal self-references)
    in_progress: HashSet<String>,
    /// Where each staged type was defined, for error locations
    locations: BTreeMap<String, String>,
    /// Staged types that redefine a context type; must match it exactly
    redefinitions: Vec<String>,
}

impl<'c> DocumentParser<'c> {
    fn new(ctx: &'c mut NamespaceContext, default_ns: Option<String>) -> Self {
        Self {
            ctx,
            default_ns,
            staged: TypeTable::new(),
            in_progress: HashSet::new(),
            locations: BTreeMap::new(),
            redefinitions: Vec::new(),
        }
    }

    fn is_known(&self, fullname: &str) -> bool {
        self.in_progress.contains(fullname) || self.staged.contains_key(fullname) || self.ctx.contains(fullname)
    }

    fn definition(&self, fullname: &str) -> Option<&SchemaNode> {
        self.staged
            .get(fullname)
            .or_else(|| self.ctx.get(fullname))
            .map(|n| n.as_ref())
    }

    fn parse_node(&mut self, value: &Value, ns: Option<&str>, loc: &str) -> Result<SchemaNode, ParseError> {
        match value {
            Value::String(name) => self.resolve_name(name, ns, loc),
            Value::Array(branches) => self.parse_union(branches, ns, loc),
            Value::Object(obj) => {
                let ty = obj
                    .get("type")
                    .ok_or_else(|| ParseError::malformed(loc, "schema object has no 'type'"))?;
                match ty {
                    Value::String(t) => match t.as_str() {
                        "record" | "error" => self.parse_record(obj, ns, loc, t == "error"),
                        "enum" => self.parse_enum(obj, ns, loc),
                        "fixed" => self.parse_fixed(obj, ns, loc),
                        "array" => {
                            let items = obj
                                .get("items")
                                .ok_or_else(|| ParseError::malformed(loc, "array has no 'items'"))?;
                            let items = self.parse_node(items, ns, &format!("{}.items", loc))?;
                            Ok(SchemaNode::Array(Box::new(items)))
                        }
                        "map" => {
                            let values = obj
                                .get("values")
                                .ok_or_else(|| ParseError::malformed(loc, "map has no 'values'"))?;
                            let values = self.parse_node(values, ns, &format!("{}.values", loc))?;
                            Ok(SchemaNode::Map(Box::new(values)))
                        }
                        // {"type": "string"} and {"type": "com.acme.Ref"}
                        other => self.resolve_name(other, ns, loc),
                    },
                    nested => self.parse_node(nested, ns, &format!("{}.type", loc)),
                }
            }
            other => Err(ParseError::malformed(loc, format!("unexpected schema value {}", other))),
        }
    }

    fn resolve_name(&mut self, name: &str, ns: Option<&str>, loc: &str) -> Result<SchemaNode, ParseError> {
        if let Some(p) = Primitive::from_name(name) {
            return Ok(SchemaNode::Primitive(p));
        }

        let mut candidates = Vec::with_capacity(3);
        if name.contains('.') {
            candidates.push(name.to_string());
        } else {
            if let Some(ns) = ns {
                candidates.push(format!("{}.{}", ns, name));
            }
            if let Some(default_ns) = &self.default_ns {
                candidates.push(format!("{}.{}", default_ns, name));
            }
            candidates.push(name.to_string());
        }

        for candidate in &candidates {
            if self.is_known(candidate) {
                return Ok(SchemaNode::Reference(Name::parse(candidate)));
            }
        }

        let staged_names: Vec<&str> = self
            .staged
            .keys()
            .map(String::as_str)
            .chain(self.in_progress.iter().map(String::as_str))
            .collect();
        let hint = self
            .ctx
            .suggest(name, staged_names)
            .map(|s| format!(" (did you mean '{}'?)", s))
            .unwrap_or_default();
        Err(ParseError::unresolved(loc, format!("unknown type '{}'{}", name, hint)))
    }

    fn parse_union(&mut self, branches: &[Value], ns: Option<&str>, loc: &str) -> Result<SchemaNode, ParseError> {
        let mut nodes = Vec::with_capacity(branches.len());
        for (i, branch) in branches.iter().enumerate() {
            nodes.push(self.parse_node(branch, ns, &format!("{}[{}]", loc, i))?);
        }
        UnionSchema::new(nodes)
            .map(SchemaNode::Union)
            .map_err(|msg| ParseError::malformed(loc, msg))
    }

    /// Name, namespace and aliases shared by record/enum/fixed
    fn named_header(
        &self,
        obj: &serde_json::Map<String, Value>,
        ns: Option<&str>,
        loc: &str,
    ) -> Result<(Name, Option<String>, Vec<String>), ParseError> {
        let raw = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::malformed(loc, "named type has no 'name'"))?;

        let explicit_ns = match obj.get("namespace") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ParseError::malformed(loc, "'namespace' must be a string")),
        };

        let name = if raw.contains('.') {
            Name::parse(raw)
        } else {
            let namespace = match explicit_ns {
                Some(ns) => Some(ns),
                None => ns.map(str::to_string),
            };
            Name::new(raw, namespace)
        };

        if !name_pattern().is_match(&name.name) {
            return Err(ParseError::malformed(loc, format!("invalid name '{}'", name.name)));
        }
        if let Some(ns) = &name.namespace {
            if !namespace_pattern().is_match(ns) {
                return Err(ParseError::malformed(loc, format!("invalid namespace '{}'", ns)));
            }
        }

        let doc = obj.get("doc").and_then(Value::as_str).map(str::to_string);
        let aliases = parse_aliases(obj.get("aliases"), name.namespace.as_deref(), loc)?;
        Ok((name, doc, aliases))
    }

    /// Reserve a full name before parsing the body, so the body may refer to it
    fn begin_definition(&mut self, name: &Name, loc: &str) -> Result<String, ParseError> {
        let fullname = name.fullname();
        if Primitive::from_name(&name.name).is_some() && name.namespace.is_none() {
            return Err(ParseError::duplicate(loc, format!("'{}' is a primitive type name", fullname)));
        }
        if self.in_progress.contains(&fullname) || self.staged.contains_key(&fullname) {
            return Err(ParseError::duplicate(loc, format!("type '{}' is defined more than once", fullname)));
        }
        if self.ctx.contains(&fullname) {
            self.redefinitions.push(fullname.clone());
        }
        self.in_progress.insert(fullname.clone());
        self.locations.insert(fullname.clone(), loc.to_string());
        Ok(fullname)
    }

    fn end_definition(&mut self, fullname: String, def: SchemaNode) -> SchemaNode {
        self.in_progress.remove(&fullname);
        let name = def.name().cloned().unwrap_or_else(|| Name::parse(&fullname));
        self.staged.insert(fullname, Arc::new(def));
        SchemaNode::Reference(name)
    }

    fn parse_record(
        &mut self,
        obj: &serde_json::Map<String, Value>,
        ns: Option<&str>,
        loc: &str,
        is_error: bool,
    ) -> Result<SchemaNode, ParseError> {
        let (name, doc, aliases) = self.named_header(obj, ns, loc)?;
        let fullname = self.begin_definition(&name, loc)?;
        let loc = fullname.clone();

        let raw_fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::malformed(&loc, "record has no 'fields' array"))?;

        let field_ns = name.namespace.clone();
        let mut fields: Vec<Field> = Vec::with_capacity(raw_fields.len());
        for (i, raw) in raw_fields.iter().enumerate() {
            let floc = format!("{}.fields[{}]", loc, i);
            let fobj = raw
                .as_object()
                .ok_or_else(|| ParseError::malformed(&floc, "field must be an object"))?;
            let fname = fobj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ParseError::malformed(&floc, "field has no 'name'"))?;
            if !name_pattern().is_match(fname) {
                return Err(ParseError::malformed(&floc, format!("invalid field name '{}'", fname)));
            }
            if fields.iter().any(|f| f.name == fname) {
                return Err(ParseError::duplicate(&floc, format!("field '{}' is declared twice", fname)));
            }
            let ftype = fobj
                .get("type")
                .ok_or_else(|| ParseError::malformed(&floc, format!("field '{}' has no 'type'", fname)))?;
            let schema = self.parse_node(ftype, field_ns.as_deref(), &format!("{}.type", floc))?;

            let field_aliases = match fobj.get("aliases") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|a| {
                        a.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| ParseError::malformed(&floc, "field aliases must be strings"))
                    })
                    .collect::<Result<_, _>>()?,
                Some(_) => return Err(ParseError::malformed(&floc, "'aliases' must be an array")),
            };

            fields.push(Field {
                name: fname.to_string(),
                schema,
                default: fobj.get("default").cloned(),
                doc: fobj.get("doc").and_then(Value::as_str).map(str::to_string),
                aliases: field_aliases,
            });
        }

        let def = SchemaNode::Record(RecordSchema {
            name,
            doc,
            aliases,
            fields,
            is_error,
        });
        Ok(self.end_definition(fullname, def))
    }

    fn parse_enum(&mut self, obj: &serde_json::Map<String, Value>, ns: Option<&str>, loc: &str) -> Result<SchemaNode, ParseError> {
        let (name, doc, aliases) = self.named_header(obj, ns, loc)?;
        let fullname = self.begin_definition(&name, loc)?;

        let raw_symbols = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| ParseError::malformed(&fullname, "enum has no 'symbols' array"))?;
        let mut symbols: Vec<String> = Vec::with_capacity(raw_symbols.len());
        for raw in raw_symbols {
            let symbol = raw
                .as_str()
                .ok_or_else(|| ParseError::malformed(&fullname, "enum symbols must be strings"))?;
            if !name_pattern().is_match(symbol) {
                return Err(ParseError::malformed(&fullname, format!("invalid enum symbol '{}'", symbol)));
            }
            if symbols.iter().any(|s| s == symbol) {
                return Err(ParseError::duplicate(&fullname, format!("enum symbol '{}' is declared twice", symbol)));
            }
            symbols.push(symbol.to_string());
        }

        let default = match obj.get("default") {
            None => None,
            Some(Value::String(s)) if symbols.contains(s) => Some(s.clone()),
            Some(other) => {
                return Err(ParseError::invalid_default(
                    &fullname,
                    format!("enum default {} is not one of its symbols", other),
                ))
            }
        };

        let def = SchemaNode::Enum(EnumSchema {
            name,
            doc,
            aliases,
            symbols,
            default,
        });
        Ok(self.end_definition(fullname, def))
    }

    fn parse_fixed(&mut self, obj: &serde_json::Map<String, Value>, ns: Option<&str>, loc: &str) -> Result<SchemaNode, ParseError> {
        let (name, doc, aliases) = self.named_header(obj, ns, loc)?;
        let fullname = self.begin_definition(&name, loc)?;
        let size = obj
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| ParseError::malformed(&fullname, "fixed has no non-negative integer 'size'"))?;
        let def = SchemaNode::Fixed(FixedSchema {
            name,
            doc,
            aliases,
            size: size as usize,
        });
        Ok(self.end_definition(fullname, def))
    }

    /// Validate staged definitions and commit them to the context
    fn finish(self, roots: Vec<SchemaNode>) -> Result<Vec<SchemaGraph>, ParseError> {
        // Redefinitions of context types are allowed only when identical
        for fullname in &self.redefinitions {
            let (Some(new), Some(old)) = (self.staged.get(fullname), self.ctx.get(fullname)) else {
                continue;
            };
            if canonical_definition(new) != canonical_definition(old) {
                let loc = self.locations.get(fullname).cloned().unwrap_or_default();
                return Err(ParseError::duplicate(
                    loc,
                    format!("type '{}' conflicts with an earlier definition", fullname),
                ));
            }
        }

        let cycles = TypeGraph::build(self.staged.iter().map(|(k, v)| (k.as_str(), v.as_ref()))).direct_cycles();
        if let Some(cycle) = cycles.into_iter().next() {
            let loc = self.locations.get(&cycle[0]).cloned().unwrap_or_default();
            return Err(ParseError::new(
                ParseErrorKind::RecursiveWithoutIndirection,
                loc,
                format!(
                    "{} contain(s) itself without array, map or union indirection",
                    cycle.join(" -> ")
                ),
            ));
        }

        for (fullname, def) in &self.staged {
            if let SchemaNode::Record(record) = def.as_ref() {
                for (i, field) in record.fields.iter().enumerate() {
                    if let Some(default) = &field.default {
                        let loc = format!("{}.fields[{}].default", fullname, i);
                        self.validate_default(default, &field.schema, &loc, 0)?;
                    }
                }
            }
        }

        // Existing context definitions win over identical restatements
        let mut staged = self.staged;
        for fullname in &self.redefinitions {
            staged.remove(fullname);
        }
        self.ctx.commit(staged);

        let mut graphs = Vec::with_capacity(roots.len());
        for root in roots {
            let mut types = TypeTable::new();
            for name in reachable_from(&root, self.ctx.types()) {
                if let Some(def) = self.ctx.get(&name) {
                    types.insert(name, Arc::clone(def));
                }
            }
            graphs.push(SchemaGraph::new(root, types));
        }
        Ok(graphs)
    }

    fn validate_default(&self, value: &Value, schema: &SchemaNode, loc: &str, depth: usize) -> Result<(), ParseError> {
        if depth > 64 {
            return Err(ParseError::invalid_default(loc, "default value is nested too deeply"));
        }
        let mismatch = || {
            ParseError::invalid_default(
                loc,
                format!("{} is not a valid default for {}", value, schema.kind_label()),
            )
        };

        match schema {
            SchemaNode::Primitive(p) => {
                let ok = match p {
                    Primitive::Null => value.is_null(),
                    Primitive::Boolean => value.is_boolean(),
                    Primitive::Int => value
                        .as_i64()
                        .map(|n| i32::try_from(n).is_ok())
                        .unwrap_or(false),
                    Primitive::Long => value.as_i64().is_some(),
                    Primitive::Float | Primitive::Double => value.is_number(),
                    Primitive::Bytes | Primitive::String => value.is_string(),
                };
                if ok {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            SchemaNode::Reference(name) => {
                let def = self
                    .definition(&name.fullname())
                    .ok_or_else(|| ParseError::unresolved(loc, format!("unknown type '{}'", name)))?;
                self.validate_default(value, def, loc, depth + 1)
            }
            SchemaNode::Enum(e) => match value.as_str() {
                Some(s) if e.symbols.iter().any(|sym| sym == s) => Ok(()),
                _ => Err(mismatch()),
            },
            SchemaNode::Fixed(f) => match value.as_str() {
                Some(s) if s.chars().count() == f.size => Ok(()),
                _ => Err(mismatch()),
            },
            SchemaNode::Array(items) => {
                let arr = value.as_array().ok_or_else(mismatch)?;
                for (i, item) in arr.iter().enumerate() {
                    self.validate_default(item, items, &format!("{}[{}]", loc, i), depth + 1)?;
                }
                Ok(())
            }
            SchemaNode::Map(values) => {
                let obj = value.as_object().ok_or_else(mismatch)?;
                for (k, v) in obj {
                    self.validate_default(v, values, &format!("{}.{}", loc, k), depth + 1)?;
                }
                Ok(())
            }
            // Avro: a union default matches the union's first branch
            SchemaNode::Union(u) => match u.branches().first() {
                Some(first) => self.validate_default(value, first, loc, depth + 1),
                None => Err(mismatch()),
            },
            SchemaNode::Record(r) => {
                let obj = value.as_object().ok_or_else(mismatch)?;
                for field in &r.fields {
                    let floc = format!("{}.{}", loc, field.name);
                    match obj.get(&field.name) {
                        Some(v) => self.validate_default(v, &field.schema, &floc, depth + 1)?,
                        None if field.default.is_some() => {}
                        None => {
                            return Err(ParseError::invalid_default(
                                floc,
                                format!("record default is missing field '{}'", field.name),
                            ))
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn parse_aliases(value: Option<&Value>, ns: Option<&str>, loc: &str) -> Result<Vec<String>, ParseError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ParseError::malformed(loc, "'aliases' must be an array"))?;
    items
        .iter()
        .map(|a| {
            let alias = a
                .as_str()
                .ok_or_else(|| ParseError::malformed(loc, "aliases must be strings"))?;
            // aliases are qualified with the type's namespace unless already dotted
            Ok(match (alias.contains('.'), ns) {
                (false, Some(ns)) => format!("{}.{}", ns, alias),
                _ => alias.to_string(),
            })
        })
        .collect()
}
