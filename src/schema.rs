//! Schema types and structures
//!
//! A parsed schema is a [`SchemaGraph`]: a root node plus a table of every
//! named type reachable from it. Named type definitions live only in the
//! table; everywhere else they appear as [`SchemaNode::Reference`], which is
//! how recursive types stay finite.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Avro primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
}

impl Primitive {
    /// The Avro type name
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::Null => "null",
            Primitive::Boolean => "boolean",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bytes => "bytes",
            Primitive::String => "string",
        }
    }

    /// Look up a primitive by its Avro type name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(Primitive::Null),
            "boolean" => Some(Primitive::Boolean),
            "int" => Some(Primitive::Int),
            "long" => Some(Primitive::Long),
            "float" => Some(Primitive::Float),
            "double" => Some(Primitive::Double),
            "bytes" => Some(Primitive::Bytes),
            "string" => Some(Primitive::String),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespace-qualified type name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    pub name: String,
    pub namespace: Option<String>,
}

impl Name {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }

    /// Split a full name at its last dot
    pub fn parse(fullname: &str) -> Self {
        match fullname.rsplit_once('.') {
            Some((ns, name)) => Self::new(name, Some(ns.to_string())),
            None => Self::new(fullname, None),
        }
    }

    /// `namespace.name`, or just `name` in the null namespace
    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A record field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: SchemaNode,
    pub default: Option<Value>,
    pub doc: Option<String>,
    pub aliases: Vec<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, schema: SchemaNode) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
            doc: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// True if this field answers to `name`, directly or through an alias
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub aliases: Vec<String>,
    pub fields: Vec<Field>,
    /// Declared as a protocol `error`
    pub is_error: bool,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub aliases: Vec<String>,
    pub symbols: Vec<String>,
    /// Symbol a reader falls back to for unknown writer symbols
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub aliases: Vec<String>,
    pub size: usize,
}

/// Union alternatives.
///
/// Branches are unique by [`SchemaNode::identity`], so there is at most one
/// `null` and no union directly nested in another.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionSchema {
    branches: Vec<SchemaNode>,
}

impl UnionSchema {
    pub fn new(branches: Vec<SchemaNode>) -> Result<Self, String> {
        let mut seen = HashSet::new();
        for branch in &branches {
            if matches!(branch, SchemaNode::Union(_)) {
                return Err("unions may not immediately contain other unions".to_string());
            }
            let identity = branch.identity();
            if !seen.insert(identity.clone()) {
                return Err(format!("duplicate union branch '{}'", identity));
            }
        }
        Ok(Self { branches })
    }

    pub fn branches(&self) -> &[SchemaNode] {
        &self.branches
    }

    /// Position of the `null` branch, if any
    pub fn null_index(&self) -> Option<usize> {
        self.branches
            .iter()
            .position(|b| matches!(b, SchemaNode::Primitive(Primitive::Null)))
    }

    /// For `[null, T]` / `[T, null]`, the non-null branch
    pub fn as_optional(&self) -> Option<&SchemaNode> {
        if self.branches.len() != 2 {
            return None;
        }
        let null = self.null_index()?;
        self.branches.get(1 - null)
    }
}

/// A node in the schema graph
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Primitive(Primitive),
    Record(RecordSchema),
    Enum(EnumSchema),
    Array(Box<SchemaNode>),
    Map(Box<SchemaNode>),
    Union(UnionSchema),
    Fixed(FixedSchema),
    /// Use of a named type defined in the graph's type table
    Reference(Name),
}

impl SchemaNode {
    /// Name of a named definition or reference
    pub fn name(&self) -> Option<&Name> {
        match self {
            SchemaNode::Record(r) => Some(&r.name),
            SchemaNode::Enum(e) => Some(&e.name),
            SchemaNode::Fixed(f) => Some(&f.name),
            SchemaNode::Reference(n) => Some(n),
            _ => None,
        }
    }

    /// Aliases of a named definition
    pub fn aliases(&self) -> &[String] {
        match self {
            SchemaNode::Record(r) => &r.aliases,
            SchemaNode::Enum(e) => &e.aliases,
            SchemaNode::Fixed(f) => &f.aliases,
            _ => &[],
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            SchemaNode::Record(r) => r.doc.as_deref(),
            SchemaNode::Enum(e) => e.doc.as_deref(),
            SchemaNode::Fixed(f) => f.doc.as_deref(),
            _ => None,
        }
    }

    /// Stable type-identity key: the primitive name, `array`, `map`, or the
    /// full name of a named type. A reference and its definition share one key.
    pub fn identity(&self) -> String {
        match self {
            SchemaNode::Primitive(p) => p.as_str().to_string(),
            SchemaNode::Array(_) => "array".to_string(),
            SchemaNode::Map(_) => "map".to_string(),
            SchemaNode::Union(_) => "union".to_string(),
            SchemaNode::Record(_)
            | SchemaNode::Enum(_)
            | SchemaNode::Fixed(_)
            | SchemaNode::Reference(_) => self.name().map(Name::fullname).unwrap_or_default(),
        }
    }

    pub fn is_named_definition(&self) -> bool {
        matches!(
            self,
            SchemaNode::Record(_) | SchemaNode::Enum(_) | SchemaNode::Fixed(_)
        )
    }

    /// Short type label used in messages
    pub fn kind_label(&self) -> String {
        match self {
            SchemaNode::Primitive(p) => p.as_str().to_string(),
            SchemaNode::Record(r) => format!("record {}", r.name),
            SchemaNode::Enum(e) => format!("enum {}", e.name),
            SchemaNode::Array(_) => "array".to_string(),
            SchemaNode::Map(_) => "map".to_string(),
            SchemaNode::Union(_) => "union".to_string(),
            SchemaNode::Fixed(f) => format!("fixed {}", f.name),
            SchemaNode::Reference(n) => n.fullname(),
        }
    }
}

/// Named type definitions keyed by full name
pub type TypeTable = BTreeMap<String, Arc<SchemaNode>>;

/// An immutable, parsed schema: a root plus every named type reachable from it
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaGraph {
    root: SchemaNode,
    types: TypeTable,
}

impl SchemaGraph {
    pub(crate) fn new(root: SchemaNode, types: TypeTable) -> Self {
        Self { root, types }
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// Definition of a named type by full name
    pub fn lookup(&self, fullname: &str) -> Option<&SchemaNode> {
        self.types.get(fullname).map(|n| n.as_ref())
    }

    /// Follow a reference to its definition; other nodes are returned as-is
    pub fn resolve<'a>(&'a self, node: &'a SchemaNode) -> &'a SchemaNode {
        match node {
            SchemaNode::Reference(name) => self.lookup(&name.fullname()).unwrap_or(node),
            other => other,
        }
    }

    /// Root definition, with a named root resolved through the type table
    pub fn root_definition(&self) -> &SchemaNode {
        self.resolve(&self.root)
    }

    /// Full name of the root type, if it is named
    pub fn full_name(&self) -> Option<String> {
        self.root.name().map(Name::fullname)
    }

    /// Graph rooted at one of this graph's named types
    pub fn subgraph(&self, fullname: &str) -> Option<SchemaGraph> {
        let def = self.lookup(fullname)?;
        let root = SchemaNode::Reference(def.name()?.clone());
        let mut types = TypeTable::new();
        for name in reachable_from(&root, &self.types) {
            if let Some(node) = self.types.get(&name) {
                types.insert(name, Arc::clone(node));
            }
        }
        Some(SchemaGraph::new(root, types))
    }

    /// Named types reachable from the root, in depth-first field order
    pub fn reachable_types(&self) -> Vec<String> {
        reachable_from(&self.root, &self.types)
    }

    /// Self-contained Avro JSON: each named type is defined at its first
    /// use and referenced by full name afterwards. Protocol errors are
    /// written as records, since `error` is only legal inside a protocol.
    pub fn to_json(&self) -> Value {
        let mut emitted = HashSet::new();
        self.node_json(&self.root, None, &mut emitted)
    }

    fn node_json(&self, node: &SchemaNode, enclosing_ns: Option<&str>, emitted: &mut HashSet<String>) -> Value {
        match node {
            SchemaNode::Primitive(p) => Value::String(p.as_str().to_string()),
            SchemaNode::Reference(name) => {
                let fullname = name.fullname();
                if emitted.contains(&fullname) {
                    return Value::String(fullname);
                }
                match self.types.get(&fullname) {
                    Some(def) => self.node_json(def, enclosing_ns, emitted),
                    None => Value::String(fullname),
                }
            }
            SchemaNode::Array(items) => json!({
                "type": "array",
                "items": self.node_json(items, enclosing_ns, emitted),
            }),
            SchemaNode::Map(values) => json!({
                "type": "map",
                "values": self.node_json(values, enclosing_ns, emitted),
            }),
            SchemaNode::Union(u) => Value::Array(
                u.branches()
                    .iter()
                    .map(|b| self.node_json(b, enclosing_ns, emitted))
                    .collect(),
            ),
            SchemaNode::Record(r) => {
                emitted.insert(r.name.fullname());
                let mut obj = named_header("record", &r.name, enclosing_ns);
                put_doc_aliases(&mut obj, r.doc.as_deref(), &r.aliases);
                let ns = r.name.namespace.as_deref();
                let fields: Vec<Value> = r
                    .fields
                    .iter()
                    .map(|f| {
                        let mut field = Map::new();
                        field.insert("name".into(), Value::String(f.name.clone()));
                        field.insert("type".into(), self.node_json(&f.schema, ns, emitted));
                        if let Some(default) = &f.default {
                            field.insert("default".into(), default.clone());
                        }
                        put_doc_aliases(&mut field, f.doc.as_deref(), &f.aliases);
                        Value::Object(field)
                    })
                    .collect();
                obj.insert("fields".into(), Value::Array(fields));
                Value::Object(obj)
            }
            SchemaNode::Enum(e) => {
                emitted.insert(e.name.fullname());
                let mut obj = named_header("enum", &e.name, enclosing_ns);
                put_doc_aliases(&mut obj, e.doc.as_deref(), &e.aliases);
                obj.insert("symbols".into(), json!(e.symbols));
                if let Some(default) = &e.default {
                    obj.insert("default".into(), Value::String(default.clone()));
                }
                Value::Object(obj)
            }
            SchemaNode::Fixed(f) => {
                emitted.insert(f.name.fullname());
                let mut obj = named_header("fixed", &f.name, enclosing_ns);
                put_doc_aliases(&mut obj, f.doc.as_deref(), &f.aliases);
                obj.insert("size".into(), json!(f.size));
                Value::Object(obj)
            }
        }
    }
}

fn named_header(kind: &str, name: &Name, enclosing_ns: Option<&str>) -> Map<String, Value> {
    let mut obj = Map::new();
    obj.insert("type".into(), Value::String(kind.to_string()));
    obj.insert("name".into(), Value::String(name.name.clone()));
    match (&name.namespace, enclosing_ns) {
        (Some(ns), _) => {
            obj.insert("namespace".into(), Value::String(ns.clone()));
        }
        // a null-namespace type nested in a namespaced one must opt out explicitly
        (None, Some(_)) => {
            obj.insert("namespace".into(), Value::String(String::new()));
        }
        (None, None) => {}
    }
    obj
}

fn put_doc_aliases(obj: &mut Map<String, Value>, doc: Option<&str>, aliases: &[String]) {
    if let Some(doc) = doc {
        obj.insert("doc".into(), Value::String(doc.to_string()));
    }
    if !aliases.is_empty() {
        obj.insert("aliases".into(), json!(aliases));
    }
}

/// Named types reachable from `root`, depth-first in field order
pub(crate) fn reachable_from(root: &SchemaNode, types: &TypeTable) -> Vec<String> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    visit(root, types, &mut seen, &mut order);
    order
}

fn visit(node: &SchemaNode, types: &TypeTable, seen: &mut HashSet<String>, order: &mut Vec<String>) {
    match node {
        SchemaNode::Reference(name) => {
            let fullname = name.fullname();
            if seen.insert(fullname.clone()) {
                order.push(fullname.clone());
                if let Some(def) = types.get(&fullname) {
                    visit(def, types, seen, order);
                }
            }
        }
        SchemaNode::Record(r) => {
            if seen.insert(r.name.fullname()) {
                order.push(r.name.fullname());
            }
            for field in &r.fields {
                visit(&field.schema, types, seen, order);
            }
        }
        SchemaNode::Enum(_) | SchemaNode::Fixed(_) => {
            if let Some(name) = node.name() {
                if seen.insert(name.fullname()) {
                    order.push(name.fullname());
                }
            }
        }
        SchemaNode::Array(inner) | SchemaNode::Map(inner) => visit(inner, types, seen, order),
        SchemaNode::Union(u) => {
            for branch in u.branches() {
                visit(branch, types, seen, order);
            }
        }
        SchemaNode::Primitive(_) => {}
    }
}
