//! Canonical schema fingerprints
//!
//! The canonical form drops docs and aliases, sorts union branches by type
//! identity, and keeps record field and enum symbol order. Named types are
//! expanded at their first occurrence and referenced by full name after
//! that, so recursive graphs serialize finitely. The fingerprint is the
//! SHA-256 of that form.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

use crate::schema::{SchemaGraph, SchemaNode};

/// SHA-256 digest of a schema's canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SchemaFingerprint([u8; 32]);

impl SchemaFingerprint {
    /// Fingerprint a parsed schema
    pub fn of(graph: &SchemaGraph) -> Self {
        Self::from_canonical(&canonical_form(graph))
    }

    /// Hash an already-canonical form
    pub fn from_canonical(canonical: &str) -> Self {
        let hash = Sha256::digest(canonical.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First 8 hex digits, for logs
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<SchemaFingerprint> for String {
    fn from(fp: SchemaFingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for SchemaFingerprint {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s).ok_or_else(|| format!("invalid fingerprint '{}'", s))
    }
}

/// Canonical serialization of a whole graph
pub fn canonical_form(graph: &SchemaGraph) -> String {
    let mut expanded = HashSet::new();
    canonical_value(graph.root(), Some(graph), &mut expanded).to_string()
}

/// Canonical serialization of a single definition, with every named type
/// it uses written as a bare full name. Two definitions of one name are the
/// same type exactly when these forms are equal.
pub fn canonical_definition(node: &SchemaNode) -> String {
    let mut expanded = HashSet::new();
    canonical_value(node, None, &mut expanded).to_string()
}

fn canonical_value(node: &SchemaNode, graph: Option<&SchemaGraph>, expanded: &mut HashSet<String>) -> Value {
    match node {
        SchemaNode::Primitive(p) => Value::String(p.as_str().to_string()),
        SchemaNode::Reference(name) => {
            let fullname = name.fullname();
            let def = graph.and_then(|g| g.lookup(&fullname));
            match def {
                Some(def) if !expanded.contains(&fullname) => canonical_value(def, graph, expanded),
                _ => Value::String(fullname),
            }
        }
        SchemaNode::Record(r) => {
            expanded.insert(r.name.fullname());
            let fields: Vec<Value> = r
                .fields
                .iter()
                .map(|f| {
                    let mut field = Map::new();
                    field.insert("name".into(), Value::String(f.name.clone()));
                    field.insert("type".into(), canonical_value(&f.schema, graph, expanded));
                    if let Some(default) = &f.default {
                        field.insert("default".into(), default.clone());
                    }
                    Value::Object(field)
                })
                .collect();
            json!({ "type": "record", "name": r.name.fullname(), "fields": fields })
        }
        SchemaNode::Enum(e) => {
            expanded.insert(e.name.fullname());
            let mut obj = json!({ "type": "enum", "name": e.name.fullname(), "symbols": e.symbols });
            if let (Some(default), Some(map)) = (&e.default, obj.as_object_mut()) {
                map.insert("default".into(), Value::String(default.clone()));
            }
            obj
        }
        SchemaNode::Fixed(f) => {
            expanded.insert(f.name.fullname());
            json!({ "type": "fixed", "name": f.name.fullname(), "size": f.size })
        }
        SchemaNode::Array(items) => json!({
            "type": "array",
            "items": canonical_value(items, graph, expanded),
        }),
        SchemaNode::Map(values) => json!({
            "type": "map",
            "values": canonical_value(values, graph, expanded),
        }),
        SchemaNode::Union(u) => {
            let mut branches: Vec<&SchemaNode> = u.branches().iter().collect();
            branches.sort_by_key(|b| b.identity());
            Value::Array(
                branches
                    .into_iter()
                    .map(|b| canonical_value(b, graph, expanded))
                    .collect(),
            )
        }
    }
}
