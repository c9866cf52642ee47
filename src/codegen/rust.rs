//! Rust Code Emitter
//!
//! One module file per named type, laid out by namespace:
//! `com.acme.User` becomes `com/acme/user.rs` defining `User`.
//!
//! Key constraints:
//! - Types in other files are referenced by absolute `crate::` path
//! - References inside a recursive component are boxed unless an array or
//!   map already provides indirection
//! - Non-optional unions become an untagged enum named after the record and field

use super::names::{apply_case, disambiguate, field_name, namespace_segments, symbol_name, type_name};
use super::{EmitContext, GeneratedUnit};
use crate::codegen::config::Casing;
use crate::schema::{EnumSchema, Field, FixedSchema, Name, Primitive, RecordSchema, SchemaNode, UnionSchema};
use std::path::PathBuf;

/// Largest fixed size emitted as an array (serde's array impls stop at 32)
const MAX_ARRAY_FIXED: usize = 32;

// =============================================================================
// Public API
// =============================================================================

/// Emit the unit for a named definition. Anonymous nodes produce nothing.
pub fn emit_unit(def: &SchemaNode, ctx: &EmitContext) -> Option<GeneratedUnit> {
    let name = match def {
        SchemaNode::Record(r) => &r.name,
        SchemaNode::Enum(e) => &e.name,
        SchemaNode::Fixed(f) => &f.name,
        _ => return None,
    };

    let mut output = header(name);
    match def {
        SchemaNode::Record(r) => emit_struct(&mut output, r, ctx),
        SchemaNode::Enum(e) => emit_enum(&mut output, e, ctx),
        SchemaNode::Fixed(f) => emit_fixed(&mut output, f, ctx),
        _ => {}
    }

    Some(GeneratedUnit {
        type_name: name.fullname(),
        path: unit_path(name, ctx),
        contents: output,
    })
}

/// Output path of a named type's module file
pub fn unit_path(name: &Name, ctx: &EmitContext) -> PathBuf {
    let mut path: PathBuf = namespace_segments(name.namespace.as_deref(), Casing::SnakeCase, ctx.naming)
        .into_iter()
        .collect();
    path.push(format!("{}.rs", module_name(name, ctx)));
    path
}

/// Absolute path to a named type, e.g. `crate::com::acme::user::User`
pub fn type_path(name: &Name, ctx: &EmitContext) -> String {
    let mut segments = vec!["crate".to_string()];
    segments.extend(namespace_segments(name.namespace.as_deref(), Casing::SnakeCase, ctx.naming));
    segments.push(module_name(name, ctx));
    segments.push(type_name(&name.name, ctx.naming));
    segments.join("::")
}

fn module_name(name: &Name, ctx: &EmitContext) -> String {
    super::names::escape(apply_case(&name.name, Casing::SnakeCase, ctx.naming), ctx.naming)
}

fn header(name: &Name) -> String {
    format!(
        "// Generated by avro-gate from {}. Do not edit.\n\nuse serde::{{Deserialize, Serialize}};\n\n",
        name.fullname()
    )
}

fn emit_doc(output: &mut String, doc: Option<&str>, indent: &str) {
    if let Some(doc) = doc {
        for line in doc.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                output.push_str(&format!("{}///\n", indent));
            } else {
                output.push_str(&format!("{}/// {}\n", indent, line));
            }
        }
    }
}

// =============================================================================
// Struct Emission
// =============================================================================

/// Untagged enums a struct needs for its general unions
struct UnionEnum {
    name: String,
    variants: Vec<(String, String)>,
}

fn emit_struct(output: &mut String, record: &RecordSchema, ctx: &EmitContext) {
    let struct_name = type_name(&record.name.name, ctx.naming);
    let owner = record.name.fullname();
    let mut unions = Vec::new();

    emit_doc(output, record.doc.as_deref(), "");
    output.push_str("#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]\n");
    output.push_str(&format!("pub struct {} {{\n", struct_name));

    let idents = disambiguate(
        record.fields.iter().map(|f| field_name(&f.name, ctx.naming)).collect(),
        "_",
    );
    for (field, ident) in record.fields.iter().zip(&idents) {
        let base = format!("{}{}", struct_name, type_name(&field.name, ctx.naming));
        let mut resolver = TypeResolver {
            ctx,
            owner: &owner,
            union_base: base,
            unions: &mut unions,
        };
        let rust_type = resolver.resolve(&field.schema, true);
        emit_field(output, field, ident, &rust_type);
    }
    output.push_str("}\n");

    for union in unions {
        output.push('\n');
        output.push_str("#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]\n");
        output.push_str("#[serde(untagged)]\n");
        output.push_str(&format!("pub enum {} {{\n", union.name));
        for (variant, ty) in &union.variants {
            output.push_str(&format!("    {}({}),\n", variant, ty));
        }
        output.push_str("}\n");
    }
}

fn emit_field(output: &mut String, field: &Field, name: &str, rust_type: &str) {
    emit_doc(output, field.doc.as_deref(), "    ");

    if name != field.name {
        output.push_str(&format!("    #[serde(rename = \"{}\")]\n", field.name));
    }
    if rust_type.starts_with("Option<") && field.default.as_ref().map(|d| d.is_null()).unwrap_or(false) {
        output.push_str("    #[serde(default)]\n");
    }
    output.push_str(&format!("    pub {}: {},\n", name, rust_type));
}

/// Maps schema nodes to Rust types for one field, collecting the enums its
/// general unions need
struct TypeResolver<'a, 'b> {
    ctx: &'a EmitContext<'b>,
    owner: &'a str,
    union_base: String,
    unions: &'a mut Vec<UnionEnum>,
}

impl TypeResolver<'_, '_> {
    /// `needs_indirection` is false once an array or map sits between the
    /// owner and the node
    fn resolve(&mut self, node: &SchemaNode, needs_indirection: bool) -> String {
        match node {
            SchemaNode::Primitive(p) => primitive(*p).to_string(),
            SchemaNode::Array(items) => format!("Vec<{}>", self.resolve(items, false)),
            SchemaNode::Map(values) => format!("std::collections::BTreeMap<String, {}>", self.resolve(values, false)),
            SchemaNode::Union(u) => match u.as_optional() {
                Some(inner) => format!("Option<{}>", self.resolve(inner, needs_indirection)),
                None => self.union_enum(u, needs_indirection),
            },
            named => match named.name() {
                Some(name) => {
                    let path = type_path(name, self.ctx);
                    if needs_indirection && self.ctx.same_component(self.owner, &name.fullname()) {
                        format!("Box<{}>", path)
                    } else {
                        path
                    }
                }
                None => "()".to_string(),
            },
        }
    }

    fn union_enum(&mut self, union: &UnionSchema, needs_indirection: bool) -> String {
        let name = if self.unions.is_empty() {
            self.union_base.clone()
        } else {
            format!("{}{}", self.union_base, self.unions.len() + 1)
        };
        // Reserve the slot before recursing so nested unions number after it
        let slot = self.unions.len();
        self.unions.push(UnionEnum {
            name: name.clone(),
            variants: Vec::new(),
        });

        let mut names = Vec::new();
        let mut types = Vec::new();
        for branch in union.branches() {
            if matches!(branch, SchemaNode::Primitive(Primitive::Null)) {
                continue;
            }
            types.push(self.resolve(branch, needs_indirection));
            names.push(variant_name(branch, self.ctx));
        }
        self.unions[slot].variants = disambiguate(names, "").into_iter().zip(types).collect();

        if union.null_index().is_some() {
            format!("Option<{}>", name)
        } else {
            name
        }
    }
}

fn variant_name(branch: &SchemaNode, ctx: &EmitContext) -> String {
    match branch {
        SchemaNode::Primitive(p) => apply_case(p.as_str(), Casing::PascalCase, ctx.naming),
        SchemaNode::Array(_) => "Array".to_string(),
        SchemaNode::Map(_) => "Map".to_string(),
        SchemaNode::Union(_) => "Union".to_string(),
        named => named
            .name()
            .map(|n| type_name(&n.name, ctx.naming))
            .unwrap_or_else(|| "Unknown".to_string()),
    }
}

fn primitive(p: Primitive) -> &'static str {
    match p {
        Primitive::Null => "()",
        Primitive::Boolean => "bool",
        Primitive::Int => "i32",
        Primitive::Long => "i64",
        Primitive::Float => "f32",
        Primitive::Double => "f64",
        Primitive::Bytes => "Vec<u8>",
        Primitive::String => "String",
    }
}

// =============================================================================
// Enum Emission
// =============================================================================

fn emit_enum(output: &mut String, e: &EnumSchema, ctx: &EmitContext) {
    emit_doc(output, e.doc.as_deref(), "");
    if e.default.is_some() {
        output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]\n");
    } else {
        output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]\n");
    }
    output.push_str(&format!("pub enum {} {{\n", type_name(&e.name.name, ctx.naming)));

    let variants = disambiguate(e.symbols.iter().map(|s| symbol_name(s, ctx.naming)).collect(), "");
    for (symbol, variant) in e.symbols.iter().zip(variants) {
        if variant != *symbol {
            output.push_str(&format!("    #[serde(rename = \"{}\")]\n", symbol));
        }
        if e.default.as_deref() == Some(symbol.as_str()) {
            output.push_str("    #[default]\n");
        }
        output.push_str(&format!("    {},\n", variant));
    }
    output.push_str("}\n");
}

// =============================================================================
// Fixed Emission
// =============================================================================

fn emit_fixed(output: &mut String, f: &FixedSchema, ctx: &EmitContext) {
    emit_doc(output, f.doc.as_deref(), "");
    output.push_str("#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]\n");
    let name = type_name(&f.name.name, ctx.naming);
    if f.size <= MAX_ARRAY_FIXED {
        output.push_str(&format!("pub struct {}(pub [u8; {}]);\n", name, f.size));
    } else {
        output.push_str(&format!("/// Exactly {} bytes\n", f.size));
        output.push_str(&format!("pub struct {}(pub Vec<u8>);\n", name));
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::{BindingGenerator, GeneratedUnit, Language};
    use crate::parser::{parse_schema, NamespaceContext};
    use std::path::Path;

    fn units(text: &str) -> Vec<GeneratedUnit> {
        let graph = parse_schema(text, &mut NamespaceContext::new()).unwrap();
        BindingGenerator::for_language(Language::Rust).generate_units(&graph)
    }

    fn unit<'a>(units: &'a [GeneratedUnit], path: &str) -> &'a str {
        &units.iter().find(|u| u.path == Path::new(path)).unwrap().contents
    }

    #[test]
    fn test_struct_fields() {
        let units = units(
            r#"{"type":"record","name":"User","namespace":"com.acme","doc":"A user.","fields":[
                {"name":"id","type":"long"},
                {"name":"firstName","type":"string"},
                {"name":"email","type":["null","string"],"default":null},
                {"name":"tags","type":{"type":"array","items":"string"}},
                {"name":"attrs","type":{"type":"map","values":"double"}},
                {"name":"type","type":"bytes"}
            ]}"#,
        );
        let code = unit(&units, "com/acme/user.rs");
        assert!(code.starts_with("// Generated by avro-gate from com.acme.User. Do not edit.\n"));
        assert!(code.contains("/// A user.\n#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]\npub struct User {"));
        assert!(code.contains("    pub id: i64,\n"));
        assert!(code.contains("    #[serde(rename = \"firstName\")]\n    pub first_name: String,\n"));
        assert!(code.contains("    #[serde(default)]\n    pub email: Option<String>,\n"));
        assert!(code.contains("    pub tags: Vec<String>,\n"));
        assert!(code.contains("    pub attrs: std::collections::BTreeMap<String, f64>,\n"));
        assert!(code.contains("    #[serde(rename = \"type\")]\n    pub type_: Vec<u8>,\n"));
    }

    #[test]
    fn test_references_use_crate_paths() {
        let units = units(
            r#"{"type":"record","name":"Order","namespace":"com.acme.shop","fields":[
                {"name":"status","type":{"type":"enum","name":"Status","namespace":"com.acme","symbols":["OPEN"]}}
            ]}"#,
        );
        let code = unit(&units, "com/acme/shop/order.rs");
        assert!(code.contains("pub status: crate::com::acme::status::Status,"));
        assert!(units.iter().any(|u| u.path == Path::new("com/acme/status.rs")));
    }

    #[test]
    fn test_recursive_reference_boxed_outside_collections() {
        let units = units(
            r#"{"type":"record","name":"Node","fields":[
                {"name":"next","type":["null","Node"],"default":null},
                {"name":"children","type":{"type":"array","items":"Node"}}
            ]}"#,
        );
        let code = unit(&units, "node.rs");
        assert!(code.contains("pub next: Option<Box<crate::node::Node>>,"));
        assert!(code.contains("pub children: Vec<crate::node::Node>,"));
    }

    #[test]
    fn test_general_union_becomes_untagged_enum() {
        let units = units(
            r#"{"type":"record","name":"Event","fields":[
                {"name":"payload","type":["null","int","string"]}
            ]}"#,
        );
        let code = unit(&units, "event.rs");
        assert!(code.contains("pub payload: Option<EventPayload>,"));
        assert!(code.contains("#[serde(untagged)]\npub enum EventPayload {\n    Int(i32),\n    String(String),\n}"));
    }

    #[test]
    fn test_enum_with_default_and_renames() {
        let units = units(
            r#"{"type":"enum","name":"Status","symbols":["ACTIVE","CLOSED"],"default":"ACTIVE"}"#,
        );
        let code = unit(&units, "status.rs");
        assert!(code.contains("Default, Serialize, Deserialize)]"));
        assert!(code.contains("    #[serde(rename = \"ACTIVE\")]\n    #[default]\n    Active,\n"));
        assert!(code.contains("    #[serde(rename = \"CLOSED\")]\n    Closed,\n"));
    }

    #[test]
    fn test_colliding_field_names_get_suffix() {
        let units = units(
            r#"{"type":"record","name":"P","fields":[
                {"name":"firstName","type":"string"},
                {"name":"first_name","type":"int"}
            ]}"#,
        );
        let code = unit(&units, "p.rs");
        assert_eq!(code.matches("pub first_name:").count(), 1);
        assert!(code.contains("    #[serde(rename = \"firstName\")]\n    pub first_name: String,\n"));
        assert!(code.contains("    #[serde(rename = \"first_name\")]\n    pub first_name_2: i32,\n"));
    }

    #[test]
    fn test_colliding_union_variants_get_suffix() {
        let units = units(
            r#"{"type":"record","name":"Holder","fields":[
                {"name":"pick","type":[
                    {"type":"record","name":"X","namespace":"a","fields":[]},
                    {"type":"record","name":"X","namespace":"b","fields":[]}
                ]}
            ]}"#,
        );
        let code = unit(&units, "holder.rs");
        assert!(code.contains("pub enum HolderPick {\n    X(crate::a::x::X),\n    X2(crate::b::x::X),\n}"));
    }

    #[test]
    fn test_colliding_symbols_get_suffix() {
        let units = units(r#"{"type":"enum","name":"Mode","symbols":["a_b","A_B"]}"#);
        let code = unit(&units, "mode.rs");
        assert!(code.contains("    #[serde(rename = \"a_b\")]\n    AB,\n"));
        assert!(code.contains("    #[serde(rename = \"A_B\")]\n    AB2,\n"));
    }

    #[test]
    fn test_fixed_sizes() {
        let small = units(r#"{"type":"fixed","name":"Md5","size":16}"#);
        assert!(unit(&small, "md5.rs").contains("pub struct Md5(pub [u8; 16]);"));
        let large = units(r#"{"type":"fixed","name":"Blob","size":64}"#);
        assert!(unit(&large, "blob.rs").contains("pub struct Blob(pub Vec<u8>);"));
    }
}
