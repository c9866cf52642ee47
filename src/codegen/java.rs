//! Java Code Emitter
//!
//! One class or enum per file, in the package named by the Avro namespace.
//! Other types are referenced by fully qualified name so no imports are needed.

use super::names::{disambiguate, field_name, namespace_segments, symbol_name, type_name};
use super::{EmitContext, GeneratedUnit};
use crate::codegen::config::Casing;
use crate::schema::{EnumSchema, FixedSchema, Name, Primitive, RecordSchema, SchemaNode};
use std::path::PathBuf;

pub fn emit_unit(def: &SchemaNode, ctx: &EmitContext) -> Option<GeneratedUnit> {
    let name = match def {
        SchemaNode::Record(r) => &r.name,
        SchemaNode::Enum(e) => &e.name,
        SchemaNode::Fixed(f) => &f.name,
        _ => return None,
    };

    let mut output = header(name, ctx);
    match def {
        SchemaNode::Record(r) => emit_class(&mut output, r, ctx),
        SchemaNode::Enum(e) => emit_enum(&mut output, e, ctx),
        SchemaNode::Fixed(f) => emit_fixed(&mut output, f, ctx),
        _ => {}
    }

    let mut path: PathBuf = package(name, ctx).into_iter().collect();
    path.push(format!("{}.java", type_name(&name.name, ctx.naming)));

    Some(GeneratedUnit {
        type_name: name.fullname(),
        path,
        contents: output,
    })
}

fn package(name: &Name, ctx: &EmitContext) -> Vec<String> {
    namespace_segments(name.namespace.as_deref(), Casing::Preserve, ctx.naming)
}

/// Fully qualified class name
fn qualified(name: &Name, ctx: &EmitContext) -> String {
    let mut segments = package(name, ctx);
    segments.push(type_name(&name.name, ctx.naming));
    segments.join(".")
}

fn header(name: &Name, ctx: &EmitContext) -> String {
    let mut output = format!("// Generated by avro-gate from {}. Do not edit.\n", name.fullname());
    let package = package(name, ctx);
    if !package.is_empty() {
        output.push_str(&format!("package {};\n", package.join(".")));
    }
    output.push('\n');
    output
}

fn emit_doc(output: &mut String, doc: Option<&str>, indent: &str) {
    let Some(doc) = doc else { return };
    let lines: Vec<&str> = doc.lines().map(str::trim_end).collect();
    if lines.len() == 1 {
        output.push_str(&format!("{}/** {} */\n", indent, lines[0]));
        return;
    }
    output.push_str(&format!("{}/**\n", indent));
    for line in lines {
        if line.is_empty() {
            output.push_str(&format!("{} *\n", indent));
        } else {
            output.push_str(&format!("{} * {}\n", indent, line));
        }
    }
    output.push_str(&format!("{} */\n", indent));
}

// =============================================================================
// Classes
// =============================================================================

fn emit_class(output: &mut String, record: &RecordSchema, ctx: &EmitContext) {
    emit_doc(output, record.doc.as_deref(), "");
    output.push_str(&format!("public class {} {{\n", type_name(&record.name.name, ctx.naming)));
    let idents = disambiguate(
        record.fields.iter().map(|f| field_name(&f.name, ctx.naming)).collect(),
        "",
    );
    for (field, ident) in record.fields.iter().zip(idents) {
        emit_doc(output, field.doc.as_deref(), "    ");
        output.push_str(&format!("    public {} {};\n", java_type(&field.schema, false, ctx), ident));
    }
    output.push_str("}\n");
}

/// Java type for a node; `boxed` forces reference types (generic arguments
/// and nullable values)
fn java_type(node: &SchemaNode, boxed: bool, ctx: &EmitContext) -> String {
    match node {
        SchemaNode::Primitive(p) => primitive(*p, boxed).to_string(),
        SchemaNode::Array(items) => format!("java.util.List<{}>", java_type(items, true, ctx)),
        SchemaNode::Map(values) => format!("java.util.Map<String, {}>", java_type(values, true, ctx)),
        SchemaNode::Union(u) => match u.as_optional() {
            Some(inner) => java_type(inner, true, ctx),
            None => "Object".to_string(),
        },
        named => named
            .name()
            .map(|n| qualified(n, ctx))
            .unwrap_or_else(|| "Object".to_string()),
    }
}

fn primitive(p: Primitive, boxed: bool) -> &'static str {
    match (p, boxed) {
        (Primitive::Null, _) => "Void",
        (Primitive::Boolean, false) => "boolean",
        (Primitive::Boolean, true) => "Boolean",
        (Primitive::Int, false) => "int",
        (Primitive::Int, true) => "Integer",
        (Primitive::Long, false) => "long",
        (Primitive::Long, true) => "Long",
        (Primitive::Float, false) => "float",
        (Primitive::Float, true) => "Float",
        (Primitive::Double, false) => "double",
        (Primitive::Double, true) => "Double",
        (Primitive::Bytes, _) => "java.nio.ByteBuffer",
        (Primitive::String, _) => "String",
    }
}

// =============================================================================
// Enums and Fixed
// =============================================================================

fn emit_enum(output: &mut String, e: &EnumSchema, ctx: &EmitContext) {
    let name = type_name(&e.name.name, ctx.naming);
    emit_doc(output, e.doc.as_deref(), "");
    output.push_str(&format!("public enum {} {{\n", name));

    let constants = disambiguate(e.symbols.iter().map(|s| symbol_name(s, ctx.naming)).collect(), "_");
    let lines: Vec<String> = constants.iter().map(|c| format!("    {}", c)).collect();
    output.push_str(&lines.join(",\n"));

    let default = e
        .default
        .as_ref()
        .and_then(|d| e.symbols.iter().position(|s| s == d))
        .map(|i| &constants[i]);
    match default {
        Some(default) => {
            output.push_str(";\n\n");
            output.push_str(&format!("    public static final {} DEFAULT = {};\n", name, default));
        }
        None => output.push('\n'),
    }
    output.push_str("}\n");
}

fn emit_fixed(output: &mut String, f: &FixedSchema, ctx: &EmitContext) {
    let name = type_name(&f.name.name, ctx.naming);
    emit_doc(output, f.doc.as_deref(), "");
    output.push_str(&format!("public final class {} {{\n", name));
    output.push_str(&format!("    public static final int SIZE = {};\n\n", f.size));
    output.push_str("    public final byte[] bytes;\n\n");
    output.push_str(&format!("    public {}(byte[] bytes) {{\n", name));
    output.push_str("        if (bytes.length != SIZE) {\n");
    output.push_str(&format!(
        "            throw new IllegalArgumentException(\"{} requires \" + SIZE + \" bytes\");\n",
        name
    ));
    output.push_str("        }\n");
    output.push_str("        this.bytes = bytes;\n");
    output.push_str("    }\n");
    output.push_str("}\n");
}

#[cfg(test)]
mod tests {
    use crate::codegen::{BindingGenerator, GeneratedUnit, Language};
    use crate::parser::{parse_schema, NamespaceContext};
    use std::path::Path;

    fn units(text: &str) -> Vec<GeneratedUnit> {
        let graph = parse_schema(text, &mut NamespaceContext::new()).unwrap();
        BindingGenerator::for_language(Language::Java).generate_units(&graph)
    }

    #[test]
    fn test_class_layout() {
        let units = units(
            r#"{"type":"record","name":"User","namespace":"com.acme","fields":[
                {"name":"id","type":"long"},
                {"name":"first_name","type":["null","string"],"default":null},
                {"name":"scores","type":{"type":"array","items":"int"}},
                {"name":"status","type":{"type":"enum","name":"Status","symbols":["ACTIVE","CLOSED"],"default":"ACTIVE"}}
            ]}"#,
        );
        assert_eq!(units[0].path, Path::new("com/acme/User.java"));
        let code = &units[0].contents;
        assert!(code.contains("package com.acme;\n"));
        assert!(code.contains("    public long id;\n"));
        assert!(code.contains("    public String firstName;\n"));
        assert!(code.contains("    public java.util.List<Integer> scores;\n"));
        assert!(code.contains("    public com.acme.Status status;\n"));

        let status = &units[1].contents;
        assert!(status.contains("public enum Status {\n    ACTIVE,\n    CLOSED;\n"));
        assert!(status.contains("public static final Status DEFAULT = ACTIVE;"));
    }

    #[test]
    fn test_nullable_primitive_is_boxed() {
        let units = units(r#"{"type":"record","name":"R","fields":[{"name":"n","type":["null","int"]}]}"#);
        assert_eq!(units[0].path, Path::new("R.java"));
        assert!(units[0].contents.contains("public Integer n;"));
        assert!(!units[0].contents.contains("package"));
    }

    #[test]
    fn test_colliding_names_get_suffix() {
        let units = units(
            r#"{"type":"record","name":"P","fields":[
                {"name":"firstName","type":"string"},
                {"name":"first_name","type":"int"},
                {"name":"mode","type":{"type":"enum","name":"Mode","symbols":["int","int_"],"default":"int_"}}
            ]}"#,
        );
        let class = &units[0].contents;
        assert!(class.contains("    public String firstName;\n    public int firstName2;\n"));

        let mode = &units[1].contents;
        assert!(mode.contains("public enum Mode {\n    int_,\n    int__2;\n"));
        assert!(mode.contains("public static final Mode DEFAULT = int__2;"));
    }

    #[test]
    fn test_fixed_class() {
        let units = units(r#"{"type":"fixed","name":"Md5","namespace":"org.x","size":16}"#);
        assert!(units[0].contents.contains("public static final int SIZE = 16;"));
    }
}
