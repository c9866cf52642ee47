//! Scenario Tests
//!
//! End-to-end behaviour of parsing, fingerprinting and compatibility on the
//! fixture schemas.

use avro_gate::compatibility::{CompatibilityMode, CompatibilityResolver, ViolationReason};
use avro_gate::parser::{parse_idl, parse_protocol, parse_schema, NamespaceContext};
use avro_gate::registry::SubjectHistory;
use avro_gate::{ParseErrorKind, SchemaFingerprint, SchemaGraph};

fn parse(text: &str) -> SchemaGraph {
    parse_schema(text, &mut NamespaceContext::new()).unwrap()
}

fn user_history() -> SubjectHistory {
    SubjectHistory::from_schemas("user-v1", vec![parse(include_str!("fixtures/user_v1.avsc"))])
}

// =============================================================================
// user-v1
// =============================================================================

#[test]
fn test_user_added_field_with_default_is_backward_compatible() {
    let candidate = parse(include_str!("fixtures/user_v2_email.avsc"));
    let resolution = CompatibilityResolver::new(CompatibilityMode::Backward).resolve(&candidate, &user_history());
    assert!(resolution.verdict.is_compatible(), "{:?}", resolution.verdict);
    assert_eq!(resolution.checked_versions, vec![1]);
}

#[test]
fn test_user_removed_field_without_default_is_incompatible() {
    let candidate = parse(include_str!("fixtures/user_v2_no_name.avsc"));
    let resolution = CompatibilityResolver::new(CompatibilityMode::Backward).resolve(&candidate, &user_history());

    let violations = resolution.verdict.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].path, "name");
    assert_eq!(violations[0].reason, ViolationReason::FieldRemovedWithoutDefault);
}

#[test]
fn test_user_full_modes() {
    let email = parse(include_str!("fixtures/user_v2_email.avsc"));
    for mode in [CompatibilityMode::Forward, CompatibilityMode::Full, CompatibilityMode::FullTransitive] {
        let resolution = CompatibilityResolver::new(mode).resolve(&email, &user_history());
        assert!(resolution.verdict.is_compatible(), "{}: {:?}", mode, resolution.verdict);
    }

    let no_name = parse(include_str!("fixtures/user_v2_no_name.avsc"));
    let forward = CompatibilityResolver::new(CompatibilityMode::Forward).resolve(&no_name, &user_history());
    assert!(forward.verdict.is_compatible());
    let full = CompatibilityResolver::new(CompatibilityMode::Full).resolve(&no_name, &user_history());
    assert!(!full.verdict.is_compatible());
}

#[test]
fn test_none_mode_is_a_reported_bypass() {
    let candidate = parse(include_str!("fixtures/user_v2_no_name.avsc"));
    let resolution = CompatibilityResolver::new(CompatibilityMode::None).resolve(&candidate, &user_history());
    assert!(resolution.verdict.is_compatible());
    assert!(resolution.bypassed);
    assert!(resolution.checked_versions.is_empty());
}

// =============================================================================
// Fingerprints
// =============================================================================

#[test]
fn test_fingerprint_ignores_docs_aliases_and_key_order() {
    let a = parse(include_str!("fixtures/user_v1.avsc"));
    let b = parse(include_str!("fixtures/user_v1_restyled.avsc"));
    assert_eq!(SchemaFingerprint::of(&a), SchemaFingerprint::of(&b));
}

#[test]
fn test_fingerprint_ignores_union_branch_order() {
    let a = parse(r#"{"type":"record","name":"R","fields":[{"name":"v","type":["int","string","null"]}]}"#);
    let b = parse(r#"{"type":"record","name":"R","fields":[{"name":"v","type":["null","string","int"]}]}"#);
    assert_eq!(SchemaFingerprint::of(&a), SchemaFingerprint::of(&b));
}

#[test]
fn test_fingerprint_sensitive_to_field_order() {
    let a = parse(r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"int"}]}"#);
    let b = parse(r#"{"type":"record","name":"R","fields":[{"name":"b","type":"int"},{"name":"a","type":"int"}]}"#);
    assert_ne!(SchemaFingerprint::of(&a), SchemaFingerprint::of(&b));
}

#[test]
fn test_fingerprint_hex_round_trip() {
    let fp = SchemaFingerprint::of(&parse(include_str!("fixtures/node_tree.avsc")));
    assert_eq!(fp.to_hex().len(), 64);
    assert_eq!(SchemaFingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
}

// =============================================================================
// Cycles
// =============================================================================

#[test]
fn test_recursion_through_array_parses() {
    let graph = parse(include_str!("fixtures/node_tree.avsc"));
    assert_eq!(graph.full_name().as_deref(), Some("com.acme.tree.Node"));
    assert_eq!(graph.reachable_types(), vec!["com.acme.tree.Node".to_string()]);
}

#[test]
fn test_direct_self_containment_rejected() {
    let mut ctx = NamespaceContext::new();
    let err = parse_schema(include_str!("fixtures/node_self.avsc"), &mut ctx).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::RecursiveWithoutIndirection);
    assert!(ctx.is_empty());
}

// =============================================================================
// Multi-type sources
// =============================================================================

#[test]
fn test_protocol_types_become_graphs() {
    let graphs = parse_protocol(include_str!("fixtures/commerce.avpr"), &mut NamespaceContext::new()).unwrap();
    let names: Vec<_> = graphs.iter().filter_map(|g| g.full_name()).collect();
    assert_eq!(
        names,
        vec!["com.acme.commerce.Currency", "com.acme.commerce.Money", "com.acme.commerce.Invoice"]
    );
    assert_eq!(graphs[2].types().len(), 3);
}

#[test]
fn test_idl_declarations_become_graphs() {
    let mut ctx = NamespaceContext::new();
    let graphs = parse_idl(include_str!("fixtures/orders.avdl"), &mut ctx).unwrap();
    let names: Vec<_> = graphs.iter().filter_map(|g| g.full_name()).collect();
    assert_eq!(
        names,
        vec![
            "com.acme.shop.OrderState",
            "com.acme.shop.Sha1",
            "com.acme.shop.LineItem",
            "com.acme.shop.Order",
            "com.acme.shop.OrderRejected",
        ]
    );
    assert!(ctx.contains("com.acme.shop.Order"));
}

#[test]
fn test_cross_file_reference_needs_prior_definition() {
    let order = r#"{"type":"record","name":"Invoice","namespace":"com.acme.billing","fields":[
        {"name":"total","type":"com.acme.commerce.Money"}]}"#;

    let mut ctx = NamespaceContext::new();
    let err = parse_schema(order, &mut ctx).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UnresolvedReference);

    parse_protocol(include_str!("fixtures/commerce.avpr"), &mut ctx).unwrap();
    let graph = parse_schema(order, &mut ctx).unwrap();
    assert!(graph.lookup("com.acme.commerce.Currency").is_some());
}
