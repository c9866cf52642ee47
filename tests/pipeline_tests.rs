//! Pipeline Tests
//!
//! Full builds against a file-snapshot registry in a temporary workspace.

use std::fs;
use std::path::Path;

use avro_gate::codegen::DriftKind;
use avro_gate::registry::RegistryClient;
use avro_gate::{
    AppConfig, BuildOptions, CompatibilityMode, FileRegistry, FsSchemaSource, Language, Orchestrator,
    OutputMode, SubjectOutcome, ViolationReason,
};
use tempfile::{tempdir, TempDir};

fn workspace() -> TempDir {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("schemas")).unwrap();
    dir
}

fn put(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join("schemas").join(name), text).unwrap();
}

fn config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.source.roots = vec![dir.join("schemas")];
    config.output.dir = dir.join("generated");
    config.registry.path = dir.join("registry");
    config.retry.backoff_ms = 0;
    config
}

#[test]
fn test_evolution_through_registry_snapshot() {
    let dir = workspace();
    let registry = FileRegistry::init(dir.path().join("registry"), true).unwrap();
    let source = FsSchemaSource::new();
    let mut cfg = config(dir.path());
    cfg.registry.register_on_build = true;

    // v1 registers
    put(dir.path(), "user.avsc", include_str!("fixtures/user_v1.avsc"));
    let report = Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();
    assert!(report.is_success());
    assert_eq!(report.subject("com.acme.User").unwrap().registered, Some(1));

    // compatible evolution registers v2
    put(dir.path(), "user.avsc", include_str!("fixtures/user_v2_email.avsc"));
    let report = Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();
    let user = report.subject("com.acme.User").unwrap();
    assert!(matches!(user.outcome, SubjectOutcome::Compatible { bypassed: false, .. }));
    assert_eq!(user.registered, Some(2));
    let generated = fs::read_to_string(dir.path().join("generated/com/acme/user.rs")).unwrap();
    assert!(generated.contains("pub email: String,"));

    // dropping `name` breaks every version, nothing is written or registered
    put(dir.path(), "user.avsc", include_str!("fixtures/user_v2_no_name.avsc"));
    let report = Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();
    assert!(!report.is_success());
    let user = report.subject("com.acme.User").unwrap();
    let SubjectOutcome::Incompatible { against_version, violations } = &user.outcome else {
        panic!("expected incompatible, got {:?}", user.outcome);
    };
    assert_eq!(*against_version, 2);
    assert!(violations.iter().all(|v| v.reason == ViolationReason::FieldRemovedWithoutDefault));
    assert_eq!(user.registered, None);
    assert_eq!(registry.history("com.acme.User").unwrap().len(), 2);
    assert_eq!(
        fs::read_to_string(dir.path().join("generated/com/acme/user.rs")).unwrap(),
        generated
    );

    let repo = git2::Repository::open(dir.path().join("registry")).unwrap();
    assert!(repo.revparse_single("com.acme.User/v2").is_ok());
}

#[test]
fn test_idl_and_protocol_sources_build_together() {
    let dir = workspace();
    let registry = FileRegistry::init(dir.path().join("registry"), false).unwrap();
    put(dir.path(), "orders.avdl", include_str!("fixtures/orders.avdl"));
    put(dir.path(), "commerce.avpr", include_str!("fixtures/commerce.avpr"));

    let source = FsSchemaSource::new();
    let report = Orchestrator::new(&source, &registry, BuildOptions::from_config(&config(dir.path())))
        .run()
        .unwrap();

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.subjects.len(), 8);
    let out = dir.path().join("generated");
    assert!(out.join("com/acme/shop/order.rs").exists());
    assert!(out.join("com/acme/shop/order_state.rs").exists());
    assert!(out.join("com/acme/commerce/invoice.rs").exists());

    let order = fs::read_to_string(out.join("com/acme/shop/order.rs")).unwrap();
    assert!(order.contains("pub items: Vec<crate::com::acme::shop::line_item::LineItem>,"));
    assert!(order.contains("pub external_ref: OrderExternalRef,"));
}

#[test]
fn test_java_bindings_and_drift_check() {
    let dir = workspace();
    let registry = FileRegistry::init(dir.path().join("registry"), false).unwrap();
    put(dir.path(), "commerce.avpr", include_str!("fixtures/commerce.avpr"));

    let mut cfg = config(dir.path());
    cfg.output.language = Language::Java;
    let source = FsSchemaSource::new();
    Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();

    let money = dir.path().join("generated/com/acme/commerce/Money.java");
    assert!(fs::read_to_string(&money).unwrap().contains("public com.acme.commerce.Currency currency;"));

    fs::write(&money, "// hand edited\n").unwrap();
    let mut check = BuildOptions::from_config(&cfg);
    check.output_mode = OutputMode::Check;
    let report = Orchestrator::new(&source, &registry, check).run().unwrap();
    assert_eq!(report.drift.len(), 1);
    assert_eq!(report.drift[0].kind, DriftKind::Stale);
    assert!(report.drift[0].diff.contains("-// hand edited"));
}

#[test]
fn test_none_mode_lets_breaking_change_through() {
    let dir = workspace();
    let registry = FileRegistry::init(dir.path().join("registry"), false).unwrap();
    let source = FsSchemaSource::new();
    let mut cfg = config(dir.path());
    cfg.registry.register_on_build = true;

    put(dir.path(), "user.avsc", include_str!("fixtures/user_v1.avsc"));
    Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();

    cfg.compatibility.mode = CompatibilityMode::None;
    put(dir.path(), "user.avsc", include_str!("fixtures/user_v2_no_name.avsc"));
    let report = Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();

    assert!(report.is_success());
    let user = report.subject("com.acme.User").unwrap();
    assert!(matches!(user.outcome, SubjectOutcome::Compatible { bypassed: true, .. }));
    assert_eq!(user.registered, Some(2));
}

#[test]
fn test_subject_mapping_from_config_file() {
    let dir = workspace();
    let registry = FileRegistry::init(dir.path().join("registry"), false).unwrap();
    put(dir.path(), "user.avsc", include_str!("fixtures/user_v1.avsc"));

    let file = dir.path().join("avro-gate.toml");
    fs::write(
        &file,
        format!(
            "[source]\nroots = [{:?}]\n\n[output]\ndir = {:?}\n\n\
             [[subjects]]\nname = \"com.acme.User\"\nsubject = \"users-value\"\n",
            dir.path().join("schemas").display().to_string(),
            dir.path().join("generated").display().to_string(),
        ),
    )
    .unwrap();
    let mut cfg = AppConfig::load_from(file.to_str()).unwrap();
    cfg.registry.register_on_build = true;

    let source = FsSchemaSource::new();
    let report = Orchestrator::new(&source, &registry, BuildOptions::from_config(&cfg)).run().unwrap();

    assert!(report.is_success(), "{:?}", report);
    let user = report.subject("users-value").unwrap();
    assert_eq!(user.full_name.as_deref(), Some("com.acme.User"));
    assert_eq!(user.registered, Some(1));
    assert!(report.subject("com.acme.User").is_none());
    assert_eq!(registry.subjects().unwrap(), vec!["users-value".to_string()]);
}

#[test]
fn test_missing_registry_snapshot_is_unavailable() {
    let dir = workspace();
    let err = FileRegistry::open(dir.path().join("registry")).unwrap_err();
    assert!(err.is_transient());
}
