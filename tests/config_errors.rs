// tests/config_errors.rs

use std::fs;

use subforge::config::{ConfigFile, load_and_validate, load_or_builtin};
use subforge::errors::SubforgeError;
use subforge_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder};

fn validate(builder: ConfigFileBuilder) -> Result<ConfigFile, SubforgeError> {
    ConfigFile::try_from(builder.raw())
}

#[test]
fn cycle_is_rejected() {
    let err = validate(
        ConfigFileBuilder::new()
            .with_stage("A", StageConfigBuilder::new("a").after("B").build())
            .with_stage("B", StageConfigBuilder::new("b").after("A").build()),
    )
    .unwrap_err();
    assert!(matches!(err, SubforgeError::DagCycle(_)), "{err}");
}

#[test]
fn self_dependency_is_rejected() {
    let err = validate(
        ConfigFileBuilder::new().with_stage("A", StageConfigBuilder::new("a").after("A").build()),
    )
    .unwrap_err();
    assert!(matches!(err, SubforgeError::ConfigError(_)), "{err}");
}

#[test]
fn unknown_predecessor_is_rejected() {
    let err = validate(
        ConfigFileBuilder::new().with_stage("A", StageConfigBuilder::new("a").after("ghost").build()),
    )
    .unwrap_err();
    assert!(err.to_string().contains("unknown dependency 'ghost'"), "{err}");
}

#[test]
fn input_must_come_from_an_ancestor() {
    // X produces `x`, but A does not run after X.
    let err = validate(
        ConfigFileBuilder::new()
            .with_stage("X", StageConfigBuilder::new("x").output("x").build())
            .with_stage("A", StageConfigBuilder::new("a").input("x").build()),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not a predecessor"), "{err}");

    let err = validate(
        ConfigFileBuilder::new().with_stage("A", StageConfigBuilder::new("a").input("nothing").build()),
    )
    .unwrap_err();
    assert!(err.to_string().contains("no stage produces"), "{err}");
}

#[test]
fn source_role_is_always_available_as_input() {
    let cfg = validate(
        ConfigFileBuilder::new().with_stage(
            "demux",
            StageConfigBuilder::new("demux").arg("{input:source}").input("source").output("audio").build(),
        ),
    );
    assert!(cfg.is_ok());
}

#[test]
fn bad_templates_are_rejected() {
    for arg in ["{gpu}", "{output_dir:elsewhere}", "{input}"] {
        let err = validate(
            ConfigFileBuilder::new()
                .with_stage("A", StageConfigBuilder::new("a").arg(arg).output("a").build()),
        )
        .unwrap_err();
        assert!(matches!(err, SubforgeError::ConfigError(_)), "{arg}: {err}");
    }
}

#[test]
fn duplicate_producer_is_rejected() {
    let err = validate(
        ConfigFileBuilder::new()
            .with_stage("A", StageConfigBuilder::new("a").output("audio").build())
            .with_stage("B", StageConfigBuilder::new("b").output("audio").build()),
    )
    .unwrap_err();
    assert!(err.to_string().contains("declared by both"), "{err}");
}

#[test]
fn toml_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Subforge.toml");
    fs::write(
        &path,
        r#"
[config]
root = "/srv/jobs"
owner = "studio"
timeout_secs = 600

[capability]
device = "cuda:0"
vram_gb = "24"

[stage.demux]
program = "subforge-demux"
args = ["--input", "{input}", "--out", "{output_dir:audio}"]
inputs = ["source"]
outputs = ["audio"]

[stage.separate]
program = "subforge-separate"
args = ["{input:audio}", "--device", "{device}"]
after = ["demux"]
inputs = ["audio"]
outputs = ["vocals"]
timeout_secs = 60
"#,
    )
    .unwrap();

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.config.owner, "studio");
    assert_eq!(cfg.config.timeout_secs, 600);
    assert_eq!(cfg.capability.device, "cuda:0");
    assert_eq!(cfg.capability.extra.get("vram_gb").map(String::as_str), Some("24"));
    assert_eq!(cfg.stage["separate"].timeout_secs, Some(60));
}

#[test]
fn malformed_toml_is_toml_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Subforge.toml");
    fs::write(&path, "[stage.demux\nprogram = ").unwrap();
    assert!(matches!(
        load_and_validate(&path),
        Err(SubforgeError::TomlError(_))
    ));
}

#[test]
fn explicit_missing_file_is_error_but_default_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Subforge.toml");

    assert!(matches!(
        load_or_builtin(&path, true),
        Err(SubforgeError::ConfigError(_))
    ));
    let builtin = load_or_builtin(&path, false).unwrap();
    assert_eq!(builtin.stage.len(), 10);
}
