// tests/reset_scenario.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use subforge::capability::Capabilities;
use subforge::config::ConfigFile;
use subforge::dag::StageRegistry;
use subforge::engine::{Orchestrator, RunOptions, Shutdown};
use subforge::jobs::{ResetAction, ResetOptions, allocate, reset};
use subforge::manifest::ManifestStore;
use subforge::types::{JobStatus, StageStatus};
use subforge_test_utils::builders::chain_config;
use subforge_test_utils::fake_executor::{FakeBehaviour, FakeExecutor};
use subforge_test_utils::init_tracing;

const OWNER: &str = "test";

/// Allocate a job and run the A -> B -> C chain on it.
async fn completed_chain(
    root: &Path,
    failing: Option<&str>,
) -> (ConfigFile, StageRegistry, String, PathBuf) {
    init_tracing();
    let cfg = chain_config();
    let registry = StageRegistry::from_config(&cfg);
    let job = allocate(root, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(), OWNER).unwrap();

    let mut executor = FakeExecutor::from_config(&cfg, Arc::new(Mutex::new(Vec::new())));
    if let Some(stage) = failing {
        executor = executor.with_behaviour(stage, FakeBehaviour::Fail(1));
    }
    let options =
        RunOptions::from_config(&cfg.config, Capabilities::from_config(&cfg.capability, None));

    let mut store = ManifestStore::load_or_create(&job.job_dir).unwrap();
    let (_handle, mut shutdown) = Shutdown::new();
    Orchestrator::new(&registry, executor, options)
        .run(&mut store, &[], &mut shutdown)
        .await
        .unwrap();

    (cfg, registry, job.job_id.to_string(), job.job_dir)
}

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn dry_run_matches_real_run_and_leaves_manifest_untouched() {
    let root = tempfile::tempdir().unwrap();
    let (_cfg, registry, job_id, job_dir) = completed_chain(root.path(), None).await;
    let manifest_path = job_dir.join("manifest.json");
    let before = fs::read(&manifest_path).unwrap();

    let dry = reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["B"]),
        ResetOptions {
            dry_run: true,
            cascade: false,
        },
        Some(&registry),
    )
    .unwrap();
    assert_eq!(fs::read(&manifest_path).unwrap(), before);

    let real = reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["B"]),
        ResetOptions::default(),
        Some(&registry),
    )
    .unwrap();
    assert_eq!(dry.to_string(), real.to_string());
    assert_ne!(fs::read(&manifest_path).unwrap(), before);

    let text = real.to_string();
    assert!(text.contains("B  COMPLETED -> PENDING"), "{text}");
    assert!(text.contains("job status: COMPLETED -> RUNNING"), "{text}");
}

#[tokio::test]
async fn reset_touches_only_named_stage_and_keeps_files() {
    let root = tempfile::tempdir().unwrap();
    let (_cfg, registry, job_id, job_dir) = completed_chain(root.path(), None).await;
    let a_before = ManifestStore::load(&job_dir).unwrap().stage("A").cloned();
    let c_before = ManifestStore::load(&job_dir).unwrap().stage("C").cloned();

    let report = reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["B", "nonexistent"]),
        ResetOptions::default(),
        Some(&registry),
    )
    .unwrap();
    assert_eq!(report.changed(), 1);
    assert_eq!(report.entries[1].action, ResetAction::NotRecorded);

    let store = ManifestStore::load(&job_dir).unwrap();
    let b = store.stage("B").unwrap();
    assert_eq!(b.status, StageStatus::Pending);
    assert!(b.started_at.is_none() && b.ended_at.is_none());
    assert!(b.inputs.is_empty() && b.outputs.is_empty() && b.error.is_none());
    assert_eq!(store.stage("A").cloned(), a_before);
    assert_eq!(store.stage("C").cloned(), c_before);
    assert_eq!(store.manifest().status, JobStatus::Running);

    // Artifacts stay on disk.
    assert!(job_dir.join("b/B.out").is_file());
}

#[tokio::test]
async fn cascade_resets_recorded_dependents() {
    let root = tempfile::tempdir().unwrap();
    let (_cfg, registry, job_id, job_dir) = completed_chain(root.path(), None).await;

    let report = reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["A"]),
        ResetOptions {
            dry_run: false,
            cascade: true,
        },
        Some(&registry),
    )
    .unwrap();

    let stages: Vec<_> = report.entries.iter().map(|e| e.stage.as_str()).collect();
    assert_eq!(stages, vec!["A", "B", "C"]);
    assert!(report.entries[1].cascaded);

    let store = ManifestStore::load(&job_dir).unwrap();
    for stage in ["A", "B", "C"] {
        assert_eq!(store.stage(stage).unwrap().status, StageStatus::Pending);
    }
}

#[tokio::test]
async fn resetting_the_failed_stage_clears_failed_job_status() {
    let root = tempfile::tempdir().unwrap();
    let (_cfg, registry, job_id, job_dir) = completed_chain(root.path(), Some("B")).await;
    assert_eq!(
        ManifestStore::load(&job_dir).unwrap().manifest().status,
        JobStatus::Failed
    );

    // Resetting an unrelated stage leaves the job FAILED.
    let report = reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["A"]),
        ResetOptions { dry_run: true, cascade: false },
        Some(&registry),
    )
    .unwrap();
    assert_eq!(report.status_after, JobStatus::Failed);

    let report = reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["B"]),
        ResetOptions::default(),
        Some(&registry),
    )
    .unwrap();
    assert_eq!(report.status_before, JobStatus::Failed);
    assert_eq!(report.status_after, JobStatus::Running);
}

#[tokio::test]
async fn reset_stage_can_run_again() {
    let root = tempfile::tempdir().unwrap();
    let (cfg, registry, job_id, job_dir) = completed_chain(root.path(), None).await;

    reset(
        root.path(),
        OWNER,
        &job_id,
        &names(&["C"]),
        ResetOptions::default(),
        Some(&registry),
    )
    .unwrap();

    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::from_config(&cfg, Arc::clone(&executed));
    let options =
        RunOptions::from_config(&cfg.config, Capabilities::from_config(&cfg.capability, None));
    let mut store = ManifestStore::load(&job_dir).unwrap();
    let (_handle, mut shutdown) = Shutdown::new();
    let report = Orchestrator::new(&registry, executor, options)
        .run(&mut store, &[], &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(*executed.lock().unwrap(), vec!["C".to_string()]);
    assert_eq!(store.stage("C").unwrap().attempt, 2);
}

#[tokio::test]
async fn builtin_pipeline_reset_of_demux_and_mux() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let cfg = ConfigFile::try_from(subforge::config::defaults::builtin_pipeline()).unwrap();
    let registry = StageRegistry::from_config(&cfg);
    let job = allocate(
        root.path(),
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        OWNER,
    )
    .unwrap();

    let mut store = ManifestStore::load_or_create(&job.job_dir).unwrap();
    store.set_source(PathBuf::from("/media/film.mkv"));
    let executor = FakeExecutor::from_config(&cfg, Arc::new(Mutex::new(Vec::new())));
    let options =
        RunOptions::from_config(&cfg.config, Capabilities::from_config(&cfg.capability, None));
    let (_handle, mut shutdown) = Shutdown::new();
    let report = Orchestrator::new(&registry, executor, options)
        .run(&mut store, &[], &mut shutdown)
        .await
        .unwrap();
    assert_eq!(report.job_status, JobStatus::Completed);

    let manifest_path = job.job_dir.join("manifest.json");
    let before = fs::read(&manifest_path).unwrap();
    let stages = names(&["demux", "mux"]);

    let dry = reset(
        root.path(),
        OWNER,
        job.job_id.as_str(),
        &stages,
        ResetOptions { dry_run: true, cascade: false },
        Some(&registry),
    )
    .unwrap();
    assert_eq!(fs::read(&manifest_path).unwrap(), before);

    let real = reset(
        root.path(),
        OWNER,
        job.job_id.as_str(),
        &stages,
        ResetOptions::default(),
        Some(&registry),
    )
    .unwrap();
    assert_eq!(dry.to_string(), real.to_string());

    let store = ManifestStore::load(&job.job_dir).unwrap();
    assert_eq!(store.stage("demux").unwrap().status, StageStatus::Pending);
    assert_eq!(store.stage("mux").unwrap().status, StageStatus::Pending);
    assert_eq!(store.stage("separate").unwrap().status, StageStatus::Completed);
    assert_eq!(store.manifest().status, JobStatus::Running);
    assert!(job.job_dir.join("audio/demux.out").is_file());
    assert!(job.job_dir.join("final/mux.out").is_file());
}
