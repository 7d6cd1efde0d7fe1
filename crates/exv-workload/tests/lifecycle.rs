//! End-to-end workload lifecycle tests against the in-memory control plane.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;

use exv_cluster::{Call, InMemoryControlPlane, UnitScript, WorkloadPhase};
use exv_core::cancel;
use exv_core::config::WorkloadConfig;
use exv_core::{AutoscalingMode, ExperimentDefinition, WorkloadProfile};
use exv_workload::{
    DecodeStage, LaunchConfig, TerminalState, WorkloadError, WorkloadLifecycleManager,
};

fn experiment() -> ExperimentDefinition {
    ExperimentDefinition {
        name: "baseline".to_string(),
        target_branch: "main".to_string(),
        namespace: "exp".to_string(),
        autoscaling: AutoscalingMode::Off,
        overrides: Vec::new(),
        workload_env: BTreeMap::new(),
        tags: Vec::new(),
        colocated_workload: false,
        profile: WorkloadProfile::Standard,
    }
}

fn launch_config() -> LaunchConfig {
    let settings = WorkloadConfig {
        stage_duration: "10s".to_string(),
        ..Default::default()
    };
    LaunchConfig::for_experiment(&settings, &experiment(), 0)
}

fn results_payload() -> String {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        let data = b"Type,Name,Requests\nGET,/,42\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "results_stats.csv", &data[..])
            .unwrap();
        builder.finish().unwrap();
    }
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&tar_bytes).unwrap();
    STANDARD.encode(gz.finish().unwrap())
}

fn index_of(calls: &[Call], pred: impl Fn(&Call) -> bool) -> Option<usize> {
    calls.iter().position(pred)
}

#[tokio::test(start_paused = true)]
async fn succeeded_workload_is_retrieved_then_deleted() {
    let cp = InMemoryControlPlane::new();
    cp.set_unit_script(UnitScript {
        logs: results_payload(),
        ..Default::default()
    });
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let dest = tempfile::tempdir().unwrap();

    let run = manager
        .execute(&launch_config(), dest.path(), cancel::never())
        .await
        .unwrap();

    assert_eq!(run.terminal, TerminalState::Succeeded);
    assert_eq!(run.name, "loadgenerator-baseline-0");
    let results = run.results.unwrap();
    assert_eq!(results.files.len(), 1);
    assert!(dest.path().join("results_stats.csv").is_file());

    let calls = cp.calls();
    let logs = index_of(&calls, |c| matches!(c, Call::UnitLogs { .. })).unwrap();
    let delete = index_of(&calls, |c| matches!(c, Call::DeleteUnit { .. })).unwrap();
    assert!(logs < delete, "logs must be read before deletion: {calls:?}");
    assert!(cp.unit_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_workload_still_retrieves_and_surfaces_decode_failure() {
    let cp = InMemoryControlPlane::new();
    cp.set_unit_script(UnitScript {
        phases: vec![WorkloadPhase::Pending, WorkloadPhase::Failed],
        logs: String::new(),
    });
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let dest = tempfile::tempdir().unwrap();

    let err = manager
        .execute(&launch_config(), dest.path(), cancel::never())
        .await
        .unwrap_err();

    match err {
        WorkloadError::Decode(failure) => assert_eq!(failure.stage(), DecodeStage::Payload),
        other => panic!("unexpected error: {other}"),
    }
    let calls = cp.calls();
    assert!(calls.iter().any(|c| matches!(c, Call::UnitLogs { .. })));
    assert!(cp.unit_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_workload_with_results_is_reported_failed() {
    let cp = InMemoryControlPlane::new();
    cp.set_unit_script(UnitScript {
        phases: vec![WorkloadPhase::Running, WorkloadPhase::Failed],
        logs: results_payload(),
    });
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let dest = tempfile::tempdir().unwrap();

    let run = manager
        .execute(&launch_config(), dest.path(), cancel::never())
        .await
        .unwrap();
    assert_eq!(run.terminal, TerminalState::Failed);
    assert!(run.results.is_some());
}

#[tokio::test(start_paused = true)]
async fn timed_out_workload_skips_retrieval_but_is_deleted() {
    let cp = InMemoryControlPlane::new();
    cp.set_unit_script(UnitScript {
        phases: vec![WorkloadPhase::Pending, WorkloadPhase::Running],
        logs: results_payload(),
    });
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let dest = tempfile::tempdir().unwrap();

    let config = launch_config();
    assert_eq!(config.timeout, Duration::from_secs(10 * 8 + 60));

    let start = tokio::time::Instant::now();
    let run = manager
        .execute(&config, dest.path(), cancel::never())
        .await
        .unwrap();

    assert_eq!(run.terminal, TerminalState::TimedOut);
    assert!(run.results.is_none());
    assert!(start.elapsed() >= config.timeout);
    let calls = cp.calls();
    assert!(!calls.iter().any(|c| matches!(c, Call::UnitLogs { .. })));
    assert!(calls.iter().any(|c| matches!(c, Call::DeleteUnit { .. })));
    assert!(cp.unit_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_force_deletes_the_group() {
    let cp = InMemoryControlPlane::new();
    cp.set_unit_script(UnitScript {
        phases: vec![WorkloadPhase::Running],
        logs: String::new(),
    });
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let dest = tempfile::tempdir().unwrap();
    let (tx, rx) = cancel::channel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = tx.send(true);
    });

    let err = manager
        .execute(&launch_config(), dest.path(), rx)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkloadError::Cancelled));

    let calls = cp.calls();
    assert!(calls.contains(&Call::DeleteUnits {
        selector: "app=loadgenerator".to_string()
    }));
    assert!(cp.unit_names().is_empty());
}

#[tokio::test]
async fn launch_failure_is_reported_and_cleaned_up() {
    let cp = InMemoryControlPlane::new();
    cp.fail_next_create("admission webhook denied the request");
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let dest = tempfile::tempdir().unwrap();

    let err = manager
        .execute(&launch_config(), dest.path(), cancel::never())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkloadError::Launch(_)));
    // Best-effort delete of a unit that was never created.
    assert!(cp.calls().iter().any(|c| matches!(c, Call::DeleteUnit { .. })));
}

#[tokio::test]
async fn launched_unit_carries_merged_environment() {
    let cp = InMemoryControlPlane::new();
    let manager = WorkloadLifecycleManager::new(Arc::new(cp.clone()));
    let config = launch_config();

    let handle = manager.launch(&config).await.unwrap();
    let spec = cp.unit_spec("exp", handle.name()).unwrap();
    assert_eq!(spec.env["LOADGENERATOR_STAGE_DURATION"], "10");
    assert_eq!(spec.labels["app"], "loadgenerator");
    assert_eq!(spec.avoid_node_label.as_deref(), Some("scaphandre"));
}
