//! Scan Orchestrator Integration Tests
//!
//! Full scans against in-memory runtime, store and detector fakes.

mod helpers;

use helpers::{
    av_plugins, intel_plugin, plugin, sample_file, unit, FakeConnector, FakeDetector,
    FakeRuntime, Harness,
};
use malscan_common::events::ScanEvent;
use malscan_engine::config::ScanLimits;
use malscan_engine::error::{ScanError, ScanStage};
use malscan_engine::models::{ScanId, TerminalState, SCAN_DOCUMENT_SCHEMA_VERSION};
use malscan_engine::services::store::PoolError;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;

fn sha256_of(path: &std::path::Path) -> String {
    format!("{:x}", Sha256::digest(std::fs::read(path).unwrap()))
}

#[tokio::test]
async fn ten_kilobyte_sample_end_to_end() {
    // Given: a 10 KB sample, two matching workers, one non-matching, one intel
    let (_dir, path) = sample_file(10 * 1024);
    let sha256 = sha256_of(&path);
    let harness = Harness::new(
        FakeRuntime::new(),
        vec![
            plugin("yara", &["*"]),
            plugin("pdf", &["application/pdf"]),
            plugin("pescan", &["application/x-dosexec"]),
            intel_plugin("nsrl"),
        ],
    );

    // When: scanned
    let report = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap();

    // Then: exactly one document carrying the hash, updated with the type
    let documents = harness.store().documents.lock().unwrap().clone();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].schema_version, SCAN_DOCUMENT_SCHEMA_VERSION);
    assert_eq!(documents[0].file.sha256, sha256);
    assert_eq!(documents[0].file.size, 10 * 1024);
    assert_eq!(documents[0].file.name, "sample.bin");
    assert_eq!(
        *harness.store().mime_updates.lock().unwrap(),
        vec![(ScanId("scan-1".to_string()), "application/pdf".to_string())]
    );

    assert_eq!(report.scan_id, ScanId("scan-1".to_string()));
    assert_eq!(report.sha256, sha256);
    assert_eq!(report.mime, "application/pdf");
    assert_eq!(report.counts.completed, 2);
    assert_eq!(report.counts.total(), 2);
    assert_eq!(report.intel.len(), 1);
    assert_eq!(report.intel[0].state, TerminalState::Completed);

    // The sample went into the shared volume under its sha256
    assert_eq!(*harness.runtime.copied.lock().unwrap(), vec![sha256.clone()]);

    // The local results store unit was started and linked
    assert_eq!(
        *harness.runtime.started.lock().unwrap(),
        vec!["malice-elastic".to_string()]
    );
    assert_eq!(harness.connector.connects(), 1);

    let runs = harness.runtime.runs.lock().unwrap().clone();
    assert_eq!(harness.runtime.run_names(), vec!["nsrl", "pdf", "yara"]);
    for run in &runs {
        assert_eq!(run.env.get("MALICE_SCANID").map(String::as_str), Some("scan-1"));
        assert_eq!(run.link.as_deref(), Some("malice-elastic:elasticsearch"));
        assert_eq!(run.unit_name, format!("malice_{}_scan-1", run.plugin));
    }
    let yara = runs.iter().find(|r| r.plugin == "yara").unwrap();
    assert_eq!(yara.args, vec!["-t".to_string(), sha256.clone()]);

    // Intel workers get the sha1 they asked for
    let nsrl = runs.iter().find(|r| r.plugin == "nsrl").unwrap();
    assert_eq!(nsrl.args[1], documents[0].file.sha1);
}

#[tokio::test]
async fn validation_failure_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.exe");
    let harness = Harness::new(FakeRuntime::new(), av_plugins(3));

    let err = harness
        .orchestrator
        .scan(missing.to_str().unwrap(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::NotFound { .. }));
    assert_eq!(err.stage(), ScanStage::Validation);
    assert!(harness.runtime.runs.lock().unwrap().is_empty());
    assert!(harness.runtime.started.lock().unwrap().is_empty());
    assert!(harness.runtime.removed.lock().unwrap().is_empty());
    assert!(harness.runtime.copied.lock().unwrap().is_empty());
    assert!(harness.store().documents.lock().unwrap().is_empty());
    assert_eq!(harness.connector.connects(), 0);
    assert_eq!(harness.pool.attempts(), 0);
}

#[tokio::test]
async fn oversize_sample_is_rejected_before_infrastructure() {
    let (_dir, path) = sample_file(4096);
    let harness = Harness::build(
        FakeRuntime::new(),
        FakeConnector::new(),
        FakeDetector::new("application/pdf"),
        av_plugins(1),
        ScanLimits {
            max_file_size: 1024,
            ..ScanLimits::default()
        },
    );

    let err = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::SizeLimitExceeded { size: 4096, max: 1024, .. }));
    assert!(harness.runtime.started.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_runtime_fails_infra_check() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::new(FakeRuntime::new().unavailable(), av_plugins(2));

    let err = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::RuntimeUnavailable { .. }));
    assert_eq!(err.stage(), ScanStage::Infrastructure);
    assert!(harness.store().documents.lock().unwrap().is_empty());
}

#[tokio::test]
async fn store_unit_start_failure_is_fatal() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::new(FakeRuntime::new().failing_infra(), av_plugins(2));

    match harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap_err()
    {
        ScanError::InfraStart { unit, .. } => assert_eq!(unit, "malice-elastic"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(harness.connector.connects(), 0);
}

#[tokio::test]
async fn store_connection_failure_is_fatal_and_recorded() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::build(
        FakeRuntime::new(),
        FakeConnector::failing(),
        FakeDetector::new("application/pdf"),
        av_plugins(2),
        ScanLimits::default(),
    );

    for _ in 0..2 {
        let err = harness
            .orchestrator
            .scan(path.to_str().unwrap(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Pool(PoolError::Connect(_))));
        assert_eq!(err.code(), "pool");
    }
    // Second scan observed the recorded failure without reconnecting
    assert_eq!(harness.connector.connects(), 1);
    assert!(harness.runtime.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn copy_failure_is_a_registration_error() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::new(FakeRuntime::new().failing_copy(), av_plugins(2));

    let err = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Registration { .. }));
    assert_eq!(err.stage(), ScanStage::Registration);
    assert!(harness.runtime.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stopped_engine_units_are_removed_and_running_ones_kept() {
    let (_dir, path) = sample_file(1024);
    let runtime = FakeRuntime::new().with_units(vec![
        unit("a1", "malice_yara_oldscan", "exited"),
        unit("b2", "malice_copy_1234", "created"),
        unit("c3", "malice-elastic", "running"),
        unit("d4", "postgres", "running"),
        // Live worker of a scan in another engine process
        unit("e5", "malice_clamav_otherscan", "running"),
    ]);
    let harness = Harness::new(runtime, av_plugins(1));

    harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap();

    let mut removed = harness.runtime.removed.lock().unwrap().clone();
    removed.sort();
    assert_eq!(removed, vec!["a1".to_string(), "b2".to_string()]);
    // Store unit was already running
    assert!(harness.runtime.started.lock().unwrap().is_empty());
}

#[tokio::test]
async fn worker_failures_do_not_fail_the_scan() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::new(
        FakeRuntime::new().failing("av01"),
        av_plugins(3),
    );

    let report = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap();

    assert_eq!(report.counts.completed, 2);
    assert_eq!(report.counts.errored, 1);
    let failed = report.workers.iter().find(|w| w.plugin == "av01").unwrap();
    assert_eq!(failed.state, TerminalState::Errored);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn detection_timeout_fails_the_scan() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::build(
        FakeRuntime::new(),
        FakeConnector::new(),
        FakeDetector::slow("application/pdf", Duration::from_secs(30)),
        av_plugins(2),
        ScanLimits {
            detect_timeout: Duration::from_millis(100),
            ..ScanLimits::default()
        },
    );

    let err = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::DetectionTimeout { .. }));
    assert_eq!(err.stage(), ScanStage::Detection);
    // Registered before detection, but no worker dispatched
    assert_eq!(harness.store().documents.lock().unwrap().len(), 1);
    assert!(harness.runtime.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn detector_error_fails_the_scan() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::build(
        FakeRuntime::new(),
        FakeConnector::new(),
        FakeDetector::failing(),
        av_plugins(2),
        ScanLimits::default(),
    );

    let err = harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Detection { .. }));
}

#[tokio::test]
async fn overall_deadline_fails_scan_with_outstanding_workers() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::new(
        FakeRuntime::new().with_delay("av01", Duration::from_secs(30)),
        av_plugins(3),
    );

    let started = Instant::now();
    let err = harness
        .orchestrator
        .scan_with_deadline(
            path.to_str().unwrap(),
            false,
            started + Duration::from_millis(500),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScanError::ScanDeadlineExceeded {
            finished: 2,
            outstanding: 1
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn deadline_during_store_connection_stops_before_registration() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::build(
        FakeRuntime::new(),
        FakeConnector::with_delay(Duration::from_secs(60)),
        FakeDetector::new("application/pdf"),
        av_plugins(2),
        ScanLimits::default(),
    );

    let started = Instant::now();
    let err = harness
        .orchestrator
        .scan_with_deadline(
            path.to_str().unwrap(),
            false,
            started + Duration::from_millis(300),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.code(), "scan_deadline_exceeded");
    assert!(matches!(
        err,
        ScanError::ScanDeadlineExceeded {
            finished: 0,
            outstanding: 0
        }
    ));
    // Nothing persisted, copied or dispatched after the deadline
    assert!(harness.store().documents.lock().unwrap().is_empty());
    assert!(harness.runtime.copied.lock().unwrap().is_empty());
    assert!(harness.runtime.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn deadline_during_intel_is_a_scan_deadline_not_a_detection_timeout() {
    let (_dir, path) = sample_file(1024);
    let mut plugins = av_plugins(2);
    plugins.push(intel_plugin("nsrl"));
    let harness = Harness::new(
        FakeRuntime::new().with_delay("nsrl", Duration::from_secs(30)),
        plugins,
    );

    let started = Instant::now();
    let err = harness
        .orchestrator
        .scan_with_deadline(
            path.to_str().unwrap(),
            false,
            started + Duration::from_millis(500),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.code(), "scan_deadline_exceeded");
    assert!(!matches!(err, ScanError::DetectionTimeout { .. }));
    assert!(harness.store().mime_updates.lock().unwrap().is_empty());
    assert_eq!(harness.runtime.run_names(), vec!["nsrl".to_string()]);
}

#[tokio::test]
async fn slow_detection_past_the_overall_deadline_is_a_scan_deadline() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::build(
        FakeRuntime::new(),
        FakeConnector::new(),
        FakeDetector::slow("application/pdf", Duration::from_secs(30)),
        av_plugins(2),
        ScanLimits::default(),
    );

    let started = Instant::now();
    let err = harness
        .orchestrator
        .scan_with_deadline(
            path.to_str().unwrap(),
            false,
            started + Duration::from_millis(500),
        )
        .await
        .unwrap_err();

    // The overall budget was the binding limit, not the detection timeout
    assert_eq!(err.code(), "scan_deadline_exceeded");
    assert!(harness.runtime.runs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn events_trace_the_state_progression() {
    let (_dir, path) = sample_file(1024);
    let harness = Harness::new(FakeRuntime::new(), av_plugins(2));
    let mut rx = harness.events.subscribe();

    harness
        .orchestrator
        .scan(path.to_str().unwrap(), false)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(ScanEvent::ScanStarted { .. })));
    assert!(matches!(events.last(), Some(ScanEvent::ScanCompleted { completed: 2, .. })));

    let states: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::StateChanged { new_state, .. } => Some(new_state.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            "VALIDATING",
            "INFRA_CHECK",
            "REGISTERING",
            "INTEL_DISPATCH",
            "TYPE_DETECT",
            "WORKER_DISPATCH",
            "AGGREGATING",
            "COMPLETED",
        ]
    );

    let finished = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::WorkerFinished { .. }))
        .count();
    assert_eq!(finished, 2);
}

#[tokio::test]
async fn failed_scan_emits_scan_failed() {
    let harness = Harness::new(FakeRuntime::new().unavailable(), av_plugins(1));
    let mut rx = harness.events.subscribe();
    let (_dir, path) = sample_file(16);

    let _ = harness.orchestrator.scan(path.to_str().unwrap(), false).await;

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    match last {
        Some(ScanEvent::ScanFailed { stage, code, .. }) => {
            assert_eq!(stage, "infrastructure");
            assert_eq!(code, "runtime_unavailable");
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}
