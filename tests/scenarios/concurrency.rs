//! Runs sharing a concurrency group

use crate::helpers::*;
use blinko_release::core::{ExecutionStatus, StageState};
use blinko_release::execution::{ConcurrencyGroups, ExecutionEvent, GroupFiles};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const WAITING_YAML: &str = r#"
name: "blinko"
product: "Blinko"
concurrency:
  cancel_in_progress: false
stages:
  - id: "desktop"
    kind: build
    publish: true
    matrix:
      - platform: "linux-x64"
        command: "bun"
        artifacts:
          - path: "dist/Blinko.AppImage"
"#;

#[tokio::test]
async fn test_newer_run_supersedes_older_one() {
    let fixture = Fixture::new();
    fixture.fakes.builder.set_delay(Duration::from_millis(1500));
    let groups = ConcurrencyGroups::new();

    let older = tokio::spawn(run_with(
        fixture.engine_in(groups.clone()),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.2.3"),
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let newer = run_with(
        fixture.engine_in(groups.clone()),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.2.3"),
    )
    .await;
    let older = older.await.unwrap();

    assert_eq!(older.status(), ExecutionStatus::Cancelled, "{}", older.summary());
    assert!(older
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::PipelineCancelled { .. })));
    assert!(matches!(older.stage_state("desktop"), StageState::Cancelled));
    assert!(matches!(older.stage_state("changelog"), StageState::Cancelled));

    assert_run_completed(&newer);
    assert!(groups.holder("blinko-1.2.3").is_none());
}

#[tokio::test]
async fn test_different_versions_run_side_by_side() {
    let fixture = Fixture::new();
    fixture.fakes.builder.set_delay(Duration::from_millis(100));
    let groups = ConcurrencyGroups::new();

    let (a, b) = tokio::join!(
        run_with(
            fixture.engine_in(groups.clone()),
            pipeline_from_yaml(RELEASE_YAML),
            tag_push("v1.2.3"),
        ),
        run_with(
            fixture.engine_in(groups.clone()),
            pipeline_from_yaml(RELEASE_YAML),
            tag_push("v1.2.4"),
        ),
    );

    assert_run_completed(&a);
    assert_run_completed(&b);
    assert!(fixture.fakes.release_host.record("v1.2.3").is_some());
    assert!(fixture.fakes.release_host.record("v1.2.4").is_some());
}

#[tokio::test]
async fn test_newer_run_waits_when_not_cancelling() {
    let fixture = Fixture::new();
    fixture.fakes.builder.set_delay(Duration::from_millis(300));
    let groups = ConcurrencyGroups::new();
    let timeline = Arc::new(Mutex::new(Vec::new()));

    let first_engine = fixture.engine_in(groups.clone());
    let log = timeline.clone();
    first_engine.add_event_handler(move |event| {
        if let ExecutionEvent::PipelineCompleted { .. } = event {
            log.lock().unwrap().push("first finished");
        }
    });

    let second_engine = fixture.engine_in(groups.clone());
    let log = timeline.clone();
    second_engine.add_event_handler(move |event| {
        if let ExecutionEvent::StageStarted { .. } = event {
            log.lock().unwrap().push("second started a stage");
        }
    });

    let first = tokio::spawn(run_with(
        first_engine,
        pipeline_from_yaml(WAITING_YAML),
        tag_push("v1.2.3"),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = run_with(
        second_engine,
        pipeline_from_yaml(WAITING_YAML),
        tag_push("v1.2.3"),
    )
    .await;
    let first = first.await.unwrap();

    assert_run_completed(&first);
    assert_run_completed(&second);
    assert_eq!(
        timeline.lock().unwrap().as_slice(),
        &["first finished", "second started a stage"]
    );
}

#[tokio::test]
async fn test_separate_invocations_supersede_through_group_files() {
    let fixture = Fixture::new();
    fixture.fakes.builder.set_delay(Duration::from_millis(1500));
    let group_dir = TempDir::new().unwrap();
    let files = GroupFiles::new(group_dir.path()).with_poll_interval(Duration::from_millis(20));

    // Each engine owns its registry, as two CLI processes would
    let older = tokio::spawn(run_with(
        fixture.engine().with_group_files(files.clone()),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.2.3"),
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let newer = run_with(
        fixture.engine().with_group_files(files.clone()),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.2.3"),
    )
    .await;
    let older = older.await.unwrap();

    assert_eq!(older.status(), ExecutionStatus::Cancelled, "{}", older.summary());
    assert!(matches!(older.stage_state("desktop"), StageState::Cancelled));
    assert_run_completed(&newer);
    assert!(!files.path_for("blinko-1.2.3").exists());
}
