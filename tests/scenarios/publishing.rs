//! Release record, assets, changelog and the sibling dispatch

use crate::helpers::*;
use blinko_release::core::{ReleaseRecord, StageState};

#[tokio::test]
async fn test_release_record_collects_every_platform() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    assert_run_completed(&result);

    let record = fixture.fakes.release_host.record("v1.2.3").unwrap();
    assert_eq!(record.title, "Blinko v1.2.3");
    assert!(!record.prerelease);
    assert_eq!(
        record.asset_names(),
        vec![
            "Blinko_1.2.3_aarch64.dmg",
            "Blinko_1.2.3_amd64.AppImage",
            "Blinko_1.2.3_universal.apk",
            "Blinko_1.2.3_x64.msi",
        ]
    );
    assert_eq!(fixture.fakes.release_host.records().len(), 1);
}

#[tokio::test]
async fn test_publishing_order_does_not_matter() {
    let fast_desktop = Fixture::new();
    let existing = Fixture::new();
    // A record someone created by hand before the run
    existing
        .fakes
        .release_host
        .insert(ReleaseRecord::new("v1.2.3", "Blinko v1.2.3", "manual notes", false));

    fast_desktop.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    existing.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    let a = fast_desktop.fakes.release_host.record("v1.2.3").unwrap();
    let b = existing.fakes.release_host.record("v1.2.3").unwrap();
    assert_eq!(a.asset_names(), b.asset_names());
    assert_eq!(a.body, b.body);
}

#[tokio::test]
async fn test_rerun_replaces_assets_instead_of_duplicating() {
    let fixture = Fixture::new();
    fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    let record = fixture.fakes.release_host.record("v1.2.3").unwrap();
    assert_eq!(record.assets.len(), 4);
}

#[tokio::test]
async fn test_changelog_excludes_release_bot_commits() {
    let fixture = Fixture::new();
    let history = &fixture.fakes.source_control;
    history.tag("v1.1.0");
    history.add_commit("feat(editor): slash commands");
    history.add_commit("fix: crash when the note list is empty");
    history.add_commit("chore(release): bump version to 1.1.1 [release-bot]");

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.0")).await;
    assert_run_completed(&result);

    let body = fixture.fakes.release_host.record("v1.2.0").unwrap().body;
    assert!(body.starts_with("## v1.2.0"), "{}", body);
    assert!(body.contains("**editor:** slash commands"));
    assert!(body.contains("crash when the note list is empty"));
    assert!(body.contains("## v1.1.0"));
    assert!(!body.contains("[release-bot]"), "{}", body);
    assert!(!body.contains("bump version"), "{}", body);
}

#[tokio::test]
async fn test_sibling_dispatch_on_request() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, manual("1.3.0", true, true)).await;
    assert_run_completed(&result);
    assert_stage_completed(&result, "sibling");

    let sent = fixture.fakes.dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].repository, "blinkospace/blinko-desktop");
    assert_eq!(sent[0].event_type, "release");
    assert_eq!(sent[0].payload["tag"], "v1.3.0");
    assert_eq!(sent[0].payload["version"], "1.3.0");
    assert!(sent[0].payload["sha"].is_string());
}

#[tokio::test]
async fn test_sibling_skipped_without_request() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    assert_run_completed(&result);
    assert!(matches!(result.stage_state("sibling"), StageState::Skipped { .. }));
    assert!(fixture.fakes.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_dispatch_failure_is_a_warning() {
    let fixture = Fixture::new();
    fixture.fakes.dispatcher.set_failing(true);

    let result = fixture.run(RELEASE_YAML, manual("1.3.0", true, false)).await;

    assert_run_completed(&result);
    match result.stage_state("sibling") {
        StageState::Completed { warnings, .. } => {
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("`repo` scope"));
        }
        other => panic!("Expected completed with warning, got {:?}", other),
    }
    assert_eq!(result.warnings().len(), 1);
}
