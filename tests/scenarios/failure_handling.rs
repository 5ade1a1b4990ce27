//! A failed stage blocks its dependants and nothing else

use crate::helpers::*;
use blinko_release::core::ExecutionStatus;
use blinko_release::execution::ExecutionEvent;

#[tokio::test]
async fn test_failed_build_blocks_only_its_dependants() {
    let fixture = Fixture::new();
    fixture.fakes.builder.fail("windows-x64", "msi bundling failed");

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    assert_eq!(result.status(), ExecutionStatus::Failed, "{}", result.summary());
    assert_stage_failed(&result, "desktop", "windows-x64: ");
    assert_stage_failed(&result, "desktop", "msi bundling failed");
    assert_stage_completed(&result, "bump");
    assert_stage_completed(&result, "android");
    assert_stage_completed(&result, "images");
    assert_stage_completed(&result, "merge");
    assert_stage_blocked(&result, "changelog");
    assert_stage_blocked(&result, "sibling");

    assert_eq!(result.pipeline.state.failed_stages, 1);
    assert_eq!(result.pipeline.state.blocked_stages, 2);

    // Sibling jobs of the failed one still finished and published
    let record = fixture.fakes.release_host.record("v1.2.3").unwrap();
    assert!(record.asset_names().contains(&"Blinko_1.2.3_aarch64.dmg"));
    assert!(!record.asset_names().contains(&"Blinko_1.2.3_x64.msi"));
    // The changelog never replaced the placeholder body
    assert!(record.body.contains("being built"));
}

#[tokio::test]
async fn test_blocked_events_name_the_failed_stage() {
    let fixture = Fixture::new();
    fixture.fakes.builder.fail("android", "gradle daemon died");

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    let blocked: Vec<(String, String)> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageBlocked {
                stage_id,
                blocked_by,
            } => Some((stage_id.clone(), blocked_by.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        blocked,
        vec![
            ("changelog".to_string(), "android".to_string()),
            ("sibling".to_string(), "android".to_string()),
        ]
    );

    assert!(result.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::PipelineCompleted {
            status: ExecutionStatus::Failed,
            ..
        }
    )));
}

#[tokio::test]
async fn test_registry_push_failure_fails_merge() {
    let fixture = Fixture::new();
    fixture.fakes.registry.fail_host("ghcr.io");

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    assert_stage_failed(&result, "merge", "ghcr.io");
    assert_stage_blocked(&result, "changelog");
    assert_eq!(result.status(), ExecutionStatus::Failed);
}
