//! Which version a run releases, and where it shows up

use crate::helpers::*;
use blinko_release::core::{TriggerContext, VersionSource};

#[tokio::test]
async fn test_tag_push_releases_tag_version() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, tag_push("v2.0.0")).await;

    assert_run_completed(&result);
    assert_eq!(result.version(), "2.0.0");
    assert_eq!(
        result.pipeline.resolution().unwrap().source,
        VersionSource::GitTag
    );

    assert!(fixture.fakes.release_host.record("v2.0.0").is_some());
    assert_eq!(fixture.manifest_version("package.json"), "2.0.0");

    let pushes = fixture.fakes.registry.pushes();
    assert!(!pushes.is_empty());
    for (_, list) in pushes {
        assert_eq!(list.tags, vec!["2.0.0", "latest"]);
    }
}

#[tokio::test]
async fn test_trigger_without_version_falls_back_to_default() {
    let fixture = Fixture::new();
    let trigger = TriggerContext::TagPush {
        git_ref: "refs/heads/main".to_string(),
    };
    let result = fixture.run(RELEASE_YAML, trigger).await;

    assert_run_completed(&result);
    assert_eq!(result.version(), "1.0.0");
    assert_eq!(
        result.pipeline.resolution().unwrap().source,
        VersionSource::Default
    );
    assert!(fixture.fakes.release_host.record("v1.0.0").is_some());
}

#[tokio::test]
async fn test_upstream_payload_tag_is_used() {
    let fixture = Fixture::new();
    let result = fixture
        .run(RELEASE_YAML, upstream("v1.4.0", "0123456789abcdef0123456789abcdef01234567"))
        .await;

    assert_run_completed(&result);
    assert_eq!(result.version(), "1.4.0");
    assert_eq!(
        result.pipeline.resolution().unwrap().source,
        VersionSource::PayloadTag
    );
}

#[tokio::test]
async fn test_every_stage_sees_the_bound_version() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, manual("3.1.0-beta", false, false)).await;

    assert_run_completed(&result);
    for stage_id in result.pipeline.execution_order() {
        let context = result.pipeline.create_context_for_stage(stage_id).unwrap();
        assert_eq!(context.version().as_str(), "3.1.0-beta");
        assert_eq!(context.variables["version"], "3.1.0-beta");
    }

    let record = fixture.fakes.release_host.record("v3.1.0-beta").unwrap();
    assert!(record.prerelease);
    assert!(record
        .asset_names()
        .iter()
        .all(|name| name.contains("3.1.0-beta")));
}
