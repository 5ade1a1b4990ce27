//! Per-architecture image digests merged into one manifest list

use crate::helpers::*;
use blinko_release::capability::memory::ScriptedBuilder;
use blinko_release::capability::system::DirArtifactStore;
use blinko_release::capability::ArtifactStore;
use blinko_release::core::{Platform, ReleaseVersion};
use blinko_release::release::DigestScope;
use std::sync::Arc;
use uuid::Uuid;

const D1: &str = "sha256:d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1";
const D2: &str = "sha256:d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2d2";

#[tokio::test]
async fn test_both_digests_under_both_tags() {
    let fixture = Fixture::new();
    fixture.fakes.builder.set_digest("linux/amd64", D1);
    fixture.fakes.builder.set_digest("linux/arm64", D2);

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    assert_run_completed(&result);

    let pushes = fixture.fakes.registry.pushes();
    let hosts: Vec<&str> = pushes.iter().map(|(host, _)| host.as_str()).collect();
    assert_eq!(hosts, vec!["docker.io", "ghcr.io"]);

    let (_, list) = &pushes[0];
    assert_eq!(list.repository, "blinkospace/blinko");
    let mapping = list.tag_mapping();
    assert_eq!(mapping.len(), 2);
    for tag in ["1.2.3", "latest"] {
        assert_eq!(mapping[tag], vec![D1.to_string(), D2.to_string()]);
    }
    assert_eq!(pushes[0].1, pushes[1].1);
}

#[tokio::test]
async fn test_merge_is_deterministic_across_runs() {
    let first = Fixture::new();
    let second = Fixture::new();

    first.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    second.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    let a = first.fakes.registry.pushes();
    let b = second.fakes.registry.pushes();
    assert_eq!(a, b);
    assert_eq!(a[0].1.digest().unwrap(), b[0].1.digest().unwrap());

    let digests: Vec<String> = a[0].1.manifests.iter().map(|m| m.digest.clone()).collect();
    assert_eq!(
        digests,
        vec![
            ScriptedBuilder::derived_digest("linux/amd64", "1.2.3"),
            ScriptedBuilder::derived_digest("linux/arm64", "1.2.3"),
        ]
    );
}

#[tokio::test]
async fn test_prerelease_tag_is_not_latest() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, tag_push("v2.0.0-rc.1")).await;
    assert_run_completed(&result);

    for (_, list) in fixture.fakes.registry.pushes() {
        assert_eq!(list.tags, vec!["2.0.0-rc.1"]);
    }
}

#[tokio::test]
async fn test_missing_architecture_blocks_merge() {
    let fixture = Fixture::new();
    fixture.fakes.builder.fail("linux/arm64", "qemu: exec format error");

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    assert_stage_failed(&result, "images", "linux/arm64");
    assert_stage_blocked(&result, "merge");
    assert_stage_blocked(&result, "changelog");
    assert!(fixture.fakes.registry.pushes().is_empty());

    // The healthy architecture still stored its digest
    let scope = DigestScope::new(
        ReleaseVersion::parse("1.2.3").unwrap(),
        result.pipeline.state.execution_id,
    );
    let stored = fixture
        .fakes
        .artifacts
        .download(&scope.artifact_name(&Platform::new("linux/amd64")))
        .await
        .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn test_merge_refuses_with_fewer_digests_than_platforms() {
    let yaml = r#"
name: "blinko"
stages:
  - id: "images"
    kind: image-build
    image: "blinkospace/blinko"
    matrix:
      - platform: "linux/amd64"
        command: "docker"
      - platform: "linux/arm64"
        command: "docker"
  - id: "merge"
    kind: merge-images
    from: "images"
    depends_on: ["images"]
"#;
    let fixture = Fixture::new();
    let pipeline = {
        let mut pipeline = pipeline_from_yaml(yaml);
        pipeline.bind_release(tag_push("v1.2.3")).unwrap();
        pipeline
    };
    let version = ReleaseVersion::parse("1.2.3").unwrap();

    // This run stored amd64 only; an earlier run of the release left arm64
    let this_run = DigestScope::new(version.clone(), pipeline.state.execution_id);
    let earlier_run = DigestScope::new(version, Uuid::new_v4());
    fixture
        .fakes
        .artifacts
        .upload(&this_run.artifact_name(&Platform::new("linux/amd64")), D1)
        .await
        .unwrap();
    fixture
        .fakes
        .artifacts
        .upload(&earlier_run.artifact_name(&Platform::new("linux/arm64")), D2)
        .await
        .unwrap();

    let executor = blinko_release::execution::StageExecutor::new(
        fixture.fakes.capabilities(),
        fixture.root().to_path_buf(),
    );
    let context = pipeline.create_context_for_stage("merge").unwrap();
    let result = executor
        .execute(pipeline.stage("merge").unwrap(), &context)
        .await;

    match result {
        blinko_release::execution::ExecutionResult::Failed { error } => {
            assert!(error.contains("Missing digests for linux/arm64"), "{}", error)
        }
        other => panic!("Expected merge to fail, got {:?}", other),
    }
    assert!(fixture.fakes.registry.pushes().is_empty());
}

#[tokio::test]
async fn test_releases_and_rerun_share_one_digest_store() {
    let fixture = Fixture::new();
    let mut capabilities = fixture.fakes.capabilities();
    capabilities.artifacts = Arc::new(DirArtifactStore::new(
        fixture.root().join(".release-artifacts"),
    ));

    // 1.2.3 with the arm64 build broken
    fixture.fakes.builder.fail("linux/arm64", "qemu: exec format error");
    let failed = run_with(
        fixture.engine_on(capabilities.clone()),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.2.3"),
    )
    .await;
    assert_stage_failed(&failed, "images", "linux/arm64");
    assert_stage_blocked(&failed, "merge");

    // Rerun of 1.2.3 after the fix, amd64 rebuilt to a new digest
    fixture.fakes.builder.recover("linux/arm64");
    fixture.fakes.builder.set_digest("linux/amd64", D1);
    let rerun = run_with(
        fixture.engine_on(capabilities.clone()),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.2.3"),
    )
    .await;
    assert_run_completed(&rerun);

    let pushes = fixture.fakes.registry.pushes();
    assert_eq!(pushes.len(), 2);
    let mapping = pushes[0].1.tag_mapping();
    assert_eq!(
        mapping["1.2.3"],
        vec![
            D1.to_string(),
            ScriptedBuilder::derived_digest("linux/arm64", "1.2.3"),
        ]
    );

    // The next release against the same store
    let next = run_with(
        fixture.engine_on(capabilities),
        pipeline_from_yaml(RELEASE_YAML),
        tag_push("v1.3.0"),
    )
    .await;
    assert_run_completed(&next);

    let pushes = fixture.fakes.registry.pushes();
    assert_eq!(pushes.len(), 4);
    assert_eq!(pushes[3].1.tags, vec!["1.3.0", "latest"]);
    assert!(pushes[3]
        .1
        .tag_mapping()["1.3.0"]
        .contains(&ScriptedBuilder::derived_digest("linux/arm64", "1.3.0")));
}
