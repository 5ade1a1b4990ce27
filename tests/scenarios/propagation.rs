//! Version propagation into the manifests

use crate::helpers::*;

#[tokio::test]
async fn test_manual_prerelease_strips_windows_suffix() {
    let fixture = Fixture::new();
    let result = fixture.run(RELEASE_YAML, manual("3.1.0-beta", false, false)).await;

    assert_run_completed(&result);
    assert_eq!(result.version(), "3.1.0-beta");
    assert_eq!(fixture.manifest_version("package.json"), "3.1.0-beta");
    assert_eq!(fixture.manifest_version("app/src-tauri/tauri.conf.json"), "3.1.0-beta");
    assert_eq!(
        fixture.manifest_version("app/src-tauri/tauri.windows.conf.json"),
        "3.1.0"
    );

    // Untouched fields survive the rewrite
    let package = std::fs::read_to_string(fixture.root().join("package.json")).unwrap();
    assert!(package.contains("\"private\": true"));

    let commits = fixture.fakes.source_control.commits();
    let bump = commits.last().unwrap();
    assert!(bump.message.contains("3.1.0-beta"));
    assert!(bump.message.contains("[release-bot]"));
    assert!(bump.pushed);
    assert_eq!(bump.files.len(), 3);
}

#[tokio::test]
async fn test_second_propagation_makes_no_commit() {
    let fixture = Fixture::new();

    let first = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    assert_run_completed(&first);
    let after_first = fixture.fakes.source_control.commits().len();

    let second = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    assert_run_completed(&second);

    assert_eq!(fixture.fakes.source_control.commits().len(), after_first);
    assert_stage_completed(&second, "bump");
    assert_eq!(
        fixture.committed("package.json").as_deref(),
        Some(std::fs::read_to_string(fixture.root().join("package.json")).unwrap().as_str())
    );
}

#[tokio::test]
async fn test_missing_manifest_fails_bump_and_blocks_everything() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.root().join("app/src-tauri/tauri.conf.json")).unwrap();

    let result = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;

    assert_stage_failed(&result, "bump", "tauri.conf.json");
    for stage_id in ["desktop", "android", "images", "merge", "changelog", "sibling"] {
        assert_stage_blocked(&result, stage_id);
    }
    assert!(fixture.fakes.builder.builds().is_empty());
    assert!(fixture.fakes.release_host.records().is_empty());
}
