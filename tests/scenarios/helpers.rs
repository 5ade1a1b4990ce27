//! Shared fixtures for release scenarios

use blinko_release::capability::{Capabilities, MemoryCapabilities};
use blinko_release::core::config::PipelineConfig;
use blinko_release::core::{
    DispatchInputs, DispatchPayload, ExecutionStatus, Pipeline, StageState, TriggerContext,
};
use blinko_release::execution::{
    ConcurrencyGroups, ExecutionEngine, ExecutionEvent, SchedulingStrategy, StageExecutor,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PACKAGE_JSON: &str = "{\n  \"name\": \"blinko\",\n  \"version\": \"0.9.0\",\n  \"private\": true\n}\n";
pub const TAURI_CONF: &str = "{\n  \"productName\": \"Blinko\",\n  \"version\": \"0.9.0\",\n  \"identifier\": \"com.blinko.app\"\n}\n";
pub const TAURI_WINDOWS_CONF: &str = "{\n  \"version\": \"0.9.0\",\n  \"bundle\": {\n    \"targets\": [\"msi\", \"nsis\"]\n  }\n}\n";

/// The full release graph: bump, three fan-outs, merge, changelog, sibling
pub const RELEASE_YAML: &str = r#"
name: "blinko"
product: "Blinko"

stages:
  - id: "bump"
    kind: propagate
    manifests:
      - path: "package.json"
      - path: "app/src-tauri/tauri.conf.json"
      - path: "app/src-tauri/tauri.windows.conf.json"
        target: windows

  - id: "desktop"
    kind: build
    depends_on: ["bump"]
    publish: true
    matrix:
      - platform: "macos-arm64"
        command: "bun"
        args: ["run", "tauri", "build"]
        artifacts:
          - path: "app/src-tauri/target/release/bundle/dmg/Blinko.dmg"
            rename: "{{ product }}_{{ version }}_aarch64.dmg"
      - platform: "windows-x64"
        command: "bun"
        args: ["run", "tauri", "build"]
        artifacts:
          - path: "app/src-tauri/target/release/bundle/msi/Blinko.msi"
            rename: "{{ product }}_{{ version }}_x64.msi"
      - platform: "linux-x64"
        command: "bun"
        args: ["run", "tauri", "build"]
        artifacts:
          - path: "app/src-tauri/target/release/bundle/appimage/Blinko.AppImage"
            rename: "{{ product }}_{{ version }}_amd64.AppImage"

  - id: "android"
    kind: build
    depends_on: ["bump"]
    publish: true
    matrix:
      - platform: "android"
        command: "bun"
        args: ["run", "tauri", "android", "build"]
        artifacts:
          - path: "app/src-tauri/gen/android/app/build/outputs/apk/universal/release/app-universal-release.apk"
            rename: "{{ product }}_{{ version }}_universal.apk"

  - id: "images"
    kind: image-build
    depends_on: ["bump"]
    image: "blinkospace/blinko"
    matrix:
      - platform: "linux/amd64"
        command: "docker"
        args: ["buildx", "build", "--platform", "{{ platform }}"]
      - platform: "linux/arm64"
        command: "docker"
        args: ["buildx", "build", "--platform", "{{ platform }}"]

  - id: "merge"
    kind: merge-images
    from: "images"
    depends_on: ["images"]

  - id: "changelog"
    kind: changelog
    depends_on: ["desktop", "android", "merge"]

  - id: "sibling"
    kind: dispatch
    depends_on: ["changelog"]
    repository: "blinkospace/blinko-desktop"
    event_type: "release"
"#;

/// A checked-out repository plus the in-memory services it talks to
pub struct Fixture {
    pub dir: TempDir,
    pub fakes: MemoryCapabilities,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fakes = MemoryCapabilities::new();

        for (path, content) in [
            ("package.json", PACKAGE_JSON),
            ("app/src-tauri/tauri.conf.json", TAURI_CONF),
            ("app/src-tauri/tauri.windows.conf.json", TAURI_WINDOWS_CONF),
        ] {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, content).unwrap();
            fakes.source_control.set_committed(path, content);
        }
        fakes.source_control.add_commit("feat: initial import");

        Self { dir, fakes }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn engine(&self) -> ExecutionEngine {
        self.engine_on(self.fakes.capabilities())
    }

    /// Engine over `capabilities`, usually the fakes with one service swapped
    pub fn engine_on(&self, capabilities: Capabilities) -> ExecutionEngine {
        ExecutionEngine::new(
            StageExecutor::new(capabilities, self.root().to_path_buf()),
            SchedulingStrategy::Parallel,
        )
    }

    pub fn engine_in(&self, groups: Arc<ConcurrencyGroups>) -> ExecutionEngine {
        self.engine().with_groups(groups)
    }

    /// Run a fresh pipeline built from `yaml` for one trigger
    pub async fn run(&self, yaml: &str, trigger: TriggerContext) -> RunResult {
        run_with(self.engine(), pipeline_from_yaml(yaml), trigger).await
    }

    /// Version field of a working-tree manifest
    pub fn manifest_version(&self, path: &str) -> String {
        let content = std::fs::read_to_string(self.root().join(path)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        value["version"].as_str().unwrap().to_string()
    }

    pub fn committed(&self, path: &str) -> Option<String> {
        self.fakes.source_control.committed(&PathBuf::from(path))
    }
}

/// A finished run and the events it emitted
pub struct RunResult {
    pub pipeline: Pipeline,
    pub events: Vec<ExecutionEvent>,
}

impl RunResult {
    pub fn status(&self) -> ExecutionStatus {
        self.pipeline.state.status
    }

    pub fn version(&self) -> String {
        self.pipeline
            .resolution()
            .map(|r| r.version.to_string())
            .unwrap_or_default()
    }

    pub fn stage_state(&self, stage_id: &str) -> &StageState {
        &self
            .pipeline
            .stage(stage_id)
            .unwrap_or_else(|| panic!("Stage '{}' not found", stage_id))
            .state
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StageWarning { warning, .. } => Some(warning.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!("{:?}", self.status())];
        for id in self.pipeline.execution_order() {
            lines.push(format!("  {}: {:?}", id, self.stage_state(id)));
        }
        lines.join("\n")
    }
}

pub async fn run_with(
    engine: ExecutionEngine,
    mut pipeline: Pipeline,
    trigger: TriggerContext,
) -> RunResult {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    engine.execute(&mut pipeline, trigger).await.unwrap();

    let events = events.lock().unwrap().clone();
    RunResult { pipeline, events }
}

pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e))
        .to_pipeline()
}

pub fn tag_push(tag: &str) -> TriggerContext {
    TriggerContext::TagPush {
        git_ref: format!("refs/tags/{}", tag),
    }
}

pub fn manual(version: &str, trigger_sibling: bool, set_latest: bool) -> TriggerContext {
    TriggerContext::ManualDispatch {
        inputs: DispatchInputs {
            version: Some(version.to_string()),
            trigger_sibling,
            set_latest,
        },
        git_ref: Some("refs/heads/main".to_string()),
    }
}

pub fn upstream(tag: &str, sha: &str) -> TriggerContext {
    TriggerContext::UpstreamDispatch {
        payload: DispatchPayload {
            tag: Some(tag.to_string()),
            version: None,
            sha: Some(sha.to_string()),
        },
        git_ref: None,
    }
}

pub fn assert_run_completed(result: &RunResult) {
    assert_eq!(
        result.status(),
        ExecutionStatus::Completed,
        "Run should have completed:\n{}",
        result.summary()
    );
}

pub fn assert_stage_completed(result: &RunResult, stage_id: &str) {
    assert!(
        matches!(result.stage_state(stage_id), StageState::Completed { .. }),
        "Stage '{}' should be completed:\n{}",
        stage_id,
        result.summary()
    );
}

pub fn assert_stage_failed(result: &RunResult, stage_id: &str, expected_error: &str) {
    match result.stage_state(stage_id) {
        StageState::Failed { error, .. } => assert!(
            error.contains(expected_error),
            "Stage '{}' error:\n{}\n\ndoes not contain:\n{}",
            stage_id,
            error,
            expected_error
        ),
        other => panic!("Stage '{}' should have failed, but was {:?}", stage_id, other),
    }
}

pub fn assert_stage_blocked(result: &RunResult, stage_id: &str) {
    assert!(
        matches!(result.stage_state(stage_id), StageState::Blocked { .. }),
        "Stage '{}' should be blocked:\n{}",
        stage_id,
        result.summary()
    );
}
