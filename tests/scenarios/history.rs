//! Run summaries saved to history

use crate::helpers::*;
use blinko_release::core::ExecutionStatus;
use blinko_release::persistence::{create_summary, InMemoryPersistence, PersistenceBackend};

#[tokio::test]
async fn test_failed_run_summary_is_saved() {
    let fixture = Fixture::new();
    fixture.fakes.builder.fail("android", "gradle daemon died");
    let result = fixture.run(RELEASE_YAML, manual("3.1.0-beta", false, false)).await;

    let store = InMemoryPersistence::new();
    let summary = create_summary(&result.pipeline);
    store.save_execution(&summary).await.unwrap();

    let loaded = store
        .load_execution(result.pipeline.state.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Failed);
    assert_eq!(loaded.release_version.as_deref(), Some("3.1.0-beta"));
    assert_eq!(loaded.total_stages, 7);
    assert_eq!(loaded.failed_stages, 1);
    assert_eq!(loaded.blocked_stages, 2);
    assert_eq!(loaded.completed_stages, 4);
    assert!(loaded.completed_at.is_some());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_runs_persist_across_store_instances() {
    use blinko_release::persistence::SqliteExecutionStore;

    let db_dir = tempfile::TempDir::new().unwrap();
    let db_path = db_dir.path().join("runs.db");

    let fixture = Fixture::new();
    let first = fixture.run(RELEASE_YAML, tag_push("v1.2.3")).await;
    let second = fixture.run(RELEASE_YAML, tag_push("v1.2.4")).await;

    {
        let store = SqliteExecutionStore::new(&db_path).await.unwrap();
        store.save_execution(&create_summary(&first.pipeline)).await.unwrap();
        store.save_execution(&create_summary(&second.pipeline)).await.unwrap();
    }

    let store = SqliteExecutionStore::new(&db_path).await.unwrap();
    let runs = store.list_executions("blinko").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].release_version.as_deref(), Some("1.2.4"));
    assert_eq!(runs[1].release_version.as_deref(), Some("1.2.3"));
    assert!(runs.iter().all(|r| r.status == ExecutionStatus::Completed));
    assert_eq!(store.list_pipelines().await.unwrap(), vec!["blinko"]);
}
