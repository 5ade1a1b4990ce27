//! SQLite-based run history

use crate::persistence::{parse_status, status_name, ExecutionSummary, PersistenceBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const COLUMNS: &str = "id, pipeline_name, release_version, status, started_at, completed_at, \
                       completed_stages, failed_stages, blocked_stages, total_stages";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open run history at {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("blinko-release");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(&db_dir.join("runs.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS release_runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                release_version TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                completed_stages INTEGER NOT NULL DEFAULT 0,
                failed_stages INTEGER NOT NULL DEFAULT 0,
                blocked_stages INTEGER NOT NULL DEFAULT 0,
                total_stages INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON release_runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_version ON release_runs(release_version);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON release_runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize run history schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            pipeline_name: row.try_get("pipeline_name")?,
            release_version: row.try_get("release_version")?,
            status: parse_status(&row.try_get::<String, _>("status")?),
            started_at: Self::from_naive(row.try_get("started_at")?),
            completed_at: row
                .try_get::<Option<NaiveDateTime>, _>("completed_at")?
                .map(Self::from_naive),
            completed_stages: row.try_get::<i64, _>("completed_stages")? as usize,
            failed_stages: row.try_get::<i64, _>("failed_stages")? as usize,
            blocked_stages: row.try_get::<i64, _>("blocked_stages")? as usize,
            total_stages: row.try_get::<i64, _>("total_stages")? as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO release_runs
            (id, pipeline_name, release_version, status, started_at, completed_at,
             completed_stages, failed_stages, blocked_stages, total_stages)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.pipeline_name)
        .bind(&execution.release_version)
        .bind(status_name(execution.status))
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.completed_stages as i64)
        .bind(execution.failed_stages as i64)
        .bind(execution.blocked_stages as i64)
        .bind(execution.total_stages as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM release_runs WHERE id = ?1", COLUMNS))
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load execution")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM release_runs WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn get_latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM release_runs WHERE pipeline_name = ?1 ORDER BY started_at DESC LIMIT 1",
            COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest execution")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM release_runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("pipeline_name").map_err(anyhow::Error::from))
            .collect()
    }
}
