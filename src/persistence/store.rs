//! SQLite-based persistence store

use crate::core::{FlowBlueprint, Run, RunSummary, Step, StepState};
use crate::persistence::RunStore;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store; `":memory:"` keeps everything in memory
    pub async fn new(db_path: &str) -> Result<Self> {
        // An in-memory database lives and dies with its single connection
        let (options, max_connections) = if db_path == ":memory:" {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            (
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .create_if_missing(true),
                4,
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("flowprint");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blueprints (
                name TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                flow_name TEXT NOT NULL,
                state TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                total_commands INTEGER NOT NULL DEFAULT 0,
                complete_commands INTEGER NOT NULL DEFAULT 0,
                unsuccessful_commands INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                tree TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                parent_id TEXT,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_flow_name ON runs(flow_name);
            CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);
            CREATE INDEX IF NOT EXISTS idx_steps_run_id ON steps(run_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

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

    fn parse_state(label: &str) -> Result<StepState> {
        StepState::from_label(label).with_context(|| format!("Unknown step state '{}'", label))
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            flow_name: row.get("flow_name"),
            state: Self::parse_state(&row.get::<String, _>("state"))?,
            started_at: row
                .get::<Option<NaiveDateTime>, _>("started_at")
                .map(Self::from_naive),
            ended_at: row
                .get::<Option<NaiveDateTime>, _>("ended_at")
                .map(Self::from_naive),
            total_commands: row.get::<i64, _>("total_commands") as usize,
            complete_commands: row.get::<i64, _>("complete_commands") as usize,
            unsuccessful_commands: row.get::<i64, _>("unsuccessful_commands") as usize,
        })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn save_blueprint(&self, blueprint: &FlowBlueprint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO blueprints (name, body, saved_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&blueprint.name)
        .bind(serde_json::to_string(blueprint)?)
        .bind(Self::to_naive(Utc::now()))
        .execute(&self.pool)
        .await
        .context("Failed to save blueprint")?;

        Ok(())
    }

    async fn load_blueprint(&self, name: &str) -> Result<Option<FlowBlueprint>> {
        let row = sqlx::query("SELECT body FROM blueprints WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load blueprint")?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("body"))?)),
            None => Ok(None),
        }
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let summary = run.summary();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, flow_name, state, started_at, ended_at, total_commands, complete_commands,
             unsuccessful_commands, created_at, tree)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(run.id().to_string())
        .bind(run.name())
        .bind(summary.state.display())
        .bind(summary.started_at.map(Self::to_naive))
        .bind(summary.ended_at.map(Self::to_naive))
        .bind(summary.total_commands as i64)
        .bind(summary.complete_commands as i64)
        .bind(summary.unsuccessful_commands as i64)
        .bind(Self::to_naive(run.created_at()))
        .bind(serde_json::to_string(run)?)
        .execute(&mut *tx)
        .await
        .context("Failed to save run")?;

        for step in run.steps() {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO steps
                (id, run_id, parent_id, name, state, start_time, end_time, body)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(step.id.to_string())
            .bind(run.id().to_string())
            .bind(step.parent.map(|p| p.to_string()))
            .bind(&step.name)
            .bind(step.state.display())
            .bind(step.start_time.map(Self::to_naive))
            .bind(step.end_time.map(Self::to_naive))
            .bind(serde_json::to_string(step)?)
            .execute(&mut *tx)
            .await
            .context("Failed to save step")?;
        }

        tx.commit().await?;
        debug!("Saved run {} ({} steps)", run.id(), run.len());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT tree FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut run: Run = serde_json::from_str(&row.get::<String, _>("tree"))?;

        // Step rows are newer than the tree saved at the start of the run
        let rows = sqlx::query("SELECT body FROM steps WHERE run_id = ?1")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to load steps")?;
        for row in rows {
            let step: Step = serde_json::from_str(&row.get::<String, _>("body"))?;
            run.replace_step(step);
        }

        Ok(Some(run))
    }

    async fn update_step(&self, run_id: Uuid, step: &Step) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE steps
            SET state = ?1, start_time = ?2, end_time = ?3, body = ?4
            WHERE id = ?5 AND run_id = ?6
            "#,
        )
        .bind(step.state.display())
        .bind(step.start_time.map(Self::to_naive))
        .bind(step.end_time.map(Self::to_naive))
        .bind(serde_json::to_string(step)?)
        .bind(step.id.to_string())
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to update step")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Run {} has no saved step {}", run_id, step.id);
        }

        // The root step carries the run's own state
        if step.parent.is_none() {
            sqlx::query(
                r#"
                UPDATE runs SET state = ?1, started_at = ?2, ended_at = ?3
                WHERE id = ?4
                "#,
            )
            .bind(step.state.display())
            .bind(step.start_time.map(Self::to_naive))
            .bind(step.end_time.map(Self::to_naive))
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to update run")?;
        }

        tx.commit().await?;
        debug!("Saved step {} of run {}: {}", step.id, run_id, step.state);
        Ok(())
    }

    async fn list_runs(&self, flow_name: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, flow_name, state, started_at, ended_at, total_commands,
                   complete_commands, unsuccessful_commands
            FROM runs
            WHERE flow_name = ?1
            ORDER BY created_at DESC
            "#,
        )
        .bind(flow_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_flows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT flow_name
            FROM runs
            ORDER BY flow_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list flows")?;

        Ok(rows.iter().map(|row| row.get("flow_name")).collect())
    }
}
