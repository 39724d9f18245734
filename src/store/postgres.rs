use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use super::ConfigStore;
use crate::error::{Result, TaskError};
use crate::models::{Properties, SystemConfig, TaskConfig, TeamConfig};

/// PostgreSQL-backed configuration records.
///
/// Expects `teams(id, name, properties)`, `systems(id, properties)` and
/// `tasks(id, name, team_id, system, action, properties, enabled)` with
/// properties stored as JSON text.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with the given connection string
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL");

        Ok(Self { pool })
    }
}

fn store_error(e: sqlx::Error) -> TaskError {
    TaskError::Store(e.to_string())
}

fn properties(row: &PgRow) -> Result<Properties> {
    let raw: Option<String> = row.try_get("properties").map_err(store_error)?;
    Ok(Properties::Text(raw.unwrap_or_default()))
}

fn task_from_row(row: &PgRow) -> Result<TaskConfig> {
    Ok(TaskConfig {
        id: row.try_get("id").map_err(store_error)?,
        name: row.try_get("name").map_err(store_error)?,
        team: row.try_get("team_id").map_err(store_error)?,
        system: row.try_get("system").map_err(store_error)?,
        action: row.try_get("action").map_err(store_error)?,
        properties: properties(row)?,
        enabled: row.try_get("enabled").map_err(store_error)?,
    })
}

#[async_trait]
impl ConfigStore for PostgresStore {
    async fn task(&self, id: i64) -> Result<Option<TaskConfig>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, team_id, system, action, properties, enabled
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn team(&self, id: i64) -> Result<Option<TeamConfig>> {
        let row = sqlx::query("SELECT id, name, properties FROM teams WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        match row {
            Some(row) => Ok(Some(TeamConfig {
                id: row.try_get("id").map_err(store_error)?,
                name: row.try_get("name").map_err(store_error)?,
                properties: properties(&row)?,
            })),
            None => Ok(None),
        }
    }

    async fn system(&self, id: i64) -> Result<Option<SystemConfig>> {
        let row = sqlx::query("SELECT id, properties FROM systems WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        match row {
            Some(row) => Ok(Some(SystemConfig {
                id: row.try_get("id").map_err(store_error)?,
                properties: properties(&row)?,
            })),
            None => Ok(None),
        }
    }

    async fn tasks(&self) -> Result<Vec<TaskConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, team_id, system, action, properties, enabled
            FROM tasks
            WHERE enabled
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(task_from_row).collect()
    }
}
