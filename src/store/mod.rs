pub mod postgres;
pub mod yaml;

pub use postgres::PostgresStore;
pub use yaml::YamlStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SystemConfig, TaskConfig, TeamConfig};

/// Read access to configuration records
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load a task by ID
    async fn task(&self, id: i64) -> Result<Option<TaskConfig>>;

    /// Load a team by ID
    async fn team(&self, id: i64) -> Result<Option<TeamConfig>>;

    /// Load a system by ID
    async fn system(&self, id: i64) -> Result<Option<SystemConfig>>;

    /// List all enabled tasks
    async fn tasks(&self) -> Result<Vec<TaskConfig>>;
}
