use std::fs;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::ConfigStore;
use crate::error::Result;
use crate::models::{SystemConfig, TaskConfig, TeamConfig};

/// Configuration records kept in a single YAML file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct YamlStore {
    teams: Vec<TeamConfig>,
    systems: Vec<SystemConfig>,
    tasks: Vec<TaskConfig>,
}

impl YamlStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read store file: {}", path.display()))?;

        let store = Self::parse(&content)
            .with_context(|| format!("Failed to parse store file: {}", path.display()))?;

        info!(
            path = %path.display(),
            teams = store.teams.len(),
            systems = store.systems.len(),
            tasks = store.tasks.len(),
            "Loaded configuration store"
        );

        Ok(store)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let store: Self = serde_yaml::from_str(content)?;
        Ok(store)
    }
}

#[async_trait]
impl ConfigStore for YamlStore {
    async fn task(&self, id: i64) -> Result<Option<TaskConfig>> {
        Ok(self.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn team(&self, id: i64) -> Result<Option<TeamConfig>> {
        Ok(self.teams.iter().find(|t| t.id == id).cloned())
    }

    async fn system(&self, id: i64) -> Result<Option<SystemConfig>> {
        Ok(self.systems.iter().find(|s| s.id == id).cloned())
    }

    async fn tasks(&self) -> Result<Vec<TaskConfig>> {
        Ok(self.tasks.iter().filter(|t| t.enabled).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Properties;
    use tempfile::tempdir;

    const STORE: &str = r#"
teams:
  - id: 1
    name: Platform
    properties:
      to: platform@x.com
      from: robot@x.com
systems:
  - id: 2
    properties: '{"type": "jira", "url": "https://jira.example.com"}'
tasks:
  - id: 10
    name: Due dates
    team: 1
    system: 2
    action: DueDateAuditor
    properties:
      jql: project = PLAT
  - id: 11
    name: Disabled grep
    system: 2
    action: SvnGrep
    enabled: false
"#;

    #[tokio::test]
    async fn test_open_and_lookup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.yml");
        fs::write(&path, STORE).unwrap();

        let store = YamlStore::open(&path).unwrap();

        let task = store.task(10).await.unwrap().unwrap();
        assert_eq!(task.action, "DueDateAuditor");
        assert_eq!(task.team, Some(1));

        let team = store.team(1).await.unwrap().unwrap();
        assert_eq!(team.name, "Platform");

        let system = store.system(2).await.unwrap().unwrap();
        assert!(matches!(system.properties, Properties::Text(_)));

        assert!(store.task(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tasks_skips_disabled() {
        let store = YamlStore::parse(STORE).unwrap();
        let ids: Vec<_> = store.tasks().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let err = YamlStore::open(dir.path().join("absent.yml")).unwrap_err();
        assert!(err.to_string().contains("absent.yml"));
    }
}
