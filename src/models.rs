use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Opts;
use crate::error::{Result, TaskError};

/// Raw property blob as stored alongside a configuration record.
///
/// Stores keep properties either as JSON text (a database column) or as an
/// inline mapping (a YAML file); both parse into the same flat map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Properties {
    Map(Map<String, Value>),
    Text(String),
}

impl Default for Properties {
    fn default() -> Self {
        Self::Map(Map::new())
    }
}

impl Properties {
    /// Parse the blob into unresolved options
    pub fn to_opts(&self, owner: &str) -> Result<Opts> {
        match self {
            Self::Map(map) => Ok(Opts::from(map.clone())),
            Self::Text(text) if text.trim().is_empty() => Ok(Opts::default()),
            Self::Text(text) => {
                let map: Map<String, Value> =
                    serde_json::from_str(text).map_err(|source| TaskError::Properties {
                        owner: owner.to_string(),
                        source,
                    })?;
                Ok(Opts::from(map))
            }
        }
    }
}

/// A scheduled rule evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub team: Option<i64>,
    pub system: i64,
    /// Registered rule name, e.g. `DueDateAuditor`
    pub action: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Properties shared by all tasks of one team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
}

/// An external system to inspect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub id: i64,
    /// Connection properties including the `type` discriminator and `salt`
    #[serde(default)]
    pub properties: Properties,
}

/// Issue tracker account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            email: None,
        }
    }
}

/// Single field modification within a history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeItem {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Group of field changes made by one author at one moment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub author: User,
    pub created: DateTime<Utc>,
    pub items: Vec<ChangeItem>,
}

impl HistoryEntry {
    pub fn touches(&self, field: &str) -> bool {
        self.items.iter().any(|i| i.field == field)
    }
}

/// Ticket fetched from an issue tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    pub url: Option<String>,
    pub assignee: Option<User>,
    pub reporter: Option<User>,
    pub created: DateTime<Utc>,
    pub duedate: Option<NaiveDate>,
    /// Change log, oldest entry first
    pub history: Vec<HistoryEntry>,
}
