use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::salt::Salt;

/// Source of environment variables for `${NAME}` macros.
///
/// Production code reads the process environment; tests pass a fixed map so
/// that concurrent tests never touch shared process state.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: Option<HashMap<String, String>>,
}

impl Env {
    /// Read variables from the process environment
    pub fn process() -> Self {
        Self { vars: None }
    }

    /// Use a fixed set of variables
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn var(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }
}

/// Flat string-keyed options of a task, team or system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opts(BTreeMap<String, Value>);

impl From<Map<String, Value>> for Opts {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Opts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Opts {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of the key; `None` for missing or non-string values
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Textual form of a string, number or boolean value
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Non-empty textual value, or a configuration error
    pub fn require(&self, key: &str) -> Result<String> {
        self.text(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| TaskError::MissingOption(key.to_string()))
    }

    /// Parse the textual value of the key
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.text(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| TaskError::invalid(key, format!("'{}': {}", raw, e))),
        }
    }

    /// Split a delimited value into trimmed, non-empty parts
    pub fn slice(&self, key: &str, sep: char) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => self
                .text(key)
                .map(|raw| {
                    raw.split(sep)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay `other` on top of these options; `other` wins on collision
    pub fn merge(&self, other: &Opts) -> Opts {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Opts(merged)
    }

    /// Copy without the given keys
    pub fn except(&self, keys: &[&str]) -> Opts {
        Opts(
            self.0
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Replace every `${NAME}` value with the environment variable `NAME`.
    ///
    /// Only whole string values are macros; anything else is copied as is.
    pub fn resolve(&self, env: &Env) -> Opts {
        Opts(
            self.0
                .iter()
                .map(|(k, v)| {
                    let value = match v.as_str().and_then(macro_name) {
                        Some(name) => match env.var(name) {
                            Some(resolved) => {
                                debug!(key = %k, var = name, "Resolved property from environment");
                                Value::String(resolved)
                            }
                            None => {
                                warn!(key = %k, var = name, "Environment variable is not set");
                                Value::String(String::new())
                            }
                        },
                        None => v.clone(),
                    };
                    (k.clone(), value)
                })
                .collect(),
        )
    }

    /// Value of `key`, decrypted with the salt stored under `salt_key`.
    ///
    /// Without a configured salt the value is returned as plain text.
    pub fn decrypt(&self, key: &str, salt_key: &str) -> Result<String> {
        let value = self.require(key)?;
        Salt::from_value(self.text(salt_key)).decrypt(key, &value)
    }

    pub fn into_json(self) -> Map<String, Value> {
        self.0.into_iter().collect()
    }
}

fn macro_name(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}
