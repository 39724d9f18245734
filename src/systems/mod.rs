pub mod empty;
pub mod jira;
pub mod shell;

pub use empty::EmptySystem;
pub use jira::JiraSystem;
pub use shell::ShellSystem;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Env, Opts};
use crate::error::{Result, TaskError};
use crate::models::{Issue, SystemConfig};
use crate::salt::Salt;

/// Read access to an external system, as seen by the rules.
#[async_trait]
pub trait System: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Issues matching an opaque tracker query
    async fn issues(&self, query: &str, options: &QueryOptions) -> Result<Vec<Issue>>;

    /// Run a command and return its stdout verbatim
    async fn run(&self, command: &ShellCommand) -> Result<String>;
}

/// Tracker query settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub max_results: u32,
    pub fields: Vec<String>,
    pub expand: Vec<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_results: 50,
            fields: ["summary", "assignee", "reporter", "created", "duedate"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            expand: Vec::new(),
        }
    }
}

impl QueryOptions {
    /// Defaults overridden by the `max_results` and `fields` options
    pub fn from_opts(opts: &Opts) -> Result<Self> {
        let mut options = Self::default();
        if let Some(max) = opts.parse::<u32>("max_results")? {
            if max == 0 {
                return Err(TaskError::invalid("max_results", "must be positive"));
            }
            options.max_results = max;
        }
        let fields = opts.slice("fields", ',');
        if !fields.is_empty() {
            options.fields = fields;
        }
        Ok(options)
    }

    pub fn expand(mut self, what: &str) -> Self {
        if !self.expand.iter().any(|e| e == what) {
            self.expand.push(what.to_string());
        }
        self
    }
}

/// Program invocation without a shell in between.
///
/// Arguments marked secret are masked when the command is displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<(String, bool)>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push((arg.into(), false));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| (a.into(), false)));
        self
    }

    pub fn secret(mut self, arg: impl Into<String>) -> Self {
        self.args.push((arg.into(), true));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|(a, _)| a.as_str())
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for (arg, secret) in &self.args {
            if *secret {
                write!(f, " ***")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Builds a connector from resolved and decrypted connection properties
pub type SystemFactory = Box<dyn Fn(&Opts) -> Result<Box<dyn System>> + Send + Sync>;

/// Connector constructors keyed by the `type` property of a system
pub struct SystemRegistry {
    factories: HashMap<&'static str, SystemFactory>,
}

impl Default for SystemRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("jira", jira);
        registry.register("svn", shell);
        registry.register("shell", shell);
        registry
    }
}

fn jira(opts: &Opts) -> Result<Box<dyn System>> {
    Ok(Box::new(JiraSystem::from_opts(opts)?))
}

fn shell(opts: &Opts) -> Result<Box<dyn System>> {
    Ok(Box::new(ShellSystem::from_opts(opts)))
}

impl SystemRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(&Opts) -> Result<Box<dyn System>> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Make a connector for the system.
    ///
    /// A system without `type` gets an [`EmptySystem`] so its tasks still run
    /// on empty data. A `type` nobody registered is an error, not a stub.
    pub fn connect(&self, config: &SystemConfig, env: &Env) -> Result<Box<dyn System>> {
        let opts = config
            .properties
            .to_opts(&format!("system {}", config.id))?
            .resolve(env);

        let kind = opts.text("type").unwrap_or_default();
        let kind = kind.trim();
        if kind.is_empty() {
            warn!(
                system = config.id,
                "No task system details provided, an empty stub is used"
            );
            return Ok(Box::new(EmptySystem));
        }

        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| TaskError::UnknownSystem(kind.to_string()))?;

        let salt = Salt::from_value(opts.text("salt"));
        let connection = salt.decrypt_opts(&opts.except(&["type", "salt"]))?;

        debug!(system = config.id, kind, salted = salt.is_keyed(), "Connecting to system");

        factory(&connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Properties;
    use crate::testing::LogCapture;
    use serde_json::json;

    fn system(props: serde_json::Value) -> SystemConfig {
        SystemConfig {
            id: 3,
            properties: match props {
                serde_json::Value::Object(map) => Properties::Map(map),
                _ => unreachable!(),
            },
        }
    }

    #[tokio::test]
    async fn test_empty_type_yields_stub_with_one_warning() {
        let logs = LogCapture::new();
        let _guard = logs.install();

        let sys = SystemRegistry::default()
            .connect(&system(json!({"type": ""})), &Env::default())
            .unwrap();

        assert_eq!(sys.name(), "empty");
        assert!(sys
            .issues("project = X", &QueryOptions::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(sys.run(&ShellCommand::new("svn")).await.unwrap(), "");
        assert_eq!(logs.count("WARN"), 1);
    }

    #[test]
    fn test_missing_type_yields_stub() {
        let sys = SystemRegistry::default()
            .connect(&system(json!({})), &Env::default())
            .unwrap();
        assert_eq!(sys.name(), "empty");
    }

    #[test]
    fn test_unknown_type() {
        let err = SystemRegistry::default()
            .connect(&system(json!({"type": "bugzilla"})), &Env::default())
            .err()
            .unwrap();
        assert!(matches!(err, TaskError::UnknownSystem(ref t) if t == "bugzilla"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_connect_resolves_and_decrypts() {
        fn probe(opts: &Opts) -> Result<Box<dyn System>> {
            assert_eq!(opts.get_str("url"), Some("https://jira.example.com"));
            assert_eq!(opts.get_str("password"), Some("secret"));
            assert!(!opts.contains_key("type"));
            assert!(!opts.contains_key("salt"));
            Ok(Box::new(EmptySystem))
        }

        let mut registry = SystemRegistry::empty();
        registry.register("probe", probe);
        let encrypted = Salt::keyed("pepper").encrypt("secret").unwrap();
        let env = Env::from_vars([("SALT", "pepper"), ("URL", "https://jira.example.com")]);

        registry
            .connect(
                &system(json!({
                    "type": "probe",
                    "salt": "${SALT}",
                    "url": "${URL}",
                    "password_enc": encrypted
                })),
                &env,
            )
            .unwrap();
    }

    #[test]
    fn test_connect_bad_ciphertext_is_fatal() {
        let err = SystemRegistry::default()
            .connect(
                &system(json!({"type": "jira", "salt": "k", "url": "u", "password_enc": "xx"})),
                &Env::default(),
            )
            .err()
            .unwrap();
        assert_eq!(err.code(), "ll-003");
    }

    #[test]
    fn test_query_options() {
        let opts: Opts = [("max_results", json!("10")), ("fields", json!("summary, duedate"))]
            .into_iter()
            .collect();
        let options = QueryOptions::from_opts(&opts).unwrap().expand("changelog");
        assert_eq!(options.max_results, 10);
        assert_eq!(options.fields, vec!["summary", "duedate"]);
        assert_eq!(options.expand, vec!["changelog"]);

        let zero: Opts = [("max_results", json!(0))].into_iter().collect();
        assert!(QueryOptions::from_opts(&zero).is_err());
    }

    #[test]
    fn test_command_display_masks_secrets() {
        let cmd = ShellCommand::new("svn")
            .args(["log", "--username"])
            .arg("alice")
            .arg("--password")
            .secret("hunter2");
        assert_eq!(cmd.to_string(), "svn log --username alice --password ***");
        assert_eq!(cmd.argv().last(), Some("hunter2"));
    }
}
