pub mod alert;
pub mod due_date;
pub mod svn_grep;

pub use alert::Alert;
pub use due_date::{Due, DueDateAuditor};
pub use svn_grep::SvnGrep;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::Opts;
use crate::error::{Failure, Result, TaskError};
use crate::postman::Postman;
use crate::systems::System;

/// A rule evaluated against one system.
#[async_trait]
pub trait Task: Send + Sync {
    /// Evaluate the rule and notify about violations.
    ///
    /// Returns the number of findings that were reported.
    async fn run(
        &self,
        system: &dyn System,
        postman: &dyn Postman,
        opts: &Opts,
    ) -> Result<usize, Failure>;
}

pub type TaskFactory = fn() -> Box<dyn Task>;

/// Rule implementations keyed by the `action` of a task
pub struct TaskRegistry {
    factories: HashMap<&'static str, TaskFactory>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("DueDateAuditor", make_due_date_auditor);
        registry.register("SvnGrep", make_svn_grep);
        registry.register("Alert", make_alert);
        registry
    }
}

fn make_due_date_auditor() -> Box<dyn Task> {
    Box::new(DueDateAuditor)
}

fn make_svn_grep() -> Box<dyn Task> {
    Box::new(SvnGrep)
}

fn make_alert() -> Box<dyn Task> {
    Box::new(Alert)
}

impl TaskRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: TaskFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Rule registered under the name
    pub fn resolve(&self, name: &str) -> Result<Box<dyn Task>> {
        self.factories
            .get(name.trim())
            .map(|factory| factory())
            .ok_or_else(|| TaskError::UnknownRule(name.to_string()))
    }
}
