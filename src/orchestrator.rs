use std::error::Error as _;

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cc::Cc;
use crate::config::{Env, Opts};
use crate::error::{Failure, Result, TaskError};
use crate::models::{TaskConfig, TeamConfig};
use crate::postman::PostmanRegistry;
use crate::store::ConfigStore;
use crate::systems::SystemRegistry;
use crate::tasks::TaskRegistry;

/// Result of one task execution as reported by [`Orchestrator::run`]
#[derive(Debug)]
pub enum TaskOutcome {
    Completed { findings: usize },
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs configured tasks against their systems
pub struct Orchestrator<S: ConfigStore> {
    store: S,
    tasks: TaskRegistry,
    systems: SystemRegistry,
    postmen: PostmanRegistry,
    env: Env,
    trace: bool,
}

impl<S: ConfigStore> Orchestrator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            tasks: TaskRegistry::default(),
            systems: SystemRegistry::default(),
            postmen: PostmanRegistry::default(),
            env: Env::process(),
            trace: false,
        }
    }

    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn with_tasks(mut self, tasks: TaskRegistry) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_systems(mut self, systems: SystemRegistry) -> Self {
        self.systems = systems;
        self
    }

    pub fn with_postmen(mut self, postmen: PostmanRegistry) -> Self {
        self.postmen = postmen;
        self
    }

    /// Attach the backtrace of the failing frame to failure logs
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Get the store for direct access
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Team properties overridden by task properties, with macros resolved
    pub fn props(&self, task: &TaskConfig, team: Option<&TeamConfig>) -> Result<Opts> {
        let own = task.properties.to_opts(&format!("task {}", task.id))?;
        let opts = match team {
            Some(team) => team
                .properties
                .to_opts(&format!("team {}", team.id))?
                .merge(&own),
            None => own,
        };
        Ok(opts.resolve(&self.env))
    }

    async fn team(&self, task: &TaskConfig) -> Result<Option<TeamConfig>> {
        let Some(id) = task.team else {
            return Ok(None);
        };
        self.store
            .team(id)
            .await?
            .map(Some)
            .ok_or_else(|| TaskError::RecordNotFound {
                kind: "Team",
                id: id.to_string(),
            })
    }

    /// Execute one task, propagating any failure
    pub async fn exec(&self, task: &TaskConfig) -> Result<usize> {
        let team = self.team(task).await?;
        let opts = self.props(task, team.as_ref())?;
        self.execute(task, opts).await.map_err(Failure::into_error)
    }

    async fn execute(&self, task: &TaskConfig, mut opts: Opts) -> Result<usize, Failure> {
        if let Some(cc) = opts.get("cc").map(Cc::detect) {
            match cc.to_option() {
                Some(emails) => opts.insert("cc", emails),
                None => {
                    opts.remove("cc");
                }
            }
        }

        let config = self
            .store
            .system(task.system)
            .await?
            .ok_or_else(|| TaskError::RecordNotFound {
                kind: "System",
                id: task.system.to_string(),
            })?;
        let system = self.systems.connect(&config, &self.env)?;
        let rule = self.tasks.resolve(&task.action)?;
        let postman = self.postmen.select(&opts)?;

        debug!(
            rule = %task.action,
            system = system.name(),
            postman = postman.name(),
            "Running rule"
        );

        rule.run(system.as_ref(), postman.as_ref(), &opts).await
    }

    /// Execute one task inside its own correlation span.
    ///
    /// Failures are logged with code `ll-006` and returned as
    /// [`TaskOutcome::Failed`], never propagated.
    pub async fn run(&self, task: &TaskConfig) -> TaskOutcome {
        let tid = format!("task {}/{}", task.id, Uuid::new_v4());
        let span = info_span!("task", tid = %tid);
        self.verbose(task).instrument(span).await
    }

    async fn verbose(&self, task: &TaskConfig) -> TaskOutcome {
        debug!(task = task.id, name = %task.name, action = %task.action, "Task started");

        match self.checked(task).await {
            Ok(findings) => {
                debug!(task = task.id, findings, "Task completed");
                TaskOutcome::Completed { findings }
            }
            Err(failure) => {
                self.report(task.id, &failure);
                TaskOutcome::Failed(failure.into_error())
            }
        }
    }

    async fn checked(&self, task: &TaskConfig) -> Result<usize, Failure> {
        let team = self.team(task).await?;
        if team.is_none() {
            warn!(task = task.id, "No team.");
        }

        let opts = self.props(task, team.as_ref())?;
        if !opts.text("postman").is_some_and(|p| !p.trim().is_empty()) {
            warn!(task = task.id, "No postman, stub is used.");
        }

        self.execute(task, opts).await
    }

    fn report(&self, id: i64, failure: &Failure) {
        let err = failure.error();
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        if self.trace {
            error!(
                code = "ll-006",
                cause = err.code(),
                task = id,
                error = %err,
                causes = ?causes,
                backtrace = %failure.backtrace(),
                "Task failed"
            );
        } else {
            error!(
                code = "ll-006",
                cause = err.code(),
                task = id,
                error = %err,
                causes = ?causes,
                "Task failed"
            );
        }
    }

    /// Load a task from the store and run it
    pub async fn run_by_id(&self, id: i64) -> TaskOutcome {
        let failure = match self.store.task(id).await {
            Ok(Some(task)) => return self.run(&task).await,
            Ok(None) => Failure::from(TaskError::RecordNotFound {
                kind: "Task",
                id: id.to_string(),
            }),
            Err(err) => Failure::from(err),
        };
        self.report(id, &failure);
        TaskOutcome::Failed(failure.into_error())
    }

    /// Run every enabled task one after another
    pub async fn run_all(&self) -> Result<Vec<(i64, TaskOutcome)>> {
        let tasks = self.store.tasks().await?;
        info!(count = tasks.len(), "Running enabled tasks");

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in &tasks {
            outcomes.push((task.id, self.run(task).await));
        }

        let failed = outcomes.iter().filter(|(_, o)| !o.is_completed()).count();
        info!(
            completed = outcomes.len() - failed,
            failed,
            "Finished running tasks"
        );

        Ok(outcomes)
    }
}
