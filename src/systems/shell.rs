use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{QueryOptions, ShellCommand, System};
use crate::config::Opts;
use crate::error::{Result, TaskError};
use crate::models::Issue;

/// Runs version-control commands on the local host
#[derive(Debug, Clone, Default)]
pub struct ShellSystem {
    workdir: Option<PathBuf>,
}

impl ShellSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optional `workdir` sets the directory commands run in
    pub fn from_opts(opts: &Opts) -> Self {
        Self {
            workdir: opts
                .text("workdir")
                .filter(|w| !w.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

#[async_trait]
impl System for ShellSystem {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn issues(&self, _query: &str, _options: &QueryOptions) -> Result<Vec<Issue>> {
        Err(TaskError::Unsupported {
            system: self.name(),
            capability: "issue queries",
        })
    }

    async fn run(&self, command: &ShellCommand) -> Result<String> {
        info!(command = %command, "Running command");

        let mut cmd = Command::new(command.program());
        cmd.args(command.argv());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(TaskError::Command {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        debug!(bytes = stdout.len(), "Command completed");

        Ok(stdout)
    }
}
