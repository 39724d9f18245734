use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tracker_alerts::{ConfigStore, Orchestrator, PostgresStore, Salt, TaskOutcome, YamlStore};

#[derive(Parser)]
#[command(name = "tracker-alerts")]
#[command(about = "Scheduled audits of issue trackers and version control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML file with teams, systems and tasks (takes precedence over the database)
    #[arg(long)]
    store: Option<PathBuf>,

    /// PostgreSQL connection string for the configuration store
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose logs and backtraces on task failures
    #[arg(long, global = true)]
    trace: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks once
    Run {
        /// Task ID (repeatable; all enabled tasks if omitted)
        #[arg(long = "task")]
        tasks: Vec<i64>,
    },

    /// Encrypt a property value for storage
    Encrypt {
        /// Salt configured on the system or task
        #[arg(long, env = "TRACKER_ALERTS_SALT")]
        salt: String,

        /// Plain text value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.trace { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("tracker_alerts={}", level).parse()?),
        )
        .init();

    match cli.command {
        Commands::Run { tasks } => {
            let failed = if let Some(path) = cli.store {
                run_tasks(YamlStore::open(&path)?, &tasks, cli.trace).await?
            } else if let Some(url) = cli.database_url {
                run_tasks(PostgresStore::new(&url).await?, &tasks, cli.trace).await?
            } else {
                anyhow::bail!("Either --store or --database-url must be specified");
            };

            if failed > 0 {
                anyhow::bail!("{} task(s) failed", failed);
            }
        }
        Commands::Encrypt { salt, value } => {
            let encrypted = Salt::keyed(salt)
                .encrypt(&value)
                .context("Failed to encrypt value")?;
            println!("{}", encrypted);
        }
    }

    Ok(())
}

/// Run the requested tasks and return how many of them failed
async fn run_tasks<S: ConfigStore>(store: S, ids: &[i64], trace: bool) -> Result<usize> {
    let orchestrator = Orchestrator::new(store).with_trace(trace);

    let outcomes = if ids.is_empty() {
        orchestrator.run_all().await?
    } else {
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            outcomes.push((id, orchestrator.run_by_id(id).await));
        }
        outcomes
    };

    for (id, outcome) in &outcomes {
        match outcome {
            TaskOutcome::Completed { findings } => {
                info!(task = id, findings, "Task done");
                println!("task {}: {} finding(s)", id, findings);
            }
            TaskOutcome::Failed(err) => {
                println!("task {}: failed [{}] {}", id, err.code(), err);
            }
        }
    }

    Ok(outcomes.iter().filter(|(_, o)| !o.is_completed()).count())
}
