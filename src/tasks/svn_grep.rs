use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::Task;
use crate::config::Opts;
use crate::error::{Failure, Result, TaskError};
use crate::postman::{bindings, Message, Postman};
use crate::svn::{parse_log, Commit};
use crate::systems::{ShellCommand, System};

/// Alerts about commits whose added lines contain particular text.
///
/// Options: `text` (comma-separated), `period` (seconds), `svn_url`,
/// `svn_user`, `svn_password`, optional `svn_salt`, `svn_tool` and `now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvnGrep;

/// Matching commit with the files and diff sections that matched
#[derive(Debug, Serialize)]
pub struct Entry<'a> {
    #[serde(flatten)]
    pub commit: &'a Commit,
    pub files: Vec<String>,
    pub diff: Vec<String>,
}

/// End of the search window; wall-clock time unless `now` is configured
pub fn now(opts: &Opts) -> Result<DateTime<Utc>> {
    let raw = match opts.text("now") {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(Utc::now()),
    };
    let raw = raw.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(t.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| TaskError::invalid("now", format!("unsupported date '{}'", raw)))
}

fn svn_date(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// `svn log --diff` over `[from, to]` with credentials from the options
pub fn log_command(opts: &Opts, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<ShellCommand> {
    let tool = opts
        .text("svn_tool")
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "svn".to_string());

    Ok(ShellCommand::new(tool)
        .args(["log", "--diff", "--no-auth-cache", "--username"])
        .arg(opts.decrypt("svn_user", "svn_salt")?)
        .arg("--password")
        .secret(opts.decrypt("svn_password", "svn_salt")?)
        .arg("-r")
        .arg(format!("{{{}}}:{{{}}}", svn_date(from), svn_date(to)))
        .arg(opts.require("svn_url")?))
}

#[async_trait]
impl Task for SvnGrep {
    async fn run(
        &self,
        system: &dyn System,
        postman: &dyn Postman,
        opts: &Opts,
    ) -> Result<usize, Failure> {
        let texts = opts.slice("text", ',');
        if texts.is_empty() {
            return Err(TaskError::MissingOption("text".to_string()).into());
        }
        let period = opts
            .parse::<i64>("period")?
            .ok_or_else(|| TaskError::MissingOption("period".to_string()))?;
        if period < 0 {
            return Err(TaskError::invalid("period", "must not be negative").into());
        }

        let to = now(opts)?;
        let from = Duration::try_seconds(period)
            .and_then(|window| to.checked_sub_signed(window))
            .ok_or_else(|| TaskError::invalid("period", "window is out of range"))?;
        let command = log_command(opts, from, to)?;

        let stdout = system.run(&command).await?;
        let commits: Vec<Commit> = parse_log(&stdout)
            .into_iter()
            .filter(|c| c.includes(&texts))
            .collect();

        debug!(matched = commits.len(), "Searched commits");

        if commits.is_empty() {
            info!(texts = ?texts, "No commits with the text");
            return Ok(0);
        }

        let entries: Vec<Entry<'_>> = commits
            .iter()
            .map(|commit| Entry {
                commit,
                files: commit.affected(&texts),
                diff: commit.diff(&texts),
            })
            .collect();
        let findings =
            serde_json::to_value(&entries).map_err(|e| TaskError::Notification(e.to_string()))?;

        postman
            .send(&Message::from_opts(opts), &bindings(opts, "entries", findings))
            .await?;

        info!(count = commits.len(), "Reported commits with the text");

        Ok(commits.len())
    }
}
