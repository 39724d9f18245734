use async_trait::async_trait;
use tracing::info;

use super::Task;
use crate::config::Opts;
use crate::error::{Failure, Result, TaskError};
use crate::postman::{bindings, Message, Postman};
use crate::systems::{QueryOptions, System};

/// Notifies about every issue matching a query, e.g. tickets created in the
/// last few minutes.
///
/// Options: `sql` (falls back to `jql`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Alert;

#[async_trait]
impl Task for Alert {
    async fn run(
        &self,
        system: &dyn System,
        postman: &dyn Postman,
        opts: &Opts,
    ) -> Result<usize, Failure> {
        let query = opts
            .require("sql")
            .or_else(|_| opts.require("jql"))
            .map_err(|_| TaskError::MissingOption("sql".to_string()))?;

        let tickets = system
            .issues(&query, &QueryOptions::from_opts(opts)?)
            .await?;

        if tickets.is_empty() {
            info!("No tickets match the query");
            return Ok(0);
        }

        let findings =
            serde_json::to_value(&tickets).map_err(|e| TaskError::Notification(e.to_string()))?;
        postman
            .send(&Message::from_opts(opts), &bindings(opts, "tickets", findings))
            .await?;

        info!(count = tickets.len(), "Reported matching tickets");

        Ok(tickets.len())
    }
}
