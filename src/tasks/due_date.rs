use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::Task;
use crate::config::Opts;
use crate::error::{Failure, Result, TaskError};
use crate::models::{Issue, User};
use crate::postman::{bindings, Message, Postman};
use crate::systems::{QueryOptions, System};

const DUEDATE: &str = "duedate";

/// Alerts about due dates changed by someone other than the assignee or an
/// allowed person.
///
/// Options: `jql` (required), `allowed` (comma-separated account ids).
#[derive(Debug, Clone, Copy, Default)]
pub struct DueDateAuditor;

/// Last due date change of one issue
#[derive(Debug, Clone, Serialize)]
pub struct Due {
    pub issue: Issue,
    /// Who set the current due date
    pub last: User,
    /// When it was set
    pub when: DateTime<Utc>,
    pub illegal: bool,
}

impl Due {
    /// `None` for issues whose due date was never set
    pub fn detect(issue: Issue, allowed: &[String]) -> Option<Self> {
        let (last, when) = last_change(&issue)?;
        let by_assignee = issue.assignee.as_ref().is_some_and(|a| a.id == last.id);
        let illegal = !by_assignee && !allowed.iter().any(|a| *a == last.id);
        Some(Self {
            issue,
            last,
            when,
            illegal,
        })
    }
}

/// Author and time of the latest due date change.
///
/// Due dates set while creating the issue never show up in the history, so
/// an issue with a due date and no such entry credits the reporter.
pub fn last_change(issue: &Issue) -> Option<(User, DateTime<Utc>)> {
    match issue.history.iter().rev().find(|h| h.touches(DUEDATE)) {
        Some(entry) => Some((entry.author.clone(), entry.created)),
        None if issue.duedate.is_some() => issue
            .reporter
            .as_ref()
            .map(|reporter| (reporter.clone(), issue.created)),
        None => None,
    }
}

#[async_trait]
impl Task for DueDateAuditor {
    async fn run(
        &self,
        system: &dyn System,
        postman: &dyn Postman,
        opts: &Opts,
    ) -> Result<usize, Failure> {
        let jql = opts.require("jql")?;
        let allowed = opts.slice("allowed", ',');
        let options = QueryOptions::from_opts(opts)?.expand("changelog");

        let issues = system.issues(&jql, &options).await?;
        let total = issues.len();
        let dues: Vec<Due> = issues
            .into_iter()
            .filter_map(|issue| Due::detect(issue, &allowed))
            .filter(|due| due.illegal)
            .collect();

        debug!(total, illegal = dues.len(), "Checked due date changes");

        if dues.is_empty() {
            info!("No illegal due date changes");
            return Ok(0);
        }

        let findings =
            serde_json::to_value(&dues).map_err(|e| TaskError::Notification(e.to_string()))?;
        postman
            .send(&Message::from_opts(opts), &bindings(opts, "dues", findings))
            .await?;

        info!(count = dues.len(), "Reported illegal due date changes");

        Ok(dues.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeItem, HistoryEntry};
    use crate::testing::{FakeSystem, RecordingPostman};
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, day, 10, 0, 0).unwrap()
    }

    fn change(author: &str, day: u32, field: &str) -> HistoryEntry {
        HistoryEntry {
            author: User::new(author),
            created: at(day),
            items: vec![ChangeItem {
                field: field.to_string(),
                from: None,
                to: Some("2021-02-01".to_string()),
            }],
        }
    }

    fn issue(assignee: &str, history: Vec<HistoryEntry>) -> Issue {
        Issue {
            key: "X-1".to_string(),
            summary: "Release".to_string(),
            url: None,
            assignee: Some(User::new(assignee)),
            reporter: Some(User::new("rita")),
            created: at(1),
            duedate: NaiveDate::from_ymd_opt(2021, 2, 1),
            history,
        }
    }

    fn allowed(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_change_is_latest_duedate_entry() {
        let i = issue(
            "yan",
            vec![
                change("xavier", 2, "duedate"),
                change("zoe", 3, "duedate"),
                change("walter", 4, "summary"),
            ],
        );
        let (who, when) = last_change(&i).unwrap();
        assert_eq!(who.id, "zoe");
        assert_eq!(when, at(3));
    }

    #[test]
    fn test_truth_table() {
        // modifier, assignee, allowed, illegal
        let cases = [
            ("yan", "yan", vec!["yan"], false),
            ("xavier", "yan", vec!["yan", "xavier"], false),
            ("xavier", "yan", vec!["yan"], true),
            ("yan", "yan", vec![], false),
            ("xavier", "yan", vec![], true),
        ];
        for (modifier, assignee, list, expected) in cases {
            let due = Due::detect(
                issue(assignee, vec![change(modifier, 2, "duedate")]),
                &allowed(&list),
            )
            .unwrap();
            assert_eq!(due.illegal, expected, "{modifier} on {assignee}'s issue");
        }
    }

    #[test]
    fn test_fallback_to_reporter() {
        let due = Due::detect(issue("yan", vec![change("walter", 4, "summary")]), &[]).unwrap();
        assert_eq!(due.last.id, "rita");
        assert_eq!(due.when, at(1));
        assert!(due.illegal);
    }

    #[test]
    fn test_never_set_is_excluded() {
        let mut i = issue("yan", vec![]);
        i.duedate = None;
        assert!(Due::detect(i, &[]).is_none());
    }

    #[test]
    fn test_unassigned_issue() {
        let mut i = issue("yan", vec![change("xavier", 2, "duedate")]);
        i.assignee = None;
        assert!(Due::detect(i.clone(), &[]).unwrap().illegal);
        assert!(!Due::detect(i, &allowed(&["xavier"])).unwrap().illegal);
    }

    #[tokio::test]
    async fn test_run_reports_illegal_changes_once() {
        let system = FakeSystem {
            issues: vec![
                issue("yan", vec![change("carol", 2, "duedate")]),
                issue("yan", vec![change("yan", 2, "duedate")]),
                issue("yan", vec![change("bob", 2, "duedate")]),
            ],
            ..FakeSystem::default()
        };
        let postman = RecordingPostman::default();
        let opts: Opts = [
            ("jql", json!("project = X")),
            ("allowed", json!("bob")),
            ("to", json!("team@x.com")),
            ("subject", json!("[DD] Due dates")),
        ]
        .into_iter()
        .collect();

        let found = DueDateAuditor.run(&system, &postman, &opts).await.unwrap();

        assert_eq!(found, 1);
        assert_eq!(system.queries.lock().unwrap().as_slice(), ["project = X"]);
        let sent = postman.sent();
        assert_eq!(sent.len(), 1);
        let (message, binds) = &sent[0];
        assert_eq!(message.subject, "[DD] Due dates");
        assert_eq!(binds["dues"].as_array().unwrap().len(), 1);
        assert_eq!(binds["dues"][0]["last"]["id"], "carol");
        assert_eq!(binds["allowed"], "bob");
    }

    #[tokio::test]
    async fn test_run_without_findings_sends_nothing() {
        let system = FakeSystem {
            issues: vec![issue("yan", vec![change("yan", 2, "duedate")])],
            ..FakeSystem::default()
        };
        let postman = RecordingPostman::default();
        let opts: Opts = [("jql", "project = X")].into_iter().collect();

        assert_eq!(DueDateAuditor.run(&system, &postman, &opts).await.unwrap(), 0);
        assert!(postman.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_requires_jql() {
        let err = DueDateAuditor
            .run(&FakeSystem::default(), &RecordingPostman::default(), &Opts::default())
            .await
            .unwrap_err();
        assert!(matches!(err.error(), TaskError::MissingOption(k) if k == "jql"));
    }
}
