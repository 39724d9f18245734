use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{QueryOptions, ShellCommand, System};
use crate::config::Opts;
use crate::error::{Result, TaskError};
use crate::models::{ChangeItem, HistoryEntry, Issue, User};

/// JIRA REST (v2) issue tracker
pub struct JiraSystem {
    client: Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
    #[serde(default)]
    changelog: Option<JiraChangelog>,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    assignee: Option<JiraUser>,
    #[serde(default)]
    reporter: Option<JiraUser>,
    created: String,
    #[serde(default)]
    duedate: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraChangelog {
    #[serde(default)]
    histories: Vec<JiraHistory>,
}

#[derive(Debug, Deserialize)]
struct JiraHistory {
    author: JiraUser,
    created: String,
    #[serde(default)]
    items: Vec<JiraItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraItem {
    field: String,
    #[serde(default)]
    from_string: Option<String>,
    #[serde(default, rename = "toString")]
    to_value: Option<String>,
}

impl JiraSystem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    /// Requires `url`; `username` and `password` enable basic auth
    pub fn from_opts(opts: &Opts) -> Result<Self> {
        let system = Self::new(opts.require("url")?);
        match (opts.text("username"), opts.text("password")) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                Ok(system.with_credentials(user, pass))
            }
            _ => Ok(system),
        }
    }

    async fn page(&self, query: &str, options: &QueryOptions, start: u64) -> Result<SearchResponse> {
        let mut request = self
            .client
            .get(format!("{}/rest/api/2/search", self.url))
            .query(&[
                ("jql", query.to_string()),
                ("startAt", start.to_string()),
                ("maxResults", options.max_results.to_string()),
                ("fields", options.fields.join(",")),
            ]);
        if !options.expand.is_empty() {
            request = request.query(&[("expand", options.expand.join(","))]);
        }
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TaskError::Tracker(format!("Failed to query {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskError::Tracker(format!("JIRA returned {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| TaskError::Tracker(format!("Failed to parse JIRA response: {}", e)))
    }

    fn convert_issue(&self, raw: JiraIssue) -> Result<Issue> {
        let history = raw
            .changelog
            .map(|c| c.histories)
            .unwrap_or_default()
            .into_iter()
            .map(|h| {
                Ok(HistoryEntry {
                    author: convert_user(h.author),
                    created: parse_time(&h.created)?,
                    items: h
                        .items
                        .into_iter()
                        .map(|i| ChangeItem {
                            field: i.field,
                            from: i.from_string,
                            to: i.to_value,
                        })
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let duedate = raw
            .fields
            .duedate
            .as_deref()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| TaskError::Tracker(format!("Bad due date '{}': {}", d, e)))
            })
            .transpose()?;

        Ok(Issue {
            url: Some(format!("{}/browse/{}", self.url, raw.key)),
            key: raw.key,
            summary: raw.fields.summary.unwrap_or_default(),
            assignee: raw.fields.assignee.map(convert_user),
            reporter: raw.fields.reporter.map(convert_user),
            created: parse_time(&raw.fields.created)?,
            duedate,
            history,
        })
    }
}

fn convert_user(user: JiraUser) -> User {
    let id = user.name.or(user.account_id).unwrap_or_default();
    User {
        name: user.display_name.unwrap_or_else(|| id.clone()),
        id,
        email: user.email_address,
    }
}

/// JIRA writes offsets without a colon, e.g. `2021-01-01T10:00:00.000+0000`
fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TaskError::Tracker(format!("Bad timestamp '{}': {}", raw, e)))
}

#[async_trait]
impl System for JiraSystem {
    fn name(&self) -> &'static str {
        "jira"
    }

    #[instrument(skip(self, options), fields(url = %self.url))]
    async fn issues(&self, query: &str, options: &QueryOptions) -> Result<Vec<Issue>> {
        info!("Querying JIRA");

        let mut issues = Vec::new();
        loop {
            let page = self.page(query, options, issues.len() as u64).await?;
            let fetched = page.issues.len();
            for raw in page.issues {
                issues.push(self.convert_issue(raw)?);
            }
            debug!(fetched, total = page.total, "Fetched JIRA page");
            if fetched == 0 || issues.len() as u64 >= page.total {
                break;
            }
        }

        info!(count = issues.len(), "JIRA query complete");

        Ok(issues)
    }

    async fn run(&self, _command: &ShellCommand) -> Result<String> {
        Err(TaskError::Unsupported {
            system: self.name(),
            capability: "commands",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw_issue(key: &str) -> serde_json::Value {
        json!({
            "key": key,
            "fields": {
                "summary": "Broken build",
                "assignee": {"name": "bob", "displayName": "Bob", "emailAddress": "bob@x.com"},
                "reporter": {"name": "alice"},
                "created": "2021-01-01T10:00:00.000+0000",
                "duedate": "2021-02-01"
            },
            "changelog": {
                "histories": [{
                    "author": {"name": "carol"},
                    "created": "2021-01-05T12:30:00.000+0300",
                    "items": [{"field": "duedate", "fromString": null, "toString": "2021-02-01"}]
                }]
            }
        })
    }

    #[test]
    fn test_parse_time() {
        let t = parse_time("2021-01-05T12:30:00.000+0300").unwrap();
        assert_eq!(t.to_rfc3339(), "2021-01-05T09:30:00+00:00");
        assert!(parse_time("2021-01-05T09:30:00Z").is_ok());
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_from_opts_requires_url() {
        assert!(JiraSystem::from_opts(&Opts::default()).is_err());
    }

    #[tokio::test]
    async fn test_issues_are_converted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("jql", "project = X"))
            .and(query_param("expand", "changelog"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 0, "maxResults": 50, "total": 1,
                "issues": [raw_issue("X-1")]
            })))
            .mount(&server)
            .await;

        let jira = JiraSystem::new(server.uri())
            .with_credentials("robot".to_string(), "secret".to_string());
        let issues = jira
            .issues("project = X", &QueryOptions::default().expand("changelog"))
            .await
            .unwrap();

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.key, "X-1");
        assert_eq!(issue.assignee.as_ref().unwrap().id, "bob");
        assert_eq!(issue.assignee.as_ref().unwrap().name, "Bob");
        assert_eq!(issue.reporter.as_ref().unwrap().id, "alice");
        assert_eq!(issue.duedate, NaiveDate::from_ymd_opt(2021, 2, 1));
        assert_eq!(issue.history.len(), 1);
        assert!(issue.history[0].touches("duedate"));
        assert_eq!(issue.url.as_deref(), Some(format!("{}/browse/X-1", server.uri()).as_str()));
    }

    #[tokio::test]
    async fn test_issues_are_paged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 2, "issues": [raw_issue("X-1")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("startAt", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 2, "issues": [raw_issue("X-2")]
            })))
            .mount(&server)
            .await;

        let options = QueryOptions {
            max_results: 1,
            ..QueryOptions::default()
        };
        let issues = JiraSystem::new(server.uri())
            .issues("project = X", &options)
            .await
            .unwrap();

        let keys: Vec<_> = issues.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["X-1", "X-2"]);
    }

    #[tokio::test]
    async fn test_http_error_is_tracker_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = JiraSystem::new(server.uri())
            .issues("project = X", &QueryOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "ll-004");
        assert!(err.to_string().contains("401"));
    }
}
