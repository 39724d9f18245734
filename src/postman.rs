use std::collections::HashMap;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Opts;
use crate::error::{Result, TaskError};

/// Template variables handed to the notification channel
pub type Bindings = Map<String, Value>;

/// Envelope of a notification, taken from the task options
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub to: Vec<String>,
    pub from: Option<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub template: Option<String>,
}

impl Message {
    /// `to` and `cc` are comma-separated lists; blanks are dropped
    pub fn from_opts(opts: &Opts) -> Self {
        Self {
            to: opts.slice("to", ','),
            from: opts.text("from"),
            cc: opts.slice("cc", ','),
            subject: opts.text("subject").unwrap_or_default(),
            template: opts.text("template"),
        }
    }
}

/// Task options plus the findings under `key`.
///
/// Credentials and delivery settings never leave the process.
pub fn bindings(opts: &Opts, key: &str, findings: Value) -> Bindings {
    let mut binds: Bindings = opts
        .clone()
        .into_json()
        .into_iter()
        .filter(|(k, _)| !is_private(k))
        .collect();
    binds.insert(key.to_string(), findings);
    binds
}

fn is_private(key: &str) -> bool {
    key.starts_with("smtp_")
        || key.contains("password")
        || key.contains("salt")
        || key == "webhook_url"
}

/// Delivery channel for rule findings
#[async_trait]
pub trait Postman: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &Message, binds: &Bindings) -> Result<()>;
}

/// Logs notifications instead of delivering them
#[derive(Debug, Clone, Copy, Default)]
pub struct StubPostman;

#[async_trait]
impl Postman for StubPostman {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn send(&self, message: &Message, binds: &Bindings) -> Result<()> {
        info!(
            to = ?message.to,
            cc = ?message.cc,
            subject = %message.subject,
            template = ?message.template,
            binds = binds.len(),
            "Notification is not delivered by the stub postman"
        );
        Ok(())
    }
}

/// Posts notifications as JSON to an HTTP endpoint
pub struct WebhookPostman {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    message: &'a Message,
    binds: &'a Bindings,
}

impl WebhookPostman {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn from_opts(opts: &Opts) -> Result<Self> {
        Ok(Self::new(opts.require("webhook_url")?))
    }
}

#[async_trait]
impl Postman for WebhookPostman {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &Message, binds: &Bindings) -> Result<()> {
        debug!(url = %self.url, "Sending webhook notification");

        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { message, binds })
            .send()
            .await
            .map_err(|e| TaskError::Notification(format!("Failed to reach {}: {}", self.url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Webhook notification failed");
            return Err(TaskError::Notification(format!(
                "Webhook returned error: {} - {}",
                status, body
            )));
        }

        info!(subject = %message.subject, "Webhook notification sent");
        Ok(())
    }
}

/// Sends notifications as plain-text email over SMTP
pub struct SmtpPostman<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
}

impl SmtpPostman {
    /// Requires `smtp_host`.
    ///
    /// Optional: `smtp_port`, `smtp_starttls` (default true), `smtp_user` and
    /// `smtp_password` (decrypted with `smtp_salt` when present).
    pub fn from_opts(opts: &Opts) -> Result<Self> {
        let host = opts.require("smtp_host")?;
        let starttls = opts.parse::<bool>("smtp_starttls")?.unwrap_or(true);

        let mut builder = if starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                .map_err(|e| TaskError::invalid("smtp_host", e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
        };
        if let Some(port) = opts.parse::<u16>("smtp_port")? {
            builder = builder.port(port);
        }
        if opts.require("smtp_user").is_ok() {
            builder = builder.credentials(Credentials::new(
                opts.require("smtp_user")?,
                opts.decrypt("smtp_password", "smtp_salt")?,
            ));
        }

        debug!(host = %host, starttls, "Configured SMTP postman");

        Ok(Self::with_transport(builder.build()))
    }
}

impl<T> SmtpPostman<T> {
    pub fn with_transport(transport: T) -> Self {
        Self { transport }
    }
}

fn mailbox(key: &str, raw: &str) -> Result<Mailbox> {
    raw.parse()
        .map_err(|e| TaskError::invalid(key, format!("'{}': {}", raw, e)))
}

/// One `key: value` paragraph per binding, structured values as JSON
pub fn text_body(binds: &Bindings) -> String {
    let mut body = String::new();
    for (key, value) in binds {
        match value {
            Value::String(text) => body.push_str(&format!("{}: {}\n", key, text)),
            other => {
                let pretty =
                    serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
                body.push_str(&format!("{}:\n{}\n", key, pretty));
            }
        }
    }
    body
}

/// Email for the message; `from` and at least one `to` are required
pub fn email(message: &Message, binds: &Bindings) -> Result<lettre::Message> {
    let from = message
        .from
        .as_deref()
        .ok_or_else(|| TaskError::MissingOption("from".to_string()))?;
    if message.to.is_empty() {
        return Err(TaskError::MissingOption("to".to_string()));
    }

    let mut builder = lettre::Message::builder()
        .from(mailbox("from", from)?)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for to in &message.to {
        builder = builder.to(mailbox("to", to)?);
    }
    for cc in &message.cc {
        builder = builder.cc(mailbox("cc", cc)?);
    }

    builder
        .body(text_body(binds))
        .map_err(|e| TaskError::Notification(format!("Unable to build email: {}", e)))
}

#[async_trait]
impl<T> Postman for SmtpPostman<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::fmt::Display,
{
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &Message, binds: &Bindings) -> Result<()> {
        let email = email(message, binds)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| TaskError::Notification(format!("SMTP delivery failed: {}", e)))?;

        info!(to = ?message.to, subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Builds a postman from the task options
pub type PostmanFactory = Box<dyn Fn(&Opts) -> Result<Box<dyn Postman>> + Send + Sync>;

/// Postman constructors keyed by the `postman` task option
pub struct PostmanRegistry {
    factories: HashMap<&'static str, PostmanFactory>,
}

impl Default for PostmanRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("stub", stub);
        registry.register("webhook", webhook);
        registry.register("smtp", smtp);
        registry
    }
}

fn stub(_opts: &Opts) -> Result<Box<dyn Postman>> {
    Ok(Box::new(StubPostman))
}

fn webhook(opts: &Opts) -> Result<Box<dyn Postman>> {
    Ok(Box::new(WebhookPostman::from_opts(opts)?))
}

fn smtp(opts: &Opts) -> Result<Box<dyn Postman>> {
    Ok(Box::new(SmtpPostman::from_opts(opts)?))
}

impl PostmanRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(&Opts) -> Result<Box<dyn Postman>> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    /// Postman named by the `postman` option, the stub when it is absent
    pub fn select(&self, opts: &Opts) -> Result<Box<dyn Postman>> {
        let name = match opts.text("postman") {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Ok(Box::new(StubPostman)),
        };
        let factory = self
            .factories
            .get(name.trim())
            .ok_or_else(|| TaskError::UnknownPostman(name.clone()))?;
        factory(opts)
    }
}
