use std::backtrace::Backtrace;
use std::fmt;
use std::ops::Deref;

use thiserror::Error;

/// Failure of a single task execution.
///
/// Every variant carries a stable code so the log stream can be grepped for a
/// class of failure regardless of the message text.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unknown rule '{0}'")]
    UnknownRule(String),

    #[error("Unknown system type '{0}'")]
    UnknownSystem(String),

    #[error("Unknown postman '{0}'")]
    UnknownPostman(String),

    #[error("Missing required option '{0}'")]
    MissingOption(String),

    #[error("Invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Malformed properties for {owner}: {source}")]
    Properties {
        owner: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to decrypt '{key}': {reason}")]
    Decryption { key: String, reason: String },

    #[error("Issue tracker request failed: {0}")]
    Tracker(String),

    #[error("Command '{command}' exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("System '{system}' does not support {capability}")]
    Unsupported {
        system: &'static str,
        capability: &'static str,
    },

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("{kind} '{id}' not found")]
    RecordNotFound { kind: &'static str, id: String },

    #[error("Configuration store failed: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Stable code identifying the class of failure in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownRule(_) => "ll-001",
            Self::UnknownSystem(_)
            | Self::MissingOption(_)
            | Self::InvalidOption { .. }
            | Self::Properties { .. } => "ll-002",
            Self::Decryption { .. } => "ll-003",
            Self::Tracker(_) | Self::Command { .. } | Self::Unsupported { .. } | Self::Io(_) => {
                "ll-004"
            }
            Self::UnknownPostman(_) | Self::Notification(_) => "ll-005",
            Self::RecordNotFound { .. } | Self::Store(_) => "ll-007",
        }
    }

    /// Whether the failure comes from configuration rather than from an
    /// external system being unreachable or misbehaving.
    pub fn is_configuration(&self) -> bool {
        matches!(self.code(), "ll-001" | "ll-002" | "ll-003")
    }

    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = TaskError> = std::result::Result<T, E>;

/// A [`TaskError`] together with the stack it was raised on.
///
/// Rules and the pipeline return this so that `?` captures the backtrace in
/// the frame that failed rather than where the failure gets logged.
#[derive(Debug)]
pub struct Failure {
    error: TaskError,
    backtrace: Backtrace,
}

impl Failure {
    pub fn error(&self) -> &TaskError {
        &self.error
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn into_error(self) -> TaskError {
        self.error
    }
}

impl From<TaskError> for Failure {
    fn from(error: TaskError) -> Self {
        Self {
            error,
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl Deref for Failure {
    type Target = TaskError;

    fn deref(&self) -> &TaskError {
        &self.error
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}
