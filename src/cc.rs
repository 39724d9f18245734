use serde_json::Value;
use tracing::debug;

/// Carbon-copy recipients detected from the `cc` option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cc {
    Plain(Vec<String>),
    Empty,
}

impl Cc {
    /// Addresses from a comma-separated string or a list of strings.
    ///
    /// Anything that yields no address is [`Cc::Empty`], which tells the
    /// pipeline to drop the option altogether.
    pub fn detect(value: &Value) -> Self {
        let emails: Vec<String> = match value {
            Value::String(raw) => raw
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        debug!(count = emails.len(), "Detected cc recipients");

        if emails.is_empty() {
            Self::Empty
        } else {
            Self::Plain(emails)
        }
    }

    /// Comma-separated form stored back into the options
    pub fn to_option(&self) -> Option<String> {
        match self {
            Self::Plain(emails) => Some(emails.join(",")),
            Self::Empty => None,
        }
    }
}
