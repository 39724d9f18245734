use async_trait::async_trait;

use super::{QueryOptions, ShellCommand, System};
use crate::error::Result;
use crate::models::Issue;

/// Stand-in for a system without connection details.
///
/// Every query succeeds with no data, so the owning task finds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySystem;

#[async_trait]
impl System for EmptySystem {
    fn name(&self) -> &'static str {
        "empty"
    }

    async fn issues(&self, _query: &str, _options: &QueryOptions) -> Result<Vec<Issue>> {
        Ok(Vec::new())
    }

    async fn run(&self, _command: &ShellCommand) -> Result<String> {
        Ok(String::new())
    }
}
