//! Fakes shared by unit tests.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::error::{Result, TaskError};
use crate::models::Issue;
use crate::postman::{Bindings, Message, Postman};
use crate::systems::{QueryOptions, ShellCommand, System};

/// Collects formatted log output of the current thread
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    /// Number of log lines containing the needle
    pub fn count(&self, needle: &str) -> usize {
        self.output().lines().filter(|l| l.contains(needle)).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Remembers every notification instead of delivering it
#[derive(Clone, Default)]
pub struct RecordingPostman {
    sent: Arc<Mutex<Vec<(Message, Bindings)>>>,
}

impl RecordingPostman {
    pub fn sent(&self) -> Vec<(Message, Bindings)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Postman for RecordingPostman {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &Message, binds: &Bindings) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((message.clone(), binds.clone()));
        Ok(())
    }
}

/// Serves canned issues and command output, recording what was asked
#[derive(Clone, Default)]
pub struct FakeSystem {
    pub issues: Vec<Issue>,
    pub stdout: String,
    pub fail: bool,
    pub queries: Arc<Mutex<Vec<String>>>,
    pub commands: Arc<Mutex<Vec<ShellCommand>>>,
}

#[async_trait]
impl System for FakeSystem {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn issues(&self, query: &str, _options: &QueryOptions) -> Result<Vec<Issue>> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(TaskError::Tracker("connection refused".to_string()));
        }
        Ok(self.issues.clone())
    }

    async fn run(&self, command: &ShellCommand) -> Result<String> {
        self.commands.lock().unwrap().push(command.clone());
        if self.fail {
            return Err(TaskError::Command {
                command: command.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "svn: E170013".to_string(),
            });
        }
        Ok(self.stdout.clone())
    }
}
