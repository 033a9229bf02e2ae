//! Bounded agent invocation.
//!
//! The supervisor never manages the coding agent beyond this seam: one
//! prompt in, one [`AgentOutcome`] out, under a caller-imposed
//! deadline. A timeout is not an exception, it is an outcome with
//! `timed_out: true` and the fixed `"timeout"` error signature, so it
//! feeds the repeated-error trigger exactly like any other failure.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{LoopguardError, Result};

/// Error signature reported for timed-out invocations.
pub const TIMEOUT_SIGNATURE: &str = "timeout";

/// Result of one bounded agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code (-1 when unavailable).
    pub exit_code: i32,
    /// Whether the deadline expired before the process finished.
    pub timed_out: bool,
}

impl AgentOutcome {
    /// Successful outcome carrying only stdout (test helper).
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
        }
    }

    /// Failed outcome with the given stderr and exit code (test helper).
    #[must_use]
    pub fn failure(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
        }
    }

    /// Timed-out outcome (test helper).
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            timed_out: true,
        }
    }

    /// Whether this iteration counts as an error.
    #[must_use]
    pub fn had_error(&self) -> bool {
        self.timed_out || self.exit_code != 0
    }

    /// Stable signature identifying the failure mode, if any.
    ///
    /// Timeouts get the fixed `"timeout"` signature. Other failures
    /// hash the normalized first meaningful stderr line so the same
    /// failure produces the same signature across iterations even when
    /// addresses or counts in the message differ.
    #[must_use]
    pub fn error_signature(&self) -> Option<String> {
        if self.timed_out {
            return Some(TIMEOUT_SIGNATURE.to_string());
        }
        if self.exit_code == 0 {
            return None;
        }

        let first_line = self
            .stderr
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty());

        Some(match first_line {
            Some(line) => {
                let normalized: String = line
                    .to_lowercase()
                    .chars()
                    .filter(|c| !c.is_ascii_digit())
                    .collect();
                let digest = Sha256::digest(normalized.as_bytes());
                hex::encode(&digest[..6])
            }
            None => format!("exit-{}", self.exit_code),
        })
    }
}

/// Abstraction over the external coding-agent process.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run one iteration with the given prompt under the deadline.
    ///
    /// # Errors
    ///
    /// Returns an error only when the invocation itself is impossible
    /// (missing binary, spawn failure). Agent failures and timeouts are
    /// outcomes, not errors.
    async fn run(&self, prompt: &str) -> Result<AgentOutcome>;
}

/// Spawns the real agent CLI with piped stdio.
pub struct ProcessInvoker {
    command: String,
    args: Vec<String>,
    project_dir: PathBuf,
    timeout: Duration,
}

impl ProcessInvoker {
    /// Create an invoker for the given command.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(command: impl Into<String>, project_dir: P) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            project_dir: project_dir.into(),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Set extra arguments passed to the agent command.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the invocation deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Verify the agent binary is resolvable before starting the loop.
    ///
    /// # Errors
    ///
    /// Returns [`LoopguardError::AgentNotFound`] when the command is not
    /// in `PATH`.
    pub fn preflight(&self) -> Result<()> {
        which::which(&self.command).map_err(|_| LoopguardError::AgentNotFound {
            command: self.command.clone(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl AgentInvoker for ProcessInvoker {
    async fn run(&self, prompt: &str) -> Result<AgentOutcome> {
        debug!(
            command = %self.command,
            prompt_chars = prompt.len(),
            timeout_secs = self.timeout.as_secs(),
            "Invoking agent"
        );

        let mut child = match Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.project_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoopguardError::AgentNotFound {
                    command: self.command.clone(),
                });
            }
            Err(e) => {
                return Err(LoopguardError::agent(format!(
                    "failed to spawn '{}': {}",
                    self.command, e
                )));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| LoopguardError::agent(format!("failed to write prompt: {}", e)))?;
            stdin
                .flush()
                .await
                .map_err(|e| LoopguardError::agent(format!("failed to flush prompt: {}", e)))?;
            drop(stdin);
        }

        // wait_with_output takes ownership; on timeout the child is
        // dropped and tokio reaps it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(LoopguardError::agent(format!(
                    "failed to read agent output: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Agent invocation timed out"
                );
                return Ok(AgentOutcome::timeout());
            }
        };

        Ok(AgentOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            timed_out: false,
        })
    }
}

/// Scripted agent double for tests: pops one outcome per invocation.
#[derive(Debug, Default)]
pub struct MockAgent {
    outcomes: Mutex<Vec<AgentOutcome>>,
    invocations: Mutex<Vec<String>>,
}

impl MockAgent {
    /// Create a mock that replays the given outcomes in order.
    #[must_use]
    pub fn with_outcomes(outcomes: Vec<AgentOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.invocations
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentInvoker for MockAgent {
    async fn run(&self, prompt: &str) -> Result<AgentOutcome> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(prompt.to_string());
        }
        let mut outcomes = self
            .outcomes
            .lock()
            .map_err(|_| LoopguardError::agent("poisoned mock lock"))?;
        if outcomes.is_empty() {
            return Err(LoopguardError::agent("mock agent exhausted"));
        }
        Ok(outcomes.remove(0))
    }
}
