//! Out-of-process crypto tools (keytool, openssl)
//!
//! [`classify`] is the only place that inspects tool output; call sites work
//! with [`ToolOutcome`] and never match on strings themselves.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::controller::error::{Error, Result};

/// Output phrases keytool prints when an import is replayed
const ALREADY_EXISTS: &str = "already exists";
/// Output phrases keytool prints when a delete is replayed
const DOES_NOT_EXIST: &str = "does not exist";

/// Arguments whose following value is a secret
const SECRET_FLAGS: [&str; 3] = ["-storepass", "-keypass", "-srcstorepass"];

/// A single tool invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Renders the command with passwords masked, for logs and errors
impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                write!(f, " ***")?;
                mask_next = false;
            } else if arg.starts_with("pass:") {
                write!(f, " pass:***")?;
            } else {
                write!(f, " {}", arg)?;
                mask_next = SECRET_FLAGS.contains(&arg.as_str());
            }
        }
        Ok(())
    }
}

/// Raw result of running a tool
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stdout: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Classified result of a tool run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    /// The artifact was already present; a replayed create
    AlreadyExists(String),
    /// The artifact was already absent; a replayed delete
    DoesNotExist(String),
    Failure(String),
}

impl ToolOutcome {
    /// Turn anything but success into a [`Error::CryptoToolFailure`]
    pub fn into_result(self, command: &ToolCommand) -> Result<String> {
        match self {
            ToolOutcome::Success(stdout) => Ok(stdout),
            ToolOutcome::AlreadyExists(detail)
            | ToolOutcome::DoesNotExist(detail)
            | ToolOutcome::Failure(detail) => Err(Error::CryptoToolFailure {
                tool: command.to_string(),
                detail,
            }),
        }
    }
}

/// Map raw tool output to an outcome
pub fn classify(output: &ToolOutput) -> ToolOutcome {
    if output.success {
        return ToolOutcome::Success(output.stdout.clone());
    }

    let detail = [output.stdout.trim(), output.stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if detail.contains(ALREADY_EXISTS) {
        ToolOutcome::AlreadyExists(detail)
    } else if detail.contains(DOES_NOT_EXIST) {
        ToolOutcome::DoesNotExist(detail)
    } else {
        ToolOutcome::Failure(detail)
    }
}

/// Runs tools on behalf of the TLS manager
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion; `Err` only when the tool could not be started
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;

    /// Run and classify
    async fn execute(&self, command: &ToolCommand) -> Result<ToolOutcome> {
        let output = self.run(command).await?;
        let outcome = classify(&output);
        debug!(command = %command, success = output.success, "Ran crypto tool");
        Ok(outcome)
    }
}

/// [`ToolRunner`] spawning local processes
#[derive(Clone, Debug, Default)]
pub struct ProcessToolRunner;

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        let mut process = tokio::process::Command::new(&command.program);
        process.args(&command.args).kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }

        let output = process.output().await.map_err(|e| Error::CryptoToolFailure {
            tool: command.to_string(),
            detail: format!("failed to start: {}", e),
        })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
