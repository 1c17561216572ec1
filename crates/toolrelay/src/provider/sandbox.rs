//! Sandboxed tool provider.
//!
//! The isolation mechanism lives behind [`SandboxRuntime`]; this adapter only
//! normalizes its faults and enforces the call timeout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::catalog::{ProviderKind, ToolDescriptor};

use super::outcome::{ToolErrorKind, ToolFailure, ToolOutcome};
use super::ProviderAdapter;

/// Failure reported by a sandbox runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxFault {
    /// The isolated context died or produced no usable result.
    Crashed(String),
    PermissionDenied(String),
    InvalidParameters(String),
    /// The tool ran and reported an error of its own.
    ToolError(String),
    UnknownTool(String),
}

impl SandboxFault {
    fn into_failure(self) -> ToolFailure {
        let (kind, message) = match self {
            SandboxFault::Crashed(message) => (ToolErrorKind::SandboxCrash, message),
            SandboxFault::PermissionDenied(message) => (ToolErrorKind::PermissionDenied, message),
            SandboxFault::InvalidParameters(message) => {
                (ToolErrorKind::ParameterValidationError, message)
            }
            SandboxFault::ToolError(message) => (ToolErrorKind::RuntimeError, message),
            SandboxFault::UnknownTool(message) => (ToolErrorKind::NameNotFound, message),
        };
        ToolFailure::from_provider(ProviderKind::Sandboxed, kind, message)
    }
}

/// An isolated execution context able to run named tools.
#[async_trait::async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn execute(
        &self,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, SandboxFault>;
}

pub struct SandboxedProvider {
    runtime: Arc<dyn SandboxRuntime>,
    descriptors: HashMap<String, ToolDescriptor>,
}

impl SandboxedProvider {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, descriptors: Vec<ToolDescriptor>) -> Self {
        let descriptors = descriptors
            .into_iter()
            .map(|mut descriptor| {
                descriptor.provider_kind = ProviderKind::Sandboxed;
                (descriptor.name.clone(), descriptor)
            })
            .collect();
        Self {
            runtime,
            descriptors,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for SandboxedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sandboxed
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self.descriptors.values().cloned().collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    async fn invoke(
        &self,
        name: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> ToolOutcome {
        if !self.descriptors.contains_key(name) {
            return Err(
                SandboxFault::UnknownTool(format!("sandbox does not provide '{name}'"))
                    .into_failure(),
            );
        }

        match tokio::time::timeout(timeout, self.runtime.execute(name, params)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(fault.into_failure()),
            Err(_) => Err(ToolFailure::from_provider(
                ProviderKind::Sandboxed,
                ToolErrorKind::SandboxTimeout,
                format!("'{name}' did not finish within {}ms", timeout.as_millis()),
            )),
        }
    }
}

/// Exit code a sandboxed tool uses to reject its parameters (`EX_USAGE`).
pub const EXIT_INVALID_PARAMETERS: i32 = 64;
/// Exit code signalling the sandbox refused the operation.
pub const EXIT_PERMISSION_DENIED: i32 = 126;

#[derive(Serialize)]
struct ProcessRequest<'a> {
    tool: &'a str,
    params: &'a serde_json::Value,
}

/// Runs every call in a fresh child process.
///
/// The request `{"tool", "params"}` is written to stdin as one JSON document.
/// On exit status 0 stdout is parsed as JSON (falling back to a plain string,
/// or `null` when empty). Exit 64 rejects parameters, 126 denies permission,
/// other non-zero codes are tool errors, and death by signal is a crash.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for ProcessSandbox {
    async fn execute(
        &self,
        tool: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, SandboxFault> {
        let payload = serde_json::to_vec(&ProcessRequest { tool, params }).map_err(|error| {
            SandboxFault::InvalidParameters(format!("failed to serialize params: {error}"))
        })?;

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .env("TOOLRELAY_TOOL", tool)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|error| {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                SandboxFault::PermissionDenied(format!(
                    "cannot execute {}: {error}",
                    self.program.display()
                ))
            } else {
                SandboxFault::Crashed(format!(
                    "failed to spawn {}: {error}",
                    self.program.display()
                ))
            }
        })?;

        // Stdin is fed while stdout and stderr drain.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The child may exit without reading its input.
                if let Err(error) = stdin.write_all(&payload).await {
                    tracing::debug!(tool, "sandbox stdin write failed: {}", error);
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|error| {
            SandboxFault::Crashed(format!("failed to collect sandbox output: {error}"))
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stdout = stdout.trim();
                if stdout.is_empty() {
                    return Ok(serde_json::Value::Null);
                }
                Ok(serde_json::from_str(stdout)
                    .unwrap_or_else(|_| serde_json::Value::String(stdout.to_string())))
            }
            Some(EXIT_INVALID_PARAMETERS) => Err(SandboxFault::InvalidParameters(stderr)),
            Some(EXIT_PERMISSION_DENIED) => Err(SandboxFault::PermissionDenied(stderr)),
            Some(code) => Err(SandboxFault::ToolError(format!("exit status {code}: {stderr}"))),
            None => Err(SandboxFault::Crashed(format!("terminated by signal: {stderr}"))),
        }
    }
}
