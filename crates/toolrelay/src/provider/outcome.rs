//! Normalized invocation outcomes and the failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::ProviderKind;

/// Every failure class a provider or the dispatcher can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No provider (or this provider) knows the name.
    NameNotFound,
    ParameterValidationError,
    RuntimeError,
    LocalTimeout,
    SandboxTimeout,
    SandboxCrash,
    PermissionDenied,
    ConnectionLost,
    RemoteTimeout,
    RemoteRejected,
    /// Every candidate hard-failed.
    AllCandidatesExhausted,
}

impl ToolErrorKind {
    /// Hard failures move the dispatcher on to the next candidate.
    pub fn is_hard(self) -> bool {
        match self {
            ToolErrorKind::NameNotFound
            | ToolErrorKind::LocalTimeout
            | ToolErrorKind::SandboxTimeout
            | ToolErrorKind::SandboxCrash
            | ToolErrorKind::PermissionDenied
            | ToolErrorKind::ConnectionLost
            | ToolErrorKind::RemoteTimeout
            | ToolErrorKind::RemoteRejected => true,
            ToolErrorKind::ParameterValidationError
            | ToolErrorKind::RuntimeError
            | ToolErrorKind::AllCandidatesExhausted => false,
        }
    }

    /// Soft failures are returned to the caller as-is.
    pub fn is_soft(self) -> bool {
        matches!(
            self,
            ToolErrorKind::ParameterValidationError | ToolErrorKind::RuntimeError
        )
    }

    /// Timeout kind reported when a call to `kind` runs out of time.
    pub fn timeout_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Local => ToolErrorKind::LocalTimeout,
            ProviderKind::Sandboxed => ToolErrorKind::SandboxTimeout,
            ProviderKind::Remote => ToolErrorKind::RemoteTimeout,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::NameNotFound => "name_not_found",
            ToolErrorKind::ParameterValidationError => "parameter_validation_error",
            ToolErrorKind::RuntimeError => "runtime_error",
            ToolErrorKind::LocalTimeout => "local_timeout",
            ToolErrorKind::SandboxTimeout => "sandbox_timeout",
            ToolErrorKind::SandboxCrash => "sandbox_crash",
            ToolErrorKind::PermissionDenied => "permission_denied",
            ToolErrorKind::ConnectionLost => "connection_lost",
            ToolErrorKind::RemoteTimeout => "remote_timeout",
            ToolErrorKind::RemoteRejected => "remote_rejected",
            ToolErrorKind::AllCandidatesExhausted => "all_candidates_exhausted",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Provider that produced the failure; `None` for dispatcher-level failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

impl ToolFailure {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
        }
    }

    pub fn from_provider(
        kind: ProviderKind,
        error_kind: ToolErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: error_kind,
            message: message.into(),
            provider: Some(kind),
        }
    }

    pub fn is_hard(&self) -> bool {
        self.kind.is_hard()
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(provider) => write!(f, "{} ({provider}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ToolFailure {}

/// Outcome of one provider call, and of one dispatcher invocation.
pub type ToolOutcome = Result<serde_json::Value, ToolFailure>;
