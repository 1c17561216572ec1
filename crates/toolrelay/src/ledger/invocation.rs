//! Invocation records: one per logical tool call, spanning its whole
//! fallback chain.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::catalog::ProviderKind;
use crate::provider::ToolFailure;
use crate::utils::time::millis_to_rfc3339;

/// Unique, time-ordered invocation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InvocationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Completed,
    Failed,
}

impl InvocationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, InvocationStatus::Pending)
    }
}

/// One candidate tried inside a fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: ProviderKind,
    pub started_at: u64,
    pub ended_at: u64,
    /// `None` when the attempt succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

/// Ledger entry for one logical invocation. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: InvocationId,
    pub session_id: String,
    pub tool_name: String,
    /// Snapshot taken at `begin`; never modified afterwards.
    pub parameters: serde_json::Value,
    pub status: InvocationStatus,
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    /// Present iff `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    /// Provider that produced the terminal outcome, if any ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Ledger-wide insertion sequence, used to order same-millisecond entries.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Invocation {
    pub(crate) fn pending(
        seq: u64,
        session_id: &str,
        tool_name: &str,
        parameters: serde_json::Value,
        start_time: u64,
    ) -> Self {
        Self {
            id: InvocationId::new(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            parameters,
            status: InvocationStatus::Pending,
            start_time,
            end_time: None,
            result: None,
            error: None,
            provider: None,
            attempts: Vec::new(),
            seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time))
    }

    /// Time the entry last changed: end time when terminal, else start time.
    pub fn last_touched(&self) -> u64 {
        self.end_time.unwrap_or(self.start_time)
    }

    pub fn started_at_rfc3339(&self) -> String {
        millis_to_rfc3339(self.start_time)
    }

    pub(crate) fn finish(
        &mut self,
        status: InvocationStatus,
        result: Option<serde_json::Value>,
        error: Option<ToolFailure>,
        attempts: Vec<AttemptRecord>,
        end_time: u64,
    ) {
        self.provider = match (&error, attempts.last()) {
            (Some(failure), _) if failure.provider.is_some() => failure.provider,
            (None, Some(last)) => Some(last.provider),
            _ => None,
        };
        self.status = status;
        self.result = result;
        self.error = error;
        self.attempts = attempts;
        self.end_time = Some(end_time);
    }
}
