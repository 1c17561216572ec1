//! Read-side filters over the ledger.

use serde::{Deserialize, Serialize};

use super::invocation::{Invocation, InvocationStatus};

/// Filter for [`crate::ledger::ExecutionLedger::query`]. Unset fields match
/// everything; results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InvocationStatus>,
    /// Absolute lower bound (epoch ms, inclusive) on `start_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl InvocationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn status(mut self, status: InvocationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, since_ms: u64) -> Self {
        self.since_ms = Some(since_ms);
        self
    }

    /// Only invocations started within the last `window_ms` before `now`.
    pub fn within(self, window_ms: u64, now: u64) -> Self {
        self.since(now.saturating_sub(window_ms))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, invocation: &Invocation) -> bool {
        if let Some(session_id) = &self.session_id {
            if &invocation.session_id != session_id {
                return false;
            }
        }
        if let Some(tool_name) = &self.tool_name {
            if &invocation.tool_name != tool_name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if invocation.status != status {
                return false;
            }
        }
        if let Some(since) = self.since_ms {
            if invocation.start_time < since {
                return false;
            }
        }
        true
    }
}

/// True when every key in `expected` is present in `actual` with a matching
/// value, recursing into objects. Arrays and scalars compare by equality.
pub fn parameters_contain(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match (actual, expected) {
        (serde_json::Value::Object(actual), serde_json::Value::Object(expected)) => {
            expected.iter().all(|(key, expected_value)| {
                actual
                    .get(key)
                    .map(|actual_value| parameters_contain(actual_value, expected_value))
                    .unwrap_or(false)
            })
        }
        _ => actual == expected,
    }
}
