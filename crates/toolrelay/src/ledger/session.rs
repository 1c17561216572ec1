use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::invocation::InvocationId;

/// Grouping scope for invocations: one benchmark run, one conversation turn
/// group. Session ids are opaque, caller-supplied strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: u64,
    pub last_activity_at: u64,
    /// Set by the retention sweep once the session has been idle too long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<u64>,
    /// Retained invocations in `begin` order, oldest first.
    pub invocation_ids: VecDeque<InvocationId>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    pub(crate) fn new(id: &str, now: u64) -> Self {
        Self {
            id: id.to_string(),
            created_at: now,
            last_activity_at: now,
            closed_at: None,
            invocation_ids: VecDeque::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_activity_at = self.last_activity_at.max(now);
        if self.closed_at.take().is_some() {
            tracing::debug!(session_id = %self.id, "session reopened by new activity");
        }
    }

    pub(crate) fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_activity_at)
    }
}

/// Per-status invocation counts for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl SessionSummary {
    pub fn total(&self) -> usize {
        self.pending + self.completed + self.failed
    }
}
