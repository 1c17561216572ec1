use std::sync::Arc;
use std::time::Duration;

use super::invocation::{Invocation, InvocationId};
use super::query::InvocationQuery;
use super::session::{Session, SessionSummary};
use super::store::ExecutionLedger;

/// Read-only view of the ledger handed to graders and other observers.
#[derive(Debug, Clone)]
pub struct LedgerReader {
    ledger: Arc<ExecutionLedger>,
    default_window_ms: u64,
}

impl LedgerReader {
    pub(crate) fn new(ledger: Arc<ExecutionLedger>, default_window_ms: u64) -> Self {
        Self {
            ledger,
            default_window_ms,
        }
    }

    pub fn default_window_ms(&self) -> u64 {
        self.default_window_ms
    }

    pub fn get(&self, id: &InvocationId) -> Option<Invocation> {
        self.ledger.get(id)
    }

    pub fn query(&self, query: &InvocationQuery) -> Vec<Invocation> {
        self.ledger.query(query)
    }

    pub fn most_recent_success(
        &self,
        session_id: &str,
        tool_name: &str,
        within_ms: u64,
    ) -> Option<Invocation> {
        self.ledger.most_recent_success(session_id, tool_name, within_ms)
    }

    pub fn most_recent_success_matching(
        &self,
        session_id: &str,
        tool_name: &str,
        within_ms: u64,
        expected: &serde_json::Value,
    ) -> Option<Invocation> {
        self.ledger
            .most_recent_success_matching(session_id, tool_name, within_ms, expected)
    }

    /// Whether `tool_name` succeeded in `session_id` within the configured
    /// default window.
    pub fn recently_succeeded(&self, session_id: &str, tool_name: &str) -> bool {
        self.most_recent_success(session_id, tool_name, self.default_window_ms)
            .is_some()
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.ledger.session(session_id)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.ledger.sessions()
    }

    pub fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.ledger.summary(session_id)
    }

    /// Poll until a matching success shows up or `deadline` elapses.
    pub async fn wait_for_success(
        &self,
        session_id: &str,
        tool_name: &str,
        within_ms: u64,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Option<Invocation> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(found) = self.most_recent_success(session_id, tool_name, within_ms) {
                return Some(found);
            }
            if started.elapsed() >= deadline {
                tracing::debug!(
                    session_id,
                    tool = tool_name,
                    "no success observed before deadline"
                );
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
