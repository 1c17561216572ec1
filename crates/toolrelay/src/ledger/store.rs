//! Session-scoped, append-only record of invocation lifecycles.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::RuntimeConfig;
use crate::provider::ToolFailure;
use crate::utils::time::now_millis;

use super::invocation::{AttemptRecord, Invocation, InvocationId, InvocationStatus};
use super::query::{parameters_contain, InvocationQuery};
use super::retention::{self, RetentionPolicy, SweepReport};
use super::session::{Session, SessionSummary};

#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    pub(crate) invocations: HashMap<InvocationId, Invocation>,
    pub(crate) sessions: HashMap<String, Session>,
    pub(crate) next_seq: u64,
}

/// Store of every invocation and session in the process.
///
/// All mutations are short, synchronous critical sections touching one
/// invocation id. Writes that do not apply (unknown id, already terminal) are
/// logged and reported as `false`; they never error.
///
/// Writes are crate-private, so code holding the ledger outside the
/// dispatcher can only read it:
///
/// ```compile_fail
/// let ledger = toolrelay::ExecutionLedger::default();
/// ledger.begin("s", "t", serde_json::json!({}));
/// ```
#[derive(Debug)]
pub struct ExecutionLedger {
    state: RwLock<LedgerState>,
    policy: RetentionPolicy,
    idle_timeout_ms: u64,
}

impl ExecutionLedger {
    pub fn new(policy: RetentionPolicy, idle_timeout_ms: u64) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            policy,
            idle_timeout_ms,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            RetentionPolicy::from(&config.ledger),
            config.session.idle_timeout_ms,
        )
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Open (or refresh) a session, merging `metadata` into what it already has.
    pub(crate) fn open_session(
        &self,
        session_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Session {
        let now = now_millis();
        let mut state = self.write_state();
        let session = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, now));
        session.touch(now);
        session.metadata.extend(metadata);
        session.clone()
    }

    /// Record a new Pending invocation and return its id.
    pub(crate) fn begin(
        &self,
        session_id: &str,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> InvocationId {
        self.begin_at(session_id, tool_name, parameters, now_millis())
    }

    pub(crate) fn begin_at(
        &self,
        session_id: &str,
        tool_name: &str,
        parameters: serde_json::Value,
        now: u64,
    ) -> InvocationId {
        let mut guard = self.write_state();
        let state = &mut *guard;

        let seq = state.next_seq;
        state.next_seq += 1;
        let invocation = Invocation::pending(seq, session_id, tool_name, parameters, now);
        let id = invocation.id.clone();

        let session = state.sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id, "session opened implicitly by invocation");
            Session::new(session_id, now)
        });
        session.touch(now);
        session.invocation_ids.push_back(id.clone());
        state.invocations.insert(id.clone(), invocation);

        tracing::debug!(session_id, tool = tool_name, invocation_id = %id, "invocation started");
        id
    }

    /// Terminal transition to Completed. Returns whether it applied.
    pub(crate) fn complete(
        &self,
        id: &InvocationId,
        result: serde_json::Value,
        attempts: Vec<AttemptRecord>,
    ) -> bool {
        self.complete_at(id, result, attempts, now_millis())
    }

    pub(crate) fn complete_at(
        &self,
        id: &InvocationId,
        result: serde_json::Value,
        attempts: Vec<AttemptRecord>,
        now: u64,
    ) -> bool {
        self.finish_at(id, InvocationStatus::Completed, Some(result), None, attempts, now)
    }

    /// Terminal transition to Failed. Returns whether it applied.
    pub(crate) fn fail(
        &self,
        id: &InvocationId,
        error: ToolFailure,
        attempts: Vec<AttemptRecord>,
    ) -> bool {
        self.fail_at(id, error, attempts, now_millis())
    }

    pub(crate) fn fail_at(
        &self,
        id: &InvocationId,
        error: ToolFailure,
        attempts: Vec<AttemptRecord>,
        now: u64,
    ) -> bool {
        self.finish_at(id, InvocationStatus::Failed, None, Some(error), attempts, now)
    }

    fn finish_at(
        &self,
        id: &InvocationId,
        status: InvocationStatus,
        result: Option<serde_json::Value>,
        error: Option<ToolFailure>,
        attempts: Vec<AttemptRecord>,
        now: u64,
    ) -> bool {
        let mut guard = self.write_state();
        let state = &mut *guard;

        let Some(invocation) = state.invocations.get_mut(id) else {
            tracing::warn!(
                invocation_id = %id,
                ?status,
                "ledger write for unknown invocation ignored"
            );
            return false;
        };
        if invocation.is_terminal() {
            tracing::warn!(
                invocation_id = %id,
                current = ?invocation.status,
                requested = ?status,
                "ledger write for terminal invocation ignored"
            );
            return false;
        }

        let error_kind = error.as_ref().map(|failure| failure.kind.as_str());
        invocation.finish(status, result, error, attempts, now);
        tracing::info!(
            session_id = %invocation.session_id,
            tool = %invocation.tool_name,
            invocation_id = %id,
            ?status,
            error_kind,
            duration_ms = invocation.duration_ms().unwrap_or(0),
            "invocation finished"
        );

        if let Some(session) = state.sessions.get_mut(&invocation.session_id) {
            session.touch(now);
        }
        true
    }

    pub fn get(&self, id: &InvocationId) -> Option<Invocation> {
        self.read_state().invocations.get(id).cloned()
    }

    /// Filtered invocations, newest first.
    pub fn query(&self, query: &InvocationQuery) -> Vec<Invocation> {
        let state = self.read_state();
        let mut matches: Vec<Invocation> = match &query.session_id {
            Some(session_id) => state
                .sessions
                .get(session_id)
                .map(|session| {
                    session
                        .invocation_ids
                        .iter()
                        .filter_map(|id| state.invocations.get(id))
                        .filter(|invocation| query.matches(invocation))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => state
                .invocations
                .values()
                .filter(|invocation| query.matches(invocation))
                .cloned()
                .collect(),
        };
        matches.sort_by(|a, b| (b.start_time, b.seq).cmp(&(a.start_time, a.seq)));
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        matches
    }

    /// Latest invocation of `tool_name` in `session_id` that completed within
    /// the last `within_ms` milliseconds (boundary inclusive).
    pub fn most_recent_success(
        &self,
        session_id: &str,
        tool_name: &str,
        within_ms: u64,
    ) -> Option<Invocation> {
        self.most_recent_success_at(session_id, tool_name, within_ms, None, now_millis())
    }

    /// Like [`Self::most_recent_success`], additionally requiring the recorded
    /// parameters to contain `expected` (object subset match).
    pub fn most_recent_success_matching(
        &self,
        session_id: &str,
        tool_name: &str,
        within_ms: u64,
        expected: &serde_json::Value,
    ) -> Option<Invocation> {
        self.most_recent_success_at(session_id, tool_name, within_ms, Some(expected), now_millis())
    }

    pub(crate) fn most_recent_success_at(
        &self,
        session_id: &str,
        tool_name: &str,
        within_ms: u64,
        expected: Option<&serde_json::Value>,
        now: u64,
    ) -> Option<Invocation> {
        let cutoff = now.saturating_sub(within_ms);
        let state = self.read_state();
        let session = state.sessions.get(session_id)?;
        session
            .invocation_ids
            .iter()
            .filter_map(|id| state.invocations.get(id))
            .filter(|invocation| {
                invocation.tool_name == tool_name
                    && invocation.status == InvocationStatus::Completed
                    && invocation.end_time.map_or(false, |end| end >= cutoff)
                    && expected.map_or(true, |expected| {
                        parameters_contain(&invocation.parameters, expected)
                    })
            })
            .max_by_key(|invocation| (invocation.end_time, invocation.seq))
            .cloned()
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.read_state().sessions.get(session_id).cloned()
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read_state().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        let state = self.read_state();
        let session = state.sessions.get(session_id)?;
        let mut summary = SessionSummary::default();
        for invocation in session.invocation_ids.iter().filter_map(|id| state.invocations.get(id)) {
            match invocation.status {
                InvocationStatus::Pending => summary.pending += 1,
                InvocationStatus::Completed => summary.completed += 1,
                InvocationStatus::Failed => summary.failed += 1,
            }
        }
        Some(summary)
    }

    /// Apply the retention policy now.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(now_millis())
    }

    pub fn sweep_at(&self, now: u64) -> SweepReport {
        let mut state = self.write_state();
        retention::sweep(&mut state, &self.policy, self.idle_timeout_ms, now)
    }

    pub fn len(&self) -> usize {
        self.read_state().invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExecutionLedger {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}
