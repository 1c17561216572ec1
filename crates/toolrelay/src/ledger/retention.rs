use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::LedgerPreferences;

use super::store::{ExecutionLedger, LedgerState};

/// Bounded retention: an entry is evicted once it is older than
/// `max_age_ms` or falls outside the newest `max_per_session` of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_per_session: usize,
    pub max_age_ms: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&LedgerPreferences::default())
    }
}

impl From<&LedgerPreferences> for RetentionPolicy {
    fn from(preferences: &LedgerPreferences) -> Self {
        Self {
            max_per_session: preferences.retention_max_per_session,
            max_age_ms: preferences.retention_max_age_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub evicted: usize,
    /// Evicted entries that were still Pending (orphaned by a crashed caller).
    pub evicted_pending: usize,
    pub sessions_closed: usize,
    pub sessions_dropped: usize,
}

pub(crate) fn sweep(
    state: &mut LedgerState,
    policy: &RetentionPolicy,
    idle_timeout_ms: u64,
    now: u64,
) -> SweepReport {
    let cutoff = now.saturating_sub(policy.max_age_ms);
    let mut report = SweepReport::default();
    let LedgerState {
        invocations,
        sessions,
        ..
    } = state;

    for session in sessions.values_mut() {
        let overflow = session
            .invocation_ids
            .len()
            .saturating_sub(policy.max_per_session);
        let mut position = 0;
        session.invocation_ids.retain(|id| {
            let keep = position >= overflow
                && invocations
                    .get(id)
                    .map_or(false, |invocation| invocation.last_touched() >= cutoff);
            position += 1;
            if !keep {
                if let Some(evicted) = invocations.remove(id) {
                    report.evicted += 1;
                    if !evicted.is_terminal() {
                        report.evicted_pending += 1;
                        tracing::warn!(
                            invocation_id = %evicted.id,
                            session_id = %evicted.session_id,
                            tool = %evicted.tool_name,
                            "evicted invocation that never reached a terminal state"
                        );
                    }
                }
            }
            keep
        });

        if !session.is_closed() && session.idle_for(now) >= idle_timeout_ms {
            session.closed_at = Some(now);
            report.sessions_closed += 1;
            tracing::debug!(session_id = %session.id, "session closed after idle timeout");
        }
    }

    let before = sessions.len();
    sessions.retain(|_, session| !(session.is_closed() && session.invocation_ids.is_empty()));
    report.sessions_dropped = before - sessions.len();

    if report.evicted > 0 || report.sessions_dropped > 0 {
        tracing::info!(
            evicted = report.evicted,
            evicted_pending = report.evicted_pending,
            sessions_closed = report.sessions_closed,
            sessions_dropped = report.sessions_dropped,
            "ledger retention sweep"
        );
    }
    report
}

/// Shortest period the sweeper runs at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically sweep `ledger` until it is dropped. Intervals below one
/// millisecond are raised to one millisecond.
pub fn spawn_retention_sweeper(
    ledger: &Arc<ExecutionLedger>,
    interval: Duration,
) -> JoinHandle<()> {
    let ledger: Weak<ExecutionLedger> = Arc::downgrade(ledger);
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(ledger) = ledger.upgrade() else {
                tracing::debug!("ledger dropped; retention sweeper exiting");
                break;
            };
            ledger.sweep();
        }
    })
}
