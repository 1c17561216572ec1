//! Routes a tool call to one provider, falling back on hard failures, and
//! records exactly one ledger entry per call.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::catalog::{Candidate, ProviderKind, ToolCatalog, ToolDescriptor};
use crate::config::RuntimeConfig;
use crate::error::CoreResult;
use crate::ledger::{
    spawn_retention_sweeper, AttemptRecord, ExecutionLedger, InvocationId, LedgerReader, Session,
};
use crate::provider::{ProviderAdapter, ToolErrorKind, ToolFailure, ToolOutcome};
use crate::utils::time::now_millis;

/// Extra time allowed past an adapter's own timeout before the dispatcher
/// gives up on the call itself.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

type AdapterMap = HashMap<ProviderKind, Arc<dyn ProviderAdapter>>;

/// Outcome of one `invoke` call, however many candidates it took.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub invocation_id: InvocationId,
    pub outcome: ToolOutcome,
    /// Provider that produced the outcome; `None` when no provider settled it.
    pub provider: Option<ProviderKind>,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// One entry of an [`Dispatcher::invoke_many`] batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub session_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl InvocationRequest {
    pub fn new(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// Owns the catalog, the attached provider adapters and the ledger. The
/// dispatcher is the ledger's only writer.
pub struct Dispatcher {
    config: RuntimeConfig,
    catalog: RwLock<ToolCatalog>,
    adapters: RwLock<AdapterMap>,
    ledger: Arc<ExecutionLedger>,
}

impl Dispatcher {
    pub fn new(config: RuntimeConfig) -> Self {
        let ledger = Arc::new(ExecutionLedger::from_config(&config));
        Self::with_ledger(config, ledger)
    }

    /// Write into `ledger`. Other holders of the `Arc` can only read it.
    pub fn with_ledger(config: RuntimeConfig, ledger: Arc<ExecutionLedger>) -> Self {
        Self {
            config,
            catalog: RwLock::new(ToolCatalog::new()),
            adapters: RwLock::new(HashMap::new()),
            ledger,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Attach the adapter serving `adapter.kind()`, replacing any earlier one.
    /// The catalog is left untouched.
    pub fn attach(&self, adapter: Arc<dyn ProviderAdapter>) {
        let kind = adapter.kind();
        if self.write_adapters().insert(kind, adapter).is_some() {
            tracing::debug!(provider = %kind, "replaced provider adapter");
        }
    }

    /// Replace the descriptor set of `kind` in the catalog.
    pub fn register(&self, kind: ProviderKind, descriptors: Vec<ToolDescriptor>) -> CoreResult<()> {
        let count = descriptors.len();
        self.write_catalog().register(kind, descriptors)?;
        tracing::debug!(provider = %kind, count, "registered provider tools");
        Ok(())
    }

    /// Attach `adapter` and register the tools it declares.
    pub fn register_provider(&self, adapter: Arc<dyn ProviderAdapter>) -> CoreResult<()> {
        self.register(adapter.kind(), adapter.descriptors())?;
        self.attach(adapter);
        Ok(())
    }

    /// Detach the adapter of `kind` and drop its tools from the catalog.
    pub fn unregister_provider(&self, kind: ProviderKind) {
        self.write_catalog().unregister(kind);
        self.write_adapters().remove(&kind);
    }

    pub fn list_tools(&self) -> Vec<String> {
        self.read_catalog().list()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.read_catalog().descriptors()
    }

    pub fn resolve(&self, tool_name: &str) -> Vec<Candidate> {
        self.read_catalog().resolve(tool_name)
    }

    /// Open `session_id` ahead of its first call, merging `metadata` into
    /// what the session already carries.
    pub fn open_session(
        &self,
        session_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Session {
        self.ledger.open_session(session_id, metadata)
    }

    /// Read-only ledger handle for graders.
    pub fn reader(&self) -> LedgerReader {
        LedgerReader::new(self.ledger.clone(), self.config.ledger.recent_window_ms)
    }

    pub fn spawn_retention_sweeper(&self) -> JoinHandle<()> {
        spawn_retention_sweeper(
            &self.ledger,
            Duration::from_millis(self.config.ledger.sweep_interval_ms),
        )
    }

    /// Run `tool_name` with `parameters` on the best available provider.
    pub async fn invoke(
        &self,
        session_id: &str,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> DispatchResult {
        let invocation_id = self.ledger.begin(session_id, tool_name, parameters.clone());
        let candidates = self.resolve(tool_name);
        tracing::debug!(
            session_id,
            tool = tool_name,
            invocation_id = %invocation_id,
            candidates = candidates.len(),
            "resolved tool candidates"
        );

        let (outcome, attempts) = if candidates.is_empty() {
            let failure = ToolFailure::new(
                ToolErrorKind::NameNotFound,
                format!("no provider offers tool '{tool_name}'"),
            );
            (Err(failure), Vec::new())
        } else {
            self.run_candidates(tool_name, &parameters, candidates).await
        };

        let provider = match &outcome {
            Ok(_) => attempts.last().map(|attempt| attempt.provider),
            Err(failure) => failure.provider,
        };
        match &outcome {
            Ok(value) => self.ledger.complete(&invocation_id, value.clone(), attempts),
            Err(failure) => self.ledger.fail(&invocation_id, failure.clone(), attempts),
        };

        DispatchResult {
            invocation_id,
            outcome,
            provider,
        }
    }

    /// Run independent requests concurrently. Results keep request order.
    pub async fn invoke_many(&self, requests: Vec<InvocationRequest>) -> Vec<DispatchResult> {
        let calls = requests.into_iter().map(|request| async move {
            self.invoke(&request.session_id, &request.tool_name, request.parameters)
                .await
        });
        join_all(calls).await
    }

    /// Try candidates strictly one at a time until one succeeds or fails softly.
    async fn run_candidates(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        candidates: Vec<Candidate>,
    ) -> (ToolOutcome, Vec<AttemptRecord>) {
        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let kind = candidate.kind;
            let started_at = now_millis();
            let result = match self.adapter(kind) {
                Some(adapter) => self.call_adapter(adapter, kind, tool_name, parameters).await,
                None => Err(ToolFailure::from_provider(
                    kind,
                    ToolErrorKind::NameNotFound,
                    format!("no {kind} adapter attached"),
                )),
            };
            let ended_at = now_millis();

            let failure = match result {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        provider: kind,
                        started_at,
                        ended_at,
                        error: None,
                    });
                    return (Ok(value), attempts);
                }
                Err(failure) => failure,
            };
            attempts.push(AttemptRecord {
                provider: kind,
                started_at,
                ended_at,
                error: Some(failure.clone()),
            });

            if !failure.is_hard() {
                tracing::debug!(
                    tool = tool_name,
                    provider = %kind,
                    error_kind = failure.kind.as_str(),
                    "soft failure; not falling back"
                );
                return (Err(failure), attempts);
            }
            tracing::warn!(
                tool = tool_name,
                provider = %kind,
                error_kind = failure.kind.as_str(),
                message = %failure.message,
                "hard failure; trying next candidate"
            );
        }

        let tried = attempts
            .iter()
            .filter_map(|attempt| attempt.error.as_ref())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let failure = ToolFailure::new(
            ToolErrorKind::AllCandidatesExhausted,
            format!("all {} candidates for '{tool_name}' failed: {tried}", attempts.len()),
        );
        (Err(failure), attempts)
    }

    async fn call_adapter(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        kind: ProviderKind,
        tool_name: &str,
        parameters: &serde_json::Value,
    ) -> ToolOutcome {
        let timeout = self.config.providers.timeout_for(kind);
        tracing::debug!(
            tool = tool_name,
            provider = %kind,
            timeout_ms = timeout.as_millis() as u64,
            "trying candidate"
        );
        let call = adapter.invoke(tool_name, parameters, timeout);
        match tokio::time::timeout(timeout + TIMEOUT_GRACE, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(mut failure)) => {
                failure.provider.get_or_insert(kind);
                Err(failure)
            }
            Err(_) => Err(ToolFailure::from_provider(
                kind,
                ToolErrorKind::timeout_for(kind),
                format!("adapter did not return within {}ms", timeout.as_millis()),
            )),
        }
    }

    fn adapter(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.read_adapters().get(&kind).cloned()
    }

    fn read_catalog(&self) -> RwLockReadGuard<'_, ToolCatalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_catalog(&self) -> RwLockWriteGuard<'_, ToolCatalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_adapters(&self) -> RwLockReadGuard<'_, AdapterMap> {
        self.adapters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_adapters(&self) -> RwLockWriteGuard<'_, AdapterMap> {
        self.adapters.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests;
