use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Duration;

use super::*;
use crate::config::ProviderPreferences;
use crate::ledger::{InvocationQuery, InvocationStatus};
use crate::provider::remote::rpc::{RpcRequest, RpcResponse};
use crate::provider::{
    LocalProvider, RemoteConnection, RemoteProvider, SandboxFault, SandboxRuntime,
    SandboxedProvider,
};

const WINDOW: u64 = 30_000;

/// Adapter that answers from a script and counts its calls.
struct Scripted {
    kind: ProviderKind,
    tools: Vec<ToolDescriptor>,
    reply: Box<dyn Fn(usize) -> ToolOutcome + Send + Sync>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(
        kind: ProviderKind,
        tools: &[(&str, i32)],
        reply: impl Fn(usize) -> ToolOutcome + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            tools: tools
                .iter()
                .map(|(name, priority)| ToolDescriptor::new(*name, kind, *priority))
                .collect(),
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
        })
    }

    fn ok(kind: ProviderKind, tools: &[(&str, i32)], value: serde_json::Value) -> Arc<Self> {
        Self::new(kind, tools, move |_| Ok(value.clone()))
    }

    fn failing(kind: ProviderKind, tools: &[(&str, i32)], error: ToolErrorKind) -> Arc<Self> {
        Self::new(kind, tools, move |_| Err(ToolFailure::from_provider(kind, error, "scripted")))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for Scripted {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    async fn invoke(
        &self,
        _name: &str,
        _params: &serde_json::Value,
        _timeout: Duration,
    ) -> ToolOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(call)
    }
}

/// In-memory JSON-RPC server answering each request with `reply(request)`.
fn rpc_server<F>(reply: F) -> Arc<RemoteConnection>
where
    F: Fn(RpcRequest) -> RpcResponse + Send + 'static,
{
    let (client, server) = duplex(64 * 1024);
    let (client_read, client_write) = split(client);
    let (server_read, mut server_write) = split(server);
    tokio::spawn(async move {
        let mut lines = BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: RpcRequest = serde_json::from_str(&line).expect("request");
            let mut out = serde_json::to_vec(&reply(request)).expect("encode");
            out.push(b'\n');
            if server_write.write_all(&out).await.is_err() {
                break;
            }
        }
    });
    Arc::new(RemoteConnection::new(client_read, client_write))
}

/// Well-behaved server answering `invoke_tool` with `{"output": ...}`.
fn remote_server<F>(reply: F) -> Arc<RemoteConnection>
where
    F: Fn(RpcRequest) -> serde_json::Value + Send + 'static,
{
    rpc_server(move |request| {
        let id = request.id;
        RpcResponse::success(id, json!({"output": reply(request)}))
    })
}

fn count_entries(dispatcher: &Dispatcher, session_id: &str, tool_name: &str) -> usize {
    dispatcher
        .reader()
        .query(&InvocationQuery::new().session(session_id).tool(tool_name))
        .len()
}

#[tokio::test]
async fn local_handler_round_trip() {
    let mut local = LocalProvider::new();
    local
        .register(ToolDescriptor::new("echo", ProviderKind::Local, 0), |params| async move {
            Ok(params)
        })
        .unwrap();
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(Arc::new(local)).unwrap();

    let result = dispatcher.invoke("s", "echo", json!({"x": 1})).await;
    assert_eq!(result.outcome, Ok(json!({"x": 1})));
    assert_eq!(result.provider, Some(ProviderKind::Local));
    assert_eq!(dispatcher.list_tools(), vec!["echo".to_string()]);
}

#[tokio::test]
async fn first_candidate_success_records_one_completed_entry() {
    let local = Scripted::ok(ProviderKind::Local, &[("gc_content", 0)], json!({"gc": 0.42}));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();

    let result = dispatcher.invoke("run-1", "gc_content", json!({"sequence": "GCAT"})).await;
    assert_eq!(result.outcome, Ok(json!({"gc": 0.42})));
    assert_eq!(local.calls(), 1);

    let reader = dispatcher.reader();
    let entries = reader.query(&InvocationQuery::new().session("run-1"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, InvocationStatus::Completed);
    assert_eq!(entries[0].parameters, json!({"sequence": "GCAT"}));

    let found = reader.most_recent_success("run-1", "gc_content", WINDOW).unwrap();
    assert_eq!(found.id, result.invocation_id);
    assert!(reader.recently_succeeded("run-1", "gc_content"));
}

#[tokio::test]
async fn hard_failure_falls_back_within_one_entry() {
    let sandboxed = Scripted::failing(
        ProviderKind::Sandboxed,
        &[("t", 0)],
        ToolErrorKind::SandboxCrash,
    );
    let remote = Scripted::ok(ProviderKind::Remote, &[("t", 0)], json!("remote"));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(sandboxed.clone()).unwrap();
    dispatcher.register_provider(remote.clone()).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    assert_eq!(result.outcome, Ok(json!("remote")));
    assert_eq!(result.provider, Some(ProviderKind::Remote));
    assert_eq!((sandboxed.calls(), remote.calls()), (1, 1));

    assert_eq!(count_entries(&dispatcher, "s", "t"), 1);
    let entry = dispatcher.reader().get(&result.invocation_id).unwrap();
    assert_eq!(entry.status, InvocationStatus::Completed);
    assert_eq!(entry.provider, Some(ProviderKind::Remote));
    assert_eq!(entry.attempts.len(), 2);
    assert_eq!(
        entry.attempts[0].error.as_ref().map(|failure| failure.kind),
        Some(ToolErrorKind::SandboxCrash)
    );
    assert!(entry.attempts[1].error.is_none());
}

#[tokio::test]
async fn every_hard_failure_kind_triggers_fallback() {
    let hard = [
        ToolErrorKind::NameNotFound,
        ToolErrorKind::LocalTimeout,
        ToolErrorKind::SandboxTimeout,
        ToolErrorKind::SandboxCrash,
        ToolErrorKind::PermissionDenied,
        ToolErrorKind::ConnectionLost,
        ToolErrorKind::RemoteTimeout,
        ToolErrorKind::RemoteRejected,
    ];
    for kind in hard {
        let local = Scripted::failing(ProviderKind::Local, &[("t", 0)], kind);
        let remote = Scripted::ok(ProviderKind::Remote, &[("t", 0)], json!(1));
        let dispatcher = Dispatcher::default();
        dispatcher.register_provider(local).unwrap();
        dispatcher.register_provider(remote.clone()).unwrap();

        let result = dispatcher.invoke("s", "t", json!({})).await;
        assert!(result.is_success(), "{kind:?} should fall back");
        assert_eq!(remote.calls(), 1);
    }
}

#[tokio::test]
async fn all_hard_failures_exhaust_candidates() {
    let local = Scripted::failing(ProviderKind::Local, &[("t", 0)], ToolErrorKind::LocalTimeout);
    let sandboxed = Scripted::failing(
        ProviderKind::Sandboxed,
        &[("t", 0)],
        ToolErrorKind::PermissionDenied,
    );
    let remote = Scripted::failing(
        ProviderKind::Remote,
        &[("t", 0)],
        ToolErrorKind::ConnectionLost,
    );
    let dispatcher = Dispatcher::default();
    for adapter in [local.clone(), sandboxed.clone(), remote.clone()] {
        dispatcher.register_provider(adapter).unwrap();
    }

    let result = dispatcher.invoke("s", "t", json!({})).await;
    let failure = result.outcome.clone().unwrap_err();
    assert_eq!(failure.kind, ToolErrorKind::AllCandidatesExhausted);
    assert!(failure.provider.is_none());
    assert!(failure.message.contains("permission_denied"));
    assert_eq!((local.calls(), sandboxed.calls(), remote.calls()), (1, 1, 1));

    let reader = dispatcher.reader();
    let entry = reader.get(&result.invocation_id).unwrap();
    assert_eq!(entry.status, InvocationStatus::Failed);
    assert_eq!(entry.attempts.len(), 3);
    assert_eq!(count_entries(&dispatcher, "s", "t"), 1);
    assert!(reader.most_recent_success("s", "t", WINDOW).is_none());
}

#[tokio::test]
async fn soft_failure_is_returned_without_fallback() {
    let local = Scripted::failing(
        ProviderKind::Local,
        &[("t", 0)],
        ToolErrorKind::ParameterValidationError,
    );
    let remote = Scripted::ok(ProviderKind::Remote, &[("t", 0)], json!(1));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();
    dispatcher.register_provider(remote.clone()).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, ToolErrorKind::ParameterValidationError);
    assert_eq!(failure.provider, Some(ProviderKind::Local));
    assert_eq!(local.calls(), 1);
    assert_eq!(remote.calls(), 0);

    let entry = dispatcher.reader().get(&result.invocation_id).unwrap();
    assert_eq!(entry.status, InvocationStatus::Failed);
    assert_eq!(entry.error.unwrap().kind, ToolErrorKind::ParameterValidationError);
}

#[tokio::test]
async fn runtime_error_is_soft() {
    let local = Scripted::failing(ProviderKind::Local, &[("t", 0)], ToolErrorKind::RuntimeError);
    let remote = Scripted::ok(ProviderKind::Remote, &[("t", 0)], json!(1));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local).unwrap();
    dispatcher.register_provider(remote.clone()).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    assert_eq!(result.outcome.unwrap_err().kind, ToolErrorKind::RuntimeError);
    assert_eq!(remote.calls(), 0);
}

#[tokio::test]
async fn schema_violation_in_local_provider_blocks_fallback() {
    let mut local = LocalProvider::new();
    local
        .register(
            ToolDescriptor::new("navigate_to_position", ProviderKind::Local, 1).with_schema(json!({
                "type": "object",
                "properties": {"position": {"type": "integer"}},
                "required": ["position"]
            })),
            |_params| async move { Ok(json!("moved")) },
        )
        .unwrap();
    let remote = Scripted::ok(ProviderKind::Remote, &[("navigate_to_position", 2)], json!(1));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(Arc::new(local)).unwrap();
    dispatcher.register_provider(remote.clone()).unwrap();

    let result = dispatcher
        .invoke("s", "navigate_to_position", json!({"position": "far"}))
        .await;
    assert_eq!(
        result.outcome.unwrap_err().kind,
        ToolErrorKind::ParameterValidationError
    );
    assert_eq!(remote.calls(), 0);
}

#[tokio::test]
async fn navigate_falls_back_from_local_to_remote() {
    let local = Scripted::new(ProviderKind::Local, &[("navigate_to_position", 1)], |call| {
        if call == 0 {
            Err(ToolFailure::from_provider(
                ProviderKind::Local,
                ToolErrorKind::LocalTimeout,
                "genome view not ready",
            ))
        } else {
            Ok(json!({"moved_to": "local"}))
        }
    });
    let remote_calls = Arc::new(AtomicUsize::new(0));
    let counter = remote_calls.clone();
    let connection = remote_server(move |request| {
        counter.fetch_add(1, Ordering::SeqCst);
        let params = request.params.unwrap_or_default();
        json!({"moved_to": params["args"]["position"]})
    });
    let remote = RemoteProvider::new(connection).with_descriptors(vec![ToolDescriptor::new(
        "navigate_to_position",
        ProviderKind::Remote,
        2,
    )]);

    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();
    dispatcher.register_provider(Arc::new(remote)).unwrap();

    let result = dispatcher
        .invoke("bench-1", "navigate_to_position", json!({"position": 100000}))
        .await;
    assert_eq!(result.outcome, Ok(json!({"moved_to": 100000})));
    assert_eq!(result.provider, Some(ProviderKind::Remote));
    assert_eq!(local.calls(), 1);
    assert_eq!(remote_calls.load(Ordering::SeqCst), 1);

    let reader = dispatcher.reader();
    let entries = reader.query(&InvocationQuery::new().tool("navigate_to_position"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, InvocationStatus::Completed);
    let expected = json!({"position": 100000});
    assert!(reader
        .most_recent_success_matching("bench-1", "navigate_to_position", WINDOW, &expected)
        .is_some());
}

#[tokio::test]
async fn remote_reply_after_execution_is_never_retried_elsewhere() {
    let remote_calls = Arc::new(AtomicUsize::new(0));
    let counter = remote_calls.clone();
    // The tool ran, but the reply lacks the `output` wrapper.
    let connection = rpc_server(move |request| {
        counter.fetch_add(1, Ordering::SeqCst);
        RpcResponse::success(request.id, json!({"annotation_id": 7}))
    });
    let remote = RemoteProvider::new(connection).with_descriptors(vec![ToolDescriptor::new(
        "add_annotation",
        ProviderKind::Remote,
        0,
    )]);
    let local = Scripted::ok(
        ProviderKind::Local,
        &[("add_annotation", 1)],
        json!({"annotation_id": 8}),
    );

    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(Arc::new(remote)).unwrap();
    dispatcher.register_provider(local.clone()).unwrap();

    let result = dispatcher
        .invoke("s", "add_annotation", json!({"label": "exon 2"}))
        .await;
    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, ToolErrorKind::RuntimeError);
    assert_eq!(failure.provider, Some(ProviderKind::Remote));
    assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
    assert_eq!(local.calls(), 0);

    let entries = dispatcher
        .reader()
        .query(&InvocationQuery::new().tool("add_annotation"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, InvocationStatus::Failed);
    assert_eq!(entries[0].attempts.len(), 1);
}

struct NeverReturns;

#[async_trait]
impl SandboxRuntime for NeverReturns {
    async fn execute(
        &self,
        _tool: &str,
        _params: &serde_json::Value,
    ) -> Result<serde_json::Value, SandboxFault> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn sandbox_that_always_times_out_exhausts() {
    let sandboxed = SandboxedProvider::new(
        Arc::new(NeverReturns),
        vec![ToolDescriptor::new("detectNetworkCommunities", ProviderKind::Sandboxed, 0)],
    );
    let mut config = RuntimeConfig::default();
    config.providers = ProviderPreferences {
        sandbox_timeout_ms: 2_000,
        ..ProviderPreferences::default()
    };
    let dispatcher = Dispatcher::new(config);
    dispatcher.register_provider(Arc::new(sandboxed)).unwrap();

    let result = dispatcher
        .invoke("bench-2", "detectNetworkCommunities", json!({"graph": "g1"}))
        .await;
    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, ToolErrorKind::AllCandidatesExhausted);

    let reader = dispatcher.reader();
    let entry = reader.get(&result.invocation_id).unwrap();
    assert_eq!(
        entry.attempts[0].error.as_ref().map(|failure| failure.kind),
        Some(ToolErrorKind::SandboxTimeout)
    );
    assert!(reader
        .most_recent_success("bench-2", "detectNetworkCommunities", WINDOW)
        .is_none());
}

#[tokio::test]
async fn unknown_name_fails_without_calling_adapters() {
    let remote = Scripted::ok(ProviderKind::Remote, &[("other", 0)], json!(1));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(remote.clone()).unwrap();

    let result = dispatcher.invoke("s", "missing", json!({})).await;
    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.kind, ToolErrorKind::NameNotFound);
    assert_eq!(remote.calls(), 0);

    let entry = dispatcher.reader().get(&result.invocation_id).unwrap();
    assert_eq!(entry.status, InvocationStatus::Failed);
    assert!(entry.attempts.is_empty());
}

#[tokio::test]
async fn names_are_case_sensitive() {
    let local = Scripted::ok(ProviderKind::Local, &[("GetGeneInfo", 0)], json!(1));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();

    let result = dispatcher.invoke("s", "getgeneinfo", json!({})).await;
    assert_eq!(result.outcome.unwrap_err().kind, ToolErrorKind::NameNotFound);
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn registered_kind_without_adapter_is_skipped() {
    let sandboxed = Scripted::ok(ProviderKind::Sandboxed, &[("t", 0)], json!("sandbox"));
    let dispatcher = Dispatcher::default();
    dispatcher
        .register(ProviderKind::Local, vec![ToolDescriptor::new("t", ProviderKind::Local, 0)])
        .unwrap();
    dispatcher.register_provider(sandboxed).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    assert_eq!(result.outcome, Ok(json!("sandbox")));

    let entry = dispatcher.reader().get(&result.invocation_id).unwrap();
    assert_eq!(entry.attempts.len(), 2);
    let first = entry.attempts[0].error.as_ref().unwrap();
    assert_eq!(first.kind, ToolErrorKind::NameNotFound);
    assert_eq!(first.provider, Some(ProviderKind::Local));
}

#[tokio::test]
async fn priority_beats_provider_kind_order() {
    let local = Scripted::ok(ProviderKind::Local, &[("t", 5)], json!("local"));
    let remote = Scripted::ok(ProviderKind::Remote, &[("t", 1)], json!("remote"));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();
    dispatcher.register_provider(remote).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    assert_eq!(result.outcome, Ok(json!("remote")));
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn failure_provider_defaults_to_candidate_kind() {
    let remote = Scripted::new(ProviderKind::Remote, &[("t", 0)], |_| {
        Err(ToolFailure::new(ToolErrorKind::RuntimeError, "boom"))
    });
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(remote).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    assert_eq!(result.provider, Some(ProviderKind::Remote));
    assert_eq!(result.outcome.unwrap_err().provider, Some(ProviderKind::Remote));
}

#[tokio::test(start_paused = true)]
async fn adapter_ignoring_its_timeout_is_cut_off() {
    struct Stuck;

    #[async_trait]
    impl ProviderAdapter for Stuck {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Remote
        }

        fn descriptors(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor::new("t", ProviderKind::Remote, 0)]
        }

        async fn invoke(
            &self,
            _name: &str,
            _params: &serde_json::Value,
            _timeout: Duration,
        ) -> ToolOutcome {
            std::future::pending().await
        }
    }

    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(Arc::new(Stuck)).unwrap();

    let result = dispatcher.invoke("s", "t", json!({})).await;
    assert_eq!(result.outcome.unwrap_err().kind, ToolErrorKind::AllCandidatesExhausted);
    let entry = dispatcher.reader().get(&result.invocation_id).unwrap();
    assert_eq!(
        entry.attempts[0].error.as_ref().map(|failure| failure.kind),
        Some(ToolErrorKind::RemoteTimeout)
    );
}

#[tokio::test]
async fn invoke_many_records_one_entry_per_request() {
    let local = Scripted::ok(ProviderKind::Local, &[("a", 0), ("b", 0)], json!("ok"));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();

    let results = dispatcher
        .invoke_many(vec![
            InvocationRequest::new("s1", "a", json!({})),
            InvocationRequest::new("s2", "missing", json!({})),
            InvocationRequest::new("s1", "b", json!({})),
            InvocationRequest::new("s1", "a", json!({"again": true})),
        ])
        .await;

    let successes: Vec<bool> = results.iter().map(DispatchResult::is_success).collect();
    assert_eq!(successes, vec![true, false, true, true]);
    assert_eq!(local.calls(), 3);
    assert_ne!(results[0].invocation_id, results[3].invocation_id);
    assert_eq!(dispatcher.reader().query(&InvocationQuery::new()).len(), 4);
    assert_eq!(count_entries(&dispatcher, "s1", "a"), 2);
}

#[tokio::test]
async fn concurrent_invocations_never_share_entries() {
    let dispatcher = Arc::new(Dispatcher::default());
    dispatcher
        .register_provider(Scripted::ok(ProviderKind::Local, &[("t", 0)], json!(1)))
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..16 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.invoke("s", "t", json!({ "n": n })).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    let summary = dispatcher.reader().summary("s").unwrap();
    assert_eq!(summary.completed, 16);
    assert_eq!(summary.pending, 0);
}

#[tokio::test]
async fn reregistering_replaces_the_descriptor_set() {
    let dispatcher = Dispatcher::default();
    dispatcher
        .register_provider(Scripted::ok(ProviderKind::Local, &[("old", 0)], json!(1)))
        .unwrap();
    dispatcher
        .register_provider(Scripted::ok(ProviderKind::Local, &[("new", 0)], json!(1)))
        .unwrap();

    assert_eq!(dispatcher.list_tools(), vec!["new".to_string()]);
    let result = dispatcher.invoke("s", "old", json!({})).await;
    assert_eq!(result.outcome.unwrap_err().kind, ToolErrorKind::NameNotFound);
}

#[tokio::test]
async fn unregister_provider_removes_tools() {
    let local = Scripted::ok(ProviderKind::Local, &[("a", 0)], json!(1));
    let dispatcher = Dispatcher::default();
    dispatcher.register_provider(local.clone()).unwrap();
    dispatcher.unregister_provider(ProviderKind::Local);

    assert!(dispatcher.list_tools().is_empty());
    let result = dispatcher.invoke("s", "a", json!({})).await;
    assert_eq!(result.outcome.unwrap_err().kind, ToolErrorKind::NameNotFound);
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn shared_ledger_survives_dispatcher() {
    let ledger = Arc::new(ExecutionLedger::default());
    {
        let dispatcher = Dispatcher::with_ledger(RuntimeConfig::default(), ledger.clone());
        dispatcher
            .register_provider(Scripted::ok(ProviderKind::Local, &[("t", 0)], json!(1)))
            .unwrap();
        dispatcher.invoke("s", "t", json!({})).await;
    }
    assert!(ledger.most_recent_success("s", "t", WINDOW).is_some());
}

#[tokio::test]
async fn opened_session_keeps_metadata_across_calls() {
    let dispatcher = Dispatcher::default();
    dispatcher
        .register_provider(Scripted::ok(ProviderKind::Local, &[("t", 0)], json!(1)))
        .unwrap();
    let mut metadata = serde_json::Map::new();
    metadata.insert("task".to_string(), json!("bench-7"));

    let opened = dispatcher.open_session("s", metadata);
    assert!(opened.invocation_ids.is_empty());
    dispatcher.invoke("s", "t", json!({})).await;

    let session = dispatcher.reader().session("s").unwrap();
    assert_eq!(session.metadata["task"], "bench-7");
    assert_eq!(session.invocation_ids.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retention_sweeper_applies_configured_cap() {
    let mut config = RuntimeConfig::default();
    config.ledger.retention_max_per_session = 1;
    config.ledger.sweep_interval_ms = 1_000;
    let dispatcher = Dispatcher::new(config);
    dispatcher
        .register_provider(Scripted::ok(ProviderKind::Local, &[("t", 0)], json!(1)))
        .unwrap();
    let first = dispatcher.invoke("s", "t", json!({})).await;
    let second = dispatcher.invoke("s", "t", json!({})).await;

    let sweeper = dispatcher.spawn_retention_sweeper();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let reader = dispatcher.reader();
    assert!(reader.get(&first.invocation_id).is_none());
    assert!(reader.get(&second.invocation_id).is_some());
    sweeper.abort();
}
