//! Provider adapters: one uniform invoke contract over in-process, sandboxed
//! and remote tool implementations.

pub mod local;
pub mod outcome;
pub mod remote;
pub mod sandbox;

use std::time::Duration;

use crate::catalog::{ProviderKind, ToolDescriptor};

pub use local::{boxed_tool_future, LocalProvider, LocalToolHandler};
pub use outcome::{ToolErrorKind, ToolFailure, ToolOutcome};
pub use remote::{RemoteConnection, RemoteProvider};
pub use sandbox::{ProcessSandbox, SandboxFault, SandboxRuntime, SandboxedProvider};

/// Contract every provider kind implements.
///
/// Adapters never write to the ledger; the dispatcher records outcomes.
/// Every call must return within `timeout` (plus scheduling slack), reporting
/// expiry as the timeout kind for its provider.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Complete capability set this provider currently declares.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    async fn invoke(
        &self,
        name: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> ToolOutcome;
}
