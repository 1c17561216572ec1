pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod schema;
pub mod utils;

pub use crate::catalog::{Candidate, ProviderKind, ToolCatalog, ToolDescriptor};
pub use crate::config::{load_or_create_runtime_config, RuntimeConfig};
pub use crate::dispatcher::{DispatchResult, Dispatcher, InvocationRequest};
pub use crate::error::{CoreError, CoreResult};
pub use crate::ledger::{
    ExecutionLedger, Invocation, InvocationId, InvocationQuery, InvocationStatus, LedgerReader,
};
pub use crate::provider::{
    LocalProvider, ProviderAdapter, RemoteProvider, SandboxedProvider, ToolErrorKind, ToolFailure,
    ToolOutcome,
};
