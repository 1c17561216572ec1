//! Tools proxied to an external server over a persistent JSON-RPC connection.

pub mod connection;
pub mod rpc;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{ProviderKind, ToolDescriptor};
use crate::error::{CoreError, CoreResult};

use super::outcome::{ToolErrorKind, ToolFailure, ToolOutcome};
use super::ProviderAdapter;

pub use connection::{RemoteCallError, RemoteConnection};
use rpc::{error_codes, InvokeToolParams, InvokeToolResult, ListToolsResult, RpcError};

pub struct RemoteProvider {
    connection: Arc<RemoteConnection>,
    descriptors: RwLock<Vec<ToolDescriptor>>,
    default_priority: i32,
}

impl RemoteProvider {
    pub fn new(connection: Arc<RemoteConnection>) -> Self {
        Self {
            connection,
            descriptors: RwLock::new(Vec::new()),
            default_priority: 0,
        }
    }

    /// Priority given to discovered tools that do not declare one.
    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    /// Declare the capability set up front instead of discovering it.
    pub fn with_descriptors(self, descriptors: Vec<ToolDescriptor>) -> Self {
        self.store_descriptors(descriptors);
        self
    }

    pub fn connection(&self) -> &Arc<RemoteConnection> {
        &self.connection
    }

    /// Ask the server for its tool list and adopt it as this provider's
    /// complete capability set.
    pub async fn discover(&self, timeout: Duration) -> CoreResult<Vec<ToolDescriptor>> {
        let result = self
            .connection
            .request(rpc::METHOD_LIST_TOOLS, None, timeout)
            .await
            .map_err(|error| CoreError::Internal(format!("list_tools failed: {error}")))?;
        let listed: ListToolsResult = serde_json::from_value(result).map_err(|error| {
            CoreError::Internal(format!("failed to parse list_tools response: {error}"))
        })?;

        let descriptors: Vec<ToolDescriptor> = listed
            .tools
            .into_iter()
            .map(|info| info.into_descriptor(self.default_priority))
            .collect();
        tracing::debug!(count = descriptors.len(), "remote tools discovered");
        self.store_descriptors(descriptors.clone());
        Ok(descriptors)
    }

    fn store_descriptors(&self, descriptors: Vec<ToolDescriptor>) {
        let descriptors = descriptors
            .into_iter()
            .map(|mut descriptor| {
                descriptor.provider_kind = ProviderKind::Remote;
                descriptor
            })
            .collect();
        match self.descriptors.write() {
            Ok(mut guard) => *guard = descriptors,
            Err(poisoned) => *poisoned.into_inner() = descriptors,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        match self.descriptors.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn invoke(
        &self,
        name: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> ToolOutcome {
        let request = InvokeToolParams {
            tool_id: name.to_string(),
            args: params.clone(),
        };
        let request = serde_json::to_value(request).map_err(|error| {
            failure(
                ToolErrorKind::ParameterValidationError,
                format!("failed to serialize invoke params: {error}"),
            )
        })?;

        match self
            .connection
            .request(rpc::METHOD_INVOKE_TOOL, Some(request), timeout)
            .await
        {
            // Any reply means the tool already ran; an unreadable one stays soft.
            Ok(result) => match InvokeToolResult::deserialize(&result) {
                Ok(result) => Ok(result.output),
                Err(error) => Err(failure(
                    ToolErrorKind::RuntimeError,
                    format!("malformed invoke_tool result ({error}): {result}"),
                )),
            },
            Err(RemoteCallError::ConnectionLost(message)) => {
                Err(failure(ToolErrorKind::ConnectionLost, message))
            }
            Err(RemoteCallError::Timeout) => Err(failure(
                ToolErrorKind::RemoteTimeout,
                format!("'{name}' did not answer within {}ms", timeout.as_millis()),
            )),
            Err(RemoteCallError::Rpc(error)) => Err(rpc_failure(error)),
            Err(RemoteCallError::Protocol(message)) => {
                Err(failure(ToolErrorKind::RuntimeError, message))
            }
        }
    }
}

fn failure(kind: ToolErrorKind, message: impl Into<String>) -> ToolFailure {
    ToolFailure::from_provider(ProviderKind::Remote, kind, message)
}

fn rpc_failure(error: RpcError) -> ToolFailure {
    let kind = match error.code {
        error_codes::METHOD_NOT_FOUND => ToolErrorKind::NameNotFound,
        error_codes::INVALID_PARAMS => ToolErrorKind::ParameterValidationError,
        error_codes::TOOL_EXECUTION_ERROR => ToolErrorKind::RuntimeError,
        _ => ToolErrorKind::RemoteRejected,
    };
    failure(kind, format!("{} (code {})", error.message, error.code))
}
