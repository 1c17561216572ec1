//! In-process tool provider.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{ProviderKind, ToolDescriptor};
use crate::error::{CoreError, CoreResult};
use crate::schema::ParameterSchema;

use super::outcome::{ToolErrorKind, ToolFailure, ToolOutcome};
use super::ProviderAdapter;

/// Async handler for an in-process tool.
///
/// `CoreError::InvalidInput` from a handler is reported as a parameter
/// validation failure; any other error is a runtime error.
pub type LocalToolHandler = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = CoreResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

pub fn boxed_tool_future<F>(
    future: F,
) -> Pin<Box<dyn Future<Output = CoreResult<serde_json::Value>> + Send>>
where
    F: Future<Output = CoreResult<serde_json::Value>> + Send + 'static,
{
    Box::pin(future)
}

struct LocalTool {
    descriptor: ToolDescriptor,
    schema: Option<ParameterSchema>,
    handler: LocalToolHandler,
}

/// Provider running tool handlers directly on the runtime.
#[derive(Default)]
pub struct LocalProvider {
    tools: HashMap<String, LocalTool>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `descriptor.name`, replacing any earlier one.
    pub fn register<F, Fut>(&mut self, descriptor: ToolDescriptor, handler: F) -> CoreResult<()>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<serde_json::Value>> + Send + 'static,
    {
        let handler: LocalToolHandler = Arc::new(move |params| boxed_tool_future(handler(params)));
        self.register_handler(descriptor, handler)
    }

    pub fn register_handler(
        &mut self,
        mut descriptor: ToolDescriptor,
        handler: LocalToolHandler,
    ) -> CoreResult<()> {
        if descriptor.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("local tool without a name".to_string()));
        }
        let schema = descriptor
            .parameter_schema
            .as_ref()
            .map(ParameterSchema::compile)
            .transpose()?;
        descriptor.provider_kind = ProviderKind::Local;
        self.tools.insert(
            descriptor.name.clone(),
            LocalTool {
                descriptor,
                schema,
                handler,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|tool| tool.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    async fn invoke(
        &self,
        name: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> ToolOutcome {
        let tool = self.tools.get(name).ok_or_else(|| {
            ToolFailure::from_provider(
                ProviderKind::Local,
                ToolErrorKind::NameNotFound,
                format!("no local tool named '{name}'"),
            )
        })?;

        if let Some(schema) = &tool.schema {
            schema.validate(params).map_err(|violations| {
                ToolFailure::from_provider(
                    ProviderKind::Local,
                    ToolErrorKind::ParameterValidationError,
                    violations.join("; "),
                )
            })?;
        }

        // Spawned so a panicking handler surfaces as a runtime error and an
        // expired one can be aborted.
        let mut task = tokio::spawn((tool.handler)(params.clone()));
        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(ToolFailure::from_provider(
                    ProviderKind::Local,
                    ToolErrorKind::LocalTimeout,
                    format!("'{name}' did not finish within {}ms", timeout.as_millis()),
                ));
            }
        };

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(CoreError::InvalidInput(message))) => Err(ToolFailure::from_provider(
                ProviderKind::Local,
                ToolErrorKind::ParameterValidationError,
                message,
            )),
            Ok(Err(error)) => Err(ToolFailure::from_provider(
                ProviderKind::Local,
                ToolErrorKind::RuntimeError,
                error.to_string(),
            )),
            Err(join_error) => Err(ToolFailure::from_provider(
                ProviderKind::Local,
                ToolErrorKind::RuntimeError,
                format!("'{name}' aborted: {join_error}"),
            )),
        }
    }
}
